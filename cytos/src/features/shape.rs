use std::f64::consts::PI;

use crate::sample::{BBox, Mask, Sample};

use super::{FeatureExtractor, FeatureGroup};

pub const SHAPE_PROPS: [&str; 10] = [
    "area",
    "perimeter",
    "eccentricity",
    "major_axis_length",
    "minor_axis_length",
    "orientation",
    "equivalent_diameter",
    "extent",
    "convex_area",
    "solidity",
];

/// Region descriptors of one binary mask.
///
/// Axis lengths and eccentricity come from the second central moments, as for
/// the ellipse with the same normalized moments. Perimeter counts pixel edges
/// between the region and its outside. The convex hull is taken over pixel
/// centres.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShapeProps {
    pub area: f64,
    pub perimeter: f64,
    pub eccentricity: f64,
    pub major_axis_length: f64,
    pub minor_axis_length: f64,
    pub orientation: f64,
    pub equivalent_diameter: f64,
    pub extent: f64,
    pub convex_area: f64,
    pub solidity: f64,
}

impl ShapeProps {
    /// Descriptors of `mask`; all zero when the mask is empty.
    pub fn from_mask(mask: &Mask) -> Self {
        let Some(bbox) = BBox::from_mask(mask) else {
            return Self::default();
        };

        let mut points: Vec<(i64, i64)> = Vec::new();
        let mut perimeter = 0usize;
        for y in bbox.min_row..bbox.max_row {
            for x in bbox.min_col..bbox.max_col {
                if !mask[(x, y)] {
                    continue;
                }
                points.push((x as i64, y as i64));
                for (dx, dy) in crate::imgproc::NEIGHBOURS_4 {
                    if mask.get_checked(x as isize + dx, y as isize + dy) != Some(&true) {
                        perimeter += 1;
                    }
                }
            }
        }

        let n = points.len() as f64;
        let (sum_c, sum_r) = points
            .iter()
            .fold((0.0, 0.0), |(sc, sr), &(x, y)| (sc + x as f64, sr + y as f64));
        let (mean_c, mean_r) = (sum_c / n, sum_r / n);
        let (mut var_r, mut var_c, mut cov) = (0.0, 0.0, 0.0);
        for &(x, y) in &points {
            let dr = y as f64 - mean_r;
            let dc = x as f64 - mean_c;
            var_r += dr * dr;
            var_c += dc * dc;
            cov += dr * dc;
        }
        var_r /= n;
        var_c /= n;
        cov /= n;

        let half_trace = (var_r + var_c) / 2.0;
        let spread = (((var_r - var_c) / 2.0).powi(2) + cov * cov).sqrt();
        let l1 = half_trace + spread;
        let l2 = (half_trace - spread).max(0.0);
        let eccentricity = if l1 > 0.0 { (1.0 - l2 / l1).sqrt() } else { 0.0 };

        // inertia tensor [[var_c, -cov], [-cov, var_r]]
        let (a, b, c) = (var_c, -cov, var_r);
        let orientation = if a - c == 0.0 {
            if b < 0.0 { -PI / 4.0 } else { PI / 4.0 }
        } else {
            0.5 * (-2.0 * b).atan2(c - a)
        };

        let convex_area = convex_hull_area(&points, bbox) as f64;

        Self {
            area: n,
            perimeter: perimeter as f64,
            eccentricity,
            major_axis_length: 4.0 * l1.sqrt(),
            minor_axis_length: 4.0 * l2.sqrt(),
            orientation,
            equivalent_diameter: (4.0 * n / PI).sqrt(),
            extent: n / bbox.area() as f64,
            convex_area,
            solidity: n / convex_area,
        }
    }

    /// Values in [`SHAPE_PROPS`] order.
    pub fn to_array(&self) -> [f64; 10] {
        [
            self.area,
            self.perimeter,
            self.eccentricity,
            self.major_axis_length,
            self.minor_axis_length,
            self.orientation,
            self.equivalent_diameter,
            self.extent,
            self.convex_area,
            self.solidity,
        ]
    }
}

#[inline]
fn cross(o: (i64, i64), a: (i64, i64), b: (i64, i64)) -> i64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Counter-clockwise hull (monotone chain), collinear points dropped.
///
/// All-collinear input yields its two endpoints.
fn convex_hull(points: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut pts = points.to_vec();
    pts.sort_unstable();
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<(i64, i64)> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    // the upper chain never pops into the lower one
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a.abs() } else { gcd(b, a % b) }
}

/// Lattice points inside or on the hull of `points`.
fn convex_hull_area(points: &[(i64, i64)], bbox: BBox) -> usize {
    let hull = convex_hull(points);
    match hull.len() {
        0 => 0,
        1 => 1,
        2 => {
            let (a, b) = (hull[0], hull[1]);
            gcd(b.0 - a.0, b.1 - a.1) as usize + 1
        }
        _ => {
            let mut count = 0;
            for y in bbox.min_row..bbox.max_row {
                for x in bbox.min_col..bbox.max_col {
                    let p = (x as i64, y as i64);
                    let inside = (0..hull.len())
                        .all(|i| cross(hull[i], hull[(i + 1) % hull.len()], p) >= 0);
                    if inside {
                        count += 1;
                    }
                }
            }
            count
        }
    }
}

/// Region shape of every channel mask and of the combined mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeFeatures;

impl FeatureExtractor for ShapeFeatures {
    fn group(&self) -> FeatureGroup {
        FeatureGroup::Shape
    }

    fn columns(&self, channels: &[String]) -> Vec<String> {
        let mut columns = Vec::with_capacity((channels.len() + 1) * SHAPE_PROPS.len());
        for ch in channels {
            columns.extend(SHAPE_PROPS.iter().map(|p| format!("{p}_{ch}")));
        }
        columns.extend(SHAPE_PROPS.iter().map(|p| format!("combined_{p}")));
        columns
    }

    fn extract(&self, sample: &Sample, out: &mut Vec<f64>) {
        for mask in sample.mask() {
            out.extend(ShapeProps::from_mask(mask).to_array());
        }
        out.extend(ShapeProps::from_mask(sample.combined_mask()).to_array());
    }
}

#[cfg(test)]
mod tests {
    use common::{Buffer2, FloatExt};

    use super::*;

    fn rect(width: usize, height: usize, x0: usize, y0: usize, w: usize, h: usize) -> Mask {
        Buffer2::from_fn(width, height, |x, y| {
            (x0..x0 + w).contains(&x) && (y0..y0 + h).contains(&y)
        })
    }

    #[test]
    fn test_square_props() {
        let props = ShapeProps::from_mask(&rect(8, 8, 2, 2, 4, 4));
        assert_eq!(props.area, 16.0);
        assert_eq!(props.perimeter, 16.0);
        assert_eq!(props.extent, 1.0);
        assert_eq!(props.convex_area, 16.0);
        assert_eq!(props.solidity, 1.0);
        assert!(props.eccentricity.approximately_eq(0.0));
        assert!(props.major_axis_length.approximately_eq(props.minor_axis_length));
        assert!(props.equivalent_diameter.approximately_eq((64.0 / PI).sqrt()));
    }

    #[test]
    fn test_horizontal_bar_orientation() {
        // elongated along columns
        let props = ShapeProps::from_mask(&rect(12, 5, 1, 2, 9, 1));
        assert!(props.eccentricity > 0.99);
        assert!(props.minor_axis_length.abs() < 1e-9);
        assert!((props.orientation.abs() - PI / 2.0).abs() < 1e-9);
        assert_eq!(props.convex_area, 9.0);
    }

    #[test]
    fn test_l_shape_is_not_convex() {
        let mut mask = rect(6, 6, 0, 0, 4, 4);
        for y in 0..2 {
            for x in 2..4 {
                mask[(x, y)] = false;
            }
        }
        let props = ShapeProps::from_mask(&mask);
        assert_eq!(props.area, 12.0);
        assert!(props.convex_area > 12.0);
        assert!(props.solidity < 1.0);
    }

    #[test]
    fn test_hull_keeps_both_chains() {
        let square: Vec<(i64, i64)> = (0..4).flat_map(|y| (0..4).map(move |x| (x, y))).collect();
        assert_eq!(convex_hull(&square), vec![(0, 0), (3, 0), (3, 3), (0, 3)]);

        let bar: Vec<(i64, i64)> = (0..9).map(|x| (x, 2)).collect();
        assert_eq!(convex_hull(&bar), vec![(0, 2), (8, 2)]);

        let diagonal: Vec<(i64, i64)> = (0..5).map(|i| (i, i)).collect();
        assert_eq!(convex_hull_area(&diagonal, BBox::new(0, 0, 5, 5)), 5);
    }

    #[test]
    fn test_l_shape_hull_area() {
        let mut mask = rect(6, 6, 0, 0, 4, 4);
        for y in 0..2 {
            for x in 2..4 {
                mask[(x, y)] = false;
            }
        }
        // hull (0,0) (1,0) (3,2) (3,3) (0,3) leaves out (2,0) (3,0) (3,1)
        assert_eq!(ShapeProps::from_mask(&mask).convex_area, 13.0);
    }

    #[test]
    fn test_empty_mask_is_zero() {
        let props = ShapeProps::from_mask(&Buffer2::new_filled(4, 4, false));
        assert_eq!(props.to_array(), [0.0; 10]);
    }
}
