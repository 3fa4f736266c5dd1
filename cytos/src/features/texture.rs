use crate::imgproc::filters::sobel;
use crate::math::statistics::{mean, variance};
use crate::sample::{Mask, Plane, Sample};

use super::{FeatureExtractor, FeatureGroup};

/// Pixel distances the co-occurrence matrix is sampled at.
pub const GLCM_DISTANCES: [usize; 2] = [3, 5];

pub const GLCM_PROPS: [&str; 6] = [
    "contrast",
    "dissimilarity",
    "homogeneity",
    "energy",
    "correlation",
    "ASM",
];

const LEVELS: usize = 10;
const SOBEL_STATS: [&str; 4] = ["mean", "std", "max", "min"];
// 45, 135, 225 and 315 degrees
const ANGLES: [f64; 4] = [
    std::f64::consts::FRAC_PI_4,
    3.0 * std::f64::consts::FRAC_PI_4,
    5.0 * std::f64::consts::FRAC_PI_4,
    7.0 * std::f64::consts::FRAC_PI_4,
];

const VIEW_LEN: usize = 2 * GLCM_DISTANCES.len() * GLCM_PROPS.len() + SOBEL_STATS.len();

/// Co-occurrence and gradient texture of the masked pixels.
///
/// Each channel gets one block for its own mask and one for the combined
/// mask, followed by `texture_valid_{ch}`. When the channel mask is empty its
/// block is zero and the validity column is 0.
#[derive(Debug, Clone, Copy)]
pub struct TextureFeatures {
    max_pixel_value: f32,
}

impl TextureFeatures {
    pub fn new(max_pixel_value: f32) -> Self {
        Self { max_pixel_value }
    }

    fn view_columns(prefix: &str, ch: &str, columns: &mut Vec<String>) {
        for reduce in ["mean", "std"] {
            for n in GLCM_DISTANCES {
                for p in GLCM_PROPS {
                    columns.push(format!("{prefix}glcm_{reduce}_{p}_{n}_{ch}"));
                }
            }
        }
        for stat in SOBEL_STATS {
            columns.push(format!("{prefix}sobel_{stat}_{ch}"));
        }
    }

    fn view_values(&self, plane: &Plane, mask: &Mask, out: &mut Vec<f64>) {
        let masked = plane.zip_map(mask, |&v, &m| if m { v } else { 0.0 });
        let levels = quantize(&masked, self.max_pixel_value);

        // props[distance][prop][angle]
        let mut props = [[[0.0f64; ANGLES.len()]; GLCM_PROPS.len()]; GLCM_DISTANCES.len()];
        for (d, &distance) in GLCM_DISTANCES.iter().enumerate() {
            for (a, &angle) in ANGLES.iter().enumerate() {
                let glcm = co_occurrence(&levels, distance, angle);
                for (p, value) in glcm_props(&glcm).into_iter().enumerate() {
                    props[d][p][a] = value;
                }
            }
        }
        for per_distance in &props {
            out.extend(per_distance.iter().map(|angles| mean(angles)));
        }
        for per_distance in &props {
            out.extend(per_distance.iter().map(|angles| variance(angles).sqrt()));
        }

        let gradient: Vec<f64> = sobel(&masked).iter().map(|&v| v as f64).collect();
        let max = gradient.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = gradient.iter().copied().fold(f64::INFINITY, f64::min);
        out.extend([mean(&gradient), variance(&gradient).sqrt(), max, min]);
    }
}

/// Rescale to the signed 16-bit range and digitize into [`LEVELS`] bins.
///
/// Bin edges are nine equal-width intervals between the image minimum and
/// maximum; a value lands in the first bin whose right edge is not below it.
fn quantize(plane: &Plane, max_pixel_value: f32) -> common::Buffer2<u8> {
    let scaled = plane.map(|&v| {
        let x = (v / max_pixel_value).clamp(-1.0, 1.0) as f64;
        (x * 32767.5 - 0.5).round_ties_even().clamp(-32768.0, 32767.0)
    });

    let lo = scaled.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (lo, hi) = if lo == hi { (lo - 0.5, hi + 0.5) } else { (lo, hi) };
    let edges: Vec<f64> = (0..LEVELS)
        .map(|i| lo + (hi - lo) * i as f64 / (LEVELS - 1) as f64)
        .collect();

    scaled.map(|&v| edges.iter().take_while(|&&e| e < v).count().min(LEVELS - 1) as u8)
}

/// Symmetric, normalized co-occurrence matrix for one offset.
fn co_occurrence(levels: &common::Buffer2<u8>, distance: usize, angle: f64) -> [[f64; LEVELS]; LEVELS] {
    let d_row = (angle.sin() * distance as f64).round() as isize;
    let d_col = (angle.cos() * distance as f64).round() as isize;

    let mut counts = [[0u64; LEVELS]; LEVELS];
    let mut total = 0u64;
    for y in 0..levels.height() {
        for x in 0..levels.width() {
            let Some(&j) = levels.get_checked(x as isize + d_col, y as isize + d_row) else {
                continue;
            };
            let i = levels[(x, y)];
            counts[i as usize][j as usize] += 1;
            counts[j as usize][i as usize] += 1;
            total += 2;
        }
    }

    let mut glcm = [[0.0; LEVELS]; LEVELS];
    if total == 0 {
        return glcm;
    }
    for i in 0..LEVELS {
        for j in 0..LEVELS {
            glcm[i][j] = counts[i][j] as f64 / total as f64;
        }
    }
    glcm
}

/// Values in [`GLCM_PROPS`] order.
fn glcm_props(glcm: &[[f64; LEVELS]; LEVELS]) -> [f64; 6] {
    let mut contrast = 0.0;
    let mut dissimilarity = 0.0;
    let mut homogeneity = 0.0;
    let mut asm = 0.0;
    let mut mean_i = 0.0;
    let mut mean_j = 0.0;
    for (i, row) in glcm.iter().enumerate() {
        for (j, &p) in row.iter().enumerate() {
            let diff = i as f64 - j as f64;
            contrast += p * diff * diff;
            dissimilarity += p * diff.abs();
            homogeneity += p / (1.0 + diff * diff);
            asm += p * p;
            mean_i += p * i as f64;
            mean_j += p * j as f64;
        }
    }

    let mut var_i = 0.0;
    let mut var_j = 0.0;
    let mut cov = 0.0;
    for (i, row) in glcm.iter().enumerate() {
        for (j, &p) in row.iter().enumerate() {
            let di = i as f64 - mean_i;
            let dj = j as f64 - mean_j;
            var_i += p * di * di;
            var_j += p * dj * dj;
            cov += p * di * dj;
        }
    }
    let (std_i, std_j) = (var_i.sqrt(), var_j.sqrt());
    let correlation = if std_i < 1e-15 || std_j < 1e-15 {
        1.0
    } else {
        cov / (std_i * std_j)
    };

    [contrast, dissimilarity, homogeneity, asm.sqrt(), correlation, asm]
}

impl FeatureExtractor for TextureFeatures {
    fn group(&self) -> FeatureGroup {
        FeatureGroup::Texture
    }

    fn columns(&self, channels: &[String]) -> Vec<String> {
        let mut columns = Vec::with_capacity(channels.len() * (2 * VIEW_LEN + 1));
        for ch in channels {
            Self::view_columns("", ch, &mut columns);
            Self::view_columns("combined_", ch, &mut columns);
            columns.push(format!("texture_valid_{ch}"));
        }
        columns
    }

    fn extract(&self, sample: &Sample, out: &mut Vec<f64>) {
        let combined = sample.combined_mask();
        for (plane, mask) in sample.pixels().iter().zip(sample.mask()) {
            let valid = mask.any();
            if valid {
                self.view_values(plane, mask, out);
            } else {
                out.extend([0.0; VIEW_LEN]);
            }
            self.view_values(plane, combined, out);
            out.push(if valid { 1.0 } else { 0.0 });
        }
    }
}

#[cfg(test)]
mod tests {
    use common::Buffer2;

    use super::*;

    #[test]
    fn test_quantize_spans_all_levels() {
        let plane = Buffer2::from_fn(10, 1, |x, _| x as f32 * 100.0);
        let levels = quantize(&plane, 1000.0);
        assert_eq!(levels[0], 0);
        assert_eq!(levels[9], 9);
        assert!(levels.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_quantize_flat_plane() {
        let levels = quantize(&Buffer2::new_filled(3, 3, 7.0), 100.0);
        assert!(levels.iter().all(|&l| l == levels[0]));
    }

    #[test]
    fn test_uniform_levels_props() {
        let levels = Buffer2::new_filled(8, 8, 4u8);
        let glcm = co_occurrence(&levels, 3, ANGLES[0]);
        assert!((glcm[4][4] - 1.0).abs() < 1e-12);
        let props = glcm_props(&glcm);
        assert_eq!(props[0], 0.0);
        assert_eq!(props[1], 0.0);
        assert_eq!(props[2], 1.0);
        assert_eq!(props[3], 1.0);
        assert_eq!(props[4], 1.0);
        assert_eq!(props[5], 1.0);
    }

    #[test]
    fn test_co_occurrence_is_symmetric() {
        let levels = Buffer2::from_fn(9, 9, |x, y| ((x * 3 + y) % LEVELS) as u8);
        for angle in ANGLES {
            let glcm = co_occurrence(&levels, 5, angle);
            let sum: f64 = glcm.iter().flatten().sum();
            assert!((sum - 1.0).abs() < 1e-9);
            for i in 0..LEVELS {
                for j in 0..LEVELS {
                    assert_eq!(glcm[i][j], glcm[j][i]);
                }
            }
        }
    }

    #[test]
    fn test_offset_larger_than_image_gives_empty_matrix() {
        let levels = Buffer2::new_filled(2, 2, 1u8);
        let glcm = co_occurrence(&levels, 5, ANGLES[1]);
        assert!(glcm.iter().flatten().all(|&p| p == 0.0));
    }

    #[test]
    fn test_column_layout() {
        let columns = TextureFeatures::new(4095.0).columns(&["dapi".to_string()]);
        assert_eq!(columns.len(), 2 * VIEW_LEN + 1);
        assert_eq!(columns[0], "glcm_mean_contrast_3_dapi");
        assert_eq!(columns[6], "glcm_mean_contrast_5_dapi");
        assert_eq!(columns[12], "glcm_std_contrast_3_dapi");
        assert_eq!(columns[VIEW_LEN - 1], "sobel_min_dapi");
        assert_eq!(columns[VIEW_LEN], "combined_glcm_mean_contrast_3_dapi");
        assert_eq!(columns[2 * VIEW_LEN], "texture_valid_dapi");
    }
}
