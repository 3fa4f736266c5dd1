//! Exact Euclidean distance and feature transforms.
//!
//! Separable lower-envelope algorithm (Felzenszwalb & Huttenlocher): one 1D
//! pass down the columns, one along the rows. The second pass carries the
//! nearest feature through, so the feature transform comes for free.

use common::Buffer2;

use crate::sample::Mask;

const INF: f64 = 1e20;

/// Distance to, and flat index of, the nearest feature pixel.
#[derive(Debug, Clone)]
pub struct FeatureTransform {
    pub distance: Buffer2<f32>,
    pub nearest: Buffer2<usize>,
}

/// Scratch space for the 1D transform, reused across lines.
struct Envelope {
    v: Vec<usize>,
    z: Vec<f64>,
}

impl Envelope {
    fn new(n: usize) -> Self {
        Self {
            v: vec![0; n],
            z: vec![0.0; n + 1],
        }
    }

    /// Squared distance along one line: `d[q] = min_p (q - p)^2 + f[p]`, with
    /// the minimising `p` written to `arg`.
    fn transform(&mut self, f: &[f64], d: &mut [f64], arg: &mut [usize]) {
        let n = f.len();
        let v = &mut self.v;
        let z = &mut self.z;
        let intersect = |q: usize, p: usize| {
            ((f[q] + (q * q) as f64) - (f[p] + (p * p) as f64)) / (2.0 * (q as f64 - p as f64))
        };

        let mut k = 0usize;
        v[0] = 0;
        z[0] = f64::NEG_INFINITY;
        z[1] = f64::INFINITY;
        for q in 1..n {
            let mut s = intersect(q, v[k]);
            while s <= z[k] {
                k -= 1;
                s = intersect(q, v[k]);
            }
            k += 1;
            v[k] = q;
            z[k] = s;
            z[k + 1] = f64::INFINITY;
        }

        k = 0;
        for q in 0..n {
            while z[k + 1] < q as f64 {
                k += 1;
            }
            let p = v[k];
            let diff = q as f64 - p as f64;
            d[q] = diff * diff + f[p];
            arg[q] = p;
        }
    }
}

/// Feature transform of `features`, or `None` when no pixel is a feature.
pub fn feature_transform(features: &Mask) -> Option<FeatureTransform> {
    if !features.any() {
        return None;
    }
    let width = features.width();
    let height = features.height();

    // pass 1: columns, squared vertical distance and nearest feature row
    let mut col_dist = Buffer2::new_filled(width, height, INF);
    let mut col_row = Buffer2::new_filled(width, height, 0usize);
    {
        let mut env = Envelope::new(height);
        let mut f = vec![0.0; height];
        let mut d = vec![0.0; height];
        let mut arg = vec![0usize; height];
        for x in 0..width {
            for y in 0..height {
                f[y] = if features[(x, y)] { 0.0 } else { INF };
            }
            env.transform(&f, &mut d, &mut arg);
            for y in 0..height {
                col_dist[(x, y)] = d[y];
                col_row[(x, y)] = arg[y];
            }
        }
    }

    // pass 2: rows
    let mut distance = Buffer2::new_default(width, height);
    let mut nearest = Buffer2::new_filled(width, height, 0usize);
    {
        let mut env = Envelope::new(width);
        let mut d = vec![0.0; width];
        let mut arg = vec![0usize; width];
        for y in 0..height {
            env.transform(col_dist.row(y), &mut d, &mut arg);
            for x in 0..width {
                let nx = arg[x];
                let ny = col_row[(nx, y)];
                distance[(x, y)] = d[x].sqrt() as f32;
                nearest[(x, y)] = ny * width + nx;
            }
        }
    }

    Some(FeatureTransform { distance, nearest })
}

/// Distance from every set pixel of `mask` to the nearest unset pixel.
///
/// Unset pixels are 0. A mask with no unset pixel is infinitely far from
/// background everywhere.
pub fn euclidean_distance(mask: &Mask) -> Buffer2<f32> {
    let background = mask.map(|&m| !m);
    match feature_transform(&background) {
        Some(ft) => ft.distance,
        None => Buffer2::new_filled(mask.width(), mask.height(), f32::INFINITY),
    }
}
