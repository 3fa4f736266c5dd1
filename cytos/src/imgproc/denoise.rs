//! Non-local means denoising.

use common::Buffer2;
use common::parallel::par_fill_rows;

use super::reflect;
use crate::sample::Plane;

/// Non-local means parameters.
///
/// `h` is relative to the plane's intensity range, so `0.1` behaves the same on
/// 8-bit and 16-bit data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlMeans {
    pub patch_size: usize,
    pub patch_distance: usize,
    pub h: f32,
}

impl NlMeans {
    pub const fn new(patch_size: usize, patch_distance: usize) -> Self {
        Self {
            patch_size,
            patch_distance,
            h: 0.1,
        }
    }
}

/// Replace each pixel by a weighted mean of pixels whose surrounding patch
/// looks alike, searched within `patch_distance`.
pub fn denoise_nl_means(plane: &Plane, params: NlMeans) -> Plane {
    let width = plane.width();
    let height = plane.height();
    let mut out = Buffer2::new_default(width, height);
    if plane.is_empty() {
        return out;
    }

    let (min, max) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if range <= 0.0 {
        return plane.clone();
    }
    let h = params.h * range;
    let h2 = h * h;

    let pr = (params.patch_size / 2).max(1) as isize;
    let sr = params.patch_distance as isize;
    let patch_len = ((2 * pr + 1) * (2 * pr + 1)) as f32;
    let at = |x: isize, y: isize| plane[(reflect(x, width), reflect(y, height))];

    par_fill_rows(&mut out, |x, y| {
        let (x, y) = (x as isize, y as isize);
        let mut weight_sum = 0.0f32;
        let mut value_sum = 0.0f32;
        for sy in -sr..=sr {
            for sx in -sr..=sr {
                let (qx, qy) = (x + sx, y + sy);
                let mut dist = 0.0f32;
                for py in -pr..=pr {
                    for px in -pr..=pr {
                        let d = at(x + px, y + py) - at(qx + px, qy + py);
                        dist += d * d;
                    }
                }
                let w = (-(dist / patch_len) / h2).exp();
                weight_sum += w;
                value_sum += w * at(qx, qy);
            }
        }
        value_sum / weight_sum
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_plane_unchanged() {
        let plane = Buffer2::new_filled(6, 6, 4.0f32);
        let out = denoise_nl_means(&plane, NlMeans::new(2, 1));
        assert!(out.iter().all(|&v| (v - 4.0).abs() < 1e-6));
    }

    #[test]
    fn test_isolated_spike_is_reduced() {
        let mut plane = Buffer2::from_fn(12, 12, |x, y| ((x + y) % 2) as f32 * 0.01);
        plane[(6, 6)] = 1.0;
        let out = denoise_nl_means(&plane, NlMeans { h: 0.5, ..NlMeans::new(3, 2) });
        assert!(out[(6, 6)] < 1.0);
        assert!(out.iter().all(|v| v.is_finite()));
    }
}
