//! Gradient and neighbourhood-count filters.

use common::Buffer2;
use common::parallel::par_fill_rows;

use super::reflect;
use crate::sample::{Mask, Plane};

const SMOOTH: [f32; 3] = [0.25, 0.5, 0.25];
const DERIV: [f32; 3] = [1.0, 0.0, -1.0];

/// Sobel gradient magnitude, `sqrt((gx^2 + gy^2) / 2)`, with reflected borders.
pub fn sobel(plane: &Plane) -> Plane {
    let width = plane.width();
    let height = plane.height();
    let mut out = Buffer2::new_default(width, height);
    if width == 0 || height == 0 {
        return out;
    }

    par_fill_rows(&mut out, |x, y| {
        let mut gx = 0.0f32;
        let mut gy = 0.0f32;
        for (j, dy) in (-1isize..=1).enumerate() {
            let yy = reflect(y as isize + dy, height);
            for (i, dx) in (-1isize..=1).enumerate() {
                let xx = reflect(x as isize + dx, width);
                let v = plane[(xx, yy)];
                gx += SMOOTH[j] * DERIV[i] * v;
                gy += DERIV[j] * SMOOTH[i] * v;
            }
        }
        ((gx * gx + gy * gy) * 0.5).sqrt()
    });
    out
}

/// Side of the square window used for edge detection.
pub const EDGE_WINDOW: usize = 4;

/// Number of set pixels in the 4x4 window at each position, outside counted as unset.
///
/// An even window has no centre; it spans offsets `-1..=2` on both axes.
pub fn neighbourhood_count(mask: &Mask) -> Buffer2<u8> {
    let width = mask.width();
    let height = mask.height();
    let lo = EDGE_WINDOW as isize / 2 - 1;
    let hi = EDGE_WINDOW as isize / 2;

    Buffer2::from_fn(width, height, |x, y| {
        let mut count = 0u8;
        for dy in -lo..=hi {
            for dx in -lo..=hi {
                if mask
                    .get_checked(x as isize + dx, y as isize + dy)
                    .copied()
                    .unwrap_or(false)
                {
                    count += 1;
                }
            }
        }
        count
    })
}

/// Mask pixels whose 4x4 neighbourhood is only partly inside the mask.
pub fn edge_mask(mask: &Mask) -> Mask {
    let full = (EDGE_WINDOW * EDGE_WINDOW) as u8;
    let counts = neighbourhood_count(mask);
    counts.zip_map(mask, |&c, &m| m && c > 0 && c < full - 1)
}
