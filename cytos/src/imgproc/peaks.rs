//! Local maxima detection.

use crate::sample::Plane;

/// Local maxima at least `min_distance` pixels apart (Chebyshev).
///
/// A candidate equals the maximum of its `(2 * min_distance + 1)` square
/// window and is strictly above the plane minimum. Candidates are accepted in
/// decreasing value order (raster order on ties); one closer than
/// `min_distance` to an accepted peak is dropped. Returns `(x, y)` pairs.
pub fn peak_local_max(plane: &Plane, min_distance: usize) -> Vec<(usize, usize)> {
    let width = plane.width();
    let height = plane.height();
    let floor = plane.iter().copied().fold(f32::INFINITY, f32::min);
    let r = min_distance.max(1) as isize;

    let mut candidates = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let v = plane[(x, y)];
            if !(v > floor) {
                continue;
            }
            let mut is_max = true;
            'window: for dy in -r..=r {
                for dx in -r..=r {
                    if let Some(&n) = plane.get_checked(x as isize + dx, y as isize + dy) {
                        if n > v {
                            is_max = false;
                            break 'window;
                        }
                    }
                }
            }
            if is_max {
                candidates.push((v, x, y));
            }
        }
    }

    // stable: raster order survives among equal values
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let min_distance = min_distance as isize;
    let mut peaks: Vec<(usize, usize)> = Vec::new();
    for (_, x, y) in candidates {
        let too_close = peaks.iter().any(|&(px, py)| {
            let dx = (px as isize - x as isize).abs();
            let dy = (py as isize - y as isize).abs();
            dx.max(dy) < min_distance
        });
        if !too_close {
            peaks.push((x, y));
        }
    }
    peaks
}
