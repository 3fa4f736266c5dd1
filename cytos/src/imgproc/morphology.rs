//! Grey and binary morphology with flat disk footprints.

use std::collections::VecDeque;

use common::Buffer2;
use common::parallel::par_fill_rows;

use super::distance::feature_transform;
use super::labeling::{Connectivity, label_mask};
use super::NEIGHBOURS_4;
use crate::sample::{Mask, Plane};

/// Offsets `(dx, dy)` with `dx^2 + dy^2 <= radius^2`.
pub fn disk(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

fn rank_filter(plane: &Plane, footprint: &[(isize, isize)], take_max: bool) -> Plane {
    let mut out = Buffer2::new_default(plane.width(), plane.height());
    if plane.is_empty() {
        return out;
    }
    par_fill_rows(&mut out, |x, y| {
        let mut acc = if take_max {
            f32::NEG_INFINITY
        } else {
            f32::INFINITY
        };
        for &(dx, dy) in footprint {
            if let Some(&v) = plane.get_checked(x as isize + dx, y as isize + dy) {
                acc = if take_max { acc.max(v) } else { acc.min(v) };
            }
        }
        acc
    });
    out
}

/// Maximum over the footprint; out-of-bounds neighbours are ignored.
pub fn dilate(plane: &Plane, footprint: &[(isize, isize)]) -> Plane {
    rank_filter(plane, footprint, true)
}

/// Minimum over the footprint; out-of-bounds neighbours are ignored.
pub fn erode(plane: &Plane, footprint: &[(isize, isize)]) -> Plane {
    rank_filter(plane, footprint, false)
}

/// Dilation followed by erosion with a disk of `radius`.
pub fn closing(plane: &Plane, radius: usize) -> Plane {
    let footprint = disk(radius);
    erode(&dilate(plane, &footprint), &footprint)
}

/// Set every background pixel not 4-connected to the image border.
pub fn fill_holes(mask: &Mask) -> Mask {
    let width = mask.width();
    let height = mask.height();
    let mut outside = Buffer2::new_filled(width, height, false);
    let mut queue = VecDeque::new();

    let seed = |x: usize, y: usize, outside: &mut Mask, queue: &mut VecDeque<(usize, usize)>| {
        if !mask[(x, y)] && !outside[(x, y)] {
            outside[(x, y)] = true;
            queue.push_back((x, y));
        }
    };
    for x in 0..width {
        seed(x, 0, &mut outside, &mut queue);
        if height > 1 {
            seed(x, height - 1, &mut outside, &mut queue);
        }
    }
    for y in 0..height {
        seed(0, y, &mut outside, &mut queue);
        if width > 1 {
            seed(width - 1, y, &mut outside, &mut queue);
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in NEIGHBOURS_4 {
            let (nx, ny) = (x as isize + dx, y as isize + dy);
            if mask.get_checked(nx, ny) == Some(&false) {
                let (nx, ny) = (nx as usize, ny as usize);
                if !outside[(nx, ny)] {
                    outside[(nx, ny)] = true;
                    queue.push_back((nx, ny));
                }
            }
        }
    }

    outside.map(|&o| !o)
}

/// Drop 4-connected components with fewer than `min_size` pixels.
pub fn remove_small_objects(mask: &Mask, min_size: usize) -> Mask {
    if min_size <= 1 {
        return mask.clone();
    }
    let map = label_mask(mask, Connectivity::Four);
    let mut sizes = vec![0usize; map.num_labels() + 1];
    for &l in map.labels().iter() {
        sizes[l as usize] += 1;
    }
    map.labels().map(|&l| l != 0 && sizes[l as usize] >= min_size)
}

/// Grow labelled regions into background pixels within `distance`, each pixel
/// taking the label of its nearest labelled pixel. Labels never overwrite
/// each other.
pub fn expand_labels(labels: &Buffer2<u32>, distance: f32) -> Buffer2<u32> {
    let features = labels.map(|&l| l != 0);
    let Some(ft) = feature_transform(&features) else {
        return labels.clone();
    };
    Buffer2::from_fn(labels.width(), labels.height(), |x, y| {
        let own = labels[(x, y)];
        if own != 0 {
            own
        } else if ft.distance[(x, y)] <= distance {
            labels[ft.nearest[(x, y)]]
        } else {
            0
        }
    })
}
