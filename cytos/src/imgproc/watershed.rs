//! Marker-based watershed by priority flooding.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use common::Buffer2;

use super::NEIGHBOURS_4;
use crate::sample::{Mask, Plane};

#[derive(Debug, Clone, Copy)]
struct FloodItem {
    value: f32,
    age: u64,
    index: usize,
}

impl PartialEq for FloodItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloodItem {}

impl PartialOrd for FloodItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloodItem {
    // reversed: BinaryHeap pops the lowest value, oldest first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .value
            .total_cmp(&self.value)
            .then_with(|| other.age.cmp(&self.age))
    }
}

/// Flood `landscape` from the non-zero `markers`, 4-connected.
///
/// Pixels are claimed in increasing landscape order, ties broken by queue
/// age, each taking the label of the pixel that reached it. Pixels outside
/// `mask` stay 0.
pub fn watershed(landscape: &Plane, markers: &Buffer2<u32>, mask: Option<&Mask>) -> Buffer2<u32> {
    assert!(landscape.same_dims(markers), "dimension mismatch");
    if let Some(mask) = mask {
        assert!(landscape.same_dims(mask), "dimension mismatch");
    }
    let width = landscape.width();
    let inside = |i: usize| mask.is_none_or(|m| m[i]);

    let mut output = Buffer2::new_default(width, landscape.height());
    let mut heap = BinaryHeap::new();
    let mut age = 0u64;

    for (i, &label) in markers.iter().enumerate() {
        if label != 0 && inside(i) {
            output[i] = label;
            heap.push(FloodItem {
                value: landscape[i],
                age,
                index: i,
            });
            age += 1;
        }
    }

    while let Some(item) = heap.pop() {
        let label = output[item.index];
        let x = (item.index % width) as isize;
        let y = (item.index / width) as isize;
        for (dx, dy) in NEIGHBOURS_4 {
            if landscape.get_checked(x + dx, y + dy).is_none() {
                continue;
            }
            let n = (y + dy) as usize * width + (x + dx) as usize;
            if output[n] != 0 || !inside(n) {
                continue;
            }
            output[n] = label;
            heap.push(FloodItem {
                value: landscape[n],
                age,
                index: n,
            });
            age += 1;
        }
    }

    output
}
