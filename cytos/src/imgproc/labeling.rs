//! Connected component labeling using union-find over row runs, plus region
//! properties of label maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use common::Buffer2;

use crate::sample::{BBox, Mask};

/// Pixel adjacency used when grouping foreground pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Horizontal and vertical neighbours only.
    #[default]
    Four,
    /// Includes diagonal neighbours.
    Eight,
}

// ============================================================================
// Run-Length Encoding
// ============================================================================

/// A horizontal run of foreground pixels.
#[derive(Debug, Clone, Copy)]
struct Run {
    start: u32, // inclusive
    end: u32,   // exclusive
    label: u32,
}

impl Run {
    /// Window of previous-row x coordinates that may touch this run.
    #[inline]
    fn search_window(&self, connectivity: Connectivity) -> (u32, u32) {
        match connectivity {
            Connectivity::Four => (self.start, self.end),
            Connectivity::Eight => (self.start.saturating_sub(1), self.end + 1),
        }
    }
}

#[inline]
fn runs_connected(prev: &Run, curr: &Run, connectivity: Connectivity) -> bool {
    match connectivity {
        Connectivity::Four => prev.start < curr.end && prev.end > curr.start,
        Connectivity::Eight => prev.start < curr.end + 1 && prev.end + 1 > curr.start,
    }
}

fn extract_runs(row: &[bool], runs: &mut Vec<Run>) {
    let mut x = 0;
    while x < row.len() {
        if !row[x] {
            x += 1;
            continue;
        }
        let start = x;
        while x < row.len() && row[x] {
            x += 1;
        }
        runs.push(Run {
            start: start as u32,
            end: x as u32,
            label: 0,
        });
    }
}

fn merge_runs_with_prev(
    curr_runs: &mut [Run],
    prev_runs: &[Run],
    connectivity: Connectivity,
    uf: &mut UnionFind,
) {
    let mut prev_idx = 0;
    for run in curr_runs.iter_mut() {
        let (search_start, search_end) = run.search_window(connectivity);

        while prev_idx < prev_runs.len() && prev_runs[prev_idx].end <= search_start {
            prev_idx += 1;
        }

        let mut assigned_label = None;
        let mut check_idx = prev_idx;
        while check_idx < prev_runs.len() && prev_runs[check_idx].start < search_end {
            let prev_run = &prev_runs[check_idx];
            if runs_connected(prev_run, run, connectivity) {
                match assigned_label {
                    Some(label) if label != prev_run.label => uf.union(label, prev_run.label),
                    None => assigned_label = Some(prev_run.label),
                    _ => {}
                }
            }
            check_idx += 1;
        }

        run.label = assigned_label.unwrap_or_else(|| uf.make_set());
    }
}

// ============================================================================
// LabelMap
// ============================================================================

/// Label map from connected component analysis. 0 is background; components
/// are numbered `1..=num_labels` in raster order of their first pixel.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: Buffer2<u32>,
    num_labels: usize,
}

impl LabelMap {
    #[inline]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    #[inline]
    pub fn labels(&self) -> &Buffer2<u32> {
        &self.labels
    }

    #[inline]
    pub fn into_labels(self) -> Buffer2<u32> {
        self.labels
    }
}

/// Label the connected components of `mask`.
pub fn label_mask(mask: &Mask, connectivity: Connectivity) -> LabelMap {
    let width = mask.width();
    let height = mask.height();
    let mut labels = Buffer2::new_default(width, height);

    let mut uf = UnionFind::new();
    let mut prev_runs: Vec<Run> = Vec::with_capacity(width / 4 + 1);
    let mut curr_runs: Vec<Run> = Vec::with_capacity(width / 4 + 1);

    for y in 0..height {
        curr_runs.clear();
        extract_runs(mask.row(y), &mut curr_runs);

        if curr_runs.is_empty() {
            prev_runs.clear();
            continue;
        }

        merge_runs_with_prev(&mut curr_runs, &prev_runs, connectivity, &mut uf);

        let row_start = y * width;
        for run in &curr_runs {
            for x in run.start..run.end {
                labels[row_start + x as usize] = run.label;
            }
        }

        std::mem::swap(&mut prev_runs, &mut curr_runs);
    }

    let num_labels = uf.flatten_labels(labels.pixels_mut());
    LabelMap { labels, num_labels }
}

// ============================================================================
// Union-Find
// ============================================================================

#[derive(Debug)]
struct UnionFind {
    parent: Vec<u32>,
    next_label: u32,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: Vec::with_capacity(256),
            next_label: 1,
        }
    }

    #[inline]
    fn make_set(&mut self) -> u32 {
        let label = self.next_label;
        self.parent.push(label);
        self.next_label += 1;
        label
    }

    /// Find root with path compression.
    #[inline]
    fn find(&mut self, label: u32) -> u32 {
        let mut root = label;
        while self.parent[(root - 1) as usize] != root {
            root = self.parent[(root - 1) as usize];
        }

        let mut current = label;
        while current != root {
            let idx = (current - 1) as usize;
            current = self.parent[idx];
            self.parent[idx] = root;
        }
        root
    }

    #[inline]
    fn union(&mut self, a: u32, b: u32) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            let (smaller, larger) = if root_a < root_b {
                (root_a, root_b)
            } else {
                (root_b, root_a)
            };
            self.parent[(larger - 1) as usize] = smaller;
        }
    }

    /// Relabel to sequential `1..=n`, returning `n`.
    fn flatten_labels(&mut self, labels: &mut [u32]) -> usize {
        if self.parent.is_empty() {
            return 0;
        }

        let len = self.parent.len();
        let mut label_map = vec![0u32; len + 1];
        let mut num_labels = 0u32;

        for i in 1..=len as u32 {
            let root = self.find(i);
            if label_map[root as usize] == 0 {
                num_labels += 1;
                label_map[root as usize] = num_labels;
            }
            label_map[i as usize] = label_map[root as usize];
        }

        for l in labels.iter_mut() {
            if *l != 0 {
                *l = label_map[*l as usize];
            }
        }

        num_labels as usize
    }
}

// ============================================================================
// Region properties
// ============================================================================

/// Extent and size of one labelled region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub label: u32,
    pub bbox: BBox,
    pub area: usize,
}

/// Regions of every non-zero label in `labels`, ordered by label.
pub fn regions(labels: &Buffer2<u32>) -> Vec<Region> {
    let mut found: BTreeMap<u32, Region> = BTreeMap::new();
    for y in 0..labels.height() {
        for (x, &label) in labels.row(y).iter().enumerate() {
            if label == 0 {
                continue;
            }
            found
                .entry(label)
                .and_modify(|r| {
                    r.bbox.include(y, x);
                    r.area += 1;
                })
                .or_insert(Region {
                    label,
                    bbox: BBox::new(y, x, y + 1, x + 1),
                    area: 1,
                });
        }
    }
    found.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Mask {
        let height = rows.len();
        let width = rows[0].len();
        Buffer2::from_fn(width, height, |x, y| rows[y].as_bytes()[x] == b'#')
    }

    #[test]
    fn test_empty_mask() {
        let map = label_mask(&Buffer2::new_filled(5, 5, false), Connectivity::Four);
        assert_eq!(map.num_labels(), 0);
        assert!(map.labels().iter().all(|&l| l == 0));
    }

    #[test]
    fn test_separate_components_raster_order() {
        let mask = mask_from(&["##..#", "##..#", ".....", "..##."]);
        let map = label_mask(&mask, Connectivity::Four);
        assert_eq!(map.num_labels(), 3);
        let l = map.labels();
        assert_eq!(l[(0, 0)], 1);
        assert_eq!(l[(1, 1)], 1);
        assert_eq!(l[(4, 0)], 2);
        assert_eq!(l[(2, 3)], 3);
    }

    #[test]
    fn test_u_shape_merges() {
        let mask = mask_from(&["#...#", "#...#", "#####"]);
        let map = label_mask(&mask, Connectivity::Four);
        assert_eq!(map.num_labels(), 1);
    }

    #[test]
    fn test_diagonal_connectivity() {
        let mask = mask_from(&["#..", ".#.", "..#"]);
        assert_eq!(label_mask(&mask, Connectivity::Four).num_labels(), 3);
        assert_eq!(label_mask(&mask, Connectivity::Eight).num_labels(), 1);
    }

    #[test]
    fn test_regions_bbox_and_area() {
        let mut labels = Buffer2::new_default(6, 4);
        labels[(1, 1)] = 7;
        labels[(2, 1)] = 7;
        labels[(2, 2)] = 7;
        labels[(5, 3)] = 2;
        let regions = regions(&labels);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].label, 2);
        assert_eq!(regions[0].bbox, BBox::new(3, 5, 4, 6));
        assert_eq!(regions[0].area, 1);
        assert_eq!(regions[1].label, 7);
        assert_eq!(regions[1].bbox, BBox::new(1, 1, 3, 3));
        assert_eq!(regions[1].area, 3);
    }
}
