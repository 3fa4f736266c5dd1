use serde::{Deserialize, Serialize};

use super::Mask;

/// Axis-aligned crop window in frame coordinates. `max_*` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
    pub min_row: usize,
    pub min_col: usize,
    pub max_row: usize,
    pub max_col: usize,
}

impl BBox {
    pub fn new(min_row: usize, min_col: usize, max_row: usize, max_col: usize) -> Self {
        Self {
            min_row,
            min_col,
            max_row,
            max_col,
        }
    }

    /// Full extent of a `height x width` frame.
    pub fn full(height: usize, width: usize) -> Self {
        Self::new(0, 0, height, width)
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.max_row.saturating_sub(self.min_row)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.max_col.saturating_sub(self.min_col)
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.height() * self.width()
    }

    #[inline]
    pub fn is_valid_within(&self, height: usize, width: usize) -> bool {
        self.max_row > self.min_row
            && self.max_col > self.min_col
            && self.max_row <= height
            && self.max_col <= width
    }

    /// Grow to include pixel `(row, col)`.
    #[inline]
    pub fn include(&mut self, row: usize, col: usize) {
        self.min_row = self.min_row.min(row);
        self.min_col = self.min_col.min(col);
        self.max_row = self.max_row.max(row + 1);
        self.max_col = self.max_col.max(col + 1);
    }

    /// Tight box around the set pixels of `mask`, or `None` when nothing is set.
    pub fn from_mask(mask: &Mask) -> Option<Self> {
        let mut bbox: Option<BBox> = None;
        for y in 0..mask.height() {
            for (x, &set) in mask.row(y).iter().enumerate() {
                if !set {
                    continue;
                }
                match bbox.as_mut() {
                    Some(b) => b.include(y, x),
                    None => bbox = Some(BBox::new(y, x, y + 1, x + 1)),
                }
            }
        }
        bbox
    }

    /// Crop a frame-sized buffer to this window.
    pub fn crop<T: Clone>(&self, buffer: &common::Buffer2<T>) -> common::Buffer2<T> {
        buffer.crop(self.min_col, self.min_row, self.width(), self.height())
    }
}

#[cfg(test)]
mod tests {
    use common::Buffer2;

    use super::*;

    #[test]
    fn test_from_mask_tight() {
        let mut mask = Buffer2::new_filled(6, 5, false);
        mask[(1, 2)] = true;
        mask[(4, 3)] = true;
        let bbox = BBox::from_mask(&mask).unwrap();
        assert_eq!(bbox, BBox::new(2, 1, 4, 5));
        assert_eq!(bbox.height(), 2);
        assert_eq!(bbox.width(), 4);
        assert_eq!(bbox.area(), 8);
    }

    #[test]
    fn test_from_empty_mask() {
        let mask = Buffer2::new_filled(3, 3, false);
        assert!(BBox::from_mask(&mask).is_none());
    }

    #[test]
    fn test_validity() {
        assert!(BBox::new(0, 0, 4, 4).is_valid_within(4, 4));
        assert!(!BBox::new(0, 0, 5, 4).is_valid_within(4, 4));
        assert!(!BBox::new(2, 0, 2, 4).is_valid_within(4, 4));
    }

    #[test]
    fn test_crop_uses_row_col_order() {
        let buf = Buffer2::from_fn(4, 3, |x, y| y * 4 + x);
        let crop = BBox::new(1, 2, 3, 4).crop(&buf);
        assert_eq!(crop.pixels(), &[6, 7, 10, 11]);
    }
}
