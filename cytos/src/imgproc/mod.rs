//! Image-processing primitives on single-channel planes.
//!
//! Everything here works on [`common::Buffer2`] and is deterministic. Border
//! handling follows the usual ndimage conventions: filters reflect at the edge,
//! morphology ignores out-of-bounds neighbours, and counting kernels treat the
//! outside as zero.

pub mod denoise;
pub mod distance;
pub mod filters;
pub mod labeling;
pub mod morphology;
pub mod peaks;
pub mod threshold;
pub mod watershed;

pub use labeling::{Connectivity, LabelMap, Region, label_mask, regions};

/// Mirror an out-of-range index back into `0..n` (`d c b a | a b c d | d c b a`).
#[inline]
pub(crate) fn reflect(i: isize, n: usize) -> usize {
    debug_assert!(n > 0);
    let n = n as isize;
    let period = 2 * n;
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// 4-connected neighbour offsets as `(dx, dy)`.
pub(crate) const NEIGHBOURS_4: [(isize, isize); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(2, 4), 2);
        assert_eq!(reflect(-1, 1), 0);
    }
}
