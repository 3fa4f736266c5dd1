//! Parallel processing utilities.
//!
//! Row-chunked fills for 2D buffers and concurrency-limited parallel maps.

use rayon::prelude::*;

use crate::Buffer2;

/// Multiplier for number of chunks relative to CPU threads.
/// Using 2x threads provides good load balancing when some chunks finish faster.
const CHUNKS_PER_THREAD: usize = 2;

/// Compute rows per chunk for parallel image processing.
///
/// Splits the image height into roughly `threads * 2` chunks, minimum of 1 row.
#[inline]
pub fn rows_per_chunk(height: usize) -> usize {
    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    (height / num_chunks).max(1)
}

/// Fill every element of `output` with `f(x, y)` in parallel, row chunks at a time.
pub fn par_fill_rows<T, F>(output: &mut Buffer2<T>, f: F)
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync + Send,
{
    let width = output.width();
    if width == 0 || output.height() == 0 {
        return;
    }
    let chunk_rows = rows_per_chunk(output.height());

    output
        .pixels_mut()
        .par_chunks_mut(width * chunk_rows)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            let start_row = chunk_idx * chunk_rows;
            for (i, value) in chunk.iter_mut().enumerate() {
                *value = f(i % width, start_row + i / width);
            }
        });
}

/// Maps `f` over `items` in parallel, with at most `max_concurrent` items in flight.
///
/// Semantically equivalent to `items.par_iter().map(f).collect()`, but processes
/// items in chunks of `max_concurrent` to limit resource usage.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_map_limited<T, R, F>(items: &[T], max_concurrent: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(max_concurrent) {
        let chunk_results: Vec<R> = chunk.par_iter().map(&f).collect();
        results.extend(chunk_results);
    }
    results
}

/// Like [`par_map_limited`], but the closure returns `Result<R, E>`.
///
/// Stops at the first chunk that contains an error and returns it.
/// Items within the failing chunk may still be processed in parallel.
pub fn try_par_map_limited<T, R, E, F>(
    items: &[T],
    max_concurrent: usize,
    f: F,
) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: Send,
    F: Fn(&T) -> Result<R, E> + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(max_concurrent) {
        let chunk_results: Result<Vec<R>, E> = chunk.par_iter().map(&f).collect();
        results.extend(chunk_results?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_par_fill_rows_matches_coordinates() {
        let width = 7;
        let height = 13;
        let mut buf = Buffer2::new_default(width, height);
        par_fill_rows(&mut buf, |x, y| y * width + x);
        for (i, &v) in buf.iter().enumerate() {
            assert_eq!(v, i);
        }
    }

    #[test]
    fn test_par_fill_rows_empty() {
        let mut buf: Buffer2<u8> = Buffer2::new_default(0, 0);
        par_fill_rows(&mut buf, |_, _| 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_par_map_limited_preserves_order() {
        let items: Vec<usize> = (0..50).collect();
        let results = par_map_limited(&items, 4, |&x| x * 2);
        assert_eq!(results, (0..50).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_try_par_map_limited_stops_after_failing_chunk() {
        let items: Vec<usize> = (0..20).collect();
        let processed = AtomicUsize::new(0);

        let result: Result<Vec<usize>, String> = try_par_map_limited(&items, 5, |&x| {
            processed.fetch_add(1, Ordering::Relaxed);
            if x == 7 {
                Err(format!("bad item {x}"))
            } else {
                Ok(x)
            }
        });

        assert_eq!(result.unwrap_err(), "bad item 7");
        // chunks after the failing one (items 10..20) never run
        assert!(processed.load(Ordering::Relaxed) <= 10);
    }

    #[test]
    #[should_panic(expected = "max_concurrent must be > 0")]
    fn test_zero_concurrency_panics() {
        par_map_limited(&[1, 2, 3], 0, |&x| x);
    }
}
