//! Global intensity thresholds.

use crate::sample::Plane;

const OTSU_BINS: usize = 256;

/// Otsu's threshold over a 256-bin histogram spanning the plane's range.
///
/// Foreground is conventionally `value > threshold`. A constant plane
/// returns its value.
pub fn otsu(plane: &Plane) -> f32 {
    let (min, max) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if plane.is_empty() || min >= max {
        return if plane.is_empty() { 0.0 } else { min };
    }

    let range = (max - min) as f64;
    let bin_width = range / OTSU_BINS as f64;
    let mut counts = [0f64; OTSU_BINS];
    for &v in plane.iter() {
        let bin = (((v - min) as f64 / range) * OTSU_BINS as f64) as usize;
        counts[bin.min(OTSU_BINS - 1)] += 1.0;
    }
    let centers: Vec<f64> = (0..OTSU_BINS)
        .map(|i| min as f64 + (i as f64 + 0.5) * bin_width)
        .collect();

    // class weights and means for split "bins <= i" vs "bins > i"
    let mut weight1 = [0f64; OTSU_BINS];
    let mut mean1 = [0f64; OTSU_BINS];
    let (mut w, mut s) = (0.0, 0.0);
    for i in 0..OTSU_BINS {
        w += counts[i];
        s += counts[i] * centers[i];
        weight1[i] = w;
        mean1[i] = if w > 0.0 { s / w } else { 0.0 };
    }
    let mut weight2 = [0f64; OTSU_BINS];
    let mut mean2 = [0f64; OTSU_BINS];
    let (mut w, mut s) = (0.0, 0.0);
    for i in (0..OTSU_BINS).rev() {
        w += counts[i];
        s += counts[i] * centers[i];
        weight2[i] = w;
        mean2[i] = if w > 0.0 { s / w } else { 0.0 };
    }

    let mut best = 0;
    let mut best_var = f64::NEG_INFINITY;
    for i in 0..OTSU_BINS - 1 {
        let diff = mean1[i] - mean2[i + 1];
        let var = weight1[i] * weight2[i + 1] * diff * diff;
        if var > best_var {
            best_var = var;
            best = i;
        }
    }
    centers[best] as f32
}
