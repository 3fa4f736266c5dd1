//! Descriptive statistics over pixel populations.
//!
//! Percentiles use linear interpolation between closest ranks. Moments are
//! population (biased) estimates; kurtosis is reported as excess kurtosis.


/// Sort ascending, NaN last.
#[inline]
pub fn sort_values(values: &mut [f64]) {
    values.sort_unstable_by(|a, b| a.total_cmp(b));
}

/// Percentile `q` in `[0, 1]` of already sorted values.
#[inline]
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    debug_assert!((0.0..=1.0).contains(&q));

    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Median, sorting `values` in place.
pub fn median_mut(values: &mut [f64]) -> f64 {
    debug_assert!(!values.is_empty());
    sort_values(values);
    percentile_sorted(values, 0.5)
}

/// Quantile of `f32` samples, interpolated like [`percentile_sorted`].
pub fn quantile_f32(values: &[f32], q: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    sort_values(&mut sorted);
    percentile_sorted(&sorted, q) as f32
}

#[inline]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
#[inline]
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Second to fourth central moments.
fn central_moments(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    let m = mean(values);
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for &v in values {
        let d = v - m;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    (m2 / n, m3 / n, m4 / n)
}

/// Biased sample skewness. NaN when all values are equal.
pub fn skewness(values: &[f64]) -> f64 {
    let (m2, m3, _) = central_moments(values);
    if m2 == 0.0 {
        return f64::NAN;
    }
    m3 / m2.powf(1.5)
}

/// Biased excess kurtosis. NaN when all values are equal.
pub fn kurtosis(values: &[f64]) -> f64 {
    let (m2, _, m4) = central_moments(values);
    if m2 == 0.0 {
        return f64::NAN;
    }
    m4 / (m2 * m2) - 3.0
}

/// The eleven intensity statistics reported per pixel population.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub max: f64,
    pub min: f64,
    pub std: f64,
    pub mad: f64,
    pub lower_quartile: f64,
    pub upper_quartile: f64,
    pub sum: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

impl Summary {
    pub const NAMES: [&'static str; 11] = [
        "mean",
        "median",
        "max",
        "min",
        "std",
        "mad",
        "lower_quartile",
        "upper_quartile",
        "sum",
        "skewness",
        "kurtosis",
    ];

    /// Values in [`Summary::NAMES`] order.
    pub fn to_array(&self) -> [f64; 11] {
        [
            self.mean,
            self.median,
            self.max,
            self.min,
            self.std,
            self.mad,
            self.lower_quartile,
            self.upper_quartile,
            self.sum,
            self.skewness,
            self.kurtosis,
        ]
    }
}

/// Summarize `values`, reordering them in place. Empty input gives all zeros.
pub fn describe(values: &mut [f64]) -> Summary {
    if values.is_empty() {
        return Summary::default();
    }

    let sum: f64 = values.iter().sum();
    let std = variance(values).sqrt();
    let skewness = skewness(values);
    let kurtosis = kurtosis(values);

    sort_values(values);
    let median = percentile_sorted(values, 0.5);
    let lower_quartile = percentile_sorted(values, 0.25);
    let upper_quartile = percentile_sorted(values, 0.75);
    let min = values[0];
    let max = values[values.len() - 1];

    let mut deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
    let mad = median_mut(&mut deviations);

    Summary {
        mean: sum / values.len() as f64,
        median,
        max,
        min,
        std,
        mad,
        lower_quartile,
        upper_quartile,
        sum,
        skewness,
        kurtosis,
    }
}
