//! Vectorized min/max/mean/sample-stdev over the length and inter-arrival
//! samples the feature computer (C4) needs for every direction of every
//! flow. Adapted from the live-capture predecessor's SIMD feature
//! calculator; `std_dev` here uses Bessel's correction (divide by n-1)
//! where the original used population variance (divide by n).

use wide::f64x4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl Summary {
    pub const ZERO: Summary = Summary { min: 0.0, max: 0.0, mean: 0.0, std: 0.0 };
}

/// Computes min/max/mean/sample-stdev over `values` in one pass, 4 lanes at
/// a time. Returns `Summary::ZERO` for an empty slice (spec: empty
/// direction stats are all zero, not NaN).
pub fn summarize(values: &[f64]) -> Summary {
    if values.is_empty() {
        return Summary::ZERO;
    }
    let (min, max) = min_max(values);
    let mean = mean(values);
    let std = sample_std_dev(values, mean);
    Summary { min, max, mean, std }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return values.iter().sum::<f64>() / values.len() as f64;
    }

    let mut sum = f64x4::splat(0.0);
    let chunks = values.len() / 4;
    for i in 0..chunks {
        let chunk = f64x4::new([
            values[i * 4],
            values[i * 4 + 1],
            values[i * 4 + 2],
            values[i * 4 + 3],
        ]);
        sum += chunk;
    }
    let simd_sum: f64 = sum.to_array().iter().sum();
    let remaining_sum: f64 = values[chunks * 4..].iter().sum();
    (simd_sum + remaining_sum) / values.len() as f64
}

/// Sample standard deviation (Bessel's correction, n-1). A single-sample
/// slice has no degrees of freedom left and returns 0.0, matching the
/// convention spec.md uses for single-packet flows.
pub fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    if values.len() < 4 {
        let variance = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>()
            / (values.len() - 1) as f64;
        return variance.sqrt();
    }

    let mean_vec = f64x4::splat(mean);
    let mut sum_sq_diff = f64x4::splat(0.0);
    let chunks = values.len() / 4;
    for i in 0..chunks {
        let chunk = f64x4::new([
            values[i * 4],
            values[i * 4 + 1],
            values[i * 4 + 2],
            values[i * 4 + 3],
        ]);
        let diff = chunk - mean_vec;
        sum_sq_diff += diff * diff;
    }
    let simd_sum_sq: f64 = sum_sq_diff.to_array().iter().sum();
    let remaining_sum_sq: f64 = values[chunks * 4..]
        .iter()
        .map(|x| (x - mean) * (x - mean))
        .sum();

    let variance = (simd_sum_sq + remaining_sum_sq) / (values.len() - 1) as f64;
    variance.sqrt()
}

pub fn min_max(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    if values.len() < 4 {
        let mut lo = values[0];
        let mut hi = values[0];
        for &v in values {
            if v < lo { lo = v; }
            if v > hi { hi = v; }
        }
        return (lo, hi);
    }

    let mut min_vec = f64x4::splat(f64::INFINITY);
    let mut max_vec = f64x4::splat(f64::NEG_INFINITY);
    let chunks = values.len() / 4;
    for i in 0..chunks {
        let chunk = f64x4::new([
            values[i * 4],
            values[i * 4 + 1],
            values[i * 4 + 2],
            values[i * 4 + 3],
        ]);
        min_vec = min_vec.min(chunk);
        max_vec = max_vec.max(chunk);
    }
    let mut lo = min_vec.to_array().iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let mut hi = max_vec.to_array().iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    for &v in &values[chunks * 4..] {
        if v < lo { lo = v; }
        if v > hi { hi = v; }
    }
    (lo, hi)
}

/// Replaces NaN/Inf with 0.0 (spec: numeric columns are sanitized before
/// they ever reach the CSV writer).
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_matches_naive_for_small_and_large_slices() {
        let small = vec![1.0, 2.0, 3.0];
        assert!((mean(&small) - 2.0).abs() < 1e-9);

        let large: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let naive = large.iter().sum::<f64>() / large.len() as f64;
        assert!((mean(&large) - naive).abs() < 1e-9);
    }

    #[test]
    fn sample_std_dev_uses_bessels_correction() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        let naive_sample_variance =
            values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        let std = sample_std_dev(&values, m);
        assert!((std * std - naive_sample_variance).abs() < 1e-9);
    }

    #[test]
    fn single_value_has_zero_std_dev() {
        assert_eq!(sample_std_dev(&[5.0], 5.0), 0.0);
    }

    #[test]
    fn sanitize_replaces_non_finite() {
        assert_eq!(sanitize(f64::NAN), 0.0);
        assert_eq!(sanitize(f64::INFINITY), 0.0);
        assert_eq!(sanitize(1.5), 1.5);
    }
}
