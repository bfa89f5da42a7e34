//! Rolling population standard deviation (divides by N, not N-1).
//!
//! Warmup: first (period-1) bars are NaN.

use super::sma::sma_last;

pub fn stdev_series(src: &[f64], period: usize) -> Vec<f64> {
    (0..src.len()).map(|i| stdev_last(&src[..=i], period)).collect()
}

pub fn stdev_last(src: &[f64], period: usize) -> f64 {
    let mean = sma_last(src, period);
    if mean.is_nan() {
        return f64::NAN;
    }
    let window = &src[src.len() - period..];
    let variance = window
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / period as f64;
    variance.sqrt()
}
