//! Range oscillators.
//!
//! Stochastic %K = 100 × (src - lowest(low, n)) / (highest(high, n) - lowest(low, n))
//! CCI = (src - SMA(n)) / (0.015 × mean absolute deviation)
//!
//! A zero denominator yields NaN.

use super::extrema::{highest_last, lowest_last};
use super::sma::sma_last;

pub fn stoch_last(src: &[f64], high: &[f64], low: &[f64], period: usize) -> f64 {
    let hi = highest_last(high, period);
    let lo = lowest_last(low, period);
    let range = hi - lo;
    if range.is_nan() || range == 0.0 {
        return f64::NAN;
    }
    100.0 * (src[src.len() - 1] - lo) / range
}

pub fn stoch_series(src: &[f64], high: &[f64], low: &[f64], period: usize) -> Vec<f64> {
    (0..src.len())
        .map(|i| stoch_last(&src[..=i], &high[..=i], &low[..=i], period))
        .collect()
}

pub fn cci_last(src: &[f64], period: usize) -> f64 {
    let mean = sma_last(src, period);
    if mean.is_nan() {
        return f64::NAN;
    }
    let window = &src[src.len() - period..];
    let deviation = window.iter().map(|v| (v - mean).abs()).sum::<f64>() / period as f64;
    if deviation == 0.0 {
        return f64::NAN;
    }
    (src[src.len() - 1] - mean) / (0.015 * deviation)
}

pub fn cci_series(src: &[f64], period: usize) -> Vec<f64> {
    (0..src.len()).map(|i| cci_last(&src[..=i], period)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stoch_at_top_of_range() {
        let src = [5.0, 6.0, 10.0];
        let high = [6.0, 7.0, 10.0];
        let low = [4.0, 5.0, 8.0];
        assert!((stoch_last(&src, &high, &low, 3) - 100.0).abs() < 1e-12);
    }

    #[test]
    fn stoch_flat_range_unavailable() {
        let flat = [5.0, 5.0, 5.0];
        assert!(stoch_last(&flat, &flat, &flat, 3).is_nan());
    }

    #[test]
    fn cci_known_value() {
        // mean 2, mean deviation 2/3, (3 - 2) / (0.015 * 2/3) = 100
        let out = cci_series(&[1.0, 2.0, 3.0], 3);
        assert!((out[2] - 100.0).abs() < 1e-9);
    }
}
