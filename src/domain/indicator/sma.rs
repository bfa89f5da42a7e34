//! Simple Moving Average.
//!
//! SMA[i] = (src[i-n+1] + ... + src[i]) / n, summed left to right.
//! Warmup: first (n-1) bars are NaN; any NaN inside the window gives NaN.

pub fn sma_series(src: &[f64], period: usize) -> Vec<f64> {
    (0..src.len())
        .map(|i| sma_last(&src[..=i], period))
        .collect()
}

pub fn sma_last(src: &[f64], period: usize) -> f64 {
    if period == 0 || src.len() < period {
        return f64::NAN;
    }
    let window = &src[src.len() - period..];
    window.iter().sum::<f64>() / period as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_warmup() {
        let out = sma_series(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert!((out[2] - 2.0).abs() < f64::EPSILON);
        assert!((out[3] - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn twenty_period_unavailable_for_first_nineteen() {
        let src: Vec<f64> = (1..=25).map(f64::from).collect();
        let out = sma_series(&src, 20);
        assert!(out[..19].iter().all(|v| v.is_nan()));
        assert!((out[19] - 10.5).abs() < f64::EPSILON);
    }

    #[test]
    fn sma_nan_in_window() {
        let out = sma_series(&[1.0, f64::NAN, 3.0, 4.0, 5.0], 2);
        assert!(out[1].is_nan());
        assert!(out[2].is_nan());
        assert!((out[3] - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn sma_last_uses_trailing_window() {
        assert!((sma_last(&[10.0, 20.0, 30.0, 40.0], 2) - 35.0).abs() < f64::EPSILON);
        assert!(sma_last(&[10.0], 2).is_nan());
    }
}
