//! Weighted and volume-weighted moving averages.
//!
//! WMA[i] = sum(w_j * src[i-n+j]) / sum(w_j), w_j = j for j in 1..=n
//! VWMA[i] = SMA(src * volume) / SMA(volume)

use super::sma::sma_last;

pub fn wma_series(src: &[f64], period: usize) -> Vec<f64> {
    (0..src.len()).map(|i| wma_last(&src[..=i], period)).collect()
}

pub fn wma_last(src: &[f64], period: usize) -> f64 {
    if period == 0 || src.len() < period {
        return f64::NAN;
    }
    let window = &src[src.len() - period..];
    let mut numerator = 0.0;
    for (j, &v) in window.iter().enumerate() {
        numerator += (j + 1) as f64 * v;
    }
    let denominator = (period * (period + 1)) as f64 / 2.0;
    numerator / denominator
}

pub fn vwma_series(src: &[f64], volume: &[f64], period: usize) -> Vec<f64> {
    (0..src.len())
        .map(|i| vwma_last(&src[..=i], &volume[..=i], period))
        .collect()
}

pub fn vwma_last(src: &[f64], volume: &[f64], period: usize) -> f64 {
    if period == 0 || src.len() < period {
        return f64::NAN;
    }
    let start = src.len() - period;
    let weighted: Vec<f64> = src[start..]
        .iter()
        .zip(&volume[start..])
        .map(|(p, v)| p * v)
        .collect();
    let vol = sma_last(&volume[start..], period);
    if vol == 0.0 {
        return f64::NAN;
    }
    sma_last(&weighted, period) / vol
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wma_weights_recent_more() {
        // (1*10 + 2*20 + 3*30) / 6
        let out = wma_series(&[10.0, 20.0, 30.0], 3);
        assert!(out[1].is_nan());
        assert!((out[2] - 140.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn vwma_equal_volume_is_sma() {
        let src = [10.0, 20.0, 30.0, 40.0];
        let vol = [5.0; 4];
        let out = vwma_series(&src, &vol, 2);
        assert!((out[3] - 35.0).abs() < 1e-12);
    }

    #[test]
    fn vwma_tilts_to_volume() {
        let out = vwma_last(&[10.0, 20.0], &[1.0, 3.0], 2);
        assert!((out - 17.5).abs() < 1e-12);
    }

    #[test]
    fn vwma_zero_volume_unavailable() {
        assert!(vwma_last(&[10.0, 20.0], &[0.0, 0.0], 2).is_nan());
    }
}
