//! MACD (Moving Average Convergence Divergence).
//!
//! line = EMA(fast) - EMA(slow)
//! signal = EMA(signal) of line, seeded once line is available
//! histogram = line - signal
//!
//! Warmup: max(fast, slow) - 1 + signal - 1 bars for the signal line.

use super::ema::{ema_series, Smoother};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn macd_series(
    src: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let ema_fast = ema_series(src, fast);
    let ema_slow = ema_series(src, slow);
    let line: Vec<f64> = ema_fast.iter().zip(&ema_slow).map(|(f, s)| f - s).collect();
    let signal = ema_series(&line, signal_period);
    let histogram = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    (line, signal, histogram)
}

pub fn macd_last(src: &[f64], fast: usize, slow: usize, signal_period: usize) -> (f64, f64, f64) {
    let mut ema_fast = Smoother::ema(fast);
    let mut ema_slow = Smoother::ema(slow);
    let mut ema_signal = Smoother::ema(signal_period);
    let (mut line, mut signal) = (f64::NAN, f64::NAN);
    for &x in src {
        line = ema_fast.push(x) - ema_slow.push(x);
        signal = ema_signal.push(line);
    }
    (line, signal, line - signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn macd_default_warmup() {
        let (line, signal, hist) = macd_series(&trend(40), DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL);
        assert!(line[24].is_nan());
        assert!(!line[25].is_nan());
        assert!(signal[32].is_nan());
        assert!(!signal[33].is_nan());
        assert!(!hist[33].is_nan());
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let (line, _, _) = macd_series(&trend(60), 12, 26, 9);
        assert!(line[59] > 0.0);
    }

    #[test]
    fn histogram_is_line_minus_signal() {
        let (line, signal, hist) = macd_series(&trend(50), 3, 6, 3);
        for i in 0..50 {
            if !hist[i].is_nan() {
                assert!((hist[i] - (line[i] - signal[i])).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn macd_last_matches_series() {
        let src: Vec<f64> = (0..45).map(|i| 50.0 + (i as f64).sin()).collect();
        let (line, signal, hist) = macd_series(&src, 5, 10, 4);
        let (l, s, h) = macd_last(&src, 5, 10, 4);
        assert_eq!(line[44].to_bits(), l.to_bits());
        assert_eq!(signal[44].to_bits(), s.to_bits());
        assert_eq!(hist[44].to_bits(), h.to_bits());
    }
}
