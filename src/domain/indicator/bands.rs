//! Banded channels.
//!
//! Bollinger: middle = SMA(n), upper/lower = middle ± mult × population stdev.
//! Keltner: middle = EMA(n), upper/lower = middle ± mult × EMA(range, n),
//! where range is the true range or, without `use_true_range`, high - low.

use super::atr::true_range;
use super::ema::{ema_last, ema_series, Smoother};
use super::sma::{sma_last, sma_series};
use super::stddev::{stdev_last, stdev_series};

pub fn bb_series(src: &[f64], period: usize, mult: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = sma_series(src, period);
    let dev = stdev_series(src, period);
    let upper = middle.iter().zip(&dev).map(|(m, d)| m + mult * d).collect();
    let lower = middle.iter().zip(&dev).map(|(m, d)| m - mult * d).collect();
    (middle, upper, lower)
}

pub fn bb_last(src: &[f64], period: usize, mult: f64) -> (f64, f64, f64) {
    let middle = sma_last(src, period);
    let dev = stdev_last(src, period);
    (middle, middle + mult * dev, middle - mult * dev)
}

/// Range fed to the Keltner EMA: true range (with na handling) or the
/// plain bar range.
fn kc_range(high: f64, low: f64, prev_close: Option<f64>, use_true_range: bool) -> f64 {
    if use_true_range {
        true_range(high, low, prev_close, true)
    } else {
        high - low
    }
}

pub fn kc_series(
    src: &[f64],
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    mult: f64,
    use_true_range: bool,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = ema_series(src, period);
    let ranges: Vec<f64> = (0..high.len())
        .map(|i| kc_range(high[i], low[i], i.checked_sub(1).map(|p| close[p]), use_true_range))
        .collect();
    let range = ema_series(&ranges, period);
    let upper = middle.iter().zip(&range).map(|(m, r)| m + mult * r).collect();
    let lower = middle.iter().zip(&range).map(|(m, r)| m - mult * r).collect();
    (middle, upper, lower)
}

pub fn kc_last(
    src: &[f64],
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    mult: f64,
    use_true_range: bool,
) -> (f64, f64, f64) {
    let middle = ema_last(src, period);
    let mut smoother = Smoother::ema(period);
    let mut range = f64::NAN;
    for i in 0..high.len() {
        range = smoother.push(kc_range(high[i], low[i], i.checked_sub(1).map(|p| close[p]), use_true_range));
    }
    (middle, middle + mult * range, middle - mult * range)
}
