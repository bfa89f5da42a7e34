//! True range and Average True Range.
//!
//! TR[i] = max(high-low, |high-close[i-1]|, |low-close[i-1]|). With no
//! previous close, TR is high - low when `handle_na` is set and NaN
//! otherwise.
//! ATR = RMA(TR, n) over the `handle_na` form, seeded with the mean of the
//! first n true ranges.

use super::ema::Smoother;

pub(super) fn true_range(high: f64, low: f64, prev_close: Option<f64>, handle_na: bool) -> f64 {
    let hl = high - low;
    match prev_close {
        Some(pc) if !pc.is_nan() => hl.max((high - pc).abs()).max((low - pc).abs()),
        _ if handle_na => hl,
        _ => f64::NAN,
    }
}

pub fn tr_series(high: &[f64], low: &[f64], close: &[f64], handle_na: bool) -> Vec<f64> {
    (0..high.len())
        .map(|i| true_range(high[i], low[i], i.checked_sub(1).map(|p| close[p]), handle_na))
        .collect()
}

pub fn tr_last(high: &[f64], low: &[f64], close: &[f64], handle_na: bool) -> f64 {
    let n = high.len();
    if n == 0 {
        return f64::NAN;
    }
    true_range(high[n - 1], low[n - 1], (n - 1).checked_sub(1).map(|p| close[p]), handle_na)
}

pub fn atr_series(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let mut smoother = Smoother::rma(period);
    tr_series(high, low, close, true)
        .into_iter()
        .map(|tr| smoother.push(tr))
        .collect()
}

pub fn atr_last(high: &[f64], low: &[f64], close: &[f64], period: usize) -> f64 {
    let mut smoother = Smoother::rma(period);
    let mut out = f64::NAN;
    for i in 0..high.len() {
        let tr = true_range(high[i], low[i], i.checked_sub(1).map(|p| close[p]), true);
        out = smoother.push(tr);
    }
    out
}
