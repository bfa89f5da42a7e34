//! RSI (Relative Strength Index) with Wilder's smoothing.
//!
//! up = RMA(max(change, 0), n), down = RMA(max(-change, 0), n)
//! RSI = 100 - 100 / (1 + up/down); 100 when down == 0, 0 when up == 0.
//!
//! Warmup: first n bars are NaN (n price changes seed the averages).

use super::ema::Smoother;

fn split_change(prev: f64, curr: f64) -> (f64, f64) {
    let change = curr - prev;
    if change.is_nan() {
        return (f64::NAN, f64::NAN);
    }
    (change.max(0.0), (-change).max(0.0))
}

fn rsi_value(up: f64, down: f64) -> f64 {
    if up.is_nan() || down.is_nan() {
        f64::NAN
    } else if down == 0.0 {
        100.0
    } else if up == 0.0 {
        0.0
    } else {
        100.0 - (100.0 / (1.0 + up / down))
    }
}

pub fn rsi_series(src: &[f64], period: usize) -> Vec<f64> {
    let mut up = Smoother::rma(period);
    let mut down = Smoother::rma(period);
    let mut values = Vec::with_capacity(src.len());
    for i in 0..src.len() {
        if i == 0 {
            up.push(f64::NAN);
            down.push(f64::NAN);
            values.push(f64::NAN);
            continue;
        }
        let (gain, loss) = split_change(src[i - 1], src[i]);
        values.push(rsi_value(up.push(gain), down.push(loss)));
    }
    values
}

pub fn rsi_last(src: &[f64], period: usize) -> f64 {
    let mut up = Smoother::rma(period);
    let mut down = Smoother::rma(period);
    let mut out = f64::NAN;
    for i in 0..src.len() {
        if i == 0 {
            up.push(f64::NAN);
            down.push(f64::NAN);
            continue;
        }
        let (gain, loss) = split_change(src[i - 1], src[i]);
        out = rsi_value(up.push(gain), down.push(loss));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_empty() {
        assert!(rsi_series(&[], 14).is_empty());
    }

    #[test]
    fn rsi_warmup_period() {
        let src: Vec<f64> = (0..20).map(|i| 100.0 + (i % 3) as f64).collect();
        let out = rsi_series(&src, 14);
        assert!(out[..14].iter().all(|v| v.is_nan()));
        assert!(!out[14].is_nan());
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let src: Vec<f64> = (0..10).map(f64::from).collect();
        let out = rsi_series(&src, 5);
        assert!((out[9] - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let src: Vec<f64> = (0..10).map(|i| 50.0 - i as f64).collect();
        let out = rsi_series(&src, 5);
        assert!(out[9].abs() < f64::EPSILON);
    }

    #[test]
    fn rsi_seed_value() {
        // changes: +2, -1, +2 -> up = 4/3, down = 1/3 -> RS = 4
        let out = rsi_series(&[10.0, 12.0, 11.0, 13.0], 3);
        assert!((out[3] - 80.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_bounded() {
        let src: Vec<f64> = (0..50).map(|i| 100.0 + ((i * 7) % 11) as f64).collect();
        for v in rsi_series(&src, 14).into_iter().filter(|v| !v.is_nan()) {
            assert!((0.0..=100.0).contains(&v));
        }
    }
}
