//! Exponential and Wilder (RMA) smoothing.
//!
//! EMA: k = 2/(n+1), RMA: k = 1/n. Both seed with the SMA of the first n
//! consecutive non-NaN values, then
//! - EMA[i] = src[i]*k + EMA[i-1]*(1-k)
//! - RMA[i] = (RMA[i-1]*(n-1) + src[i]) / n
//!
//! A NaN before seeding restarts the seed; after seeding it yields NaN at
//! that index and leaves the running value untouched.

#[derive(Debug, Clone, Copy, PartialEq)]
enum Recurrence {
    Exponential,
    Wilder,
}

/// Incremental smoother shared by the series and window entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct Smoother {
    period: usize,
    recurrence: Recurrence,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
}

impl Smoother {
    pub fn ema(period: usize) -> Self {
        Self::new(period, Recurrence::Exponential)
    }

    pub fn rma(period: usize) -> Self {
        Self::new(period, Recurrence::Wilder)
    }

    fn new(period: usize, recurrence: Recurrence) -> Self {
        Smoother {
            period,
            recurrence,
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
        }
    }

    pub fn push(&mut self, x: f64) -> f64 {
        if self.period == 0 {
            return f64::NAN;
        }
        if x.is_nan() {
            if self.value.is_none() {
                self.seed_sum = 0.0;
                self.seed_count = 0;
            }
            return f64::NAN;
        }
        let next = match self.value {
            None => {
                self.seed_sum += x;
                self.seed_count += 1;
                if self.seed_count < self.period {
                    return f64::NAN;
                }
                self.seed_sum / self.period as f64
            }
            Some(prev) => match self.recurrence {
                Recurrence::Exponential => {
                    let k = 2.0 / (self.period as f64 + 1.0);
                    x * k + prev * (1.0 - k)
                }
                Recurrence::Wilder => {
                    (prev * (self.period - 1) as f64 + x) / self.period as f64
                }
            },
        };
        self.value = Some(next);
        next
    }
}

fn run_series(src: &[f64], mut smoother: Smoother) -> Vec<f64> {
    src.iter().map(|&x| smoother.push(x)).collect()
}

fn run_last(src: &[f64], mut smoother: Smoother) -> f64 {
    let mut out = f64::NAN;
    for &x in src {
        out = smoother.push(x);
    }
    out
}

pub fn ema_series(src: &[f64], period: usize) -> Vec<f64> {
    run_series(src, Smoother::ema(period))
}

pub fn ema_last(src: &[f64], period: usize) -> f64 {
    run_last(src, Smoother::ema(period))
}

pub fn rma_series(src: &[f64], period: usize) -> Vec<f64> {
    run_series(src, Smoother::rma(period))
}

pub fn rma_last(src: &[f64], period: usize) -> f64 {
    run_last(src, Smoother::rma(period))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seed_is_sma() {
        let out = ema_series(&[10.0, 20.0, 30.0], 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert!((out[2] - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_recursive_calculation() {
        let out = ema_series(&[10.0, 20.0, 30.0, 40.0, 50.0], 3);
        let k = 2.0 / 4.0;
        let ema_3 = 40.0 * k + 20.0 * (1.0 - k);
        let ema_4 = 50.0 * k + ema_3 * (1.0 - k);
        assert!((out[3] - ema_3).abs() < f64::EPSILON);
        assert!((out[4] - ema_4).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_period_1_tracks_input() {
        let out = ema_series(&[10.0, 20.0, 30.0], 1);
        assert_eq!(out, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn rma_wilder_smoothing() {
        let out = rma_series(&[10.0, 10.0, 10.0, 13.0], 3);
        assert!((out[2] - 10.0).abs() < f64::EPSILON);
        let expected = (10.0 * 2.0 + 13.0) / 3.0;
        assert!((out[3] - expected).abs() < 1e-12);
    }

    #[test]
    fn leading_nan_delays_seed() {
        let out = ema_series(&[f64::NAN, f64::NAN, 1.0, 2.0, 3.0], 2);
        assert!(out[2].is_nan());
        assert!((out[3] - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn nan_after_seed_keeps_state() {
        let out = rma_series(&[2.0, 2.0, f64::NAN, 5.0], 2);
        assert!(out[2].is_nan());
        assert!((out[3] - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn last_matches_series() {
        let src = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        let series = ema_series(&src, 4);
        for i in 0..src.len() {
            let last = ema_last(&src[..=i], 4);
            assert!(series[i].to_bits() == last.to_bits() || (series[i].is_nan() && last.is_nan()));
        }
    }
}
