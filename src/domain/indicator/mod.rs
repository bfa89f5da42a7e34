//! Technical indicator library.
//!
//! Every indicator is a pure function over `f64` slices and comes in two
//! calling conventions:
//! - `*_series`: whole buffered series in, same-length series out
//! - `*_last`: a trailing window in, the value at its final index out
//!
//! Both conventions run the same arithmetic in the same order, so for any
//! history `src`, `x_series(src)[i] == x_last(&src[..=i])`. Positions without
//! enough history are `NaN`.
//!
//! [`IndicatorKind`] is the closed catalogue the script runtime dispatches
//! through.

pub mod sma;
pub mod ema;
pub mod wma;
pub mod stddev;
pub mod extrema;
pub mod momentum;
pub mod rsi;
pub mod atr;
pub mod macd;
pub mod bands;
pub mod oscillator;
pub mod cross;

pub use atr::{atr_last, atr_series, tr_last, tr_series};
pub use bands::{bb_last, bb_series, kc_last, kc_series};
pub use cross::{cross_last, cross_series, crossover_last, crossover_series, crossunder_last, crossunder_series};
pub use ema::{ema_last, ema_series, rma_last, rma_series, Smoother};
pub use extrema::{highest_last, highest_series, lowest_last, lowest_series};
pub use macd::{macd_last, macd_series};
pub use momentum::{change_last, change_series, roc_last, roc_series};
pub use oscillator::{cci_last, cci_series, stoch_last, stoch_series};
pub use rsi::{rsi_last, rsi_series};
pub use sma::{sma_last, sma_series};
pub use stddev::{stdev_last, stdev_series};
pub use wma::{vwma_last, vwma_series, wma_last, wma_series};

use std::fmt;

/// The closed indicator catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rma,
    Wma,
    Vwma,
    Stdev,
    Highest,
    Lowest,
    Change,
    Mom,
    Roc,
    Rsi,
    Tr,
    Atr,
    Macd,
    Bb,
    Kc,
    Stoch,
    Cci,
    Crossover,
    Crossunder,
    Cross,
}

impl IndicatorKind {
    /// Number of input series the kind consumes, in call order.
    pub fn input_count(self) -> usize {
        match self {
            IndicatorKind::Tr | IndicatorKind::Atr => 3,
            IndicatorKind::Kc => 4,
            IndicatorKind::Stoch => 3,
            IndicatorKind::Vwma => 2,
            IndicatorKind::Crossover | IndicatorKind::Crossunder | IndicatorKind::Cross => 2,
            _ => 1,
        }
    }

    /// Number of output series.
    pub fn output_count(self) -> usize {
        match self {
            IndicatorKind::Macd | IndicatorKind::Bb | IndicatorKind::Kc => 3,
            _ => 1,
        }
    }

    /// Number of leading parameters that are bar counts.
    pub fn length_params(self) -> usize {
        match self {
            IndicatorKind::Macd => 3,
            IndicatorKind::Tr | IndicatorKind::Crossover | IndicatorKind::Crossunder | IndicatorKind::Cross => 0,
            _ => 1,
        }
    }

    /// Whether the single output is a boolean encoded as 0.0 / 1.0.
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            IndicatorKind::Crossover | IndicatorKind::Crossunder | IndicatorKind::Cross
        )
    }

    /// Bars of history needed before the first valid value, given the
    /// numeric parameters.
    pub fn lookback(self, params: &[f64]) -> usize {
        let p = |i: usize| params.get(i).and_then(|v| period(*v)).unwrap_or(1);
        match self {
            IndicatorKind::Change | IndicatorKind::Mom | IndicatorKind::Roc => p(0),
            IndicatorKind::Rsi => p(0),
            IndicatorKind::Tr => usize::from(!params.first().is_some_and(|v| flag(*v))),
            IndicatorKind::Macd => p(1).max(p(0)) - 1 + p(2) - 1,
            IndicatorKind::Crossover | IndicatorKind::Crossunder | IndicatorKind::Cross => 1,
            _ => p(0) - 1,
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Rma => "rma",
            IndicatorKind::Wma => "wma",
            IndicatorKind::Vwma => "vwma",
            IndicatorKind::Stdev => "stdev",
            IndicatorKind::Highest => "highest",
            IndicatorKind::Lowest => "lowest",
            IndicatorKind::Change => "change",
            IndicatorKind::Mom => "mom",
            IndicatorKind::Roc => "roc",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Tr => "tr",
            IndicatorKind::Atr => "atr",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Bb => "bb",
            IndicatorKind::Kc => "kc",
            IndicatorKind::Stoch => "stoch",
            IndicatorKind::Cci => "cci",
            IndicatorKind::Crossover => "crossover",
            IndicatorKind::Crossunder => "crossunder",
            IndicatorKind::Cross => "cross",
        };
        write!(f, "ta.{}", name)
    }
}

/// Convert a script-level length to a period. `None` for NaN, non-integral
/// or non-positive values.
pub fn period(value: f64) -> Option<usize> {
    if value.is_finite() && value >= 1.0 && value.fract() == 0.0 {
        Some(value as usize)
    } else {
        None
    }
}

fn bool_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

/// Boolean indicator parameter encoded as 1.0; anything else, NaN
/// included, is false.
pub fn flag(value: f64) -> bool {
    value == 1.0
}

/// Whole-series dispatch. `inputs` must hold `kind.input_count()` slices of
/// equal length; returns `kind.output_count()` series of that length.
pub fn compute_series(kind: IndicatorKind, inputs: &[&[f64]], params: &[f64]) -> Vec<Vec<f64>> {
    let len = inputs.first().map(|s| s.len()).unwrap_or(0);
    let param = |i: usize| params.get(i).copied().unwrap_or(f64::NAN);
    let length = |i: usize| period(param(i));
    let nan = || vec![vec![f64::NAN; len]; kind.output_count()];

    match kind {
        IndicatorKind::Crossover => vec![crossover_series(inputs[0], inputs[1]).into_iter().map(bool_value).collect()],
        IndicatorKind::Crossunder => vec![crossunder_series(inputs[0], inputs[1]).into_iter().map(bool_value).collect()],
        IndicatorKind::Cross => vec![cross_series(inputs[0], inputs[1]).into_iter().map(bool_value).collect()],
        IndicatorKind::Tr => vec![tr_series(inputs[0], inputs[1], inputs[2], flag(param(0)))],
        IndicatorKind::Macd => match (length(0), length(1), length(2)) {
            (Some(fast), Some(slow), Some(signal)) => {
                let (line, sig, hist) = macd_series(inputs[0], fast, slow, signal);
                vec![line, sig, hist]
            }
            _ => nan(),
        },
        IndicatorKind::Bb => match length(0) {
            Some(p) => {
                let (mid, up, low) = bb_series(inputs[0], p, param(1));
                vec![mid, up, low]
            }
            None => nan(),
        },
        IndicatorKind::Kc => match length(0) {
            Some(p) => {
                let (mid, up, low) = kc_series(inputs[0], inputs[1], inputs[2], inputs[3], p, param(1), flag(param(2)));
                vec![mid, up, low]
            }
            None => nan(),
        },
        _ => match length(0) {
            Some(p) => vec![match kind {
                IndicatorKind::Sma => sma_series(inputs[0], p),
                IndicatorKind::Ema => ema_series(inputs[0], p),
                IndicatorKind::Rma => rma_series(inputs[0], p),
                IndicatorKind::Wma => wma_series(inputs[0], p),
                IndicatorKind::Vwma => vwma_series(inputs[0], inputs[1], p),
                IndicatorKind::Stdev => stdev_series(inputs[0], p),
                IndicatorKind::Highest => highest_series(inputs[0], p),
                IndicatorKind::Lowest => lowest_series(inputs[0], p),
                IndicatorKind::Change | IndicatorKind::Mom => change_series(inputs[0], p),
                IndicatorKind::Roc => roc_series(inputs[0], p),
                IndicatorKind::Rsi => rsi_series(inputs[0], p),
                IndicatorKind::Atr => atr_series(inputs[0], inputs[1], inputs[2], p),
                IndicatorKind::Stoch => stoch_series(inputs[0], inputs[1], inputs[2], p),
                IndicatorKind::Cci => cci_series(inputs[0], p),
                _ => vec![f64::NAN; len],
            }],
            None => nan(),
        },
    }
}

/// Trailing-window dispatch: the value(s) at the final index of `inputs`.
pub fn compute_last(kind: IndicatorKind, inputs: &[&[f64]], params: &[f64]) -> Vec<f64> {
    let param = |i: usize| params.get(i).copied().unwrap_or(f64::NAN);
    let length = |i: usize| period(param(i));
    let nan = || vec![f64::NAN; kind.output_count()];

    match kind {
        IndicatorKind::Crossover => vec![bool_value(crossover_last(inputs[0], inputs[1]))],
        IndicatorKind::Crossunder => vec![bool_value(crossunder_last(inputs[0], inputs[1]))],
        IndicatorKind::Cross => vec![bool_value(cross_last(inputs[0], inputs[1]))],
        IndicatorKind::Tr => vec![tr_last(inputs[0], inputs[1], inputs[2], flag(param(0)))],
        IndicatorKind::Macd => match (length(0), length(1), length(2)) {
            (Some(fast), Some(slow), Some(signal)) => {
                let (line, sig, hist) = macd_last(inputs[0], fast, slow, signal);
                vec![line, sig, hist]
            }
            _ => nan(),
        },
        IndicatorKind::Bb => match length(0) {
            Some(p) => {
                let (mid, up, low) = bb_last(inputs[0], p, param(1));
                vec![mid, up, low]
            }
            None => nan(),
        },
        IndicatorKind::Kc => match length(0) {
            Some(p) => {
                let (mid, up, low) = kc_last(inputs[0], inputs[1], inputs[2], inputs[3], p, param(1), flag(param(2)));
                vec![mid, up, low]
            }
            None => nan(),
        },
        _ => match length(0) {
            Some(p) => vec![match kind {
                IndicatorKind::Sma => sma_last(inputs[0], p),
                IndicatorKind::Ema => ema_last(inputs[0], p),
                IndicatorKind::Rma => rma_last(inputs[0], p),
                IndicatorKind::Wma => wma_last(inputs[0], p),
                IndicatorKind::Vwma => vwma_last(inputs[0], inputs[1], p),
                IndicatorKind::Stdev => stdev_last(inputs[0], p),
                IndicatorKind::Highest => highest_last(inputs[0], p),
                IndicatorKind::Lowest => lowest_last(inputs[0], p),
                IndicatorKind::Change | IndicatorKind::Mom => change_last(inputs[0], p),
                IndicatorKind::Roc => roc_last(inputs[0], p),
                IndicatorKind::Rsi => rsi_last(inputs[0], p),
                IndicatorKind::Atr => atr_last(inputs[0], inputs[1], inputs[2], p),
                IndicatorKind::Stoch => stoch_last(inputs[0], inputs[1], inputs[2], p),
                IndicatorKind::Cci => cci_last(inputs[0], p),
                _ => f64::NAN,
            }],
            None => nan(),
        },
    }
}
