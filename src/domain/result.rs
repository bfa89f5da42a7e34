//! Result extraction: reduce a simulation run to a bounded, JSON-safe
//! summary.
//!
//! # Bounds
//!
//! - The equity curve is sampled with stride `ceil(len / max_points)`; the
//!   first and last points are always kept and the sample never exceeds
//!   `max_points`.
//! - The trade list keeps the first `max_trades` trades and flags the cut.
//! - Every statistic is a [`Stat`]: a finite number or "unavailable".

use serde::{Serialize, Serializer};

use super::error::RecordedFault;
use super::metrics::Metrics;
use super::portfolio::EquityPoint;
use super::position::TradeRecord;
use super::signal::SignalCounts;

/// Marker written in place of a non-finite statistic.
pub const UNAVAILABLE: &str = "unavailable";

/// A statistic that may be mathematically undefined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stat {
    Value(f64),
    Unavailable,
}

impl Stat {
    pub fn value(self) -> Option<f64> {
        match self {
            Stat::Value(v) => Some(v),
            Stat::Unavailable => None,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Stat::Value(_))
    }
}

impl From<f64> for Stat {
    fn from(value: f64) -> Self {
        if value.is_finite() {
            Stat::Value(value)
        } else {
            Stat::Unavailable
        }
    }
}

impl Serialize for Stat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Stat::Value(v) => serializer.serialize_f64(*v),
            Stat::Unavailable => serializer.serialize_str(UNAVAILABLE),
        }
    }
}

impl std::fmt::Display for Stat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stat::Value(v) => write!(f, "{v:.4}"),
            Stat::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub net_return: Stat,
    pub cagr: Stat,
    pub volatility: Stat,
    pub max_drawdown: Stat,
    pub max_drawdown_duration: usize,
    pub sharpe: Stat,
    pub sortino: Stat,
    pub calmar: Stat,
    pub profit_factor: Stat,
    pub expectancy: Stat,
    pub win_rate: Stat,
    pub avg_win: Stat,
    pub avg_loss: Stat,
    pub largest_win: Stat,
    pub largest_loss: Stat,
    pub avg_trade_duration_hours: Stat,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
}

impl From<&Metrics> for Statistics {
    fn from(m: &Metrics) -> Self {
        Statistics {
            net_return: m.net_return.into(),
            cagr: m.cagr.into(),
            volatility: m.volatility.into(),
            max_drawdown: m.max_drawdown.into(),
            max_drawdown_duration: m.max_drawdown_duration,
            sharpe: m.sharpe_ratio.into(),
            sortino: m.sortino_ratio.into(),
            calmar: m.calmar_ratio.into(),
            profit_factor: m.profit_factor.into(),
            expectancy: m.expectancy.into(),
            win_rate: m.win_rate.into(),
            avg_win: m.avg_win.into(),
            avg_loss: m.avg_loss.into(),
            largest_win: m.largest_win.into(),
            largest_loss: m.largest_loss.into(),
            avg_trade_duration_hours: m.avg_trade_duration_hours.into(),
            total_trades: m.total_trades,
            winning_trades: m.trades_won,
            losing_trades: m.trades_lost,
            breakeven_trades: m.trades_breakeven,
        }
    }
}

/// Which path produced the signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    Standard,
    Magnifier,
}

impl SimulationMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "standard" => Some(SimulationMode::Standard),
            "magnifier" => Some(SimulationMode::Magnifier),
            _ => None,
        }
    }
}

impl std::fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationMode::Standard => f.write_str("standard"),
            SimulationMode::Magnifier => f.write_str("magnifier"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub title: String,
    pub requested_mode: SimulationMode,
    pub mode: SimulationMode,
    /// Sub-bar resolution in minutes, magnifier runs only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_resolution: Option<u32>,
    pub bars: usize,
    pub warmup: usize,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub statistics: Statistics,
    pub signals: SignalCounts,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub trades_truncated: bool,
    pub faults: Vec<RecordedFault>,
}

impl SimulationResult {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Sample `curve` down to at most `max_points`, keeping both ends.
pub fn sample_equity(curve: &[EquityPoint], max_points: usize) -> Vec<EquityPoint> {
    if max_points == 0 || curve.len() <= max_points {
        return curve.to_vec();
    }
    let stride = curve.len().div_ceil(max_points);
    let mut sampled: Vec<EquityPoint> = curve.iter().step_by(stride).cloned().collect();
    let last_index = curve.len() - 1;
    if last_index % stride != 0 {
        if sampled.len() >= max_points {
            sampled.pop();
        }
        sampled.push(curve[last_index].clone());
    }
    sampled
}

/// Keep the first `max_trades` trades. Returns the kept trades and whether
/// any were dropped.
pub fn cap_trades(trades: &[TradeRecord], max_trades: usize) -> (Vec<TradeRecord>, bool) {
    if max_trades == 0 || trades.len() <= max_trades {
        return (trades.to_vec(), false);
    }
    (trades[..max_trades].to_vec(), true)
}
