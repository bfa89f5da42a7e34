//! Performance metrics and statistics.
//!
//! Values are raw `f64`. Ratios with an empty or zero denominator come out
//! non-finite here; the result extractor turns them into "unavailable".
//! Annualisation uses the real timestamp span of the equity curve, so
//! sparse calendars and intraday bars need no fixed bars-per-year constant.

use serde::Serialize;

use super::portfolio::{EquityPoint, Portfolio};
use super::position::TradeRecord;

const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub net_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    /// Largest peak-to-trough fall as a positive fraction.
    pub max_drawdown: f64,
    /// Longest run of equity points spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Mean holding time in hours.
    pub avg_trade_duration_hours: f64,
}

impl Metrics {
    pub fn compute(portfolio: &Portfolio, risk_free_rate: f64) -> Self {
        let equity_curve = &portfolio.equity_curve;
        let trades = &portfolio.closed_trades;
        let initial_capital = portfolio.initial_capital;
        let final_equity = portfolio.final_equity();

        let net_return = (final_equity - initial_capital) / initial_capital;

        let years = span_years(equity_curve);
        let cagr = if years > 0.0 && final_equity >= 0.0 {
            (final_equity / initial_capital).powf(1.0 / years) - 1.0
        } else {
            f64::NAN
        };

        let periods_per_year = if years > 0.0 {
            (equity_curve.len() - 1) as f64 / years
        } else {
            f64::NAN
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);
        let risk = compute_risk_adjusted(equity_curve, risk_free_rate, periods_per_year);
        let calmar_ratio = cagr / max_drawdown;

        let trade_stats = TradeStats::from_trades(trades);

        Metrics {
            net_return,
            cagr,
            volatility: risk.volatility,
            max_drawdown,
            max_drawdown_duration,
            sharpe_ratio: risk.sharpe,
            sortino_ratio: risk.sortino,
            calmar_ratio,
            profit_factor: trade_stats.total_wins / trade_stats.total_losses,
            expectancy: trade_stats.total_pnl / trades.len() as f64,
            win_rate: trade_stats.won as f64 / trades.len() as f64,
            total_trades: trades.len(),
            trades_won: trade_stats.won,
            trades_lost: trade_stats.lost,
            trades_breakeven: trades.len() - trade_stats.won - trade_stats.lost,
            avg_win: trade_stats.total_wins / trade_stats.won as f64,
            avg_loss: trade_stats.total_losses / trade_stats.lost as f64,
            largest_win: trade_stats.largest_win,
            largest_loss: trade_stats.largest_loss,
            avg_trade_duration_hours: trade_stats.total_hours / trades.len() as f64,
        }
    }
}

#[derive(Default)]
struct TradeStats {
    won: usize,
    lost: usize,
    total_pnl: f64,
    total_wins: f64,
    total_losses: f64,
    largest_win: f64,
    largest_loss: f64,
    total_hours: f64,
}

impl TradeStats {
    fn from_trades(trades: &[TradeRecord]) -> Self {
        let mut stats = TradeStats::default();
        for trade in trades {
            let pnl = trade.pnl;
            stats.total_pnl += pnl;
            if pnl > 0.0 {
                stats.won += 1;
                stats.total_wins += pnl;
                stats.largest_win = stats.largest_win.max(pnl);
            } else if pnl < 0.0 {
                stats.lost += 1;
                stats.total_losses += pnl.abs();
                stats.largest_loss = stats.largest_loss.max(pnl.abs());
            }
            stats.total_hours += trade.duration().num_seconds() as f64 / 3600.0;
        }
        stats
    }
}

/// Years between the first and last equity point.
fn span_years(equity_curve: &[EquityPoint]) -> f64 {
    match (equity_curve.first(), equity_curve.last()) {
        (Some(first), Some(last)) => {
            (last.timestamp - first.timestamp).num_seconds() as f64 / SECONDS_PER_YEAR
        }
        _ => 0.0,
    }
}

fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0usize;
    let mut current_dd_duration = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (max_dd, max_dd_duration)
}

struct RiskAdjusted {
    volatility: f64,
    sharpe: f64,
    sortino: f64,
}

fn compute_risk_adjusted(
    equity_curve: &[EquityPoint],
    risk_free_rate: f64,
    periods_per_year: f64,
) -> RiskAdjusted {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| (w[1].equity - w[0].equity) / w[0].equity)
        .collect();

    if returns.is_empty() {
        return RiskAdjusted {
            volatility: f64::NAN,
            sharpe: f64::NAN,
            sortino: f64::NAN,
        };
    }

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;
    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let period_rf = risk_free_rate / periods_per_year;
    let excess_return = mean - period_rf;
    let annualise = periods_per_year.sqrt();

    let downside_variance: f64 = returns
        .iter()
        .filter(|&&r| r < period_rf)
        .map(|&r| (r - period_rf).powi(2))
        .sum::<f64>()
        / n;
    let downside_stddev = downside_variance.sqrt();

    RiskAdjusted {
        volatility: stddev * annualise,
        sharpe: excess_return / stddev * annualise,
        sortino: excess_return / downside_stddev * annualise,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::Direction;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use chrono::{NaiveDate, NaiveDateTime};

    fn day(i: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::days(i)
    }

    fn make_portfolio(equity: &[f64], trades: Vec<TradeRecord>) -> Portfolio {
        let initial = equity.first().copied().unwrap_or(100_000.0);
        let mut portfolio = Portfolio::new(initial);
        for trade in trades {
            portfolio.record_trade(trade);
        }
        for (i, &value) in equity.iter().enumerate() {
            portfolio.record_equity(day(i as i64), value);
        }
        portfolio
    }

    fn make_trade(pnl: f64, days: i64) -> TradeRecord {
        TradeRecord {
            direction: Direction::Long,
            entry_timestamp: day(0),
            exit_timestamp: day(days),
            entry_price: 100.0,
            exit_price: 100.0 + pnl / 100.0,
            quantity: 100.0,
            pnl,
            return_pct: pnl / 100.0,
            closed_at_end: false,
        }
    }

    #[test]
    fn empty_portfolio_has_undefined_ratios() {
        let portfolio = Portfolio::new(100_000.0);
        let metrics = Metrics::compute(&portfolio, 0.0);
        assert!(metrics.net_return.abs() < f64::EPSILON);
        assert_eq!(metrics.total_trades, 0);
        assert!(metrics.win_rate.is_nan());
        assert!(metrics.profit_factor.is_nan());
        assert!(metrics.sharpe_ratio.is_nan());
        assert!(metrics.cagr.is_nan());
    }

    #[test]
    fn net_return_positive_and_negative() {
        let up = Metrics::compute(&make_portfolio(&[100_000.0, 110_000.0], vec![]), 0.0);
        assert!((up.net_return - 0.10).abs() < 1e-9);
        let down = Metrics::compute(&make_portfolio(&[100_000.0, 90_000.0], vec![]), 0.0);
        assert!((down.net_return + 0.10).abs() < 1e-9);
    }

    #[test]
    fn cagr_uses_calendar_span() {
        // Two points 365.25 days apart: one year exactly.
        let mut portfolio = Portfolio::new(100.0);
        portfolio.record_equity(day(0), 100.0);
        portfolio.record_equity(day(0) + chrono::Duration::hours(365 * 24 + 6), 121.0);
        let metrics = Metrics::compute(&portfolio, 0.0);
        assert_relative_eq!(metrics.cagr, 0.21, epsilon = 1e-9);
    }

    #[test]
    fn drawdown_depth_and_duration() {
        let portfolio = make_portfolio(&[100.0, 120.0, 90.0, 100.0, 130.0, 117.0], vec![]);
        let metrics = Metrics::compute(&portfolio, 0.0);
        assert_relative_eq!(metrics.max_drawdown, 0.25, epsilon = 1e-9);
        assert_eq!(metrics.max_drawdown_duration, 2);
    }

    #[test]
    fn flat_equity_has_no_sharpe() {
        let portfolio = make_portfolio(&[100.0, 100.0, 100.0], vec![]);
        let metrics = Metrics::compute(&portfolio, 0.0);
        assert!(metrics.sharpe_ratio.is_nan());
        assert_abs_diff_eq!(metrics.volatility, 0.0);
        assert_abs_diff_eq!(metrics.max_drawdown, 0.0);
        assert!(metrics.calmar_ratio.is_nan());
    }

    #[test]
    fn trade_statistics() {
        let trades = vec![
            make_trade(300.0, 2),
            make_trade(-100.0, 4),
            make_trade(0.0, 1),
            make_trade(100.0, 1),
        ];
        let metrics = Metrics::compute(&make_portfolio(&[100_000.0, 100_300.0], trades), 0.0);
        assert_eq!(metrics.total_trades, 4);
        assert_eq!(metrics.trades_won, 2);
        assert_eq!(metrics.trades_lost, 1);
        assert_eq!(metrics.trades_breakeven, 1);
        assert_relative_eq!(metrics.win_rate, 0.5, epsilon = 1e-9);
        assert_relative_eq!(metrics.profit_factor, 4.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.expectancy, 75.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.avg_win, 200.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.largest_loss, 100.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.avg_trade_duration_hours, 48.0, epsilon = 1e-9);
    }

    #[test]
    fn no_losing_trades_leaves_profit_factor_infinite() {
        let metrics = Metrics::compute(
            &make_portfolio(&[100_000.0, 100_100.0], vec![make_trade(100.0, 1)]),
            0.0,
        );
        assert!(metrics.profit_factor.is_infinite());
        assert!(metrics.avg_loss.is_nan());
    }
}
