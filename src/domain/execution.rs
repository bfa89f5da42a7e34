//! Trade execution and fill simulation.
//!
//! Fills happen at a market price adjusted for slippage against the trader.
//! Commission is a percentage of the filled notional, charged on entry and
//! on exit. Quantities are fractional.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::portfolio::Portfolio;
use super::position::{Lot, TradeRecord};
use super::strategy::{Direction, SizingKind};

/// How much to buy or sell on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderSizing {
    pub kind: SizingKind,
    /// Percent of equity, cash amount or quantity, depending on `kind`.
    pub value: f64,
}

impl Default for OrderSizing {
    fn default() -> Self {
        OrderSizing {
            kind: SizingKind::PercentOfEquity,
            value: 100.0,
        }
    }
}

impl OrderSizing {
    /// `kind` with its natural default value: all equity, all capital in
    /// cash, or one unit.
    pub fn for_kind(kind: SizingKind, initial_capital: f64) -> Self {
        let value = match kind {
            SizingKind::PercentOfEquity => 100.0,
            SizingKind::Cash => initial_capital,
            SizingKind::Fixed => 1.0,
        };
        OrderSizing { kind, value }
    }
}

/// Cost and sizing parameters shared by every fill of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionConfig {
    pub commission_pct: f64,
    pub slippage_pct: f64,
    pub sizing: OrderSizing,
    /// Maximum same-direction lots; zero behaves as one.
    pub pyramiding: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission_pct: 0.0,
            slippage_pct: 0.0,
            sizing: OrderSizing::default(),
            pyramiding: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Entry,
    Exit,
}

/// Commission for a fill: notional * pct / 100.
pub fn calculate_commission(notional: f64, commission_pct: f64) -> f64 {
    notional * commission_pct / 100.0
}

/// Buying fills higher, selling fills lower.
pub fn apply_slippage(market_price: f64, direction: Direction, side: Side, slippage_pct: f64) -> f64 {
    let buying = matches!(
        (direction, side),
        (Direction::Long, Side::Entry) | (Direction::Short, Side::Exit)
    );
    if buying {
        market_price * (1.0 + slippage_pct / 100.0)
    } else {
        market_price * (1.0 - slippage_pct / 100.0)
    }
}

/// Quantity for an order at `price` given current `equity`.
pub fn order_quantity(sizing: &OrderSizing, equity: f64, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    match sizing.kind {
        SizingKind::PercentOfEquity => equity * sizing.value / 100.0 / price,
        SizingKind::Cash => sizing.value / price,
        SizingKind::Fixed => sizing.value,
    }
}

/// Result of an entry attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered {
        quantity: f64,
        execution_price: f64,
        commission: f64,
    },
    InsufficientCapital,
    PyramidingLimit,
}

/// Open a new lot in `direction`. The caller closes any opposite lots
/// first.
///
/// The order is shrunk to what the cash can pay for including commission.
/// Short entries escrow their notional the same way long entries pay for
/// theirs.
pub fn enter(
    portfolio: &mut Portfolio,
    direction: Direction,
    market_price: f64,
    timestamp: NaiveDateTime,
    config: &ExecutionConfig,
) -> EntryResult {
    if portfolio.lot_count(direction) >= config.pyramiding.max(1) as usize {
        return EntryResult::PyramidingLimit;
    }

    let execution_price = apply_slippage(market_price, direction, Side::Entry, config.slippage_pct);
    let equity = portfolio.total_equity(market_price);
    let mut quantity = order_quantity(&config.sizing, equity, execution_price);

    let unit_cost = execution_price * (1.0 + config.commission_pct / 100.0);
    if quantity * unit_cost > portfolio.cash {
        quantity = portfolio.cash / unit_cost;
    }
    if !quantity.is_finite() || quantity <= 0.0 {
        return EntryResult::InsufficientCapital;
    }

    let cost = quantity * execution_price;
    let commission = calculate_commission(cost, config.commission_pct);
    portfolio.cash -= cost + commission;
    portfolio.add_lot(Lot {
        direction,
        quantity,
        entry_price: execution_price,
        entry_timestamp: timestamp,
        entry_commission: commission,
    });

    EntryResult::Entered {
        quantity,
        execution_price,
        commission,
    }
}

/// Close every open lot at `market_price`, one trade record per lot.
/// Returns the number of lots closed.
pub fn exit_all(
    portfolio: &mut Portfolio,
    market_price: f64,
    timestamp: NaiveDateTime,
    closed_at_end: bool,
    config: &ExecutionConfig,
) -> usize {
    let lots = portfolio.take_lots();
    let count = lots.len();

    for lot in lots {
        let exit_price = apply_slippage(market_price, lot.direction, Side::Exit, config.slippage_pct);
        let exit_commission = calculate_commission(lot.quantity * exit_price, config.commission_pct);
        let pnl = lot.unrealized_pnl(exit_price) - lot.entry_commission - exit_commission;

        portfolio.cash += lot.market_value(exit_price) - exit_commission;

        let notional = lot.notional();
        portfolio.record_trade(TradeRecord {
            direction: lot.direction,
            entry_timestamp: lot.entry_timestamp,
            exit_timestamp: timestamp,
            entry_price: lot.entry_price,
            exit_price,
            quantity: lot.quantity,
            pnl,
            return_pct: if notional > 0.0 { pnl / notional * 100.0 } else { 0.0 },
            closed_at_end,
        });
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::PositionState;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn config(commission_pct: f64, slippage_pct: f64) -> ExecutionConfig {
        ExecutionConfig {
            commission_pct,
            slippage_pct,
            ..Default::default()
        }
    }

    #[test]
    fn commission_is_percent_of_notional() {
        assert!((calculate_commission(10000.0, 0.1) - 10.0).abs() < 1e-9);
        assert!(calculate_commission(10000.0, 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn slippage_goes_against_the_trader() {
        let buy = apply_slippage(100.0, Direction::Long, Side::Entry, 0.05);
        assert!((buy - 100.05).abs() < 1e-9);
        let sell = apply_slippage(100.0, Direction::Long, Side::Exit, 0.05);
        assert!((sell - 99.95).abs() < 1e-9);
        let short_entry = apply_slippage(100.0, Direction::Short, Side::Entry, 0.05);
        assert!((short_entry - 99.95).abs() < 1e-9);
        let cover = apply_slippage(100.0, Direction::Short, Side::Exit, 0.05);
        assert!((cover - 100.05).abs() < 1e-9);
    }

    #[test]
    fn order_quantity_by_sizing_kind() {
        let pct = OrderSizing {
            kind: SizingKind::PercentOfEquity,
            value: 50.0,
        };
        assert!((order_quantity(&pct, 10000.0, 100.0) - 50.0).abs() < 1e-9);
        let cash = OrderSizing {
            kind: SizingKind::Cash,
            value: 2500.0,
        };
        assert!((order_quantity(&cash, 10000.0, 100.0) - 25.0).abs() < 1e-9);
        let fixed = OrderSizing {
            kind: SizingKind::Fixed,
            value: 3.0,
        };
        assert!((order_quantity(&fixed, 10000.0, 100.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn full_equity_entry_fits_commission() {
        let mut portfolio = Portfolio::new(10000.0);
        let result = enter(&mut portfolio, Direction::Long, 100.0, ts(1), &config(0.1, 0.0));
        let EntryResult::Entered {
            quantity, commission, ..
        } = result
        else {
            panic!("expected entry, got {result:?}");
        };
        assert!(quantity < 100.0);
        assert!((quantity * 100.0 + commission - 10000.0).abs() < 1e-6);
        assert!(portfolio.cash.abs() < 1e-6);
        assert_eq!(portfolio.state(), PositionState::Long);
    }

    #[test]
    fn long_round_trip_pnl() {
        let mut portfolio = Portfolio::new(10000.0);
        let cfg = ExecutionConfig {
            sizing: OrderSizing {
                kind: SizingKind::Fixed,
                value: 10.0,
            },
            ..config(0.0, 0.0)
        };
        enter(&mut portfolio, Direction::Long, 100.0, ts(1), &cfg);
        assert!((portfolio.cash - 9000.0).abs() < 1e-9);

        assert_eq!(exit_all(&mut portfolio, 110.0, ts(5), false, &cfg), 1);
        assert!(portfolio.is_flat());
        assert!((portfolio.cash - 10100.0).abs() < 1e-9);
        let trade = &portfolio.closed_trades[0];
        assert!((trade.pnl - 100.0).abs() < 1e-9);
        assert!((trade.return_pct - 10.0).abs() < 1e-9);
        assert!(!trade.closed_at_end);
    }

    #[test]
    fn short_round_trip_pnl_with_costs() {
        let mut portfolio = Portfolio::new(10000.0);
        let cfg = ExecutionConfig {
            sizing: OrderSizing {
                kind: SizingKind::Fixed,
                value: 10.0,
            },
            ..config(1.0, 0.0)
        };
        enter(&mut portfolio, Direction::Short, 100.0, ts(1), &cfg);
        // 1000 escrowed + 10 commission
        assert!((portfolio.cash - 8990.0).abs() < 1e-9);

        exit_all(&mut portfolio, 90.0, ts(3), false, &cfg);
        let trade = &portfolio.closed_trades[0];
        // 100 gross - 10 entry - 9 exit commission
        assert!((trade.pnl - 81.0).abs() < 1e-9);
        assert!((portfolio.cash - 10081.0).abs() < 1e-9);
    }

    #[test]
    fn pyramiding_limit_blocks_extra_lots() {
        let mut portfolio = Portfolio::new(10000.0);
        let cfg = ExecutionConfig {
            sizing: OrderSizing {
                kind: SizingKind::Fixed,
                value: 1.0,
            },
            pyramiding: 2,
            ..config(0.0, 0.0)
        };
        assert!(matches!(
            enter(&mut portfolio, Direction::Long, 100.0, ts(1), &cfg),
            EntryResult::Entered { .. }
        ));
        assert!(matches!(
            enter(&mut portfolio, Direction::Long, 101.0, ts(2), &cfg),
            EntryResult::Entered { .. }
        ));
        assert_eq!(
            enter(&mut portfolio, Direction::Long, 102.0, ts(3), &cfg),
            EntryResult::PyramidingLimit
        );
        assert_eq!(exit_all(&mut portfolio, 105.0, ts(4), true, &cfg), 2);
        assert_eq!(portfolio.closed_trades.len(), 2);
        assert!(portfolio.closed_trades.iter().all(|t| t.closed_at_end));
    }

    #[test]
    fn no_cash_means_no_entry() {
        let mut portfolio = Portfolio::new(0.0);
        assert_eq!(
            enter(&mut portfolio, Direction::Long, 100.0, ts(1), &config(0.0, 0.0)),
            EntryResult::InsufficientCapital
        );
    }
}
