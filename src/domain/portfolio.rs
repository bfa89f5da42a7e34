//! Portfolio state and equity tracking for a single-instrument run.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::position::{Lot, PositionState, TradeRecord};
use super::strategy::Direction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    /// Open lots, all in the same direction.
    pub lots: Vec<Lot>,
    pub closed_trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            lots: Vec::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn state(&self) -> PositionState {
        self.lots
            .first()
            .map_or(PositionState::Flat, |lot| lot.direction.into())
    }

    pub fn is_flat(&self) -> bool {
        self.lots.is_empty()
    }

    pub fn lot_count(&self, direction: Direction) -> usize {
        self.lots.iter().filter(|l| l.direction == direction).count()
    }

    pub fn add_lot(&mut self, lot: Lot) {
        self.lots.push(lot);
    }

    pub fn take_lots(&mut self) -> Vec<Lot> {
        std::mem::take(&mut self.lots)
    }

    pub fn record_trade(&mut self, trade: TradeRecord) {
        self.closed_trades.push(trade);
    }

    pub fn record_equity(&mut self, timestamp: NaiveDateTime, equity: f64) {
        self.equity_curve.push(EquityPoint { timestamp, equity });
    }

    /// Cash plus open lots marked at `price`.
    pub fn total_equity(&self, price: f64) -> f64 {
        self.cash + self.lots.iter().map(|l| l.market_value(price)).sum::<f64>()
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map_or(self.initial_capital, |p| p.equity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample_lot(direction: Direction, quantity: f64) -> Lot {
        Lot {
            direction,
            quantity,
            entry_price: 100.0,
            entry_timestamp: ts(15),
            entry_commission: 0.0,
        }
    }

    #[test]
    fn new_portfolio() {
        let portfolio = Portfolio::new(100000.0);
        assert!((portfolio.cash - 100000.0).abs() < f64::EPSILON);
        assert!(portfolio.is_flat());
        assert_eq!(portfolio.state(), PositionState::Flat);
        assert!(portfolio.closed_trades.is_empty());
        assert!(portfolio.equity_curve.is_empty());
        assert!((portfolio.final_equity() - 100000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn state_follows_lots() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.add_lot(sample_lot(Direction::Short, 5.0));
        portfolio.add_lot(sample_lot(Direction::Short, 5.0));
        assert_eq!(portfolio.state(), PositionState::Short);
        assert_eq!(portfolio.lot_count(Direction::Short), 2);
        assert_eq!(portfolio.lot_count(Direction::Long), 0);

        let taken = portfolio.take_lots();
        assert_eq!(taken.len(), 2);
        assert!(portfolio.is_flat());
    }

    #[test]
    fn total_equity_marks_lots() {
        let mut portfolio = Portfolio::new(10000.0);
        portfolio.cash = 9000.0;
        portfolio.add_lot(sample_lot(Direction::Long, 10.0));
        assert!((portfolio.total_equity(110.0) - 10100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn record_equity_appends() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.record_equity(ts(1), 100000.0);
        portfolio.record_equity(ts(2), 101000.0);
        assert_eq!(portfolio.equity_curve.len(), 2);
        assert!((portfolio.final_equity() - 101000.0).abs() < f64::EPSILON);
    }
}
