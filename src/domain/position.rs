//! Open lots, position state and closed trade records.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::strategy::Direction;

/// Simulation-internal position state, derived from the open lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    #[default]
    Flat,
    Long,
    Short,
}

impl PositionState {
    pub fn direction(self) -> Option<Direction> {
        match self {
            PositionState::Flat => None,
            PositionState::Long => Some(Direction::Long),
            PositionState::Short => Some(Direction::Short),
        }
    }
}

impl From<Direction> for PositionState {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Long => PositionState::Long,
            Direction::Short => PositionState::Short,
        }
    }
}

/// One filled entry. Pyramided positions hold several lots in the same
/// direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Lot {
    pub direction: Direction,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_timestamp: NaiveDateTime,
    pub entry_commission: f64,
}

impl Lot {
    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    pub fn notional(&self) -> f64 {
        self.quantity * self.entry_price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.direction {
            Direction::Long => self.quantity * (price - self.entry_price),
            Direction::Short => self.quantity * (self.entry_price - price),
        }
    }

    /// Cash the lot is worth if closed at `price` before costs. Shorts
    /// return their escrowed entry notional plus the price difference.
    pub fn market_value(&self, price: f64) -> f64 {
        match self.direction {
            Direction::Long => self.quantity * price,
            Direction::Short => self.notional() + self.unrealized_pnl(price),
        }
    }
}

/// A closed lot. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub direction: Direction,
    pub entry_timestamp: NaiveDateTime,
    pub exit_timestamp: NaiveDateTime,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Net of entry and exit commission.
    pub pnl: f64,
    /// `pnl` as a percentage of the entry notional.
    pub return_pct: f64,
    /// Closed by the end of the run rather than an exit signal.
    pub closed_at_end: bool,
}

impl TradeRecord {
    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn duration(&self) -> chrono::Duration {
        self.exit_timestamp - self.entry_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn lot(direction: Direction) -> Lot {
        Lot {
            direction,
            quantity: 10.0,
            entry_price: 100.0,
            entry_timestamp: NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            entry_commission: 0.0,
        }
    }

    #[test]
    fn long_lot_value_and_pnl() {
        let l = lot(Direction::Long);
        assert!(l.is_long());
        assert!((l.market_value(110.0) - 1100.0).abs() < f64::EPSILON);
        assert!((l.unrealized_pnl(110.0) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn short_lot_gains_when_price_falls() {
        let l = lot(Direction::Short);
        assert!((l.unrealized_pnl(90.0) - 100.0).abs() < f64::EPSILON);
        assert!((l.market_value(90.0) - 1100.0).abs() < f64::EPSILON);
        assert!((l.market_value(120.0) - 800.0).abs() < f64::EPSILON);
    }

    #[test]
    fn position_state_direction() {
        assert_eq!(PositionState::Flat.direction(), None);
        assert_eq!(PositionState::from(Direction::Short), PositionState::Short);
        assert_eq!(PositionState::Long.direction(), Some(Direction::Long));
    }
}
