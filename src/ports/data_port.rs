//! Data access port trait.

use crate::domain::error::PinelabError;
use crate::domain::ohlcv::OhlcvBar;
use chrono::NaiveDateTime;

/// Source of OHLCV bars for one symbol.
///
/// Bars come back in stored order. Ordering is validated by the domain,
/// never repaired here.
pub trait DataPort {
    /// Chart-resolution bars with `start <= timestamp <= end`.
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<OhlcvBar>, PinelabError>;

    /// Bars at a finer resolution, or `None` when no data exists at that
    /// resolution.
    fn fetch_resolution(
        &self,
        symbol: &str,
        minutes: u32,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Option<Vec<OhlcvBar>>, PinelabError>;
}
