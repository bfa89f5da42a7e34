//! OHLCV bar and validated series representation.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::error::RuntimeFault;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcvBar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcvBar {
    /// (high + low) / 2
    pub fn hl2(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// (open + high + low + close) / 4
    pub fn ohlc4(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    pub fn field(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
            PriceField::Volume => self.volume,
            PriceField::Hl2 => self.hl2(),
            PriceField::Hlc3 => self.typical_price(),
            PriceField::Ohlc4 => self.ohlc4(),
        }
    }
}

/// A price column a script can read as a builtin series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Hl2,
    Hlc3,
    Ohlc4,
}

impl PriceField {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(PriceField::Open),
            "high" => Some(PriceField::High),
            "low" => Some(PriceField::Low),
            "close" => Some(PriceField::Close),
            "volume" => Some(PriceField::Volume),
            "hl2" => Some(PriceField::Hl2),
            "hlc3" => Some(PriceField::Hlc3),
            "ohlc4" => Some(PriceField::Ohlc4),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Close => "close",
            PriceField::Volume => "volume",
            PriceField::Hl2 => "hl2",
            PriceField::Hlc3 => "hlc3",
            PriceField::Ohlc4 => "ohlc4",
        }
    }
}

/// Ordered bars with strictly increasing timestamps. Spacing between bars is
/// not assumed to be fixed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcvSeries {
    bars: Vec<OhlcvBar>,
}

impl OhlcvSeries {
    /// Validate ordering and prices. Never reorders: a violation is fatal.
    pub fn new(bars: Vec<OhlcvBar>) -> Result<Self, RuntimeFault> {
        if bars.is_empty() {
            return Err(RuntimeFault::EmptySeries);
        }
        for (index, bar) in bars.iter().enumerate() {
            let prices = [bar.open, bar.high, bar.low, bar.close, bar.volume];
            if prices.iter().any(|p| !p.is_finite()) {
                return Err(RuntimeFault::InvalidBar {
                    index,
                    reason: "non-finite price or volume".to_string(),
                });
            }
            if bar.high < bar.low {
                return Err(RuntimeFault::InvalidBar {
                    index,
                    reason: format!("high {} below low {}", bar.high, bar.low),
                });
            }
            if index > 0 && bar.timestamp <= bars[index - 1].timestamp {
                return Err(RuntimeFault::NonMonotonicTimestamps { index });
            }
        }
        Ok(OhlcvSeries { bars })
    }

    pub fn bars(&self) -> &[OhlcvBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_timestamp(&self) -> NaiveDateTime {
        self.bars[0].timestamp
    }

    pub fn last_timestamp(&self) -> NaiveDateTime {
        self.bars[self.bars.len() - 1].timestamp
    }

    pub fn column(&self, field: PriceField) -> Vec<f64> {
        self.bars.iter().map(|b| b.field(field)).collect()
    }

    /// Bars with `start <= timestamp <= end`. Fails if nothing remains.
    pub fn within(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<OhlcvSeries, RuntimeFault> {
        let bars: Vec<OhlcvBar> = self
            .bars
            .iter()
            .filter(|b| start.is_none_or(|s| b.timestamp >= s))
            .filter(|b| end.is_none_or(|e| b.timestamp <= e))
            .cloned()
            .collect();
        if bars.is_empty() {
            return Err(RuntimeFault::EmptySeries);
        }
        Ok(OhlcvSeries { bars })
    }

    /// Index range of bars with `from <= timestamp < to`.
    pub fn index_range(&self, from: NaiveDateTime, to: NaiveDateTime) -> std::ops::Range<usize> {
        let start = self.bars.partition_point(|b| b.timestamp < from);
        let end = self.bars.partition_point(|b| b.timestamp < to);
        start..end.max(start)
    }
}

/// A chart-resolution bar under construction from sub-bars.
#[derive(Debug, Clone, PartialEq)]
pub struct FormingBar {
    bar: OhlcvBar,
}

impl FormingBar {
    /// Open is fixed at the first sub-bar's open; the chart bar's timestamp
    /// is kept so the window stays aligned with chart bars.
    pub fn start(timestamp: NaiveDateTime, first: &OhlcvBar) -> Self {
        FormingBar {
            bar: OhlcvBar {
                timestamp,
                open: first.open,
                high: first.high,
                low: first.low,
                close: first.close,
                volume: first.volume,
            },
        }
    }

    pub fn update(&mut self, sub: &OhlcvBar) {
        self.bar.high = self.bar.high.max(sub.high);
        self.bar.low = self.bar.low.min(sub.low);
        self.bar.close = sub.close;
        self.bar.volume += sub.volume;
    }

    pub fn bar(&self) -> &OhlcvBar {
        &self.bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::minutes(minute as i64)
    }

    fn bar(minute: u32, open: f64, high: f64, low: f64, close: f64) -> OhlcvBar {
        OhlcvBar {
            timestamp: ts(minute),
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn typical_price_and_hl2() {
        let b = bar(0, 100.0, 110.0, 90.0, 105.0);
        assert!((b.typical_price() - (110.0 + 90.0 + 105.0) / 3.0).abs() < f64::EPSILON);
        assert!((b.hl2() - 100.0).abs() < f64::EPSILON);
        assert!((b.ohlc4() - 101.25).abs() < f64::EPSILON);
    }

    #[test]
    fn true_range_gap_up() {
        let b = bar(0, 100.0, 110.0, 90.0, 105.0);
        // high-low=20, |110-70|=40, |90-70|=20 -> 40
        assert!((b.true_range(70.0) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn series_rejects_duplicate_timestamps() {
        let bars = vec![bar(0, 1.0, 1.0, 1.0, 1.0), bar(0, 1.0, 1.0, 1.0, 1.0)];
        assert_eq!(
            OhlcvSeries::new(bars),
            Err(RuntimeFault::NonMonotonicTimestamps { index: 1 })
        );
    }

    #[test]
    fn series_rejects_backwards_timestamps() {
        let bars = vec![
            bar(5, 1.0, 1.0, 1.0, 1.0),
            bar(10, 1.0, 1.0, 1.0, 1.0),
            bar(7, 1.0, 1.0, 1.0, 1.0),
        ];
        assert_eq!(
            OhlcvSeries::new(bars),
            Err(RuntimeFault::NonMonotonicTimestamps { index: 2 })
        );
    }

    #[test]
    fn series_tolerates_sparse_calendar() {
        let bars = vec![
            bar(0, 1.0, 1.0, 1.0, 1.0),
            bar(1, 1.0, 1.0, 1.0, 1.0),
            bar(90, 1.0, 1.0, 1.0, 1.0),
        ];
        assert_eq!(OhlcvSeries::new(bars).unwrap().len(), 3);
    }

    #[test]
    fn series_rejects_nan_price() {
        let bars = vec![bar(0, 1.0, 1.0, 1.0, f64::NAN)];
        assert!(matches!(
            OhlcvSeries::new(bars),
            Err(RuntimeFault::InvalidBar { index: 0, .. })
        ));
    }

    #[test]
    fn within_filters_and_index_range() {
        let series = OhlcvSeries::new((0..10).map(|m| bar(m * 5, 1.0, 1.0, 1.0, 1.0)).collect())
            .unwrap();
        let sub = series.within(Some(ts(10)), Some(ts(20))).unwrap();
        assert_eq!(sub.len(), 3);
        assert_eq!(series.index_range(ts(10), ts(25)), 2..5);
        assert_eq!(series.index_range(ts(100), ts(200)), 10..10);
    }

    #[test]
    fn forming_bar_accumulates() {
        let mut forming = FormingBar::start(ts(0), &bar(0, 100.0, 101.0, 99.0, 100.5));
        forming.update(&bar(1, 100.5, 104.0, 100.0, 103.0));
        forming.update(&bar(2, 103.0, 103.5, 97.0, 98.0));
        let b = forming.bar();
        assert_eq!(b.timestamp, ts(0));
        assert!((b.open - 100.0).abs() < f64::EPSILON);
        assert!((b.high - 104.0).abs() < f64::EPSILON);
        assert!((b.low - 97.0).abs() < f64::EPSILON);
        assert!((b.close - 98.0).abs() < f64::EPSILON);
        assert!((b.volume - 30.0).abs() < f64::EPSILON);
    }
}
