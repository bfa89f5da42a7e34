#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
pub use pinelab::domain::ohlcv::{FormingBar, OhlcvBar, OhlcvSeries};
use pinelab::domain::error::PinelabError;
use pinelab::ports::data_port::DataPort;
use std::collections::HashMap;

pub struct MockDataPort {
    pub chart: HashMap<String, Vec<OhlcvBar>>,
    pub resolutions: HashMap<(String, u32), Vec<OhlcvBar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            chart: HashMap::new(),
            resolutions: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<OhlcvBar>) -> Self {
        self.chart.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_resolution(mut self, symbol: &str, minutes: u32, bars: Vec<OhlcvBar>) -> Self {
        self.resolutions.insert((symbol.to_string(), minutes), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

fn in_range(bars: &[OhlcvBar], start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Vec<OhlcvBar> {
    bars.iter()
        .filter(|b| start.is_none_or(|s| b.timestamp >= s) && end.is_none_or(|e| b.timestamp <= e))
        .cloned()
        .collect()
}

impl DataPort for MockDataPort {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<OhlcvBar>, PinelabError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(PinelabError::Data {
                reason: reason.clone(),
            });
        }
        Ok(self
            .chart
            .get(symbol)
            .map(|bars| in_range(bars, start, end))
            .unwrap_or_default())
    }

    fn fetch_resolution(
        &self,
        symbol: &str,
        minutes: u32,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Option<Vec<OhlcvBar>>, PinelabError> {
        Ok(self
            .resolutions
            .get(&(symbol.to_string(), minutes))
            .map(|bars| in_range(bars, start, end)))
    }
}

/// `minutes` after 2024-01-01 00:00.
pub fn ts(minutes: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::minutes(minutes)
}

pub fn flat_bar(minute: i64, close: f64) -> OhlcvBar {
    OhlcvBar {
        timestamp: ts(minute),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
    }
}

/// One bar per `step_minutes`, open at the previous close.
pub fn bars_from_closes(closes: &[f64], step_minutes: i64) -> Vec<OhlcvBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            OhlcvBar {
                timestamp: ts(i as i64 * step_minutes),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

pub fn series_from_closes(closes: &[f64], step_minutes: i64) -> OhlcvSeries {
    OhlcvSeries::new(bars_from_closes(closes, step_minutes)).unwrap()
}

/// Flat at 100 for bars 0..=29, up one per bar to 120 at bar 49, then
/// down one per bar.
pub fn trend_reversal_closes() -> Vec<f64> {
    (0..100)
        .map(|i| match i {
            0..=29 => 100.0,
            30..=49 => 100.0 + (i - 29) as f64,
            _ => 120.0 - (i - 49) as f64,
        })
        .collect()
}

/// Hourly chart bars aggregated from 5-minute flat sub-bars whose closes
/// are given per hour.
pub fn hourly_with_sub_bars(hours: &[[f64; 12]]) -> (Vec<OhlcvBar>, Vec<OhlcvBar>) {
    let mut subs = Vec::new();
    let mut charts = Vec::new();
    for (h, closes) in hours.iter().enumerate() {
        let base = h as i64 * 60;
        let mut forming: Option<FormingBar> = None;
        for (k, &close) in closes.iter().enumerate() {
            let sub = flat_bar(base + k as i64 * 5, close);
            match forming.as_mut() {
                Some(f) => f.update(&sub),
                None => forming = Some(FormingBar::start(ts(base), &sub)),
            }
            subs.push(sub);
        }
        charts.push(forming.unwrap().bar().clone());
    }
    (charts, subs)
}

pub const MA_CROSS: &str = "//@version=5
strategy(\"MA Cross\", overlay=true)
fastLen = input.int(12, title=\"Fast\", minval=1)
slowLen = input.int(26, title=\"Slow\", minval=1)
fast = ta.sma(close, fastLen)
slow = ta.sma(close, slowLen)
if ta.crossover(fast, slow)
    strategy.entry(\"L\", strategy.long)
if ta.crossunder(fast, slow)
    strategy.close(\"L\")
";

pub const BREAKOUT: &str = "strategy(\"Breakout\")
if close > 105
    strategy.entry(\"L\", strategy.long)
if close < 95
    strategy.close(\"L\")
";
