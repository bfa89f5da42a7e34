//! CSV file data adapter.
//!
//! A symbol's chart bars live in `<base>/<symbol>.csv`; finer resolutions
//! sit next to it as `<base>/<symbol>_<minutes>.csv`. Columns are
//! `timestamp,open,high,low,close,volume` with a header row.

use crate::domain::error::PinelabError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Adapter and symbol for a chart file path such as `data/BTC.csv`.
    pub fn for_file(path: &Path) -> Result<(Self, String), PinelabError> {
        let symbol = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| PinelabError::Data {
                reason: format!("{} is not a file path", path.display()),
            })?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok((Self::new(base), symbol))
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }

    fn resolution_path(&self, symbol: &str, minutes: u32) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, minutes))
    }

    fn read_bars(
        path: &Path,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<OhlcvBar>, PinelabError> {
        let content = fs::read_to_string(path).map_err(|e| PinelabError::Data {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (row, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| PinelabError::Data {
                reason: format!("{}: CSV parse error: {}", path.display(), e),
            })?;
            let line = row + 2;
            let column = |index: usize, name: &str| {
                record.get(index).map(str::trim).ok_or_else(|| PinelabError::Data {
                    reason: format!("{} line {}: missing {} column", path.display(), line, name),
                })
            };
            let number = |index: usize, name: &str| -> Result<f64, PinelabError> {
                column(index, name)?.parse().map_err(|e| PinelabError::Data {
                    reason: format!("{} line {}: invalid {} value: {}", path.display(), line, name, e),
                })
            };

            let raw = column(0, "timestamp")?;
            let timestamp = parse_timestamp(raw).ok_or_else(|| PinelabError::Data {
                reason: format!("{} line {}: unrecognised timestamp '{}'", path.display(), line, raw),
            })?;

            if start.is_some_and(|s| timestamp < s) || end.is_some_and(|e| timestamp > e) {
                continue;
            }

            bars.push(OhlcvBar {
                timestamp,
                open: number(1, "open")?,
                high: number(2, "high")?,
                low: number(3, "low")?,
                close: number(4, "close")?,
                volume: number(5, "volume")?,
            });
        }

        Ok(bars)
    }
}

/// Accepts RFC3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`,
/// `YYYY-MM-DD`, or integer epoch seconds or milliseconds. Offsets are
/// converted to UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    let epoch: i64 = raw.parse().ok()?;
    // Anything past the year 5138 in seconds is read as milliseconds.
    let parsed = if epoch.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    };
    parsed.map(|dt| dt.naive_utc())
}

impl DataPort for CsvAdapter {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<OhlcvBar>, PinelabError> {
        Self::read_bars(&self.csv_path(symbol), start, end)
    }

    fn fetch_resolution(
        &self,
        symbol: &str,
        minutes: u32,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Option<Vec<OhlcvBar>>, PinelabError> {
        let path = self.resolution_path(symbol, minutes);
        if !path.exists() {
            return Ok(None);
        }
        let bars = Self::read_bars(&path, start, end)?;
        Ok(Some(bars).filter(|b| !b.is_empty()))
    }
}
