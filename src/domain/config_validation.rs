//! Configuration validation.
//!
//! Validates the `[backtest]` section before a run. Every key is optional;
//! a key that is present must parse and be in range.

use crate::domain::error::PinelabError;
use crate::domain::result::SimulationMode;
use crate::domain::strategy::SizingKind;
use crate::ports::config_port::ConfigPort;
use chrono::{NaiveDate, NaiveDateTime};

const SECTION: &str = "backtest";

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), PinelabError> {
    validate_initial_capital(config)?;
    validate_costs(config)?;
    validate_sizing(config)?;
    validate_mode(config)?;
    validate_counts(config)?;
    validate_dates(config)?;
    Ok(())
}

fn invalid(key: &str, reason: impl Into<String>) -> PinelabError {
    PinelabError::ConfigInvalid {
        section: SECTION.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// A number under `[backtest]`, `None` when absent.
pub fn optional_f64(config: &dyn ConfigPort, key: &str) -> Result<Option<f64>, PinelabError> {
    config
        .get_string(SECTION, key)
        .map(|raw| {
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| invalid(key, format!("'{raw}' is not a number")))
        })
        .transpose()
}

/// A non-negative integer under `[backtest]`, `None` when absent.
pub fn optional_count(config: &dyn ConfigPort, key: &str) -> Result<Option<u64>, PinelabError> {
    config
        .get_string(SECTION, key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| invalid(key, format!("'{raw}' is not a non-negative integer")))
        })
        .transpose()
}

/// A `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` timestamp under `[backtest]`.
/// A bare date is the start of the day, or its last second when
/// `end_of_day` is set.
pub fn optional_timestamp(
    config: &dyn ConfigPort,
    key: &str,
    end_of_day: bool,
) -> Result<Option<NaiveDateTime>, PinelabError> {
    let Some(raw) = config.get_string(SECTION, key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Some(ts));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        invalid(key, "invalid format, expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS")
    })?;
    let ts = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    Ok(ts)
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), PinelabError> {
    if let Some(value) = optional_f64(config, "initial_capital")? {
        if value <= 0.0 {
            return Err(invalid("initial_capital", "initial_capital must be positive"));
        }
    }
    Ok(())
}

fn validate_costs(config: &dyn ConfigPort) -> Result<(), PinelabError> {
    for key in ["commission_pct", "slippage_pct", "risk_free_rate"] {
        if let Some(value) = optional_f64(config, key)? {
            if value < 0.0 {
                return Err(invalid(key, format!("{key} must be non-negative")));
            }
        }
    }
    Ok(())
}

fn validate_sizing(config: &dyn ConfigPort) -> Result<(), PinelabError> {
    if let Some(kind) = config.get_string(SECTION, "order_size_type") {
        if SizingKind::from_name(kind.trim()).is_none() {
            return Err(invalid(
                "order_size_type",
                format!("unknown order size type '{kind}', expected percent_of_equity, cash or fixed"),
            ));
        }
    }
    if let Some(value) = optional_f64(config, "order_size")? {
        if value <= 0.0 {
            return Err(invalid("order_size", "order_size must be positive"));
        }
    }
    Ok(())
}

fn validate_mode(config: &dyn ConfigPort) -> Result<(), PinelabError> {
    match config.get_string(SECTION, "mode") {
        Some(mode) if SimulationMode::from_name(mode.trim()).is_none() => Err(invalid(
            "mode",
            format!("unknown mode '{mode}', expected standard or magnifier"),
        )),
        _ => Ok(()),
    }
}

fn validate_counts(config: &dyn ConfigPort) -> Result<(), PinelabError> {
    let minimums = [
        ("resolution", 1),
        ("target_sub_bars", 1),
        ("max_sub_bars", 1),
        ("loop_budget", 1),
        ("max_equity_points", 2),
        ("max_trades", 1),
        ("pyramiding", 1),
    ];
    for (key, min) in minimums {
        if let Some(value) = optional_count(config, key)? {
            if value < min {
                return Err(invalid(key, format!("{key} must be at least {min}")));
            }
        }
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), PinelabError> {
    let start = optional_timestamp(config, "start", false)?;
    let end = optional_timestamp(config, "end", true)?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(invalid("start", "start must not be after end"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn config(body: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(&format!("[backtest]\n{body}")).unwrap()
    }

    fn invalid_key(result: Result<(), PinelabError>) -> String {
        match result {
            Err(PinelabError::ConfigInvalid { key, .. }) => key,
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn empty_section_is_valid() {
        assert!(validate_backtest_config(&config("")).is_ok());
    }

    #[test]
    fn full_config_is_valid() {
        let c = config(
            "initial_capital = 5000\ncommission_pct = 0.1\nslippage_pct = 0.05\n\
             order_size_type = cash\norder_size = 1000\nmode = magnifier\nresolution = 60\n\
             target_sub_bars = 10\nmax_sub_bars = 16\nstart = 2024-01-01\nend = 2024-06-30 12:00:00\n\
             loop_budget = 500\nmax_equity_points = 200\nmax_trades = 50\n",
        );
        assert!(validate_backtest_config(&c).is_ok());
    }

    #[test]
    fn rejects_non_positive_capital() {
        assert_eq!(invalid_key(validate_backtest_config(&config("initial_capital = 0\n"))), "initial_capital");
    }

    #[test]
    fn rejects_negative_costs() {
        assert_eq!(invalid_key(validate_backtest_config(&config("commission_pct = -1\n"))), "commission_pct");
        assert_eq!(invalid_key(validate_backtest_config(&config("slippage_pct = -0.1\n"))), "slippage_pct");
    }

    #[test]
    fn rejects_unparseable_numbers() {
        assert_eq!(invalid_key(validate_backtest_config(&config("initial_capital = lots\n"))), "initial_capital");
        assert_eq!(invalid_key(validate_backtest_config(&config("loop_budget = -3\n"))), "loop_budget");
    }

    #[test]
    fn rejects_unknown_mode_and_sizing() {
        assert_eq!(invalid_key(validate_backtest_config(&config("mode = turbo\n"))), "mode");
        assert_eq!(invalid_key(validate_backtest_config(&config("order_size_type = lots\n"))), "order_size_type");
    }

    #[test]
    fn rejects_inverted_dates() {
        let c = config("start = 2024-06-01\nend = 2024-01-01\n");
        assert_eq!(invalid_key(validate_backtest_config(&c)), "start");
    }

    #[test]
    fn same_day_range_is_valid() {
        let c = config("start = 2024-06-01\nend = 2024-06-01\n");
        assert!(validate_backtest_config(&c).is_ok());
        let end = optional_timestamp(&c, "end", true).unwrap().unwrap();
        assert_eq!(end.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn rejects_bad_date_format() {
        assert_eq!(invalid_key(validate_backtest_config(&config("start = 01/02/2024\n"))), "start");
    }

    #[test]
    fn equity_points_need_two() {
        assert_eq!(invalid_key(validate_backtest_config(&config("max_equity_points = 1\n"))), "max_equity_points");
    }
}
