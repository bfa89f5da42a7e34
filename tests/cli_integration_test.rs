//! CLI integration tests with scripts, data and config files on disk.
//!
//! Tests cover:
//! - `check` on valid and invalid scripts
//! - `backtest` writing a JSON report, with and without a config file
//! - Exit codes for config, data and compile failures
//! - Magnifier runs discovering `<stem>_<minutes>.csv`

mod common;

use clap::Parser;
use common::*;
use pinelab::adapters::file_config_adapter::FileConfigAdapter;
use pinelab::cli::{self, Cli};
use pinelab::domain::error::PinelabError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tempfile::TempDir;

fn exit_code(args: &[&str]) -> ExitCode {
    let mut argv = vec!["pinelab"];
    argv.extend_from_slice(args);
    cli::run(Cli::try_parse_from(argv).unwrap())
}

fn assert_exit(code: ExitCode, expected: u8) {
    assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(expected)));
}

fn write_csv(path: &Path, bars: &[OhlcvBar]) {
    let mut body = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        body.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.format("%Y-%m-%d %H:%M:%S"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    fs::write(path, body).unwrap();
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn s(path: &Path) -> &str {
    path.to_str().unwrap()
}

mod check {
    use super::*;

    #[test]
    fn valid_script_succeeds() {
        let ws = Workspace::new();
        let script = ws.file("cross.pine", MA_CROSS);
        assert_exit(exit_code(&["check", "--script", s(&script)]), 0);
    }

    #[test]
    fn syntax_error_exits_with_compile_code() {
        let ws = Workspace::new();
        let script = ws.file("bad.pine", "strategy(\"bad\")\nx = (close +\n");
        assert_exit(exit_code(&["check", "--script", s(&script)]), 4);
    }

    #[test]
    fn missing_script_is_an_io_error() {
        let ws = Workspace::new();
        assert_exit(exit_code(&["check", "--script", s(&ws.path("nope.pine"))]), 1);
    }
}

mod backtest {
    use super::*;

    fn report(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn writes_report_for_crossover() {
        let ws = Workspace::new();
        let script = ws.file("cross.pine", MA_CROSS);
        let data = ws.path("SPY.csv");
        write_csv(&data, &bars_from_closes(&trend_reversal_closes(), 1440));
        let output = ws.path("report.json");

        let code = exit_code(&[
            "backtest",
            "--script",
            s(&script),
            "--data",
            s(&data),
            "--output",
            s(&output),
        ]);
        assert_exit(code, 0);

        let value = report(&output);
        assert_eq!(value["title"], "MA Cross");
        assert_eq!(value["mode"], "standard");
        assert_eq!(value["bars"], 100);
        assert_eq!(value["signals"]["long_entries"], 1);
        assert_eq!(value["trades"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn config_file_overrides_params_and_capital() {
        let ws = Workspace::new();
        let script = ws.file("cross.pine", MA_CROSS);
        let data = ws.path("SPY.csv");
        write_csv(&data, &bars_from_closes(&trend_reversal_closes(), 1440));
        let config = ws.file(
            "run.ini",
            "[backtest]\ninitial_capital = 2500\ncommission_pct = 0.1\n\n[params]\nSlow = 40\n",
        );
        let output = ws.path("report.json");

        let code = exit_code(&[
            "backtest",
            "--script",
            s(&script),
            "--data",
            s(&data),
            "--config",
            s(&config),
            "--output",
            s(&output),
        ]);
        assert_exit(code, 0);

        let value = report(&output);
        assert_eq!(value["initial_capital"], 2500.0);
        assert_eq!(value["warmup"], 40);
    }

    #[test]
    fn magnifier_reads_sub_bar_file() {
        let ws = Workspace::new();
        let script = ws.file("breakout.pine", BREAKOUT);
        let mut hours = [[100.0; 12]; 4];
        hours[1][4] = 106.0;
        let (chart, subs) = hourly_with_sub_bars(&hours);
        write_csv(&ws.path("BTC.csv"), &chart);
        write_csv(&ws.path("BTC_5.csv"), &subs);
        let output = ws.path("report.json");

        let code = exit_code(&[
            "backtest",
            "--script",
            s(&script),
            "--data",
            s(&ws.path("BTC.csv")),
            "--mode",
            "magnifier",
            "--output",
            s(&output),
        ]);
        assert_exit(code, 0);

        let value = report(&output);
        assert_eq!(value["requested_mode"], "magnifier");
        assert_eq!(value["mode"], "magnifier");
        assert_eq!(value["sub_resolution"], 5);
        assert_eq!(value["trades"][0]["entry_price"], 106.0);
    }

    #[test]
    fn invalid_config_exits_with_config_code() {
        let ws = Workspace::new();
        let script = ws.file("cross.pine", MA_CROSS);
        let data = ws.path("SPY.csv");
        write_csv(&data, &bars_from_closes(&trend_reversal_closes(), 1440));
        let config = ws.file("run.ini", "[backtest]\nmode = turbo\n");

        let code = exit_code(&[
            "backtest",
            "--script",
            s(&script),
            "--data",
            s(&data),
            "--config",
            s(&config),
        ]);
        assert_exit(code, 2);
    }

    #[test]
    fn unknown_param_exits_with_config_code() {
        let ws = Workspace::new();
        let script = ws.file("cross.pine", MA_CROSS);
        let data = ws.path("SPY.csv");
        write_csv(&data, &bars_from_closes(&trend_reversal_closes(), 1440));
        let config = ws.file("run.ini", "[params]\nMedium = 20\n");

        let code = exit_code(&[
            "backtest",
            "--script",
            s(&script),
            "--data",
            s(&data),
            "--config",
            s(&config),
        ]);
        assert_exit(code, 2);
    }

    #[test]
    fn missing_data_exits_with_data_code() {
        let ws = Workspace::new();
        let script = ws.file("cross.pine", MA_CROSS);
        let code = exit_code(&[
            "backtest",
            "--script",
            s(&script),
            "--data",
            s(&ws.path("missing.csv")),
        ]);
        assert_exit(code, 3);
    }

    #[test]
    fn compile_error_exits_before_loading_data() {
        let ws = Workspace::new();
        let script = ws.file("bad.pine", "strategy(\"bad\")\nx = ta.sma(close, bar_index)\n");
        let code = exit_code(&[
            "backtest",
            "--script",
            s(&script),
            "--data",
            s(&ws.path("missing.csv")),
        ]);
        assert_exit(code, 4);
    }
}

mod config_loading {
    use super::*;

    #[test]
    fn build_run_config_from_ini_on_disk() {
        let ws = Workspace::new();
        let path = ws.file(
            "run.ini",
            "[backtest]\nslippage_pct = 0.05\nstart = 2024-01-10\nend = 2024-02-01\nresolution = 60\n",
        );
        let adapter = FileConfigAdapter::from_file(&path).unwrap();
        let strategy = pinelab::compile(BREAKOUT).unwrap();
        let config = cli::build_run_config(&adapter, &strategy).unwrap();
        assert!((config.slippage_pct - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.resolution, Some(60));
        assert_eq!(config.start.unwrap().format("%Y-%m-%d").to_string(), "2024-01-10");
        assert_eq!(config.end.unwrap().format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn inverted_range_is_rejected() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nstart = 2024-03-01\nend = 2024-01-01\n").unwrap();
        let strategy = pinelab::compile(BREAKOUT).unwrap();
        let err = cli::build_run_config(&adapter, &strategy).unwrap_err();
        assert!(matches!(err, PinelabError::ConfigInvalid { ref key, .. } if key == "start"));
    }
}

mod resolution {
    use super::*;

    #[test]
    fn resolution_command_succeeds() {
        assert_exit(exit_code(&["resolution", "--chart", "240"]), 0);
        assert_exit(exit_code(&["resolution", "--chart", "1", "--target", "4"]), 0);
    }

    #[test]
    fn zero_chart_resolution_is_rejected() {
        assert_exit(exit_code(&["resolution", "--chart", "0"]), 2);
    }
}
