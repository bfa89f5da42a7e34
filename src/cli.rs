//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::backtest::{simulate_with_sub_bars, RunConfig};
use crate::domain::config_validation::{
    optional_count, optional_f64, optional_timestamp, validate_backtest_config,
};
use crate::domain::error::{Diagnostic, PinelabError, Stage};
use crate::domain::execution::OrderSizing;
use crate::domain::ohlcv::OhlcvSeries;
use crate::domain::resolution::{select_sub_resolution, DEFAULT_MAX_SUB_BARS, DEFAULT_TARGET_SUB_BARS};
use crate::domain::result::{SimulationMode, SimulationResult};
use crate::domain::script::compile;
use crate::domain::strategy::{CompiledStrategy, ParamKind, ParamValue, SizingKind};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "pinelab", about = "PineScript strategy compiler and backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a script and describe it
    Check {
        #[arg(short, long)]
        script: PathBuf,
    },
    /// Compile a script and simulate it over OHLCV data
    Backtest {
        #[arg(short, long)]
        script: PathBuf,
        /// Chart bars; sub-bars are read from <stem>_<minutes>.csv beside it
        #[arg(short, long)]
        data: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<SimulationMode>,
    },
    /// Show the sub-bar resolution magnifier mode would pick
    Resolution {
        /// Chart resolution in minutes
        #[arg(long)]
        chart: u32,
        #[arg(long, default_value_t = DEFAULT_TARGET_SUB_BARS)]
        target: u32,
        #[arg(long, default_value_t = DEFAULT_MAX_SUB_BARS)]
        max_sub_bars: u32,
    },
}

fn parse_mode(raw: &str) -> Result<SimulationMode, String> {
    SimulationMode::from_name(raw).ok_or_else(|| format!("unknown mode '{raw}', expected standard or magnifier"))
}

pub fn run(cli: Cli) -> ExitCode {
    init_tracing(cli.verbose);
    match cli.command {
        Command::Check { script } => run_check(&script),
        Command::Backtest {
            script,
            data,
            config,
            output,
            mode,
        } => run_backtest(&script, &data, config.as_ref(), output.as_ref(), mode),
        Command::Resolution {
            chart,
            target,
            max_sub_bars,
        } => run_resolution(chart, target, max_sub_bars),
    }
}

/// Install the stderr subscriber. A second call keeps the first one.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = PinelabError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Read and compile a script. Compile errors are printed against the
/// source with a caret under the offending column.
pub fn load_strategy(path: &Path) -> Result<(String, CompiledStrategy), ExitCode> {
    let source = fs::read_to_string(path).map_err(|e| {
        let err = PinelabError::Io(e);
        eprintln!("error: failed to read {}: {err}", path.display());
        ExitCode::from(&err)
    })?;
    match compile(&source) {
        Ok(strategy) => Ok((source, strategy)),
        Err(diagnostic) => {
            eprintln!("error: {}", diagnostic.display_with_context(&source));
            Err(ExitCode::from(&PinelabError::Compile(diagnostic)))
        }
    }
}

fn run_check(script_path: &Path) -> ExitCode {
    let (source, strategy) = match load_strategy(script_path) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    let meta = &strategy.meta;
    println!("Title:      {}", meta.title);
    if let Some(short) = &meta.short_title {
        println!("Short:      {short}");
    }
    println!("Type:       {:?}", meta.script_type);
    println!("Overlay:    {}", meta.overlay);
    println!("Directions: {:?}", meta.directions);
    println!("Warmup:     {} bars", strategy.warmup());

    if strategy.params.is_empty() {
        println!("\nInputs: none");
    } else {
        println!("\nInputs:");
        for param in &strategy.params {
            let mut line = format!(
                "  {:<16} {:<7} default {}",
                param.title.as_deref().unwrap_or(&param.name),
                kind_name(param.kind),
                format_value(&param.default)
            );
            if param.min.is_some() || param.max.is_some() {
                line.push_str(&format!(
                    " range [{}, {}]",
                    param.min.map_or("-".to_string(), |v| v.to_string()),
                    param.max.map_or("-".to_string(), |v| v.to_string())
                ));
            }
            if !param.options.is_empty() {
                let options: Vec<String> = param.options.iter().map(format_value).collect();
                line.push_str(&format!(" options {}", options.join("|")));
            }
            println!("{line}");
        }
    }

    if !strategy.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &strategy.warnings {
            let at = Diagnostic::new(Stage::Qualifier, warning.position, warning.message.clone()).locate(&source);
            println!("  {}:{}: {}", at.line, at.column, at.message);
        }
    }
    ExitCode::SUCCESS
}

fn kind_name(kind: ParamKind) -> String {
    format!("{kind:?}").to_lowercase()
}

fn format_value(value: &ParamValue) -> String {
    match value {
        ParamValue::Int(v) => v.to_string(),
        ParamValue::Float(v) => v.to_string(),
        ParamValue::Bool(v) => v.to_string(),
        ParamValue::Str(s) => format!("\"{s}\""),
    }
}

fn run_backtest(
    script_path: &Path,
    data_path: &Path,
    config_path: Option<&PathBuf>,
    output_path: Option<&PathBuf>,
    mode_override: Option<SimulationMode>,
) -> ExitCode {
    // Stage 1: compile
    info!(script = %script_path.display(), "compiling");
    let (_, strategy) = match load_strategy(script_path) {
        Ok(loaded) => loaded,
        Err(code) => return code,
    };

    // Stage 2: run configuration
    let mut run_config = match config_path {
        Some(path) => {
            let adapter = match load_config(path) {
                Ok(a) => a,
                Err(code) => return code,
            };
            match build_run_config(&adapter, &strategy) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("error: {e}");
                    return (&e).into();
                }
            }
        }
        None => RunConfig::from_strategy(&strategy),
    };
    if let Some(mode) = mode_override {
        run_config.mode = mode;
    }

    // Stages 3-5: data, simulation, report
    let (data, symbol) = match CsvAdapter::for_file(data_path) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    match backtest_pipeline(&data, &symbol, &strategy, &run_config) {
        Ok(result) => {
            print_summary(&result);
            if let Some(path) = output_path {
                if let Err(e) = JsonReportAdapter::new().write(&result, path) {
                    eprintln!("error: failed to write report: {e}");
                    return (&e).into();
                }
                info!(path = %path.display(), "report written");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Load chart bars for `symbol`, plus sub-bars in magnifier mode, and
/// simulate.
pub fn backtest_pipeline(
    data: &dyn DataPort,
    symbol: &str,
    strategy: &CompiledStrategy,
    config: &RunConfig,
) -> Result<SimulationResult, PinelabError> {
    let bars = data.fetch_ohlcv(symbol, None, None)?;
    info!(symbol = %symbol, bars = bars.len(), "chart data loaded");
    let chart = OhlcvSeries::new(bars)?;

    let sub_bars = if config.mode == SimulationMode::Magnifier {
        let choice = config.sub_resolution(&chart);
        if choice.minutes < config.chart_minutes(&chart) {
            data.fetch_resolution(symbol, choice.minutes, None, None)?
                .map(OhlcvSeries::new)
                .transpose()?
        } else {
            None
        }
    } else {
        None
    };

    Ok(simulate_with_sub_bars(strategy, &chart, sub_bars.as_ref(), config)?)
}

/// Script header defaults overlaid with the `[backtest]` and `[params]`
/// sections of `adapter`.
pub fn build_run_config(adapter: &dyn ConfigPort, strategy: &CompiledStrategy) -> Result<RunConfig, PinelabError> {
    validate_backtest_config(adapter)?;
    let mut config = RunConfig::from_strategy(strategy);

    if let Some(v) = optional_f64(adapter, "initial_capital")? {
        config.initial_capital = v;
    }
    if let Some(v) = optional_f64(adapter, "commission_pct")? {
        config.commission_pct = v;
    }
    if let Some(v) = optional_f64(adapter, "slippage_pct")? {
        config.slippage_pct = v;
    }
    if let Some(v) = optional_f64(adapter, "risk_free_rate")? {
        config.risk_free_rate = v;
    }

    if let Some(kind) = adapter
        .get_string("backtest", "order_size_type")
        .and_then(|k| SizingKind::from_name(k.trim()))
    {
        if kind != config.sizing.kind {
            config.sizing = OrderSizing::for_kind(kind, config.initial_capital);
        }
    }
    if let Some(v) = optional_f64(adapter, "order_size")? {
        config.sizing.value = v;
    }

    if let Some(mode) = adapter
        .get_string("backtest", "mode")
        .and_then(|m| SimulationMode::from_name(m.trim()))
    {
        config.mode = mode;
    }
    if let Some(v) = optional_u32(adapter, "resolution")? {
        config.resolution = Some(v);
    }
    if let Some(v) = optional_u32(adapter, "target_sub_bars")? {
        config.target_sub_bars = v;
    }
    if let Some(v) = optional_u32(adapter, "max_sub_bars")? {
        config.max_sub_bars = v;
    }
    if let Some(v) = optional_u32(adapter, "pyramiding")? {
        config.pyramiding = v;
    }
    if let Some(v) = optional_usize(adapter, "loop_budget")? {
        config.loop_budget = Some(v);
    }
    if let Some(v) = optional_usize(adapter, "max_equity_points")? {
        config.max_equity_points = v;
    }
    if let Some(v) = optional_usize(adapter, "max_trades")? {
        config.max_trades = v;
    }
    config.start = optional_timestamp(adapter, "start", false)?;
    config.end = optional_timestamp(adapter, "end", true)?;

    for key in adapter.keys("params") {
        let invalid = |reason: String| PinelabError::ConfigInvalid {
            section: "params".to_string(),
            key: key.clone(),
            reason,
        };
        let spec = strategy
            .params
            .iter()
            .find(|p| p.matches(&key))
            .ok_or_else(|| invalid("no input with that name or title".to_string()))?;
        let raw = adapter.get_string("params", &key).unwrap_or_default();
        let value = ParamValue::parse(spec.kind, &raw)
            .ok_or_else(|| invalid(format!("'{raw}' is not a valid {} value", kind_name(spec.kind))))?;
        config.params.insert(key.clone(), value);
    }

    Ok(config)
}

fn optional_u32(adapter: &dyn ConfigPort, key: &str) -> Result<Option<u32>, PinelabError> {
    optional_count(adapter, key)?
        .map(|v| {
            u32::try_from(v).map_err(|_| PinelabError::ConfigInvalid {
                section: "backtest".to_string(),
                key: key.to_string(),
                reason: format!("{v} is too large"),
            })
        })
        .transpose()
}

fn optional_usize(adapter: &dyn ConfigPort, key: &str) -> Result<Option<usize>, PinelabError> {
    optional_count(adapter, key)?
        .map(|v| {
            usize::try_from(v).map_err(|_| PinelabError::ConfigInvalid {
                section: "backtest".to_string(),
                key: key.to_string(),
                reason: format!("{v} is too large"),
            })
        })
        .transpose()
}

fn print_summary(result: &SimulationResult) {
    let stats = &result.statistics;
    println!("Strategy:       {}", result.title);
    match result.sub_resolution {
        Some(minutes) => println!("Mode:           {} ({minutes}m sub-bars)", result.mode),
        None if result.mode != result.requested_mode => {
            println!("Mode:           {} (requested {})", result.mode, result.requested_mode)
        }
        None => println!("Mode:           {}", result.mode),
    }
    println!("Bars:           {} (warmup {})", result.bars, result.warmup);
    println!("Initial equity: {:.2}", result.initial_capital);
    println!("Final equity:   {:.2}", result.final_equity);
    println!("Net return:     {}", stats.net_return);
    println!("CAGR:           {}", stats.cagr);
    println!("Max drawdown:   {}", stats.max_drawdown);
    println!("Sharpe:         {}", stats.sharpe);
    println!("Sortino:        {}", stats.sortino);
    println!("Profit factor:  {}", stats.profit_factor);
    println!("Win rate:       {}", stats.win_rate);
    println!(
        "Trades:         {} ({} won, {} lost)",
        stats.total_trades, stats.winning_trades, stats.losing_trades
    );
    if !result.faults.is_empty() {
        println!("Faults:         {}", result.faults.len());
        for fault in &result.faults {
            println!("  bar {}: {}", fault.bar, fault.cause);
        }
    }
}

fn run_resolution(chart: u32, target: u32, max_sub_bars: u32) -> ExitCode {
    if chart == 0 {
        eprintln!("error: chart resolution must be at least one minute");
        return ExitCode::from(2);
    }
    let choice = select_sub_resolution(chart, target, max_sub_bars);
    println!(
        "chart {chart}m -> {}m sub-bars ({} per chart bar{})",
        choice.minutes,
        choice.sub_bars,
        if choice.exact { "" } else { ", approximate" }
    );
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "strategy(\"cfg\", initial_capital = 5000)\n\
        fast = input.int(9, title = \"Fast Length\", minval = 1)\n\
        useShort = input.bool(false, \"Shorts\")\n";

    fn strategy() -> CompiledStrategy {
        compile(SCRIPT).unwrap()
    }

    #[test]
    fn config_overrides_header_defaults() {
        let adapter = FileConfigAdapter::from_string(
            "[backtest]\ncommission_pct = 0.1\nmode = magnifier\nmax_trades = 20\n",
        )
        .unwrap();
        let config = build_run_config(&adapter, &strategy()).unwrap();
        assert_eq!(config.initial_capital, 5000.0);
        assert_eq!(config.commission_pct, 0.1);
        assert_eq!(config.mode, SimulationMode::Magnifier);
        assert_eq!(config.max_trades, 20);
    }

    #[test]
    fn cash_sizing_defaults_to_capital() {
        let adapter = FileConfigAdapter::from_string("[backtest]\norder_size_type = cash\n").unwrap();
        let config = build_run_config(&adapter, &strategy()).unwrap();
        assert_eq!(config.sizing.kind, SizingKind::Cash);
        assert_eq!(config.sizing.value, 5000.0);
    }

    #[test]
    fn params_are_typed_by_input_kind() {
        let adapter = FileConfigAdapter::from_string("[params]\nFast Length = 21\nShorts = true\n").unwrap();
        let config = build_run_config(&adapter, &strategy()).unwrap();
        assert_eq!(config.params.get("Fast Length"), Some(&ParamValue::Int(21)));
        assert_eq!(config.params.get("Shorts"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn unknown_param_is_rejected() {
        let adapter = FileConfigAdapter::from_string("[params]\nSlow Length = 21\n").unwrap();
        let err = build_run_config(&adapter, &strategy()).unwrap_err();
        assert!(matches!(err, PinelabError::ConfigInvalid { ref section, .. } if section == "params"));
    }

    #[test]
    fn mistyped_param_is_rejected() {
        let adapter = FileConfigAdapter::from_string("[params]\nfast = nine\n").unwrap();
        assert!(build_run_config(&adapter, &strategy()).is_err());
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!(parse_mode("standard"), Ok(SimulationMode::Standard));
        assert!(parse_mode("tick").is_err());
    }

    #[test]
    fn cli_parses_backtest_arguments() {
        let cli = Cli::try_parse_from([
            "pinelab", "backtest", "--script", "s.pine", "--data", "BTC.csv", "--mode", "magnifier", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Backtest { mode, config, .. } => {
                assert_eq!(mode, Some(SimulationMode::Magnifier));
                assert!(config.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
