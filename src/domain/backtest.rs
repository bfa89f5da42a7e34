//! Simulation engine: run configuration, the portfolio fill loop and the
//! two run modes.
//!
//! # Evaluation Semantics
//!
//! - Standard mode evaluates the batch function once over the chart series
//!   and fills at each chart bar's close.
//! - Magnifier mode produces signals at sub-bar resolution and fills at the
//!   sub-bar close. Without sub-bar data for the range it falls back to
//!   standard mode and records a `MissingSubBars` fault.
//! - Per bar, exits are applied before entries. An entry against an open
//!   position closes it first (reversal). Long and short entries on the same
//!   bar cancel out.
//! - Lots still open after the last bar are closed at its close.

use std::borrow::Cow;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::{RecordedFault, RuntimeFault};
use super::execution::{self, EntryResult, ExecutionConfig, OrderSizing};
use super::magnifier;
use super::metrics::Metrics;
use super::ohlcv::{OhlcvBar, OhlcvSeries};
use super::portfolio::Portfolio;
use super::resolution::{self, SubResolution, DEFAULT_MAX_SUB_BARS, DEFAULT_TARGET_SUB_BARS};
use super::result::{self, SimulationMode, SimulationResult, Statistics};
use super::signal::{BarSignals, SignalSeries};
use super::strategy::{CompiledStrategy, Direction, ParamSet, ResolvedParams};

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;
pub const DEFAULT_MAX_EQUITY_POINTS: usize = 500;
pub const DEFAULT_MAX_TRADES: usize = 1_000;

/// Everything a run needs besides the strategy and the data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    pub mode: SimulationMode,
    pub initial_capital: f64,
    /// Percent of notional per fill.
    pub commission_pct: f64,
    /// Percent of price, against the trader.
    pub slippage_pct: f64,
    pub sizing: OrderSizing,
    pub pyramiding: u32,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    /// Chart resolution in minutes; inferred from bar spacing when unset.
    pub resolution: Option<u32>,
    pub target_sub_bars: u32,
    pub max_sub_bars: u32,
    /// Overrides the strategy's per-bar loop ceiling.
    pub loop_budget: Option<usize>,
    pub risk_free_rate: f64,
    pub max_equity_points: usize,
    pub max_trades: usize,
    pub params: ParamSet,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            mode: SimulationMode::Standard,
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            commission_pct: 0.0,
            slippage_pct: 0.0,
            sizing: OrderSizing::default(),
            pyramiding: 1,
            start: None,
            end: None,
            resolution: None,
            target_sub_bars: DEFAULT_TARGET_SUB_BARS,
            max_sub_bars: DEFAULT_MAX_SUB_BARS,
            loop_budget: None,
            risk_free_rate: 0.0,
            max_equity_points: DEFAULT_MAX_EQUITY_POINTS,
            max_trades: DEFAULT_MAX_TRADES,
            params: ParamSet::new(),
        }
    }
}

impl RunConfig {
    /// Defaults taken from the script header where it declares them.
    ///
    /// Header slippage is in ticks and there is no tick size to convert
    /// it with, so it is not carried over.
    pub fn from_strategy(strategy: &CompiledStrategy) -> Self {
        let settings = &strategy.meta.settings;
        let initial_capital = settings.initial_capital.unwrap_or(DEFAULT_INITIAL_CAPITAL);
        let sizing = match settings.default_qty_type {
            Some(kind) => {
                let sizing = OrderSizing::for_kind(kind, initial_capital);
                OrderSizing {
                    value: settings.default_qty_value.unwrap_or(sizing.value),
                    ..sizing
                }
            }
            None => OrderSizing::default(),
        };
        if settings.slippage.is_some_and(|s| s > 0.0) {
            debug!("header slippage is in ticks; set slippage_pct in the run config instead");
        }
        RunConfig {
            initial_capital,
            commission_pct: settings.commission_pct.unwrap_or(0.0),
            sizing,
            pyramiding: settings.pyramiding.unwrap_or(1).max(1),
            ..RunConfig::default()
        }
    }

    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            commission_pct: self.commission_pct,
            slippage_pct: self.slippage_pct,
            sizing: self.sizing,
            pyramiding: self.pyramiding,
        }
    }

    /// Chart resolution for `chart`: the configured one, else inferred.
    pub fn chart_minutes(&self, chart: &OhlcvSeries) -> u32 {
        self.resolution
            .or_else(|| resolution::infer_minutes(chart))
            .unwrap_or(1)
    }

    /// Sub-bar resolution magnifier mode would use for `chart`.
    pub fn sub_resolution(&self, chart: &OhlcvSeries) -> SubResolution {
        resolution::select_sub_resolution(self.chart_minutes(chart), self.target_sub_bars, self.max_sub_bars)
    }
}

/// Raw output of one run, before extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub mode: SimulationMode,
    pub sub_resolution: Option<u32>,
    pub bars: usize,
    pub warmup: usize,
    pub signals: SignalSeries,
    pub portfolio: Portfolio,
    pub faults: Vec<RecordedFault>,
}

/// Run in the configured mode. Magnifier mode without sub-bars falls back
/// to standard.
pub fn simulate(
    strategy: &CompiledStrategy,
    series: &OhlcvSeries,
    config: &RunConfig,
) -> Result<SimulationResult, RuntimeFault> {
    simulate_with_sub_bars(strategy, series, None, config)
}

pub fn simulate_with_sub_bars(
    strategy: &CompiledStrategy,
    series: &OhlcvSeries,
    sub_bars: Option<&OhlcvSeries>,
    config: &RunConfig,
) -> Result<SimulationResult, RuntimeFault> {
    let output = run(strategy, series, sub_bars, config)?;
    let result = extract(strategy, config, &output);
    info!(
        title = %result.title,
        mode = %result.mode,
        bars = result.bars,
        trades = result.statistics.total_trades,
        net_return = %result.statistics.net_return,
        faults = result.faults.len(),
        "simulation complete"
    );
    Ok(result)
}

/// Run the simulation without reducing the output.
pub fn run(
    strategy: &CompiledStrategy,
    series: &OhlcvSeries,
    sub_bars: Option<&OhlcvSeries>,
    config: &RunConfig,
) -> Result<RunOutput, RuntimeFault> {
    let strategy = match config.loop_budget {
        Some(budget) if budget != strategy.loop_budget() => Cow::Owned(strategy.clone().with_loop_budget(budget)),
        _ => Cow::Borrowed(strategy),
    };
    let params = strategy.resolve(&config.params)?;
    let chart = series.within(config.start, config.end)?;
    let warmup = strategy.warmup_for(&params);
    let exec = config.execution();

    if config.mode == SimulationMode::Magnifier {
        let chart_minutes = config.chart_minutes(&chart);
        let choice = config.sub_resolution(&chart);
        debug!(
            chart_minutes,
            sub_minutes = choice.minutes,
            sub_bars = choice.sub_bars,
            exact = choice.exact,
            "magnifier resolution"
        );

        let available = if choice.minutes >= chart_minutes {
            Some(chart.clone())
        } else {
            sub_bars.and_then(|s| s.within(config.start, None).ok())
        };
        match available {
            Some(sub) => {
                let out = magnifier::run(&strategy, &chart, &sub, chart_minutes, &params)?;
                if !out.bars.is_empty() {
                    let portfolio = run_portfolio(&out.bars, &out.signals, config.initial_capital, &exec);
                    return Ok(RunOutput {
                        mode: SimulationMode::Magnifier,
                        sub_resolution: Some(choice.minutes),
                        bars: chart.len(),
                        warmup,
                        signals: out.signals,
                        portfolio,
                        faults: out.faults,
                    });
                }
                fall_back(&strategy, &chart, &params, config, &exec, choice.minutes, warmup)
            }
            None => fall_back(&strategy, &chart, &params, config, &exec, choice.minutes, warmup),
        }
    } else {
        Ok(run_standard(&strategy, &chart, &params, config, &exec, warmup))
    }
}

fn fall_back(
    strategy: &CompiledStrategy,
    chart: &OhlcvSeries,
    params: &ResolvedParams,
    config: &RunConfig,
    exec: &ExecutionConfig,
    resolution: u32,
    warmup: usize,
) -> Result<RunOutput, RuntimeFault> {
    warn!(resolution, "no sub-bar data for the requested range; running in standard mode");
    let mut output = run_standard(strategy, chart, params, config, exec, warmup);
    output.faults.insert(
        0,
        RecordedFault {
            bar: 0,
            cause: RuntimeFault::MissingSubBars { resolution },
        },
    );
    Ok(output)
}

fn run_standard(
    strategy: &CompiledStrategy,
    chart: &OhlcvSeries,
    params: &ResolvedParams,
    config: &RunConfig,
    exec: &ExecutionConfig,
    warmup: usize,
) -> RunOutput {
    let batch = strategy.batch(chart, params);
    let portfolio = run_portfolio(chart.bars(), &batch.signals, config.initial_capital, exec);
    RunOutput {
        mode: SimulationMode::Standard,
        sub_resolution: None,
        bars: chart.len(),
        warmup,
        signals: batch.signals,
        portfolio,
        faults: batch.faults,
    }
}

/// Fill signals at each bar's close and track equity.
pub fn run_portfolio(
    bars: &[OhlcvBar],
    signals: &SignalSeries,
    initial_capital: f64,
    config: &ExecutionConfig,
) -> Portfolio {
    let mut portfolio = Portfolio::new(initial_capital);
    let last = bars.len().saturating_sub(1);

    for (i, bar) in bars.iter().enumerate() {
        apply_signals(&mut portfolio, signals.get(i), bar, config);
        if i == last && !portfolio.is_flat() {
            execution::exit_all(&mut portfolio, bar.close, bar.timestamp, true, config);
        }
        let equity = portfolio.total_equity(bar.close);
        portfolio.record_equity(bar.timestamp, equity);
    }

    portfolio
}

fn apply_signals(portfolio: &mut Portfolio, signals: BarSignals, bar: &OhlcvBar, config: &ExecutionConfig) {
    let held = portfolio.state().direction();
    let exit = match held {
        Some(Direction::Long) => signals.long_exit,
        Some(Direction::Short) => signals.short_exit,
        None => false,
    };
    if exit {
        execution::exit_all(portfolio, bar.close, bar.timestamp, false, config);
    }

    let direction = match (signals.long_entry, signals.short_entry) {
        (true, false) => Direction::Long,
        (false, true) => Direction::Short,
        (true, true) => {
            debug!(timestamp = %bar.timestamp, "long and short entries on one bar; both ignored");
            return;
        }
        (false, false) => return,
    };

    if portfolio.state().direction().is_some_and(|d| d != direction) {
        execution::exit_all(portfolio, bar.close, bar.timestamp, false, config);
    }
    match execution::enter(portfolio, direction, bar.close, bar.timestamp, config) {
        EntryResult::Entered { quantity, execution_price, .. } => {
            debug!(timestamp = %bar.timestamp, direction = direction.name(), quantity, execution_price, "entered");
        }
        EntryResult::InsufficientCapital => {
            debug!(timestamp = %bar.timestamp, "entry skipped: insufficient capital");
        }
        EntryResult::PyramidingLimit => {}
    }
}

/// Reduce a run to its bounded summary.
pub fn extract(strategy: &CompiledStrategy, config: &RunConfig, output: &RunOutput) -> SimulationResult {
    let portfolio = &output.portfolio;
    let metrics = Metrics::compute(portfolio, config.risk_free_rate);
    let (trades, trades_truncated) = result::cap_trades(&portfolio.closed_trades, config.max_trades);
    SimulationResult {
        title: strategy.meta.title.to_string(),
        requested_mode: config.mode,
        mode: output.mode,
        sub_resolution: output.sub_resolution,
        bars: output.bars,
        warmup: output.warmup,
        initial_capital: portfolio.initial_capital,
        final_equity: portfolio.final_equity(),
        statistics: Statistics::from(&metrics),
        signals: output.signals.counts(),
        equity_curve: result::sample_equity(&portfolio.equity_curve, config.max_equity_points),
        trades,
        trades_truncated,
        faults: output.faults.clone(),
    }
}
