//! Magnifier mode: find the sub-bar where a signal first fires.
//!
//! # Evaluation Semantics
//!
//! - Chart bars are processed in time order. Warmup bars are stepped once
//!   with the complete chart bar so persistent state builds up.
//! - Past warmup, each chart bar is rebuilt from its sub-bars as a forming
//!   bar and the step function runs after every sub-bar.
//! - A position-state machine (flat/long/short) drops entries in the
//!   direction already held and exits with nothing to close.
//! - At most one signal is recorded per chart bar, at the first sub-bar
//!   where one survives the filter. Later sub-bars of that chart bar are
//!   not evaluated.
//! - Before moving on, the chart bar is stepped once more in its final form
//!   if the last evaluated forming bar differs from it, so committed state
//!   matches the closed bar.
//! - Signals are aligned with the sub-bar series, which is also the series
//!   fills are simulated against.

use tracing::{debug, warn};

use super::error::{RecordedFault, RuntimeFault};
use super::ohlcv::{FormingBar, OhlcvBar, OhlcvSeries};
use super::position::PositionState;
use super::signal::{BarSignals, SignalSeries};
use super::strategy::{CompiledStrategy, ResolvedParams};

#[derive(Debug, Clone, PartialEq)]
pub struct MagnifierOutput {
    /// Sub-bars covering the chart range; fills use these prices.
    pub bars: Vec<OhlcvBar>,
    /// Aligned with `bars`.
    pub signals: SignalSeries,
    pub faults: Vec<RecordedFault>,
}

/// The one signal to record given the current position, if any.
///
/// Priority: long entry, short entry, long exit, short exit. An entry
/// against an open position is a reversal and also covers its exit.
pub fn first_signal(signals: BarSignals, position: PositionState) -> Option<BarSignals> {
    let only = |f: fn(&mut BarSignals)| {
        let mut s = BarSignals::default();
        f(&mut s);
        Some(s)
    };
    if signals.long_entry && position != PositionState::Long {
        only(|s| s.long_entry = true)
    } else if signals.short_entry && position != PositionState::Short {
        only(|s| s.short_entry = true)
    } else if signals.long_exit && position == PositionState::Long {
        only(|s| s.long_exit = true)
    } else if signals.short_exit && position == PositionState::Short {
        only(|s| s.short_exit = true)
    } else {
        None
    }
}

fn transition(signal: &BarSignals) -> PositionState {
    if signal.long_entry {
        PositionState::Long
    } else if signal.short_entry {
        PositionState::Short
    } else {
        PositionState::Flat
    }
}

pub fn run(
    strategy: &CompiledStrategy,
    chart: &OhlcvSeries,
    sub_bars: &OhlcvSeries,
    chart_minutes: u32,
    params: &ResolvedParams,
) -> Result<MagnifierOutput, RuntimeFault> {
    let chart_bars = chart.bars();
    let span_end = chart.last_timestamp() + chrono::Duration::minutes(i64::from(chart_minutes));
    let covered = sub_bars.index_range(chart.first_timestamp(), span_end);
    let offset = covered.start;
    let fill_bars = sub_bars.bars()[covered].to_vec();

    let warmup = strategy.warmup_for(params);
    let resolution = sub_resolution_minutes(sub_bars);
    let mut out = MagnifierOutput {
        signals: SignalSeries::with_len(fill_bars.len()),
        bars: fill_bars,
        faults: Vec::new(),
    };
    let mut state = strategy.new_step_state();
    let mut window: Vec<OhlcvBar> = Vec::with_capacity(chart_bars.len());
    let mut position = PositionState::Flat;
    let mut sub_steps = 0usize;

    for (i, chart_bar) in chart_bars.iter().enumerate() {
        let end = chart_bars.get(i + 1).map_or(span_end, |b| b.timestamp);
        let range = sub_bars.index_range(chart_bar.timestamp, end);
        window.push(chart_bar.clone());

        if i < warmup || range.is_empty() {
            if i >= warmup {
                warn!(bar = i, resolution, "chart bar has no sub-bars; stepped whole");
                out.faults.push(RecordedFault {
                    bar: i,
                    cause: RuntimeFault::MissingSubBars { resolution },
                });
            }
            if let Err(cause) = strategy.step(&window, params, &mut state) {
                record(&mut out.faults, i, cause)?;
            }
            continue;
        }

        let mut forming: Option<FormingBar> = None;
        let mut faulted = false;
        for j in range {
            let sub = &sub_bars.bars()[j];
            match forming.as_mut() {
                Some(f) => f.update(sub),
                None => forming = Some(FormingBar::start(chart_bar.timestamp, sub)),
            }
            let Some(f) = forming.as_ref() else { continue };
            window[i] = f.bar().clone();
            sub_steps += 1;

            match strategy.step(&window, params, &mut state) {
                Ok(signals) => {
                    if let Some(signal) = first_signal(signals, position) {
                        debug!(bar = i, sub_bar = j, ?signal, "magnifier signal");
                        out.signals.set(j - offset, signal);
                        position = transition(&signal);
                        break;
                    }
                }
                Err(cause) => {
                    record(&mut out.faults, i, cause)?;
                    faulted = true;
                    break;
                }
            }
        }

        if window[i] != *chart_bar {
            window[i] = chart_bar.clone();
            if let Err(cause) = strategy.step(&window, params, &mut state) {
                if !faulted {
                    record(&mut out.faults, i, cause)?;
                }
            }
        }
    }

    debug!(
        chart_bars = chart_bars.len(),
        sub_bars = out.bars.len(),
        sub_steps,
        "magnifier pass complete"
    );
    Ok(out)
}

/// Absorb a recoverable fault; anything else aborts the run.
fn record(faults: &mut Vec<RecordedFault>, bar: usize, cause: RuntimeFault) -> Result<(), RuntimeFault> {
    if !cause.is_recoverable() {
        return Err(cause);
    }
    warn!(bar, error = %cause, "sub-bar evaluation failed; no signal for this bar");
    faults.push(RecordedFault { bar, cause });
    Ok(())
}

fn sub_resolution_minutes(sub_bars: &OhlcvSeries) -> u32 {
    super::resolution::infer_minutes(sub_bars).unwrap_or(1)
}
