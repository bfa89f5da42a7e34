//! Single-window evaluation for sub-bar stepping.
//!
//! The caller passes windows that always start at the first bar and end at
//! "now". Consecutive calls either repeat the same final bar (a new
//! sub-step of a forming bar) or extend the window by one bar (the previous
//! bar is final and gets committed).

use super::ir::{Program, Value};
use super::machine::{source_fields, Frame, History, Machine};
use crate::domain::error::RuntimeFault;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::signal::BarSignals;

/// Persistent evaluation state threaded through successive step calls of
/// one simulation run.
#[derive(Debug, Clone)]
pub struct StepState {
    history: History,
    /// Start-of-bar frame for the bar being stepped.
    committed: Frame,
    /// Bar index and frame of the latest call.
    current: Option<(usize, Frame)>,
    pub(crate) warmup: Option<usize>,
}

impl StepState {
    pub fn new(program: &Program) -> Self {
        StepState {
            history: History::new(program),
            committed: Frame::new(&program.slots),
            current: None,
            warmup: None,
        }
    }

    /// Number of bars committed so far.
    pub fn committed_bars(&self) -> usize {
        self.history.len()
    }
}

pub fn run(
    program: &Program,
    window: &[OhlcvBar],
    params: &[Value],
    state: &mut StepState,
    loop_budget: usize,
) -> Result<BarSignals, RuntimeFault> {
    let bar = window.len().checked_sub(1).ok_or(RuntimeFault::EmptySeries)?;
    let out_of_sequence = || RuntimeFault::Evaluation {
        bar,
        reason: "step window out of sequence".to_string(),
    };

    let mut frame = match state.current.take() {
        Some((current, previous)) if current == bar => {
            state.history.rollback();
            let mut frame = state.committed.clone();
            frame.carry_varip(&previous, &program.slots);
            frame
        }
        Some((current, previous)) if current + 1 == bar => {
            state.history.commit(&previous);
            state.committed = previous.advance(&program.slots);
            state.committed.clone()
        }
        None if bar == 0 => state.committed.clone(),
        other => {
            state.current = other;
            return Err(out_of_sequence());
        }
    };

    let sources = source_fields(params);
    let result = Machine {
        program,
        bars: window,
        index: bar,
        params,
        sources: &sources,
        columns: None,
        history: &mut state.history,
        frame: &mut frame,
        budget: loop_budget,
    }
    .run();
    state.current = Some((bar, frame));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::script::{batch, compile};
    use crate::domain::strategy::ParamSet;
    use chrono::NaiveDate;

    fn bar(i: usize, close: f64) -> OhlcvBar {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        OhlcvBar {
            timestamp: start + chrono::Duration::minutes(i as i64 * 60),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
        }
    }

    const COUNTER: &str = "strategy(\"t\")
var int bars = 0
varip int ticks = 0
bars += 1
ticks += 1
if bars == 3 and ticks == 2
    strategy.entry(\"L\", strategy.long)
if bars == 3 and ticks == 1
    strategy.entry(\"S\", strategy.short)
";

    #[test]
    fn substeps_roll_back_var_but_keep_varip() {
        let compiled = compile(COUNTER).unwrap();
        let params = compiled.resolve(&ParamSet::new()).unwrap();
        let mut state = StepState::new(&compiled.program);
        let mut window = vec![bar(0, 10.0)];
        run(&compiled.program, &window, &params.values, &mut state, 100).unwrap();
        window.push(bar(1, 11.0));
        run(&compiled.program, &window, &params.values, &mut state, 100).unwrap();

        // Bar 2, first sub-step: bars = 3, ticks = 1.
        window.push(bar(2, 12.0));
        let first = run(&compiled.program, &window, &params.values, &mut state, 100).unwrap();
        assert!(first.short_entry);
        assert!(!first.long_entry);

        // Second sub-step of the same bar: var rolled back, varip carried.
        window[2] = bar(2, 12.5);
        let second = run(&compiled.program, &window, &params.values, &mut state, 100).unwrap();
        assert!(second.long_entry);
        assert!(!second.short_entry);
        assert_eq!(state.committed_bars(), 2);
    }

    #[test]
    fn skipping_a_bar_is_rejected() {
        let compiled = compile(COUNTER).unwrap();
        let params = compiled.resolve(&ParamSet::new()).unwrap();
        let mut state = StepState::new(&compiled.program);
        let window = vec![bar(0, 1.0), bar(1, 2.0)];
        let err = run(&compiled.program, &window, &params.values, &mut state, 100).unwrap_err();
        assert!(matches!(err, RuntimeFault::Evaluation { bar: 1, .. }));
    }

    #[test]
    fn stepping_every_bar_matches_batch() {
        let src = "strategy(\"t\")
fast = ta.ema(close, 4)
slow = ta.sma(close, 9)
spread = fast - slow
if ta.crossover(fast, slow) and spread[1] < 0
    strategy.entry(\"L\", strategy.long)
if ta.crossunder(fast, slow)
    strategy.close(\"L\")
";
        let compiled = compile(src).unwrap();
        let params = compiled.resolve(&ParamSet::new()).unwrap();
        let bars: Vec<OhlcvBar> = (0..80)
            .map(|i| bar(i, 100.0 + (i as f64 / 6.0).sin() * 8.0))
            .collect();
        let batch = batch::run(&compiled.program, &bars, &params.values, 100);
        let mut state = StepState::new(&compiled.program);
        for i in 0..bars.len() {
            let signals = run(&compiled.program, &bars[..=i], &params.values, &mut state, 100).unwrap();
            assert_eq!(signals, batch.signals.get(i), "bar {i}");
        }
        assert!(batch.signals.counts().long_entries > 0);
    }
}
