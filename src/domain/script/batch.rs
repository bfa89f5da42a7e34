//! Whole-series evaluation.
//!
//! Indicator sites with a column plan are computed once over the full
//! series with the `*_series` functions; everything else runs bar by bar
//! through the shared [`Machine`].

use serde::Serialize;
use tracing::warn;

use super::ir::{self, Column, Program, Value};
use super::machine::{source_fields, Frame, History, Machine};
use crate::domain::error::{RecordedFault, RuntimeFault};
use crate::domain::indicator;
use crate::domain::ohlcv::{OhlcvBar, PriceField};
use crate::domain::signal::SignalSeries;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutput {
    pub signals: SignalSeries,
    /// Bars abandoned by a recoverable fault; they carry no signal.
    pub faults: Vec<RecordedFault>,
}

pub fn run(program: &Program, bars: &[OhlcvBar], params: &[Value], loop_budget: usize) -> BatchOutput {
    let sources = source_fields(params);
    let columns = precompute(program, bars, params, &sources);
    let mut history = History::new(program);
    let mut frame = Frame::new(&program.slots);
    let mut out = BatchOutput {
        signals: SignalSeries::with_len(bars.len()),
        faults: Vec::new(),
    };

    for index in 0..bars.len() {
        let result = Machine {
            program,
            bars,
            index,
            params,
            sources: &sources,
            columns: Some(&columns),
            history: &mut history,
            frame: &mut frame,
            budget: loop_budget,
        }
        .run();
        match result {
            Ok(signals) => out.signals.set(index, signals),
            Err(cause) => {
                if matches!(cause, RuntimeFault::LoopBudgetExceeded { .. }) {
                    warn!(bar = index, limit = loop_budget, "loop budget exceeded; bar skipped");
                } else {
                    warn!(bar = index, error = %cause, "bar evaluation failed; bar skipped");
                }
                out.faults.push(RecordedFault { bar: index, cause });
            }
        }
        history.commit(&frame);
        frame = frame.advance(&program.slots);
    }
    out
}

/// Outputs of every site with a column plan, in site order. Sites only
/// reference lower-numbered sites, so one forward pass suffices.
fn precompute(
    program: &Program,
    bars: &[OhlcvBar],
    params: &[Value],
    sources: &[Option<PriceField>],
) -> Vec<Vec<Vec<f64>>> {
    let mut outputs: Vec<Vec<Vec<f64>>> = Vec::with_capacity(program.sites.len());
    for site in &program.sites {
        let computed = match &site.columnar {
            Some(plan) => {
                let ctx = Columns {
                    bars,
                    params,
                    sources,
                    outputs: &outputs,
                };
                let inputs: Vec<Vec<f64>> = plan.inputs.iter().map(|c| ctx.eval(c)).collect();
                let lengths: Vec<f64> = plan.params.iter().map(|c| c.eval_static(params)).collect();
                let slices: Vec<&[f64]> = inputs.iter().map(Vec::as_slice).collect();
                indicator::compute_series(site.kind, &slices, &lengths)
            }
            None => Vec::new(),
        };
        outputs.push(computed);
    }
    outputs
}

struct Columns<'c> {
    bars: &'c [OhlcvBar],
    params: &'c [Value],
    sources: &'c [Option<PriceField>],
    outputs: &'c [Vec<Vec<f64>>],
}

impl Columns<'_> {
    fn eval(&self, column: &Column) -> Vec<f64> {
        let n = self.bars.len();
        match column {
            Column::Const(x) => vec![*x; n],
            Column::Param(i) => vec![self.params.get(*i).and_then(Value::as_f64).unwrap_or(f64::NAN); n],
            Column::Source(i) => match self.sources.get(*i).copied().flatten() {
                Some(field) => self.bars.iter().map(|b| b.field(field)).collect(),
                None => vec![f64::NAN; n],
            },
            Column::Price(field) => self.bars.iter().map(|b| b.field(*field)).collect(),
            Column::BarIndex => (0..n).map(|i| i as f64).collect(),
            Column::Time => self
                .bars
                .iter()
                .map(|b| b.timestamp.and_utc().timestamp_millis() as f64)
                .collect(),
            Column::Shift(series, offset) => {
                let k = offset.eval_static(self.params);
                let values = self.eval(series);
                if k.is_nan() {
                    return vec![f64::NAN; n];
                }
                let k = k.max(0.0).floor() as usize;
                (0..n).map(|i| if i >= k { values[i - k] } else { f64::NAN }).collect()
            }
            Column::Neg(c) => self.eval(c).into_iter().map(|v| -v).collect(),
            Column::Arith(op, a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                a.iter().zip(&b).map(|(x, y)| ir::arith(*op, *x, *y)).collect()
            }
            Column::Math(f, args) => {
                let args: Vec<Vec<f64>> = args.iter().map(|a| self.eval(a)).collect();
                (0..n)
                    .map(|i| {
                        let row: Vec<f64> = args.iter().map(|a| a[i]).collect();
                        f.apply(&row)
                    })
                    .collect()
            }
            Column::Nz(a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                a.iter().zip(&b).map(|(x, y)| if x.is_nan() { *y } else { *x }).collect()
            }
            Column::Site { site, output } => self
                .outputs
                .get(*site)
                .and_then(|o| o.get(*output))
                .cloned()
                .unwrap_or_else(|| vec![f64::NAN; n]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::sma_series;
    use crate::domain::script::compile;
    use crate::domain::strategy::ParamSet;
    use chrono::NaiveDate;

    fn bars(closes: &[f64]) -> Vec<OhlcvBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| OhlcvBar {
                timestamp: start + chrono::Duration::hours(i as i64),
                open: *c,
                high: *c + 0.5,
                low: *c - 0.5,
                close: *c,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn columnar_and_per_bar_sites_agree() {
        let src = "strategy(\"t\")
a = ta.sma(close, 3)
b = close > 0 ? ta.sma(close, 3) : 0.0
if a == b
    strategy.entry(\"L\", strategy.long)
";
        let compiled = compile(src).unwrap();
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let data = bars(&closes);
        let params = compiled.resolve(&ParamSet::new()).unwrap();
        let out = run(&compiled.program, &data, &params.values, 100);
        assert!(out.faults.is_empty());
        // Equal from the first bar with a full window on.
        let expected: Vec<bool> = sma_series(&closes, 3).iter().map(|v| !v.is_nan()).collect();
        assert_eq!(out.signals.long_entry, expected);
    }

    #[test]
    fn true_range_and_keltner_flags() {
        let src = "strategy(\"t\")
[m, u, l] = ta.kc(close, 3, 2, false)
[m2, u2, l2] = ta.kc(close, 3, 2)
if na(ta.tr) and not na(ta.tr(true))
    strategy.entry(\"L\", strategy.long)
if math.abs(u - m - 2) < 0.000001 and u2 - m2 > 2.5
    strategy.close(\"L\")
";
        let compiled = compile(src).unwrap();
        let closes: Vec<f64> = (0..8).map(|i| 100.0 + i as f64).collect();
        let params = compiled.resolve(&ParamSet::new()).unwrap();
        let out = run(&compiled.program, &bars(&closes), &params.values, 100);
        assert!(out.faults.is_empty());
        // Bare ta.tr has no previous close on bar 0; ta.tr(true) falls back to high - low.
        let mut entries = vec![false; 8];
        entries[0] = true;
        assert_eq!(out.signals.long_entry, entries);
        // Bar range is 1, true range 1.5 on rising closes: 2 × EMA(range) from bar 2 on.
        let exits: Vec<bool> = (0..8).map(|i| i >= 2).collect();
        assert_eq!(out.signals.long_exit, exits);
    }

    #[test]
    fn shifted_columns_pad_with_nan() {
        let data = bars(&[1.0, 2.0, 3.0]);
        let ctx = Columns {
            bars: &data,
            params: &[],
            sources: &[],
            outputs: &[],
        };
        let shifted = ctx.eval(&Column::Shift(
            Box::new(Column::Price(PriceField::Close)),
            Box::new(Column::Const(1.0)),
        ));
        assert!(shifted[0].is_nan());
        assert_eq!(&shifted[1..], &[1.0, 2.0]);
    }

    #[test]
    fn loop_budget_faults_are_recorded_per_bar() {
        let src = "strategy(\"t\")
n = 0
while true
    n := n + 1
strategy.entry(\"L\", strategy.long)
";
        let compiled = compile(src).unwrap();
        let params = compiled.resolve(&ParamSet::new()).unwrap();
        let out = run(&compiled.program, &bars(&[1.0, 2.0]), &params.values, 25);
        assert_eq!(out.faults.len(), 2);
        assert_eq!(out.faults[1].bar, 1);
        assert!(matches!(out.faults[0].cause, RuntimeFault::LoopBudgetExceeded { limit: 25, .. }));
        assert_eq!(out.signals.counts().long_entries, 0);
    }
}
