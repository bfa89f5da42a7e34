//! Compiled strategy: metadata, parameter schema and the two evaluation
//! entry points.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::error::RuntimeFault;
use crate::domain::ohlcv::{OhlcvBar, OhlcvSeries, PriceField};
use crate::domain::script::batch::{self, BatchOutput};
use crate::domain::script::ir::{Program, Value};
use crate::domain::script::qualifier::Warning;
use crate::domain::script::step::{self, StepState};
use crate::domain::script::{codegen, DEFAULT_LOOP_BUDGET};
use crate::domain::signal::BarSignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn name(self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

/// Which directions a script can enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionCapability {
    None,
    LongOnly,
    ShortOnly,
    Both,
}

impl DirectionCapability {
    pub fn from_flags(long: bool, short: bool) -> Self {
        match (long, short) {
            (true, true) => DirectionCapability::Both,
            (true, false) => DirectionCapability::LongOnly,
            (false, true) => DirectionCapability::ShortOnly,
            (false, false) => DirectionCapability::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingKind {
    PercentOfEquity,
    Cash,
    Fixed,
}

impl SizingKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "percent_of_equity" => Some(SizingKind::PercentOfEquity),
            "cash" => Some(SizingKind::Cash),
            "fixed" => Some(SizingKind::Fixed),
            _ => None,
        }
    }
}

/// Run defaults declared in the script header. `None` where the header is
/// silent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderSettings {
    pub initial_capital: Option<f64>,
    pub default_qty_type: Option<SizingKind>,
    pub default_qty_value: Option<f64>,
    /// Percent per fill.
    pub commission_pct: Option<f64>,
    /// Ticks; converted by the caller.
    pub slippage: Option<f64>,
    pub pyramiding: Option<u32>,
    pub calc_on_every_tick: bool,
    pub process_orders_on_close: bool,
    pub currency: Option<String>,
    pub max_bars_back: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Strategy,
    Indicator,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyMeta {
    pub title: Arc<str>,
    pub short_title: Option<Arc<str>>,
    pub script_type: ScriptType,
    pub overlay: bool,
    pub directions: DirectionCapability,
    pub settings: HeaderSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    String,
    Source,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl ParamValue {
    /// Numeric view of an int or float value.
    pub fn number(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Parse a textual override (config files) against the expected kind.
    pub fn parse(kind: ParamKind, text: &str) -> Option<ParamValue> {
        let text = text.trim();
        match kind {
            ParamKind::Int => text.parse().ok().map(ParamValue::Int),
            ParamKind::Float => text.parse().ok().map(ParamValue::Float),
            ParamKind::Bool => match text {
                "true" => Some(ParamValue::Bool(true)),
                "false" => Some(ParamValue::Bool(false)),
                _ => None,
            },
            ParamKind::String | ParamKind::Source => Some(ParamValue::Str(text.to_string())),
        }
    }
}

/// One declared script input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    /// Variable the input is bound to.
    pub name: String,
    pub title: Option<String>,
    pub kind: ParamKind,
    pub default: ParamValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub options: Vec<ParamValue>,
}

impl ParamSpec {
    pub fn matches(&self, key: &str) -> bool {
        self.name == key || self.title.as_deref() == Some(key)
    }

    fn resolve(&self, value: &ParamValue) -> Result<Value, RuntimeFault> {
        let invalid = |reason: String| RuntimeFault::InvalidParameter {
            name: self.name.clone(),
            reason,
        };
        let resolved = match (self.kind, value) {
            (ParamKind::Int, ParamValue::Int(v)) => Value::num(*v as f64),
            (ParamKind::Int, ParamValue::Float(v)) if v.fract() == 0.0 => Value::num(*v),
            (ParamKind::Float, v @ (ParamValue::Int(_) | ParamValue::Float(_))) => {
                Value::num(v.number().unwrap_or(f64::NAN))
            }
            (ParamKind::Bool, ParamValue::Bool(b)) => Value::Bool(*b),
            (ParamKind::String, ParamValue::Str(s)) => Value::text(s),
            (ParamKind::Source, ParamValue::Str(s)) => match PriceField::from_name(s) {
                Some(field) => Value::text(field.name()),
                None => return Err(invalid(format!("'{s}' is not a price source"))),
            },
            (kind, other) => {
                return Err(invalid(format!("{other:?} does not fit a {kind:?} input")));
            }
        };
        if let Some(x) = value.number() {
            if self.min.is_some_and(|min| x < min) || self.max.is_some_and(|max| x > max) {
                return Err(invalid(format!(
                    "{x} outside [{}, {}]",
                    self.min.map_or("-inf".to_string(), |v| v.to_string()),
                    self.max.map_or("inf".to_string(), |v| v.to_string())
                )));
            }
        }
        if !self.options.is_empty() && !self.options.contains(value) {
            return Err(invalid(format!("{value:?} is not one of the declared options")));
        }
        Ok(resolved)
    }
}

/// Parameter overrides keyed by input name or title.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Parameter values in declaration order, validated against the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    pub(crate) values: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    pub meta: StrategyMeta,
    pub params: Vec<ParamSpec>,
    pub warnings: Vec<Warning>,
    warmup: usize,
    loop_budget: usize,
    pub(crate) program: Arc<Program>,
}

impl CompiledStrategy {
    pub(crate) fn new(
        meta: StrategyMeta,
        params: Vec<ParamSpec>,
        warnings: Vec<Warning>,
        program: Program,
    ) -> Result<Self, RuntimeFault> {
        let mut compiled = CompiledStrategy {
            meta,
            params,
            warnings,
            warmup: 0,
            loop_budget: DEFAULT_LOOP_BUDGET,
            program: Arc::new(program),
        };
        let defaults = compiled.resolve(&ParamSet::new())?;
        compiled.warmup = codegen::warmup(&compiled.program, &defaults.values);
        Ok(compiled)
    }

    /// Warmup bar count at the default parameters.
    pub fn warmup(&self) -> usize {
        self.warmup
    }

    pub fn warmup_for(&self, params: &ResolvedParams) -> usize {
        codegen::warmup(&self.program, &params.values)
    }

    pub fn loop_budget(&self) -> usize {
        self.loop_budget
    }

    /// Copy with a different per-bar loop iteration ceiling.
    pub fn with_loop_budget(mut self, budget: usize) -> Self {
        self.loop_budget = budget;
        self
    }

    /// Apply overrides to the declared defaults. Unknown keys and values
    /// outside the declared bounds fail.
    pub fn resolve(&self, overrides: &ParamSet) -> Result<ResolvedParams, RuntimeFault> {
        for key in overrides.keys() {
            if !self.params.iter().any(|p| p.matches(key)) {
                return Err(RuntimeFault::InvalidParameter {
                    name: key.clone(),
                    reason: "no input with that name or title".to_string(),
                });
            }
        }
        let values = self
            .params
            .iter()
            .map(|spec| {
                let chosen = overrides
                    .get(&spec.name)
                    .or_else(|| spec.title.as_ref().and_then(|t| overrides.get(t)))
                    .unwrap_or(&spec.default);
                spec.resolve(chosen)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResolvedParams { values })
    }

    /// Evaluate every bar of `series` at once. Signals before the warmup
    /// bar are cleared.
    pub fn batch(&self, series: &OhlcvSeries, params: &ResolvedParams) -> BatchOutput {
        let mut out = batch::run(&self.program, series.bars(), &params.values, self.loop_budget);
        out.signals.clear_before(self.warmup_for(params));
        out
    }

    /// Evaluate the last bar of `window`, threading persistent state
    /// through `state`. Bars before the warmup bar never signal.
    pub fn step(
        &self,
        window: &[OhlcvBar],
        params: &ResolvedParams,
        state: &mut StepState,
    ) -> Result<BarSignals, RuntimeFault> {
        let signals = step::run(&self.program, window, &params.values, state, self.loop_budget)?;
        let warmup = *state.warmup.get_or_insert_with(|| self.warmup_for(params));
        if window.len() <= warmup {
            return Ok(BarSignals::default());
        }
        Ok(signals)
    }

    pub fn new_step_state(&self) -> StepState {
        StepState::new(&self.program)
    }
}
