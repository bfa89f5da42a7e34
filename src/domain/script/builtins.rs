//! Catalogue of builtin variables and functions the script language exposes.

use super::qualifier::Qualifier;
use crate::domain::indicator::IndicatorKind;
use crate::domain::ohlcv::PriceField;

/// Where an indicator input series comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// The call argument at this position.
    Arg(usize),
    /// An implicit price column.
    Field(PriceField),
}

/// A numeric indicator parameter taken from a call argument. Boolean
/// arguments arrive as 1.0 / 0.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSource {
    pub arg: usize,
    pub default: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSig {
    pub kind: IndicatorKind,
    pub inputs: &'static [InputSource],
    pub params: &'static [ParamSource],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Abs,
    Max,
    Min,
    Avg,
    Sqrt,
    Pow,
    Log,
    Log10,
    Exp,
    Round,
    Floor,
    Ceil,
    Sign,
}

impl MathFn {
    pub fn apply(self, args: &[f64]) -> f64 {
        let a = args.first().copied().unwrap_or(f64::NAN);
        let b = args.get(1).copied().unwrap_or(f64::NAN);
        match self {
            MathFn::Abs => a.abs(),
            MathFn::Max => args.iter().copied().fold(f64::NEG_INFINITY, nan_max),
            MathFn::Min => args.iter().copied().fold(f64::INFINITY, nan_min),
            MathFn::Avg => args.iter().sum::<f64>() / args.len() as f64,
            MathFn::Sqrt => a.sqrt(),
            MathFn::Pow => a.powf(b),
            MathFn::Log => a.ln(),
            MathFn::Log10 => a.log10(),
            MathFn::Exp => a.exp(),
            MathFn::Round => a.round(),
            MathFn::Floor => a.floor(),
            MathFn::Ceil => a.ceil(),
            MathFn::Sign => {
                if a.is_nan() {
                    f64::NAN
                } else if a > 0.0 {
                    1.0
                } else if a < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }
}

// NaN-propagating max/min; f64::max would silently drop a NaN operand.
fn nan_max(acc: f64, x: f64) -> f64 {
    if acc.is_nan() || x.is_nan() { f64::NAN } else { acc.max(x) }
}

fn nan_min(acc: f64, x: f64) -> f64 {
    if acc.is_nan() || x.is_nan() { f64::NAN } else { acc.min(x) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// `input(...)`: type follows the default value.
    Auto,
    Int,
    Float,
    Bool,
    String,
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Builtin {
    Indicator(IndicatorSig),
    Math(MathFn),
    IsNa,
    Nz,
    Input(InputKind),
    /// Plotting and alert calls: accepted, evaluated to na.
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSig {
    pub name: &'static str,
    pub qualifier: Qualifier,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signature {
    pub name: &'static str,
    pub params: &'static [ParamSig],
    /// Extra positional arguments reuse the last parameter's qualifier.
    pub variadic: bool,
    pub builtin: Builtin,
}

impl Signature {
    /// Match call arguments to parameter slots. Returns, per parameter, the
    /// index of the supplying argument. Unknown names and surplus
    /// positional arguments are reported as `Err(arg_index)`.
    pub fn bind(&self, names: &[Option<&str>]) -> Result<Vec<Option<usize>>, usize> {
        let mut slots = vec![None; self.params.len()];
        let mut extra = Vec::new();
        for (i, name) in names.iter().enumerate() {
            match name {
                Some(name) => match self.params.iter().position(|p| p.name == *name) {
                    Some(slot) => slots[slot] = Some(i),
                    None if self.builtin == Builtin::NoOp => {}
                    None => return Err(i),
                },
                None if i < self.params.len() => slots[i] = Some(i),
                None if self.variadic || self.builtin == Builtin::NoOp => extra.push(i),
                None => return Err(i),
            }
        }
        slots.extend(extra.into_iter().map(Some));
        Ok(slots)
    }

    /// Qualifier bound for the parameter slot `slot` (variadic slots reuse
    /// the last declared one).
    pub fn qualifier_at(&self, slot: usize) -> Qualifier {
        self.params
            .get(slot)
            .or(self.params.last())
            .map(|p| p.qualifier)
            .unwrap_or(Qualifier::Series)
    }
}

const fn req(name: &'static str, qualifier: Qualifier) -> ParamSig {
    ParamSig {
        name,
        qualifier,
        required: true,
    }
}

const fn opt(name: &'static str, qualifier: Qualifier) -> ParamSig {
    ParamSig {
        name,
        qualifier,
        required: false,
    }
}

use Qualifier::{Const, Series, Simple};

const SOURCE_LENGTH: &[ParamSig] = &[req("source", Series), req("length", Simple)];
const ARG0: &[InputSource] = &[InputSource::Arg(0)];
const ARG01: &[InputSource] = &[InputSource::Arg(0), InputSource::Arg(1)];
const HLC: &[InputSource] = &[
    InputSource::Field(PriceField::High),
    InputSource::Field(PriceField::Low),
    InputSource::Field(PriceField::Close),
];
const LEN1: &[ParamSource] = &[ParamSource {
    arg: 1,
    default: None,
}];

const fn smoothing(name: &'static str, kind: IndicatorKind) -> Signature {
    Signature {
        name,
        params: SOURCE_LENGTH,
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind,
            inputs: ARG0,
            params: LEN1,
        }),
    }
}

const fn math(name: &'static str, params: &'static [ParamSig], variadic: bool, f: MathFn) -> Signature {
    Signature {
        name,
        params,
        variadic,
        builtin: Builtin::Math(f),
    }
}

const fn noop(name: &'static str) -> Signature {
    Signature {
        name,
        params: &[],
        variadic: true,
        builtin: Builtin::NoOp,
    }
}

const INPUT_PARAMS: &[ParamSig] = &[
    req("defval", Const),
    opt("title", Const),
    opt("minval", Const),
    opt("maxval", Const),
    opt("step", Const),
    opt("options", Const),
    opt("tooltip", Const),
    opt("inline", Const),
    opt("group", Const),
    opt("confirm", Const),
];

const SOURCE_INPUT_PARAMS: &[ParamSig] = &[
    req("defval", Series),
    opt("title", Const),
    opt("tooltip", Const),
    opt("inline", Const),
    opt("group", Const),
];

const fn input(name: &'static str, kind: InputKind) -> Signature {
    Signature {
        name,
        params: if matches!(kind, InputKind::Source) {
            SOURCE_INPUT_PARAMS
        } else {
            INPUT_PARAMS
        },
        variadic: false,
        builtin: Builtin::Input(kind),
    }
}

const X: &[ParamSig] = &[req("number", Series)];
const XY: &[ParamSig] = &[req("number0", Series), req("number1", Series)];

pub const FUNCTIONS: &[Signature] = &[
    smoothing("ta.sma", IndicatorKind::Sma),
    smoothing("ta.ema", IndicatorKind::Ema),
    smoothing("ta.rma", IndicatorKind::Rma),
    smoothing("ta.wma", IndicatorKind::Wma),
    smoothing("ta.stdev", IndicatorKind::Stdev),
    smoothing("ta.highest", IndicatorKind::Highest),
    smoothing("ta.lowest", IndicatorKind::Lowest),
    smoothing("ta.mom", IndicatorKind::Mom),
    smoothing("ta.roc", IndicatorKind::Roc),
    smoothing("ta.rsi", IndicatorKind::Rsi),
    smoothing("ta.cci", IndicatorKind::Cci),
    Signature {
        name: "ta.change",
        params: &[req("source", Series), opt("length", Simple)],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Change,
            inputs: ARG0,
            params: &[ParamSource {
                arg: 1,
                default: Some(1.0),
            }],
        }),
    },
    Signature {
        name: "ta.vwma",
        params: SOURCE_LENGTH,
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Vwma,
            inputs: &[InputSource::Arg(0), InputSource::Field(PriceField::Volume)],
            params: LEN1,
        }),
    },
    Signature {
        name: "ta.tr",
        params: &[opt("handle_na", Simple)],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Tr,
            inputs: HLC,
            params: &[ParamSource {
                arg: 0,
                default: Some(0.0),
            }],
        }),
    },
    Signature {
        name: "ta.atr",
        params: &[req("length", Simple)],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Atr,
            inputs: HLC,
            params: &[ParamSource {
                arg: 0,
                default: None,
            }],
        }),
    },
    Signature {
        name: "ta.macd",
        params: &[
            req("source", Series),
            req("fastlen", Simple),
            req("slowlen", Simple),
            req("siglen", Simple),
        ],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Macd,
            inputs: ARG0,
            params: &[
                ParamSource { arg: 1, default: None },
                ParamSource { arg: 2, default: None },
                ParamSource { arg: 3, default: None },
            ],
        }),
    },
    Signature {
        name: "ta.bb",
        params: &[req("series", Series), req("length", Simple), req("mult", Simple)],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Bb,
            inputs: ARG0,
            params: &[
                ParamSource { arg: 1, default: None },
                ParamSource { arg: 2, default: None },
            ],
        }),
    },
    Signature {
        name: "ta.kc",
        params: &[
            req("series", Series),
            req("length", Simple),
            req("mult", Simple),
            opt("useTrueRange", Simple),
        ],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Kc,
            inputs: &[
                InputSource::Arg(0),
                InputSource::Field(PriceField::High),
                InputSource::Field(PriceField::Low),
                InputSource::Field(PriceField::Close),
            ],
            params: &[
                ParamSource { arg: 1, default: None },
                ParamSource { arg: 2, default: None },
                ParamSource { arg: 3, default: Some(1.0) },
            ],
        }),
    },
    Signature {
        name: "ta.stoch",
        params: &[
            req("source", Series),
            req("high", Series),
            req("low", Series),
            req("length", Simple),
        ],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Stoch,
            inputs: &[InputSource::Arg(0), InputSource::Arg(1), InputSource::Arg(2)],
            params: &[ParamSource { arg: 3, default: None }],
        }),
    },
    Signature {
        name: "ta.crossover",
        params: &[req("source1", Series), req("source2", Series)],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Crossover,
            inputs: ARG01,
            params: &[],
        }),
    },
    Signature {
        name: "ta.crossunder",
        params: &[req("source1", Series), req("source2", Series)],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Crossunder,
            inputs: ARG01,
            params: &[],
        }),
    },
    Signature {
        name: "ta.cross",
        params: &[req("source1", Series), req("source2", Series)],
        variadic: false,
        builtin: Builtin::Indicator(IndicatorSig {
            kind: IndicatorKind::Cross,
            inputs: ARG01,
            params: &[],
        }),
    },
    math("math.abs", X, false, MathFn::Abs),
    math("math.max", XY, true, MathFn::Max),
    math("math.min", XY, true, MathFn::Min),
    math("math.avg", XY, true, MathFn::Avg),
    math("math.sqrt", X, false, MathFn::Sqrt),
    math("math.pow", &[req("base", Series), req("exponent", Series)], false, MathFn::Pow),
    math("math.log", X, false, MathFn::Log),
    math("math.log10", X, false, MathFn::Log10),
    math("math.exp", X, false, MathFn::Exp),
    math("math.round", X, false, MathFn::Round),
    math("math.floor", X, false, MathFn::Floor),
    math("math.ceil", X, false, MathFn::Ceil),
    math("math.sign", X, false, MathFn::Sign),
    Signature {
        name: "na",
        params: &[req("x", Series)],
        variadic: false,
        builtin: Builtin::IsNa,
    },
    Signature {
        name: "nz",
        params: &[req("source", Series), opt("replacement", Series)],
        variadic: false,
        builtin: Builtin::Nz,
    },
    input("input", InputKind::Auto),
    input("input.int", InputKind::Int),
    input("input.float", InputKind::Float),
    input("input.bool", InputKind::Bool),
    input("input.string", InputKind::String),
    input("input.source", InputKind::Source),
    noop("plot"),
    noop("plotshape"),
    noop("plotchar"),
    noop("hline"),
    noop("fill"),
    noop("bgcolor"),
    noop("barcolor"),
    noop("alertcondition"),
    noop("alert"),
    noop("color.new"),
    noop("color.rgb"),
];

pub fn lookup(name: &str) -> Option<&'static Signature> {
    FUNCTIONS.iter().find(|s| s.name == name)
}

/// Builtin values readable by name.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltinVar {
    Price(PriceField),
    BarIndex,
    Time,
    /// `ta.tr` used as a variable.
    TrueRange,
    Direction(crate::domain::strategy::Direction),
    Number(f64),
    Text(String),
}

/// Resolve a builtin variable and its qualifier.
pub fn variable(name: &str) -> Option<(BuiltinVar, Qualifier)> {
    use crate::domain::strategy::Direction;

    if let Some(field) = PriceField::from_name(name) {
        return Some((BuiltinVar::Price(field), Series));
    }
    let resolved = match name {
        "bar_index" => (BuiltinVar::BarIndex, Series),
        "time" => (BuiltinVar::Time, Series),
        "ta.tr" => (BuiltinVar::TrueRange, Series),
        "strategy.long" => (BuiltinVar::Direction(Direction::Long), Const),
        "strategy.short" => (BuiltinVar::Direction(Direction::Short), Const),
        "math.pi" => (BuiltinVar::Number(std::f64::consts::PI), Const),
        "math.e" => (BuiltinVar::Number(std::f64::consts::E), Const),
        "strategy.percent_of_equity" | "strategy.cash" | "strategy.fixed" => {
            (BuiltinVar::Text(name.trim_start_matches("strategy.").to_string()), Const)
        }
        "strategy.commission.percent" | "strategy.commission.cash_per_order" => {
            (BuiltinVar::Text(name.trim_start_matches("strategy.commission.").to_string()), Const)
        }
        _ => {
            let namespace = name.split('.').next().unwrap_or("");
            let constant = matches!(
                namespace,
                "color" | "shape" | "location" | "size" | "display" | "format" | "plot" | "hline"
                    | "currency"
            );
            if constant && name.contains('.') {
                (BuiltinVar::Text(name.to_string()), Const)
            } else {
                return None;
            }
        }
    };
    Some(resolved)
}

/// Order commands the backend can execute.
pub const SUPPORTED_ORDERS: &[&str] = &["strategy.entry", "strategy.close", "strategy.close_all"];
