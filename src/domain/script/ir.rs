//! Lowered program form shared by the batch and step evaluators.
//!
//! Names are resolved to numbered slots, user functions are inlined and
//! every indicator call site gets its own state id.

use std::sync::Arc;

use super::ast::{BinOp, UnOp};
use super::builtins::MathFn;
use crate::domain::indicator::IndicatorKind;
use crate::domain::ohlcv::PriceField;
use crate::domain::strategy::Direction;

pub type SlotId = usize;
pub type SiteId = usize;

/// A runtime value. `Num(NaN)` never escapes a constructor: NaN is `Na`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Na,
    Num(f64),
    Bool(bool),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
}

impl Value {
    pub fn num(x: f64) -> Value {
        if x.is_nan() { Value::Na } else { Value::Num(x) }
    }

    pub fn text(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn is_na(&self) -> bool {
        match self {
            Value::Na => true,
            Value::Num(x) => x.is_nan(),
            _ => false,
        }
    }

    /// Numeric view; na maps to NaN. `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Na => Some(f64::NAN),
            Value::Num(x) => Some(*x),
            _ => None,
        }
    }

    /// Indicator parameter view: booleans become 1.0 / 0.0.
    pub fn as_param(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            other => other.as_f64(),
        }
    }

    /// Condition view: na and zero are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(x) => *x != 0.0 && !x.is_nan(),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Na => "na",
            Value::Num(_) => "number",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Tuple(_) => "tuple",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Reassigned every bar it executes; na on bars it does not.
    Plain,
    /// Initialized once, persists across bars.
    Var,
    /// Initialized once per bar, persists across that bar's sub-steps.
    Varip,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    Entry { id: Arc<str>, direction: Direction },
    Close { id: Arc<str>, directions: Vec<Direction> },
    CloseAll,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Eval(Expr),
    Store { slot: SlotId, value: Expr },
    /// Store only if the slot has not been initialized yet.
    Init { slot: SlotId, value: Expr },
    Destructure { slots: Vec<SlotId>, value: Expr },
    Order { order: Order, when: Option<Expr> },
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    pub guard: Option<Expr>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    /// Resolved input parameter.
    Param(usize),
    /// `input.source` parameter read at the current bar.
    Source(usize),
    Price(PriceField),
    BarIndex,
    Time,
    Load(SlotId),
    /// Slot value `offset` bars back.
    History { slot: SlotId, offset: Box<Expr> },
    /// Evaluate `value` into a hidden slot, then read it `offset` bars back.
    HistoryOf { slot: SlotId, value: Box<Expr>, offset: Box<Expr> },
    PriceHistory { field: PriceField, offset: Box<Expr> },
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Math(MathFn, Vec<Expr>),
    IsNa(Box<Expr>),
    Nz(Box<Expr>, Option<Box<Expr>>),
    Indicator { site: SiteId, inputs: Vec<Expr>, params: Vec<Expr> },
    Tuple(Vec<Expr>),
    Element { tuple: Box<Expr>, index: usize },
    /// Inlined function body; its value is the last statement's.
    Block(Block),
    If { cond: Box<Expr>, then: Block, otherwise: Option<Block> },
    Switch { subject: Option<Box<Expr>>, arms: Vec<SwitchArm> },
    For { slot: SlotId, from: Box<Expr>, to: Box<Expr>, step: Option<Box<Expr>>, body: Block },
    While { cond: Box<Expr>, body: Block },
}

/// Whole-series form of an indicator input or parameter, for call sites
/// that can be precomputed over the buffered series.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Const(f64),
    Param(usize),
    Source(usize),
    Price(PriceField),
    BarIndex,
    Time,
    /// Series shifted back by a static number of bars.
    Shift(Box<Column>, Box<Column>),
    Neg(Box<Column>),
    Arith(BinOp, Box<Column>, Box<Column>),
    Math(MathFn, Vec<Column>),
    Nz(Box<Column>, Box<Column>),
    Site { site: SiteId, output: usize },
}

impl Column {
    /// True when the column does not vary by bar.
    pub fn is_static(&self) -> bool {
        match self {
            Column::Const(_) | Column::Param(_) => true,
            Column::Neg(c) => c.is_static(),
            Column::Arith(_, a, b) | Column::Nz(a, b) => a.is_static() && b.is_static(),
            Column::Math(_, args) => args.iter().all(Column::is_static),
            _ => false,
        }
    }
}

impl Column {
    /// Value of a static column. Non-numeric parameters evaluate to NaN.
    pub fn eval_static(&self, params: &[Value]) -> f64 {
        match self {
            Column::Const(x) => *x,
            Column::Param(i) => params.get(*i).and_then(Value::as_f64).unwrap_or(f64::NAN),
            Column::Neg(c) => -c.eval_static(params),
            Column::Arith(op, a, b) => arith(*op, a.eval_static(params), b.eval_static(params)),
            Column::Math(f, args) => {
                let values: Vec<f64> = args.iter().map(|a| a.eval_static(params)).collect();
                f.apply(&values)
            }
            Column::Nz(a, b) => {
                let v = a.eval_static(params);
                if v.is_nan() { b.eval_static(params) } else { v }
            }
            _ => f64::NAN,
        }
    }
}

/// Arithmetic on script numbers. Division by zero is na.
pub fn arith(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b == 0.0 => f64::NAN,
        BinOp::Div => a / b,
        BinOp::Mod if b == 0.0 => f64::NAN,
        BinOp::Mod => a % b,
        _ => f64::NAN,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    pub inputs: Vec<Column>,
    pub params: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub kind: IndicatorKind,
    pub position: usize,
    /// Present when every bar evaluates this site with inputs that depend
    /// only on prices and parameters.
    pub columnar: Option<ColumnPlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Block,
    pub slots: Vec<SlotKind>,
    pub sites: Vec<Site>,
    /// Single unconditional definition per slot, where one exists. Used for
    /// static analysis only.
    pub definitions: Vec<Option<Expr>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_na() {
        assert_eq!(Value::num(f64::NAN), Value::Na);
        assert!(Value::Num(f64::NAN).is_na());
        assert!(!Value::num(0.0).is_na());
    }

    #[test]
    fn truthiness() {
        assert!(Value::Bool(true).truthy());
        assert!(!Value::Na.truthy());
        assert!(!Value::num(0.0).truthy());
        assert!(Value::num(2.0).truthy());
        assert!(!Value::text("x").truthy());
    }

    #[test]
    fn division_by_zero_is_na() {
        assert!(arith(BinOp::Div, 1.0, 0.0).is_nan());
        assert_eq!(arith(BinOp::Mod, -7.0, 3.0), -1.0);
    }

    #[test]
    fn static_columns() {
        let c = Column::Arith(BinOp::Mul, Box::new(Column::Param(0)), Box::new(Column::Const(2.0)));
        assert!(c.is_static());
        let shifted = Column::Shift(Box::new(Column::Const(1.0)), Box::new(Column::Const(1.0)));
        assert!(!shifted.is_static());
        assert_eq!(c.eval_static(&[Value::num(4.0)]), 8.0);
        assert!(Column::Param(0).eval_static(&[Value::Bool(true)]).is_nan());
        assert!(!Column::Price(PriceField::Close).is_static());
    }
}
