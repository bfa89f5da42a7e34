//! Bar evaluator shared by the batch and step paths.
//!
//! # Evaluation Semantics
//!
//! - Plain slots are na at the start of every bar; `var` slots carry over;
//!   `varip` slots carry over between sub-steps of one bar only
//! - `x[n]` reads the value committed `n` bars ago, na before the first bar
//! - Comparisons involving na are false; arithmetic with na is na
//! - `and`/`or` short-circuit
//! - Division by zero is na
//! - Every loop iteration counts against a per-bar budget; exceeding it
//!   abandons the bar with [`RuntimeFault::LoopBudgetExceeded`]

use std::sync::Arc;

use super::ast::{BinOp, UnOp};
use super::ir::{self, Block, Expr, Order, Program, SiteId, SlotId, SlotKind, Stmt, Value};
use crate::domain::error::RuntimeFault;
use crate::domain::indicator;
use crate::domain::ohlcv::{OhlcvBar, PriceField};
use crate::domain::signal::BarSignals;
use crate::domain::strategy::Direction;

/// Slot values for the bar being evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    values: Vec<Value>,
    initialized: Vec<bool>,
}

impl Frame {
    pub fn new(slots: &[SlotKind]) -> Self {
        Frame {
            values: vec![Value::Na; slots.len()],
            initialized: vec![false; slots.len()],
        }
    }

    /// Start-of-bar frame for the bar after this one.
    pub fn advance(&self, slots: &[SlotKind]) -> Frame {
        let mut next = Frame::new(slots);
        for (slot, kind) in slots.iter().enumerate() {
            if *kind == SlotKind::Var {
                next.values[slot] = self.values[slot].clone();
                next.initialized[slot] = self.initialized[slot];
            }
        }
        next
    }

    /// Take `varip` slots from an earlier sub-step of the same bar.
    pub fn carry_varip(&mut self, from: &Frame, slots: &[SlotKind]) {
        for (slot, kind) in slots.iter().enumerate() {
            if *kind == SlotKind::Varip {
                self.values[slot] = from.values[slot].clone();
                self.initialized[slot] = from.initialized[slot];
            }
        }
    }

    pub fn value(&self, slot: SlotId) -> &Value {
        &self.values[slot]
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SiteBuffer {
    /// One column per indicator input, one entry per bar the site ran.
    inputs: Vec<Vec<f64>>,
    /// The last entry belongs to the uncommitted bar.
    pending: bool,
}

/// Committed per-bar state: values of slots read through `[n]` and the
/// input history of every indicator site.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    slots: Vec<Option<Vec<Value>>>,
    sites: Vec<SiteBuffer>,
    bars: usize,
}

impl History {
    pub fn new(program: &Program) -> Self {
        let mut tracked = vec![false; program.slots.len()];
        mark_block(&program.body, &mut tracked);
        History {
            slots: tracked.into_iter().map(|t| t.then(Vec::new)).collect(),
            sites: program
                .sites
                .iter()
                .map(|site| SiteBuffer {
                    inputs: vec![Vec::new(); site.kind.input_count()],
                    pending: false,
                })
                .collect(),
            bars: 0,
        }
    }

    /// Number of committed bars.
    pub fn len(&self) -> usize {
        self.bars
    }

    pub fn is_empty(&self) -> bool {
        self.bars == 0
    }

    /// Close the current bar with the final values in `frame`.
    pub fn commit(&mut self, frame: &Frame) {
        for (slot, history) in self.slots.iter_mut().enumerate() {
            if let Some(history) = history {
                history.push(frame.values[slot].clone());
            }
        }
        for site in &mut self.sites {
            site.pending = false;
        }
        self.bars += 1;
    }

    /// Drop everything the uncommitted bar pushed.
    pub fn rollback(&mut self) {
        for site in &mut self.sites {
            if site.pending {
                for column in &mut site.inputs {
                    column.pop();
                }
                site.pending = false;
            }
        }
    }

    fn past(&self, slot: SlotId, n: usize) -> Value {
        self.slots
            .get(slot)
            .and_then(Option::as_ref)
            .and_then(|h| h.len().checked_sub(n).map(|i| h[i].clone()))
            .unwrap_or(Value::Na)
    }
}

fn mark_block(block: &Block, tracked: &mut [bool]) {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Eval(e) | Stmt::Store { value: e, .. } | Stmt::Init { value: e, .. } => mark(e, tracked),
            Stmt::Destructure { value, .. } => mark(value, tracked),
            Stmt::Order { when: Some(e), .. } => mark(e, tracked),
            _ => {}
        }
    }
}

fn mark(expr: &Expr, tracked: &mut [bool]) {
    match expr {
        Expr::History { slot, offset } => {
            tracked[*slot] = true;
            mark(offset, tracked);
        }
        Expr::HistoryOf { slot, value, offset } => {
            tracked[*slot] = true;
            mark(value, tracked);
            mark(offset, tracked);
        }
        Expr::PriceHistory { offset, .. } | Expr::Unary(_, offset) | Expr::IsNa(offset) => mark(offset, tracked),
        Expr::Binary(_, a, b) => {
            mark(a, tracked);
            mark(b, tracked);
        }
        Expr::Ternary(c, t, o) => {
            mark(c, tracked);
            mark(t, tracked);
            mark(o, tracked);
        }
        Expr::Math(_, items) | Expr::Tuple(items) => items.iter().for_each(|e| mark(e, tracked)),
        Expr::Nz(a, b) => {
            mark(a, tracked);
            if let Some(b) = b {
                mark(b, tracked);
            }
        }
        Expr::Indicator { inputs, params, .. } => {
            inputs.iter().chain(params).for_each(|e| mark(e, tracked));
        }
        Expr::Element { tuple, .. } => mark(tuple, tracked),
        Expr::Block(block) => mark_block(block, tracked),
        Expr::If { cond, then, otherwise } => {
            mark(cond, tracked);
            mark_block(then, tracked);
            if let Some(b) = otherwise {
                mark_block(b, tracked);
            }
        }
        Expr::Switch { subject, arms } => {
            if let Some(s) = subject {
                mark(s, tracked);
            }
            for arm in arms {
                if let Some(g) = &arm.guard {
                    mark(g, tracked);
                }
                mark_block(&arm.body, tracked);
            }
        }
        Expr::For { from, to, step, body, .. } => {
            mark(from, tracked);
            mark(to, tracked);
            if let Some(s) = step {
                mark(s, tracked);
            }
            mark_block(body, tracked);
        }
        Expr::While { cond, body } => {
            mark(cond, tracked);
            mark_block(body, tracked);
        }
        Expr::Const(_)
        | Expr::Param(_)
        | Expr::Source(_)
        | Expr::Price(_)
        | Expr::BarIndex
        | Expr::Time
        | Expr::Load(_) => {}
    }
}

/// Price field selected by each `input.source` parameter, by parameter index.
pub fn source_fields(params: &[Value]) -> Vec<Option<PriceField>> {
    params
        .iter()
        .map(|v| match v {
            Value::Str(s) => PriceField::from_name(s),
            _ => None,
        })
        .collect()
}

/// Precomputed outputs per site; empty for sites evaluated bar by bar.
pub type SiteColumns = [Vec<Vec<f64>>];

enum Interrupt {
    Break,
    Continue,
    Fault(RuntimeFault),
}

impl From<RuntimeFault> for Interrupt {
    fn from(fault: RuntimeFault) -> Self {
        Interrupt::Fault(fault)
    }
}

type Eval<T> = Result<T, Interrupt>;

/// Evaluates the program for the bar at `index` of `bars`.
pub struct Machine<'m> {
    pub program: &'m Program,
    pub bars: &'m [OhlcvBar],
    pub index: usize,
    pub params: &'m [Value],
    pub sources: &'m [Option<PriceField>],
    pub columns: Option<&'m SiteColumns>,
    pub history: &'m mut History,
    pub frame: &'m mut Frame,
    pub budget: usize,
}

impl Machine<'_> {
    /// Run the program body once. The frame holds the bar's final slot
    /// values afterwards, even on a fault.
    pub fn run(self) -> Result<BarSignals, RuntimeFault> {
        let program = self.program;
        let mut exec = Exec {
            m: self,
            steps: 0,
            signals: BarSignals::default(),
        };
        match exec.block(&program.body) {
            Ok(_) => Ok(exec.signals),
            Err(Interrupt::Fault(fault)) => Err(fault),
            Err(Interrupt::Break | Interrupt::Continue) => Err(exec.fault("break outside of a loop")),
        }
    }
}

struct Exec<'m> {
    m: Machine<'m>,
    steps: usize,
    signals: BarSignals,
}

impl Exec<'_> {
    fn fault(&self, reason: impl Into<String>) -> RuntimeFault {
        RuntimeFault::Evaluation {
            bar: self.m.index,
            reason: reason.into(),
        }
    }

    fn tick(&mut self) -> Eval<()> {
        self.steps += 1;
        if self.steps > self.m.budget {
            return Err(Interrupt::Fault(RuntimeFault::LoopBudgetExceeded {
                bar: self.m.index,
                limit: self.m.budget,
            }));
        }
        Ok(())
    }

    fn bar(&self) -> &OhlcvBar {
        &self.m.bars[self.m.index]
    }

    fn block(&mut self, block: &Block) -> Eval<Value> {
        let mut last = Value::Na;
        for stmt in &block.stmts {
            last = self.stmt(stmt)?;
        }
        Ok(last)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Eval<Value> {
        match stmt {
            Stmt::Eval(e) => self.eval(e),
            Stmt::Store { slot, value } => {
                let v = self.eval(value)?;
                self.m.frame.values[*slot] = v.clone();
                Ok(v)
            }
            Stmt::Init { slot, value } => {
                if !self.m.frame.initialized[*slot] {
                    let v = self.eval(value)?;
                    self.m.frame.values[*slot] = v;
                    self.m.frame.initialized[*slot] = true;
                }
                Ok(self.m.frame.values[*slot].clone())
            }
            Stmt::Destructure { slots, value } => {
                let v = self.eval(value)?;
                match v {
                    Value::Tuple(items) if items.len() == slots.len() => {
                        for (slot, item) in slots.iter().zip(items.iter()) {
                            self.m.frame.values[*slot] = item.clone();
                        }
                        Ok(Value::Na)
                    }
                    other => Err(self
                        .fault(format!("cannot destructure {} into {} names", other.type_name(), slots.len()))
                        .into()),
                }
            }
            Stmt::Order { order, when } => {
                let fire = match when {
                    Some(cond) => self.eval(cond)?.truthy(),
                    None => true,
                };
                if fire {
                    self.order(order);
                }
                Ok(Value::Na)
            }
            Stmt::Break => Err(Interrupt::Break),
            Stmt::Continue => Err(Interrupt::Continue),
        }
    }

    fn order(&mut self, order: &Order) {
        let exit = |signals: &mut BarSignals, direction: Direction| match direction {
            Direction::Long => signals.long_exit = true,
            Direction::Short => signals.short_exit = true,
        };
        match order {
            Order::Entry {
                direction: Direction::Long,
                ..
            } => self.signals.long_entry = true,
            Order::Entry {
                direction: Direction::Short,
                ..
            } => self.signals.short_entry = true,
            Order::Close { directions, .. } => {
                for d in directions {
                    exit(&mut self.signals, *d);
                }
            }
            Order::CloseAll => {
                exit(&mut self.signals, Direction::Long);
                exit(&mut self.signals, Direction::Short);
            }
        }
    }

    fn number(&mut self, expr: &Expr) -> Eval<f64> {
        let v = self.eval(expr)?;
        v.as_f64()
            .ok_or_else(|| self.fault(format!("expected a number, got {}", v.type_name())).into())
    }

    /// History offset in bars. Constant offsets are checked at compile
    /// time; a computed offset is floored and must not be negative.
    fn offset(&mut self, expr: &Expr) -> Eval<Option<usize>> {
        let n = self.number(expr)?;
        if n.is_nan() {
            return Ok(None);
        }
        if n < 0.0 {
            return Err(self.fault(format!("negative history offset {n}")).into());
        }
        Ok(Some(n.floor() as usize))
    }

    fn past(&self, slot: SlotId, n: Option<usize>) -> Value {
        match n {
            None => Value::Na,
            Some(0) => self.m.frame.values[slot].clone(),
            Some(n) => self.m.history.past(slot, n),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        Ok(match expr {
            Expr::Const(v) => v.clone(),
            Expr::Param(i) => self.m.params.get(*i).cloned().unwrap_or(Value::Na),
            Expr::Source(i) => match self.m.sources.get(*i).copied().flatten() {
                Some(field) => Value::num(self.bar().field(field)),
                None => return Err(self.fault(format!("input {i} is not a price source")).into()),
            },
            Expr::Price(field) => Value::num(self.bar().field(*field)),
            Expr::BarIndex => Value::num(self.m.index as f64),
            Expr::Time => Value::num(self.bar().timestamp.and_utc().timestamp_millis() as f64),
            Expr::Load(slot) => self.m.frame.values[*slot].clone(),
            Expr::History { slot, offset } => {
                let n = self.offset(offset)?;
                self.past(*slot, n)
            }
            Expr::HistoryOf { slot, value, offset } => {
                let v = self.eval(value)?;
                self.m.frame.values[*slot] = v;
                let n = self.offset(offset)?;
                self.past(*slot, n)
            }
            Expr::PriceHistory { field, offset } => match self.offset(offset)? {
                Some(n) if n <= self.m.index => Value::num(self.m.bars[self.m.index - n].field(*field)),
                _ => Value::Na,
            },
            Expr::Unary(op, operand) => match op {
                UnOp::Not => Value::Bool(!self.eval(operand)?.truthy()),
                UnOp::Neg => Value::num(-self.number(operand)?),
                UnOp::Plus => Value::num(self.number(operand)?),
            },
            Expr::Binary(BinOp::And, a, b) => Value::Bool(self.eval(a)?.truthy() && self.eval(b)?.truthy()),
            Expr::Binary(BinOp::Or, a, b) => Value::Bool(self.eval(a)?.truthy() || self.eval(b)?.truthy()),
            Expr::Binary(op, a, b) => {
                let (a, b) = (self.eval(a)?, self.eval(b)?);
                self.binary(*op, a, b)?
            }
            Expr::Ternary(cond, then, otherwise) => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)?
                } else {
                    self.eval(otherwise)?
                }
            }
            Expr::Math(f, args) => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.number(a)?);
                }
                Value::num(f.apply(&values))
            }
            Expr::IsNa(e) => Value::Bool(self.eval(e)?.is_na()),
            Expr::Nz(value, replacement) => {
                let v = self.eval(value)?;
                if !v.is_na() {
                    v
                } else if let Some(r) = replacement {
                    self.eval(r)?
                } else {
                    Value::num(0.0)
                }
            }
            Expr::Indicator { site, inputs, params } => self.indicator(*site, inputs, params)?,
            Expr::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Value::Tuple(Arc::from(values))
            }
            Expr::Element { tuple, index } => match self.eval(tuple)? {
                Value::Tuple(items) => match items.get(*index) {
                    Some(v) => v.clone(),
                    None => return Err(self.fault(format!("tuple has no element {index}")).into()),
                },
                other => return Err(self.fault(format!("expected a tuple, got {}", other.type_name())).into()),
            },
            Expr::Block(block) => self.block(block)?,
            Expr::If { cond, then, otherwise } => {
                if self.eval(cond)?.truthy() {
                    self.block(then)?
                } else if let Some(otherwise) = otherwise {
                    self.block(otherwise)?
                } else {
                    Value::Na
                }
            }
            Expr::Switch { subject, arms } => {
                let subject = match subject {
                    Some(s) => Some(self.eval(s)?),
                    None => None,
                };
                for arm in arms {
                    let matched = match (&arm.guard, &subject) {
                        (None, _) => true,
                        (Some(guard), Some(s)) => {
                            let g = self.eval(guard)?;
                            self.binary(BinOp::Eq, s.clone(), g)?.truthy()
                        }
                        (Some(guard), None) => self.eval(guard)?.truthy(),
                    };
                    if matched {
                        return self.block(&arm.body);
                    }
                }
                Value::Na
            }
            Expr::For { slot, from, to, step, body } => self.for_loop(*slot, from, to, step.as_deref(), body)?,
            Expr::While { cond, body } => {
                let mut last = Value::Na;
                loop {
                    self.tick()?;
                    if !self.eval(cond)?.truthy() {
                        break;
                    }
                    match self.block(body) {
                        Ok(v) => last = v,
                        Err(Interrupt::Break) => break,
                        Err(Interrupt::Continue) => {}
                        Err(fault) => return Err(fault),
                    }
                }
                last
            }
        })
    }

    fn for_loop(&mut self, slot: SlotId, from: &Expr, to: &Expr, step: Option<&Expr>, body: &Block) -> Eval<Value> {
        let from = self.number(from)?;
        let to = self.number(to)?;
        if from.is_nan() || to.is_nan() {
            return Ok(Value::Na);
        }
        let step = match step {
            Some(s) => self.number(s)?.abs(),
            None => 1.0,
        };
        if step == 0.0 || step.is_nan() {
            return Err(self.fault("for loop step must be non-zero").into());
        }
        let step = if to >= from { step } else { -step };

        let mut last = Value::Na;
        let mut i = from;
        while (step > 0.0 && i <= to) || (step < 0.0 && i >= to) {
            self.tick()?;
            self.m.frame.values[slot] = Value::num(i);
            match self.block(body) {
                Ok(v) => last = v,
                Err(Interrupt::Break) => break,
                Err(Interrupt::Continue) => {}
                Err(fault) => return Err(fault),
            }
            i += step;
        }
        Ok(last)
    }

    fn binary(&self, op: BinOp, a: Value, b: Value) -> Eval<Value> {
        if op.is_comparison() {
            return self.compare(op, &a, &b);
        }
        if let (BinOp::Add, Value::Str(x), Value::Str(y)) = (op, &a, &b) {
            return Ok(Value::text(&format!("{x}{y}")));
        }
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::num(ir::arith(op, x, y))),
            _ => Err(self
                .fault(format!("cannot apply {op:?} to {} and {}", a.type_name(), b.type_name()))
                .into()),
        }
    }

    fn compare(&self, op: BinOp, a: &Value, b: &Value) -> Eval<Value> {
        if a.is_na() || b.is_na() {
            return Ok(Value::Bool(false));
        }
        let ordering = match (a, b) {
            (Value::Num(x), Value::Num(y)) => x.partial_cmp(y),
            (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
            (Value::Bool(x), Value::Bool(y)) if matches!(op, BinOp::Eq | BinOp::NotEq) => Some(x.cmp(y)),
            _ => None,
        };
        let Some(ordering) = ordering else {
            return Err(self
                .fault(format!("cannot compare {} with {}", a.type_name(), b.type_name()))
                .into());
        };
        Ok(Value::Bool(match op {
            BinOp::Eq => ordering.is_eq(),
            BinOp::NotEq => ordering.is_ne(),
            BinOp::Lt => ordering.is_lt(),
            BinOp::Le => ordering.is_le(),
            BinOp::Gt => ordering.is_gt(),
            _ => ordering.is_ge(),
        }))
    }

    fn indicator(&mut self, site: SiteId, inputs: &[Expr], params: &[Expr]) -> Eval<Value> {
        let kind = self.m.program.sites[site].kind;
        if let Some(outputs) = self.m.columns.and_then(|c| c.get(site)).filter(|o| !o.is_empty()) {
            let index = self.m.index;
            return Ok(site_value(kind, outputs.iter().map(|o| o[index]).collect()));
        }

        let mut values = Vec::with_capacity(inputs.len());
        for e in inputs {
            values.push(self.number(e)?);
        }
        let mut lengths = Vec::with_capacity(params.len());
        for e in params {
            let v = self.eval(e)?;
            let param = v
                .as_param()
                .ok_or_else(|| self.fault(format!("expected a number or bool, got {}", v.type_name())))?;
            lengths.push(param);
        }

        let buffer = &mut self.m.history.sites[site];
        for (column, v) in buffer.inputs.iter_mut().zip(values) {
            if buffer.pending {
                if let Some(last) = column.last_mut() {
                    *last = v;
                }
            } else {
                column.push(v);
            }
        }
        buffer.pending = true;
        let slices: Vec<&[f64]> = buffer.inputs.iter().map(Vec::as_slice).collect();
        Ok(site_value(kind, indicator::compute_last(kind, &slices, &lengths)))
    }
}

fn site_value(kind: indicator::IndicatorKind, outputs: Vec<f64>) -> Value {
    if kind.is_boolean() {
        return Value::Bool(outputs.first().is_some_and(|v| *v == 1.0));
    }
    match outputs.as_slice() {
        [single] => Value::num(*single),
        many => Value::Tuple(many.iter().map(|v| Value::num(*v)).collect()),
    }
}
