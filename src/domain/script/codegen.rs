//! Code generation: checked syntax tree to [`Program`].
//!
//! # Lowering rules
//!
//! - Every declaration gets a fresh slot; names resolve lexically.
//! - Compound assignment `x += e` lowers to `x := x + e`.
//! - User functions are inlined at each call site, so each call site owns
//!   its own history and indicator state. Recursion is rejected.
//! - Each indicator call gets a site id. A site that runs on every bar and
//!   whose inputs depend only on prices and parameters also gets a
//!   [`ColumnPlan`] so the batch path can compute it over the whole series.
//! - Input calls become entries of the parameter schema and read their
//!   resolved value at run time.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::ast::{self, Arg, DeclMode, ExprKind, FunctionDef, Literal, Script, ScriptKind, StmtKind, UnOp};
use super::builtins::{self, Builtin, BuiltinVar, InputKind, InputSource, Signature};
use super::ir::{self, Block, Column, ColumnPlan, Expr, Order, Program, Site, SlotId, SlotKind, Stmt, SwitchArm, Value};
use super::qualifier::{self, Annotations, Qualifier};
use crate::domain::error::CodegenError;
use crate::domain::indicator::{self, IndicatorKind};
use crate::domain::ohlcv::PriceField;
use crate::domain::strategy::{
    Direction, DirectionCapability, HeaderSettings, ParamKind, ParamSpec, ParamValue, ScriptType, SizingKind,
    StrategyMeta,
};

/// Everything codegen produces for one script.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub meta: StrategyMeta,
    pub params: Vec<ParamSpec>,
    pub program: Program,
}

const ENTRY_ARGS: &[&str] = &[
    "id",
    "direction",
    "qty",
    "limit",
    "stop",
    "oca_name",
    "oca_type",
    "comment",
    "when",
    "alert_message",
    "disable_alert",
];
const CLOSE_ARGS: &[&str] = &[
    "id",
    "when",
    "comment",
    "qty",
    "qty_percent",
    "alert_message",
    "immediately",
    "disable_alert",
];
const CLOSE_ALL_ARGS: &[&str] = &["when", "comment", "alert_message", "immediately", "disable_alert"];

fn error(position: usize, message: impl Into<String>) -> CodegenError {
    CodegenError {
        position,
        message: message.into(),
    }
}

struct Codegen<'a> {
    annotations: &'a Annotations,
    functions: HashMap<&'a str, &'a FunctionDef>,
    reassigned: HashSet<String>,
    entries: BTreeMap<String, BTreeSet<Direction>>,
    scopes: Vec<HashMap<String, SlotId>>,
    slots: Vec<SlotKind>,
    definitions: Vec<Option<Expr>>,
    sites: Vec<Site>,
    params: Vec<ParamSpec>,
    inline_stack: Vec<&'a str>,
    /// Nesting depth of code that does not run on every bar.
    conditional: usize,
    loop_depth: usize,
    long_entry: bool,
    short_entry: bool,
}

impl<'a> Codegen<'a> {
    fn new(script: &'a Script, annotations: &'a Annotations) -> Self {
        let mut entries = BTreeMap::new();
        scan_entries(&script.body, &mut entries);
        for def in &script.functions {
            scan_entries(&def.body, &mut entries);
        }
        Codegen {
            annotations,
            functions: script.functions.iter().map(|f| (f.name.as_str(), f)).collect(),
            reassigned: qualifier::reassigned_names(script),
            entries,
            scopes: vec![HashMap::new()],
            slots: Vec::new(),
            definitions: Vec::new(),
            sites: Vec::new(),
            params: Vec::new(),
            inline_stack: Vec::new(),
            conditional: 0,
            loop_depth: 0,
            long_entry: false,
            short_entry: false,
        }
    }

    fn new_slot(&mut self, kind: SlotKind) -> SlotId {
        self.slots.push(kind);
        self.definitions.push(None);
        self.slots.len() - 1
    }

    /// Record `value` as the slot's only definition when it runs every bar
    /// and the name is never reassigned.
    fn define(&mut self, slot: SlotId, name: &str, value: &Expr) {
        if self.conditional == 0 && !self.reassigned.contains(name) {
            self.definitions[slot] = Some(value.clone());
        }
    }

    fn declare(&mut self, name: &str, slot: SlotId, position: usize) -> Result<(), CodegenError> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| error(position, "no open scope"))?;
        if scope.contains_key(name) {
            return Err(error(position, format!("'{name}' is already declared in this scope")));
        }
        scope.insert(name.to_string(), slot);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Option<SlotId> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn conditionally<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, CodegenError>) -> Result<T, CodegenError> {
        self.conditional += 1;
        let result = f(self);
        self.conditional -= 1;
        result
    }

    fn lower_stmts(&mut self, stmts: &'a [ast::Stmt]) -> Result<Vec<Stmt>, CodegenError> {
        stmts.iter().map(|s| self.lower_stmt(s)).collect()
    }

    fn lower_block(&mut self, stmts: &'a [ast::Stmt]) -> Result<Block, CodegenError> {
        self.scopes.push(HashMap::new());
        let result = self.lower_stmts(stmts);
        self.scopes.pop();
        Ok(Block { stmts: result? })
    }

    fn lower_stmt(&mut self, stmt: &'a ast::Stmt) -> Result<Stmt, CodegenError> {
        match &stmt.kind {
            StmtKind::Declare { mode, name, value, .. } => {
                let lowered = match mode {
                    DeclMode::Plain => self.lower_named(value, Some(name))?,
                    // Initializers run once, not every bar.
                    _ => self.conditionally(|cg| cg.lower_named(value, Some(name)))?,
                };
                let slot = match mode {
                    DeclMode::Plain => {
                        let slot = self.new_slot(SlotKind::Plain);
                        self.define(slot, name, &lowered);
                        slot
                    }
                    DeclMode::Var => self.new_slot(SlotKind::Var),
                    DeclMode::Varip => self.new_slot(SlotKind::Varip),
                };
                self.declare(name, slot, stmt.position)?;
                Ok(match mode {
                    DeclMode::Plain => Stmt::Store { slot, value: lowered },
                    _ => Stmt::Init { slot, value: lowered },
                })
            }
            StmtKind::Assign { name, op, value } => {
                let slot = self
                    .resolve(name)
                    .ok_or_else(|| error(stmt.position, format!("assignment to undeclared variable '{name}'")))?;
                let mut lowered = self.lower_expr(value)?;
                if let Some(bin) = op.binary() {
                    lowered = Expr::Binary(bin, Box::new(Expr::Load(slot)), Box::new(lowered));
                }
                Ok(Stmt::Store { slot, value: lowered })
            }
            StmtKind::Destructure { names, value } => {
                let lowered = self.lower_expr(value)?;
                if let Some(width) = tuple_width(&lowered, &self.sites) {
                    if width != names.len() {
                        return Err(error(
                            stmt.position,
                            format!("cannot destructure {width} values into {} names", names.len()),
                        ));
                    }
                }
                let mut slots = Vec::with_capacity(names.len());
                for (index, name) in names.iter().enumerate() {
                    let slot = self.new_slot(SlotKind::Plain);
                    let element = Expr::Element {
                        tuple: Box::new(lowered.clone()),
                        index,
                    };
                    self.define(slot, name, &element);
                    self.declare(name, slot, stmt.position)?;
                    slots.push(slot);
                }
                Ok(Stmt::Destructure { slots, value: lowered })
            }
            StmtKind::Expr(expr) => match &expr.kind {
                ExprKind::Order { command, args } => self.lower_order(command, args, expr.position),
                _ => Ok(Stmt::Eval(self.lower_expr(expr)?)),
            },
            StmtKind::Break | StmtKind::Continue if self.loop_depth == 0 => {
                Err(error(stmt.position, "break and continue are only valid inside a loop"))
            }
            StmtKind::Break => Ok(Stmt::Break),
            StmtKind::Continue => Ok(Stmt::Continue),
            StmtKind::Import(path) => Err(error(stmt.position, format!("library import '{path}' is not supported"))),
        }
    }

    fn lower_expr(&mut self, expr: &'a ast::Expr) -> Result<Expr, CodegenError> {
        self.lower_named(expr, None)
    }

    /// Lower `expr`; `binding` names the variable it initializes, used to
    /// name input parameters.
    fn lower_named(&mut self, expr: &'a ast::Expr, binding: Option<&str>) -> Result<Expr, CodegenError> {
        let lowered = self.lower_kind(expr, binding)?;
        if self.annotations.qualifier(expr) == Qualifier::Const {
            if let Some(value) = fold(&lowered) {
                return Ok(Expr::Const(value));
            }
        }
        Ok(lowered)
    }

    fn lower_kind(&mut self, expr: &'a ast::Expr, binding: Option<&str>) -> Result<Expr, CodegenError> {
        let boxed = |e: Expr| Box::new(e);
        Ok(match &expr.kind {
            ExprKind::Literal(lit) => Expr::Const(literal(lit)),
            ExprKind::Ident(name) => self.lower_ident(name, expr.position)?,
            ExprKind::Call { callee, args } => self.lower_call(callee, args, expr.position, binding)?,
            ExprKind::Order { command, .. } => {
                return Err(error(expr.position, format!("'{command}' cannot be used as a value")));
            }
            ExprKind::Unary { op, operand } => Expr::Unary(*op, boxed(self.lower_expr(operand)?)),
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.lower_expr(lhs)?;
                let r = if matches!(op, ast::BinOp::And | ast::BinOp::Or) {
                    self.conditionally(|cg| cg.lower_expr(rhs))?
                } else {
                    self.lower_expr(rhs)?
                };
                Expr::Binary(*op, boxed(l), boxed(r))
            }
            ExprKind::Ternary { cond, then, otherwise } => {
                let c = self.lower_expr(cond)?;
                let (t, o) = self.conditionally(|cg| Ok((cg.lower_expr(then)?, cg.lower_expr(otherwise)?)))?;
                Expr::Ternary(boxed(c), boxed(t), boxed(o))
            }
            ExprKind::History { target, offset: offset_expr } => {
                let offset = boxed(self.lower_expr(offset_expr)?);
                if let Some(n) = self.static_number(&offset) {
                    if n < 0.0 || n.fract() != 0.0 {
                        return Err(error(
                            offset_expr.position,
                            format!("history offset must be a non-negative whole number, got {n}"),
                        ));
                    }
                }
                match &target.kind {
                    ExprKind::Ident(name) => match self.resolve(name) {
                        Some(slot) => Expr::History { slot, offset },
                        None => match PriceField::from_name(name) {
                            Some(field) => Expr::PriceHistory { field, offset },
                            None => self.history_of(target, offset)?,
                        },
                    },
                    _ => self.history_of(target, offset)?,
                }
            }
            ExprKind::Tuple(items) => Expr::Tuple(items.iter().map(|e| self.lower_expr(e)).collect::<Result<_, _>>()?),
            ExprKind::If { cond, then, otherwise } => {
                let c = self.lower_expr(cond)?;
                let (then, otherwise) = self.conditionally(|cg| {
                    let then = cg.lower_block(then)?;
                    let otherwise = match otherwise {
                        Some(stmts) => Some(cg.lower_block(stmts)?),
                        None => None,
                    };
                    Ok((then, otherwise))
                })?;
                Expr::If {
                    cond: boxed(c),
                    then,
                    otherwise,
                }
            }
            ExprKind::Switch { subject, arms } => {
                let subject = match subject {
                    Some(s) => Some(boxed(self.lower_expr(s)?)),
                    None => None,
                };
                let arms = self.conditionally(|cg| {
                    arms.iter()
                        .map(|arm| {
                            let guard = match &arm.guard {
                                Some(g) => Some(cg.lower_expr(g)?),
                                None => None,
                            };
                            Ok(SwitchArm {
                                guard,
                                body: cg.lower_block(&arm.body)?,
                            })
                        })
                        .collect::<Result<Vec<_>, CodegenError>>()
                })?;
                Expr::Switch { subject, arms }
            }
            ExprKind::For { var, from, to, step, body } => {
                let from = boxed(self.lower_expr(from)?);
                let to = boxed(self.lower_expr(to)?);
                let step = match step {
                    Some(s) => Some(boxed(self.lower_expr(s)?)),
                    None => None,
                };
                let slot = self.new_slot(SlotKind::Plain);
                let body = self.in_loop(|cg| {
                    cg.scopes.push(HashMap::from([(var.clone(), slot)]));
                    let body = cg.lower_block(body);
                    cg.scopes.pop();
                    body
                })?;
                Expr::For {
                    slot,
                    from,
                    to,
                    step,
                    body,
                }
            }
            ExprKind::While { cond, body } => {
                let (cond, body) = self.in_loop(|cg| Ok((cg.lower_expr(cond)?, cg.lower_block(body)?)))?;
                Expr::While {
                    cond: boxed(cond),
                    body,
                }
            }
        })
    }

    fn in_loop<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, CodegenError>) -> Result<T, CodegenError> {
        self.loop_depth += 1;
        let result = self.conditionally(f);
        self.loop_depth -= 1;
        result
    }

    fn history_of(&mut self, target: &'a ast::Expr, offset: Box<Expr>) -> Result<Expr, CodegenError> {
        let value = self.lower_expr(target)?;
        let slot = self.new_slot(SlotKind::Plain);
        if self.conditional == 0 {
            self.definitions[slot] = Some(value.clone());
        }
        Ok(Expr::HistoryOf {
            slot,
            value: Box::new(value),
            offset,
        })
    }

    fn lower_ident(&mut self, name: &str, position: usize) -> Result<Expr, CodegenError> {
        if let Some(slot) = self.resolve(name) {
            return Ok(Expr::Load(slot));
        }
        match builtins::variable(name) {
            Some((BuiltinVar::Price(field), _)) => Ok(Expr::Price(field)),
            Some((BuiltinVar::BarIndex, _)) => Ok(Expr::BarIndex),
            Some((BuiltinVar::Time, _)) => Ok(Expr::Time),
            Some((BuiltinVar::TrueRange, _)) => Ok(self.site(
                IndicatorKind::Tr,
                vec![
                    Expr::Price(PriceField::High),
                    Expr::Price(PriceField::Low),
                    Expr::Price(PriceField::Close),
                ],
                Vec::new(),
                position,
            )),
            Some((BuiltinVar::Direction(d), _)) => Ok(Expr::Const(Value::text(d.name()))),
            Some((BuiltinVar::Number(x), _)) => Ok(Expr::Const(Value::num(x))),
            Some((BuiltinVar::Text(s), _)) => Ok(Expr::Const(Value::text(&s))),
            None if self.functions.contains_key(name) => {
                Err(error(position, format!("function '{name}' used as a value")))
            }
            None => Err(error(position, format!("undeclared identifier '{name}'"))),
        }
    }

    fn site(&mut self, kind: IndicatorKind, inputs: Vec<Expr>, params: Vec<Expr>, position: usize) -> Expr {
        let columnar = if self.conditional == 0 { self.plan(&inputs, &params) } else { None };
        self.sites.push(Site {
            kind,
            position,
            columnar,
        });
        Expr::Indicator {
            site: self.sites.len() - 1,
            inputs,
            params,
        }
    }

    fn plan(&self, inputs: &[Expr], params: &[Expr]) -> Option<ColumnPlan> {
        let inputs = inputs.iter().map(|e| self.column(e)).collect::<Option<Vec<_>>>()?;
        let params = params
            .iter()
            .map(|e| match e {
                Expr::Const(Value::Bool(b)) => Some(Column::Const(if *b { 1.0 } else { 0.0 })),
                _ => self.column(e),
            })
            .collect::<Option<Vec<_>>>()?;
        params.iter().all(Column::is_static).then_some(ColumnPlan { inputs, params })
    }

    /// Whole-series form of `expr`, if it depends only on prices,
    /// parameters and other precomputed sites.
    fn column(&self, expr: &Expr) -> Option<Column> {
        let boxed = |c: Column| Box::new(c);
        Some(match expr {
            Expr::Const(Value::Num(x)) => Column::Const(*x),
            Expr::Const(Value::Na) => Column::Const(f64::NAN),
            Expr::Param(i) => match self.params.get(*i)?.kind {
                ParamKind::Int | ParamKind::Float => Column::Param(*i),
                _ => return None,
            },
            Expr::Source(i) => Column::Source(*i),
            Expr::Price(field) => Column::Price(*field),
            Expr::BarIndex => Column::BarIndex,
            Expr::Time => Column::Time,
            Expr::Load(slot) => self.column(self.definitions.get(*slot)?.as_ref()?)?,
            Expr::History { slot, offset } => {
                let series = self.column(self.definitions.get(*slot)?.as_ref()?)?;
                self.shift(series, offset)?
            }
            Expr::HistoryOf { value, offset, .. } => self.shift(self.column(value)?, offset)?,
            Expr::PriceHistory { field, offset } => self.shift(Column::Price(*field), offset)?,
            Expr::Unary(UnOp::Neg, e) => Column::Neg(boxed(self.column(e)?)),
            Expr::Unary(UnOp::Plus, e) => self.column(e)?,
            Expr::Binary(op, a, b) if op.is_arithmetic() => {
                Column::Arith(*op, boxed(self.column(a)?), boxed(self.column(b)?))
            }
            Expr::Math(f, args) => Column::Math(*f, args.iter().map(|a| self.column(a)).collect::<Option<_>>()?),
            Expr::Nz(a, b) => {
                let replacement = match b {
                    Some(b) => self.column(b)?,
                    None => Column::Const(0.0),
                };
                Column::Nz(boxed(self.column(a)?), boxed(replacement))
            }
            Expr::Indicator { site, .. } => {
                let s = self.sites.get(*site)?;
                if s.columnar.is_none() || s.kind.output_count() != 1 || s.kind.is_boolean() {
                    return None;
                }
                Column::Site { site: *site, output: 0 }
            }
            Expr::Element { tuple, index } => match tuple.as_ref() {
                Expr::Indicator { site, .. } if self.sites.get(*site)?.columnar.is_some() => Column::Site {
                    site: *site,
                    output: *index,
                },
                _ => return None,
            },
            _ => return None,
        })
    }

    /// Value of `expr` known at compile time: a folded constant, or the
    /// default of an input it is bound to.
    fn static_number(&self, expr: &Expr) -> Option<f64> {
        match expr {
            Expr::Const(v) => v.as_f64().filter(|x| !x.is_nan()),
            Expr::Param(i) => self.params.get(*i)?.default.number(),
            Expr::Load(slot) => self.static_number(self.definitions.get(*slot)?.as_ref()?),
            _ => None,
        }
    }

    fn check_length(&self, callee: &str, length: &Expr, position: usize) -> Result<(), CodegenError> {
        match self.static_number(length) {
            Some(n) if indicator::period(n).is_none() => Err(error(
                position,
                format!("{callee} length must be a positive whole number, got {n}"),
            )),
            _ => Ok(()),
        }
    }

    fn shift(&self, series: Column, offset: &Expr) -> Option<Column> {
        let offset = self.column(offset)?;
        offset.is_static().then(|| Column::Shift(Box::new(series), Box::new(offset)))
    }

    fn lower_call(
        &mut self,
        callee: &'a str,
        args: &'a [Arg],
        position: usize,
        binding: Option<&str>,
    ) -> Result<Expr, CodegenError> {
        if let Some(def) = self.functions.get(callee).copied() {
            return self.inline(def, args, position);
        }
        let Some(sig) = builtins::lookup(callee) else {
            let message = if callee.starts_with("strategy.") {
                format!("'{callee}' is not supported here; order commands must be statements")
            } else if callee.starts_with("request.") {
                format!("'{callee}': external data requests are not supported")
            } else {
                format!("unknown function '{callee}'")
            };
            return Err(error(position, message));
        };
        if sig.builtin == Builtin::NoOp {
            return Ok(Expr::Const(Value::Na));
        }
        let names: Vec<Option<&str>> = args.iter().map(|a| a.name.as_deref()).collect();
        let slots = sig.bind(&names).map_err(|i| {
            let at = args.get(i).map_or(position, |a| a.position);
            error(at, format!("unexpected argument to {callee}"))
        })?;
        for (slot, param) in sig.params.iter().enumerate() {
            if param.required && slots.get(slot).copied().flatten().is_none() {
                return Err(error(position, format!("missing argument '{}' for {callee}", param.name)));
            }
        }
        let required = |slot: usize| {
            bound(&slots, args, slot).ok_or_else(|| error(position, format!("missing argument for {callee}")))
        };

        match sig.builtin {
            Builtin::Indicator(ind) => {
                let mut inputs = Vec::with_capacity(ind.inputs.len());
                for source in ind.inputs {
                    inputs.push(match source {
                        InputSource::Arg(i) => self.lower_expr(required(*i)?)?,
                        InputSource::Field(field) => Expr::Price(*field),
                    });
                }
                let mut params = Vec::with_capacity(ind.params.len());
                for (index, p) in ind.params.iter().enumerate() {
                    params.push(match bound(&slots, args, p.arg) {
                        Some(e) => {
                            let lowered = self.lower_expr(e)?;
                            if index < ind.kind.length_params() {
                                self.check_length(callee, &lowered, e.position)?;
                            }
                            lowered
                        }
                        None => Expr::Const(Value::num(p.default.unwrap_or(f64::NAN))),
                    });
                }
                Ok(self.site(ind.kind, inputs, params, position))
            }
            Builtin::Math(f) => {
                let operands = slots
                    .iter()
                    .flatten()
                    .map(|&i| self.lower_expr(&args[i].value))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::Math(f, operands))
            }
            Builtin::IsNa => Ok(Expr::IsNa(Box::new(self.lower_expr(required(0)?)?))),
            Builtin::Nz => {
                let value = self.lower_expr(required(0)?)?;
                let replacement = match bound(&slots, args, 1) {
                    Some(e) => Some(Box::new(self.lower_expr(e)?)),
                    None => None,
                };
                Ok(Expr::Nz(Box::new(value), replacement))
            }
            Builtin::Input(kind) => self.lower_input(kind, sig, &slots, args, position, binding),
            Builtin::NoOp => Ok(Expr::Const(Value::Na)),
        }
    }

    fn lower_input(
        &mut self,
        kind: InputKind,
        sig: &Signature,
        slots: &[Option<usize>],
        args: &[Arg],
        position: usize,
        binding: Option<&str>,
    ) -> Result<Expr, CodegenError> {
        let defval = bound(slots, args, 0).ok_or_else(|| error(position, "input needs a default value"))?;
        let price_default = match &defval.kind {
            ExprKind::Ident(name) => PriceField::from_name(name),
            _ => None,
        };
        let (kind, default) = match (kind, price_default) {
            (InputKind::Source | InputKind::Auto, Some(field)) => (ParamKind::Source, ParamValue::Str(field.name().to_string())),
            (InputKind::Source, None) => {
                return Err(error(defval.position, "input.source default must be a price series"));
            }
            (kind, _) => {
                let value = literal_param(defval)
                    .ok_or_else(|| error(defval.position, "input default must be a literal"))?;
                typed_default(kind, value).ok_or_else(|| error(defval.position, "input default does not match the input type"))?
            }
        };

        let named = |name: &str| {
            sig.params
                .iter()
                .position(|p| p.name == name)
                .and_then(|slot| bound(slots, args, slot))
        };
        let title = match named("title") {
            Some(e) => match literal_param(e) {
                Some(ParamValue::Str(s)) => Some(s),
                _ => return Err(error(e.position, "input title must be a string literal")),
            },
            None => None,
        };
        let number = |name: &str| -> Result<Option<f64>, CodegenError> {
            match named(name) {
                Some(e) => match literal_param(e) {
                    Some(ParamValue::Int(v)) => Ok(Some(v as f64)),
                    Some(ParamValue::Float(v)) => Ok(Some(v)),
                    _ => Err(error(e.position, format!("input {name} must be a numeric literal"))),
                },
                None => Ok(None),
            }
        };
        let min = number("minval")?;
        let max = number("maxval")?;
        let step = number("step")?;
        let options = match named("options") {
            Some(e) => match &e.kind {
                ExprKind::Tuple(items) => items
                    .iter()
                    .map(|item| {
                        literal_param(item)
                            .and_then(|v| typed_default(input_kind(kind), v).map(|(_, v)| v))
                            .ok_or_else(|| error(item.position, "input options must be literals of the input type"))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                _ => return Err(error(e.position, "input options must be a list")),
            },
            None => Vec::new(),
        };

        let index = self.params.len();
        let name = binding
            .map(str::to_string)
            .or_else(|| title.clone())
            .unwrap_or_else(|| format!("input{index}"));
        self.params.push(ParamSpec {
            name,
            title,
            kind,
            default,
            min,
            max,
            step,
            options,
        });
        Ok(match kind {
            ParamKind::Source => Expr::Source(index),
            _ => Expr::Param(index),
        })
    }

    fn inline(&mut self, def: &'a FunctionDef, args: &'a [Arg], position: usize) -> Result<Expr, CodegenError> {
        if self.inline_stack.contains(&def.name.as_str()) {
            return Err(error(position, format!("recursive call to '{}'", def.name)));
        }
        if args.len() > def.params.len() {
            return Err(error(
                position,
                format!("'{}' takes {} arguments, got {}", def.name, def.params.len(), args.len()),
            ));
        }
        for arg in args {
            if let Some(name) = &arg.name {
                if !def.params.iter().any(|p| &p.name == name) {
                    return Err(error(arg.position, format!("'{}' has no parameter '{name}'", def.name)));
                }
            }
        }

        let mut stmts = Vec::with_capacity(def.params.len() + def.body.len());
        let mut frame = HashMap::new();
        for (i, param) in def.params.iter().enumerate() {
            let arg = args
                .iter()
                .find(|a| a.name.as_deref() == Some(param.name.as_str()))
                .or_else(|| args.get(i).filter(|a| a.name.is_none()))
                .ok_or_else(|| error(position, format!("missing argument '{}' for '{}'", param.name, def.name)))?;
            let value = self.lower_expr(&arg.value)?;
            let slot = self.new_slot(SlotKind::Plain);
            self.define(slot, &param.name, &value);
            frame.insert(param.name.clone(), slot);
            stmts.push(Stmt::Store { slot, value });
        }

        // The body sees globals and its own parameters, never the caller's locals.
        let globals = self.scopes.first().cloned().unwrap_or_default();
        let saved_scopes = std::mem::replace(&mut self.scopes, vec![globals, frame]);
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.inline_stack.push(def.name.as_str());
        let body = self.lower_stmts(&def.body);
        self.inline_stack.pop();
        self.loop_depth = saved_loops;
        self.scopes = saved_scopes;

        stmts.extend(body?);
        Ok(Expr::Block(Block { stmts }))
    }

    fn lower_order(&mut self, command: &str, args: &'a [Arg], position: usize) -> Result<Stmt, CodegenError> {
        let (names, order) = match command {
            "strategy.entry" => (ENTRY_ARGS, None),
            "strategy.close" => (CLOSE_ARGS, None),
            "strategy.close_all" => (CLOSE_ALL_ARGS, Some(Order::CloseAll)),
            other => return Err(error(position, format!("order command '{other}' is not supported"))),
        };
        let bound = bind_named(command, args, names, position)?;
        let get = |name: &str| names.iter().position(|n| *n == name).and_then(|i| bound[i]);

        let order = match order {
            Some(order) => order,
            None => {
                let id = get("id").ok_or_else(|| error(position, format!("{command} needs an id")))?;
                let id = order_id(id)?;
                if command == "strategy.entry" {
                    if let Some(e) = get("limit").or(get("stop")) {
                        return Err(error(e.position, "limit and stop orders are not supported"));
                    }
                    let direction = get("direction")
                        .and_then(direction_of)
                        .ok_or_else(|| error(position, "entry direction must be strategy.long or strategy.short"))?;
                    match direction {
                        Direction::Long => self.long_entry = true,
                        Direction::Short => self.short_entry = true,
                    }
                    Order::Entry {
                        id: Arc::from(id.as_str()),
                        direction,
                    }
                } else {
                    let directions = self
                        .entries
                        .get(&id)
                        .ok_or_else(|| error(position, format!("strategy.close references unknown entry id '{id}'")))?;
                    Order::Close {
                        id: Arc::from(id.as_str()),
                        directions: directions.iter().copied().collect(),
                    }
                }
            }
        };
        let when = match get("when") {
            Some(e) => Some(self.lower_expr(e)?),
            None => None,
        };
        Ok(Stmt::Order { order, when })
    }
}

fn bound<'b>(slots: &[Option<usize>], args: &'b [Arg], slot: usize) -> Option<&'b ast::Expr> {
    slots.get(slot).copied().flatten().and_then(|i| args.get(i)).map(|a| &a.value)
}

fn bind_named<'b>(
    command: &str,
    args: &'b [Arg],
    names: &[&str],
    position: usize,
) -> Result<Vec<Option<&'b ast::Expr>>, CodegenError> {
    let mut bound = vec![None; names.len()];
    for (i, arg) in args.iter().enumerate() {
        let slot = match &arg.name {
            Some(name) => names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| error(arg.position, format!("{command} has no argument '{name}'")))?,
            None if i < names.len() => i,
            None => return Err(error(position, format!("too many arguments to {command}"))),
        };
        bound[slot] = Some(&arg.value);
    }
    Ok(bound)
}

fn order_id(expr: &ast::Expr) -> Result<String, CodegenError> {
    match &expr.kind {
        ExprKind::Literal(Literal::Str(s)) => Ok(s.clone()),
        _ => Err(error(expr.position, "order id must be a string literal")),
    }
}

fn direction_of(expr: &ast::Expr) -> Option<Direction> {
    match &expr.kind {
        ExprKind::Ident(name) => match builtins::variable(name) {
            Some((BuiltinVar::Direction(d), _)) => Some(d),
            _ => None,
        },
        _ => None,
    }
}

/// Collect every `strategy.entry` id and the directions it can open.
fn scan_entries(stmts: &[ast::Stmt], out: &mut BTreeMap<String, BTreeSet<Direction>>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Declare { value: e, .. } | StmtKind::Assign { value: e, .. } => {
                scan_entries_expr(e, out)
            }
            _ => {}
        }
    }
}

fn scan_entries_expr(expr: &ast::Expr, out: &mut BTreeMap<String, BTreeSet<Direction>>) {
    match &expr.kind {
        ExprKind::Order { command, args } if command == "strategy.entry" => {
            let id = args
                .iter()
                .find(|a| a.name.as_deref() == Some("id"))
                .or_else(|| args.first().filter(|a| a.name.is_none()));
            let direction = args
                .iter()
                .find(|a| a.name.as_deref() == Some("direction"))
                .or_else(|| args.get(1).filter(|a| a.name.is_none()));
            if let (Some(id), Some(direction)) = (id, direction) {
                if let (Ok(id), Some(d)) = (order_id(&id.value), direction_of(&direction.value)) {
                    out.entry(id).or_default().insert(d);
                }
            }
        }
        ExprKind::If { then, otherwise, .. } => {
            scan_entries(then, out);
            if let Some(stmts) = otherwise {
                scan_entries(stmts, out);
            }
        }
        ExprKind::Switch { arms, .. } => {
            for arm in arms {
                scan_entries(&arm.body, out);
            }
        }
        ExprKind::For { body, .. } | ExprKind::While { body, .. } => scan_entries(body, out),
        _ => {}
    }
}

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Int(v) => Value::num(*v as f64),
        Literal::Float(v) => Value::num(*v),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Str(s) | Literal::Color(s) => Value::text(s),
        Literal::Na => Value::Na,
    }
}

/// A literal (optionally negated) as a parameter value.
fn literal_param(expr: &ast::Expr) -> Option<ParamValue> {
    match &expr.kind {
        ExprKind::Literal(Literal::Int(v)) => Some(ParamValue::Int(*v)),
        ExprKind::Literal(Literal::Float(v)) => Some(ParamValue::Float(*v)),
        ExprKind::Literal(Literal::Bool(b)) => Some(ParamValue::Bool(*b)),
        ExprKind::Literal(Literal::Str(s)) => Some(ParamValue::Str(s.clone())),
        ExprKind::Unary {
            op: UnOp::Neg,
            operand,
        } => match literal_param(operand)? {
            ParamValue::Int(v) => Some(ParamValue::Int(-v)),
            ParamValue::Float(v) => Some(ParamValue::Float(-v)),
            _ => None,
        },
        _ => None,
    }
}

fn input_kind(kind: ParamKind) -> InputKind {
    match kind {
        ParamKind::Int => InputKind::Int,
        ParamKind::Float => InputKind::Float,
        ParamKind::Bool => InputKind::Bool,
        ParamKind::String => InputKind::String,
        ParamKind::Source => InputKind::Source,
    }
}

fn typed_default(kind: InputKind, value: ParamValue) -> Option<(ParamKind, ParamValue)> {
    Some(match (kind, value) {
        (InputKind::Auto | InputKind::Int, ParamValue::Int(v)) => (ParamKind::Int, ParamValue::Int(v)),
        (InputKind::Int, ParamValue::Float(v)) if v.fract() == 0.0 => (ParamKind::Int, ParamValue::Int(v as i64)),
        (InputKind::Auto | InputKind::Float, ParamValue::Float(v)) => (ParamKind::Float, ParamValue::Float(v)),
        (InputKind::Float, ParamValue::Int(v)) => (ParamKind::Float, ParamValue::Float(v as f64)),
        (InputKind::Auto | InputKind::Bool, ParamValue::Bool(b)) => (ParamKind::Bool, ParamValue::Bool(b)),
        (InputKind::Auto | InputKind::String, ParamValue::Str(s)) => (ParamKind::String, ParamValue::Str(s)),
        (InputKind::Source, ParamValue::Str(s)) if PriceField::from_name(&s).is_some() => {
            (ParamKind::Source, ParamValue::Str(s))
        }
        _ => return None,
    })
}

/// Constant value of a header argument: a literal, a negated number or a
/// builtin constant such as `strategy.percent_of_equity`.
fn header_value(expr: &ast::Expr) -> Option<Value> {
    match &expr.kind {
        ExprKind::Literal(lit) => Some(literal(lit)),
        ExprKind::Unary {
            op: UnOp::Neg,
            operand,
        } => header_value(operand)?.as_f64().map(|x| Value::num(-x)),
        ExprKind::Ident(name) => match builtins::variable(name)? {
            (BuiltinVar::Number(x), _) => Some(Value::num(x)),
            (BuiltinVar::Text(s), _) => Some(Value::text(&s)),
            (BuiltinVar::Direction(d), _) => Some(Value::text(d.name())),
            _ => None,
        },
        _ => None,
    }
}

struct HeaderFields {
    title: Arc<str>,
    short_title: Option<Arc<str>>,
    overlay: bool,
    settings: HeaderSettings,
}

fn header_fields(header: &ast::Header) -> Result<HeaderFields, CodegenError> {
    let mut title = None;
    let mut short_title = None;
    let mut overlay = false;
    let mut settings = HeaderSettings::default();

    for (i, arg) in header.args.iter().enumerate() {
        let key = match &arg.name {
            Some(name) => name.as_str(),
            None if i == 0 => "title",
            None => return Err(error(arg.position, "only the title may be passed positionally")),
        };
        let value = header_value(&arg.value).ok_or_else(|| error(arg.position, format!("'{key}' must be a literal")))?;
        let text = || match &value {
            Value::Str(s) => Ok(s.to_string()),
            _ => Err(error(arg.position, format!("'{key}' must be a string"))),
        };
        let flag = || match &value {
            Value::Bool(b) => Ok(*b),
            _ => Err(error(arg.position, format!("'{key}' must be a bool"))),
        };
        let number = || match &value {
            Value::Num(x) => Ok(*x),
            _ => Err(error(arg.position, format!("'{key}' must be a number"))),
        };
        let count = || {
            let x = number()?;
            if x >= 0.0 && x.fract() == 0.0 {
                Ok(x as usize)
            } else {
                Err(error(arg.position, format!("'{key}' must be a non-negative integer")))
            }
        };
        match key {
            "title" => title = Some(Arc::from(text()?.as_str())),
            "shorttitle" => short_title = Some(Arc::from(text()?.as_str())),
            "overlay" => overlay = flag()?,
            "initial_capital" => settings.initial_capital = Some(number()?),
            "default_qty_type" => {
                let name = text()?;
                let kind = SizingKind::from_name(&name)
                    .ok_or_else(|| error(arg.position, format!("unknown order sizing '{name}'")))?;
                settings.default_qty_type = Some(kind);
            }
            "default_qty_value" => settings.default_qty_value = Some(number()?),
            "commission_type" => {
                let name = text()?;
                if name != "percent" {
                    return Err(error(arg.position, format!("commission type '{name}' is not supported")));
                }
            }
            "commission_value" => settings.commission_pct = Some(number()?),
            "slippage" => settings.slippage = Some(number()?),
            "pyramiding" => settings.pyramiding = Some(count()? as u32),
            "calc_on_every_tick" => settings.calc_on_every_tick = flag()?,
            "process_orders_on_close" => settings.process_orders_on_close = flag()?,
            "currency" => settings.currency = Some(text()?.trim_start_matches("currency.").to_string()),
            "max_bars_back" => settings.max_bars_back = Some(count()?),
            _ => {}
        }
    }

    let title = title.ok_or_else(|| error(header.position, "declaration needs a title"))?;
    Ok(HeaderFields {
        title,
        short_title,
        overlay,
        settings,
    })
}

/// Number of values a lowered expression produces, when statically known.
fn tuple_width(expr: &Expr, sites: &[Site]) -> Option<usize> {
    match expr {
        Expr::Tuple(items) => Some(items.len()),
        Expr::Indicator { site, .. } => sites.get(*site).map(|s| s.kind.output_count()),
        Expr::Block(block) => match block.stmts.last()? {
            Stmt::Eval(last) => tuple_width(last, sites),
            _ => None,
        },
        _ => None,
    }
}

/// Fold a constant expression built from literals.
fn fold(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Const(v) => Some(v.clone()),
        Expr::Unary(UnOp::Neg, e) => fold(e)?.as_f64().map(|x| Value::num(-x)),
        Expr::Unary(UnOp::Plus, e) => fold(e)?.as_f64().map(Value::num),
        Expr::Unary(UnOp::Not, e) => match fold(e)? {
            Value::Bool(b) => Some(Value::Bool(!b)),
            _ => None,
        },
        Expr::Binary(op, a, b) if op.is_arithmetic() => {
            let (a, b) = (fold(a)?.as_f64()?, fold(b)?.as_f64()?);
            Some(Value::num(ir::arith(*op, a, b)))
        }
        Expr::Math(f, args) => {
            let values = args.iter().map(|a| fold(a)?.as_f64()).collect::<Option<Vec<_>>>()?;
            Some(Value::num(f.apply(&values)))
        }
        _ => None,
    }
}

/// Lower a checked script.
pub fn generate(script: &Script, annotations: &Annotations) -> Result<Lowered, CodegenError> {
    let header = header_fields(&script.header)?;
    let mut cg = Codegen::new(script, annotations);
    let stmts = cg.lower_stmts(&script.body)?;

    let script_type = match script.header.kind {
        ScriptKind::Strategy => ScriptType::Strategy,
        ScriptKind::Indicator => ScriptType::Indicator,
    };
    let meta = StrategyMeta {
        title: header.title,
        short_title: header.short_title,
        script_type,
        overlay: header.overlay,
        directions: DirectionCapability::from_flags(cg.long_entry, cg.short_entry),
        settings: header.settings,
    };
    Ok(Lowered {
        meta,
        params: cg.params,
        program: Program {
            body: Block { stmts },
            slots: cg.slots,
            sites: cg.sites,
            definitions: cg.definitions,
        },
    })
}

/// Bars of history the program needs before every indicator it reads has
/// a valid value, at the given parameter values.
pub fn warmup(program: &Program, params: &[Value]) -> usize {
    let analysis = Warmup { program, params };
    analysis.block(&program.body)
}

struct Warmup<'p> {
    program: &'p Program,
    params: &'p [Value],
}

impl Warmup<'_> {
    fn block(&self, block: &Block) -> usize {
        block.stmts.iter().map(|s| self.stmt(s)).max().unwrap_or(0)
    }

    fn stmt(&self, stmt: &Stmt) -> usize {
        match stmt {
            Stmt::Eval(e) | Stmt::Store { value: e, .. } | Stmt::Init { value: e, .. } => self.expr(e),
            Stmt::Destructure { value, .. } => self.expr(value),
            Stmt::Order { when, .. } => when.as_ref().map_or(0, |e| self.expr(e)),
            Stmt::Break | Stmt::Continue => 0,
        }
    }

    fn definition(&self, slot: SlotId) -> usize {
        self.program
            .definitions
            .get(slot)
            .and_then(Option::as_ref)
            .map_or(0, |d| self.expr(d))
    }

    fn offset(&self, offset: &Expr) -> usize {
        self.constant(offset)
            .filter(|x| x.is_finite() && *x >= 0.0)
            .map_or(0, |x| x as usize)
    }

    /// Numeric value of an expression that does not vary by bar.
    fn constant(&self, expr: &Expr) -> Option<f64> {
        match expr {
            Expr::Const(v) => v.as_param(),
            Expr::Param(i) => self.params.get(*i)?.as_param(),
            Expr::Load(slot) => self.constant(self.program.definitions.get(*slot)?.as_ref()?),
            Expr::Unary(UnOp::Neg, e) => Some(-self.constant(e)?),
            Expr::Unary(UnOp::Plus, e) => self.constant(e),
            Expr::Binary(op, a, b) if op.is_arithmetic() => Some(ir::arith(*op, self.constant(a)?, self.constant(b)?)),
            Expr::Math(f, args) => {
                let values = args.iter().map(|a| self.constant(a)).collect::<Option<Vec<_>>>()?;
                Some(f.apply(&values))
            }
            Expr::Nz(a, b) => {
                let v = self.constant(a)?;
                if v.is_nan() {
                    b.as_ref().map_or(Some(0.0), |b| self.constant(b))
                } else {
                    Some(v)
                }
            }
            _ => None,
        }
    }

    fn exprs<'e>(&self, exprs: impl IntoIterator<Item = &'e Expr>) -> usize {
        exprs.into_iter().map(|e| self.expr(e)).max().unwrap_or(0)
    }

    fn expr(&self, expr: &Expr) -> usize {
        match expr {
            Expr::Const(_) | Expr::Param(_) | Expr::Source(_) | Expr::Price(_) | Expr::BarIndex | Expr::Time => 0,
            Expr::Load(slot) => self.definition(*slot),
            Expr::History { slot, offset } => self.offset(offset) + self.definition(*slot),
            Expr::HistoryOf { value, offset, .. } => self.offset(offset) + self.expr(value),
            Expr::PriceHistory { offset, .. } => self.offset(offset),
            Expr::Unary(_, e) | Expr::IsNa(e) => self.expr(e),
            Expr::Binary(_, a, b) => self.expr(a).max(self.expr(b)),
            Expr::Ternary(c, t, o) => self.exprs([c.as_ref(), t.as_ref(), o.as_ref()]),
            Expr::Math(_, args) | Expr::Tuple(args) => self.exprs(args),
            Expr::Nz(a, b) => self.expr(a).max(b.as_ref().map_or(0, |b| self.expr(b))),
            Expr::Indicator { site, inputs, params } => {
                let values: Vec<f64> = params.iter().map(|p| self.constant(p).unwrap_or(f64::NAN)).collect();
                let own = self.program.sites.get(*site).map_or(0, |s| s.kind.lookback(&values));
                own + self.exprs(inputs)
            }
            Expr::Element { tuple, .. } => self.expr(tuple),
            Expr::Block(block) => self.block(block),
            Expr::If { cond, then, otherwise } => self
                .expr(cond)
                .max(self.block(then))
                .max(otherwise.as_ref().map_or(0, |b| self.block(b))),
            Expr::Switch { subject, arms } => {
                let subject = subject.as_ref().map_or(0, |s| self.expr(s));
                arms.iter()
                    .map(|arm| arm.guard.as_ref().map_or(0, |g| self.expr(g)).max(self.block(&arm.body)))
                    .max()
                    .unwrap_or(0)
                    .max(subject)
            }
            Expr::For { from, to, step, body, .. } => {
                let bounds = self.expr(from).max(self.expr(to));
                bounds.max(step.as_ref().map_or(0, |s| self.expr(s))).max(self.block(body))
            }
            Expr::While { cond, body } => self.expr(cond).max(self.block(body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::script::{lexer, parser, qualifier, DEFAULT_LOOP_BUDGET};

    fn lower(src: &str) -> Result<Lowered, CodegenError> {
        let script = parser::parse(lexer::tokenize(src).unwrap()).unwrap();
        let annotations = qualifier::check(&script, DEFAULT_LOOP_BUDGET).unwrap();
        generate(&script, &annotations)
    }

    fn defaults(lowered: &Lowered) -> Vec<Value> {
        lowered
            .params
            .iter()
            .map(|p| match &p.default {
                ParamValue::Int(v) => Value::num(*v as f64),
                ParamValue::Float(v) => Value::num(*v),
                ParamValue::Bool(b) => Value::Bool(*b),
                ParamValue::Str(s) => Value::text(s),
            })
            .collect()
    }

    #[test]
    fn constant_history_offsets_are_checked() {
        let fractional = lower("strategy(\"t\")\nx = close[1.5]\n").unwrap_err();
        assert!(fractional.message.contains("non-negative whole number"), "{}", fractional.message);
        assert_eq!(fractional.position, "strategy(\"t\")\nx = close[".len());

        let negative = lower("strategy(\"t\")\nback = -1\nx = close[back]\n").unwrap_err();
        assert!(negative.message.contains("got -1"));

        let from_input = lower("strategy(\"t\")\nn = input.int(-2)\nx = high[n]\n").unwrap_err();
        assert!(from_input.message.contains("got -2"));

        assert!(lower("strategy(\"t\")\nx = close[0] + close[2]\ny = close[bar_index % 3]\n").is_ok());
    }

    #[test]
    fn constant_indicator_lengths_are_checked() {
        for src in [
            "strategy(\"t\")\nx = ta.sma(close, 0)\n",
            "strategy(\"t\")\nx = ta.ema(close, -5)\n",
            "strategy(\"t\")\nx = ta.rsi(close, 2.5)\n",
            "strategy(\"t\")\nlen = input.int(-3)\nx = ta.sma(close, len)\n",
            "strategy(\"t\")\n[a, b, c] = ta.macd(close, 12, 0, 9)\n",
        ] {
            let err = lower(src).unwrap_err();
            assert!(err.message.contains("positive whole number"), "{src}: {}", err.message);
        }
        // Multipliers and flags are not lengths.
        assert!(lower("strategy(\"t\")\n[m, u, l] = ta.bb(close, 20, 0.5)\n").is_ok());
        assert!(lower("strategy(\"t\")\n[m, u, l] = ta.kc(close, 20, 1.5, false)\n").is_ok());
        assert!(lower("strategy(\"t\")\nx = ta.sma(close, 14.0)\n").is_ok());
    }

    const CROSSOVER: &str = "strategy(\"MA Cross\", overlay=true, initial_capital=5000)
fastLen = input.int(12, title=\"Fast\", minval=1)
slowLen = input.int(26, title=\"Slow\")
fast = ta.sma(close, fastLen)
slow = ta.sma(close, slowLen)
if ta.crossover(fast, slow)
    strategy.entry(\"L\", strategy.long)
if ta.crossunder(fast, slow)
    strategy.close(\"L\")
";

    #[test]
    fn header_and_params_are_extracted() {
        let lowered = lower(CROSSOVER).unwrap();
        assert_eq!(&*lowered.meta.title, "MA Cross");
        assert!(lowered.meta.overlay);
        assert_eq!(lowered.meta.settings.initial_capital, Some(5000.0));
        assert_eq!(lowered.meta.directions, DirectionCapability::LongOnly);
        assert_eq!(lowered.params.len(), 2);
        assert_eq!(lowered.params[0].name, "fastLen");
        assert_eq!(lowered.params[0].title.as_deref(), Some("Fast"));
        assert_eq!(lowered.params[0].kind, ParamKind::Int);
        assert_eq!(lowered.params[0].default, ParamValue::Int(12));
        assert_eq!(lowered.params[0].min, Some(1.0));
    }

    #[test]
    fn unconditional_sites_get_column_plans() {
        let lowered = lower(CROSSOVER).unwrap();
        let sites = &lowered.program.sites;
        assert_eq!(sites.len(), 4);
        assert!(sites[0].columnar.is_some());
        assert!(sites[1].columnar.is_some());
        assert_eq!(sites[2].kind, IndicatorKind::Crossover);
        assert!(sites[2].columnar.is_some());
    }

    #[test]
    fn conditional_sites_are_not_columnar() {
        let src = "strategy(\"t\")
x = close > open ? ta.sma(close, 5) : 0.0
";
        let lowered = lower(src).unwrap();
        assert_eq!(lowered.program.sites.len(), 1);
        assert!(lowered.program.sites[0].columnar.is_none());
    }

    #[test]
    fn warmup_follows_longest_lookback() {
        let lowered = lower(CROSSOVER).unwrap();
        assert_eq!(warmup(&lowered.program, &defaults(&lowered)), 26);
        let longer = vec![Value::num(12.0), Value::num(40.0)];
        assert_eq!(warmup(&lowered.program, &longer), 40);
    }

    #[test]
    fn warmup_adds_history_offsets() {
        let src = "strategy(\"t\")
s = ta.sma(close, 10)
d = s - s[5]
";
        let lowered = lower(src).unwrap();
        assert_eq!(warmup(&lowered.program, &[]), 14);
    }

    #[test]
    fn compound_assignment_reads_then_writes() {
        let src = "strategy(\"t\")
var n = 0
n += 1
";
        let lowered = lower(src).unwrap();
        let stmts = &lowered.program.body.stmts;
        assert!(matches!(stmts[0], Stmt::Init { slot: 0, .. }));
        match &stmts[1] {
            Stmt::Store { slot: 0, value: Expr::Binary(ast::BinOp::Add, lhs, _) } => {
                assert_eq!(**lhs, Expr::Load(0));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(lowered.program.slots[0], SlotKind::Var);
    }

    #[test]
    fn constant_arithmetic_is_folded() {
        let lowered = lower("strategy(\"t\")\nx = 2 * 3 + 1\n").unwrap();
        assert!(matches!(
            &lowered.program.body.stmts[0],
            Stmt::Store { value: Expr::Const(Value::Num(v)), .. } if *v == 7.0
        ));
    }

    #[test]
    fn each_call_site_owns_its_state() {
        let src = "strategy(\"t\")
smooth(src) => ta.ema(src, 10)
a = smooth(close)
b = smooth(open)
";
        let lowered = lower(src).unwrap();
        assert_eq!(lowered.program.sites.len(), 2);
    }

    #[test]
    fn recursion_is_rejected() {
        let src = "strategy(\"t\")
f(x) => f(x - 1)
y = f(3)
";
        let err = lower(src).unwrap_err();
        assert!(err.message.contains("recursive"));
    }

    #[test]
    fn close_requires_a_known_entry() {
        let src = "strategy(\"t\")
strategy.close(\"nope\")
";
        let err = lower(src).unwrap_err();
        assert!(err.message.contains("unknown entry id 'nope'"));
    }

    #[test]
    fn close_carries_entry_directions() {
        let src = "strategy(\"t\")
if close > open
    strategy.entry(\"E\", strategy.short)
strategy.close(\"E\")
";
        let lowered = lower(src).unwrap();
        assert_eq!(lowered.meta.directions, DirectionCapability::ShortOnly);
        match &lowered.program.body.stmts[1] {
            Stmt::Order {
                order: Order::Close { directions, .. },
                ..
            } => assert_eq!(directions, &vec![Direction::Short]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unsupported_orders_are_codegen_errors() {
        let src = "strategy(\"t\")\nstrategy.exit(\"x\", \"L\", stop=1.0)\n";
        assert!(lower(src).unwrap_err().message.contains("strategy.exit"));
        let src = "strategy(\"t\")\nstrategy.entry(\"L\", strategy.long, limit=10.0)\n";
        assert!(lower(src).unwrap_err().message.contains("limit and stop"));
    }

    #[test]
    fn request_calls_are_rejected() {
        let src = "strategy(\"t\")\nx = request.security(\"AAPL\", \"D\", close)\n";
        assert!(lower(src).unwrap_err().message.contains("external data"));
    }

    #[test]
    fn plots_lower_to_na() {
        let lowered = lower("indicator(\"t\")\nplot(close, color=color.red)\n").unwrap();
        assert_eq!(lowered.program.body.stmts[0], Stmt::Eval(Expr::Const(Value::Na)));
        assert_eq!(lowered.meta.script_type, ScriptType::Indicator);
        assert_eq!(lowered.meta.directions, DirectionCapability::None);
    }

    #[test]
    fn source_inputs_become_source_reads() {
        let lowered = lower("strategy(\"t\")\nsrc = input.source(hl2, \"Source\")\nx = ta.sma(src, 3)\n").unwrap();
        assert_eq!(lowered.params[0].kind, ParamKind::Source);
        assert_eq!(lowered.params[0].default, ParamValue::Str("hl2".into()));
        assert!(matches!(
            lowered.program.body.stmts[0],
            Stmt::Store { value: Expr::Source(0), .. }
        ));
        assert!(lowered.program.sites[0].columnar.is_some());
    }

    #[test]
    fn header_settings() {
        let src = "strategy(\"t\", default_qty_type=strategy.percent_of_equity, default_qty_value=50, commission_value=0.1, pyramiding=2)\n";
        let settings = lower(src).unwrap().meta.settings;
        assert_eq!(settings.default_qty_type, Some(SizingKind::PercentOfEquity));
        assert_eq!(settings.default_qty_value, Some(50.0));
        assert_eq!(settings.commission_pct, Some(0.1));
        assert_eq!(settings.pyramiding, Some(2));
    }

    #[test]
    fn destructuring_width_must_match() {
        let src = "strategy(\"t\")\n[a, b] = ta.macd(close, 12, 26, 9)\n";
        assert!(lower(src).unwrap_err().message.contains("3 values"));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let src = "strategy(\"t\")\nif close > open\n    break\n";
        assert!(lower(src).is_err());
    }
}
