//! Qualifier lattice and the checker that enforces it.
//!
//! Every expression is classified `const < input < simple < series`. An
//! operation's result takes the strongest qualifier among its operands, and
//! a call argument may never be stronger than its parameter's bound.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use super::ast::{
    Arg, DeclMode, Expr, ExprKind, FunctionDef, Literal, Script, ScriptKind, Stmt, StmtKind,
};
use super::builtins::{self, Builtin, InputKind};
use crate::domain::error::QualifierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Qualifier {
    Const,
    Input,
    Simple,
    Series,
}

impl Qualifier {
    pub fn name(self) -> &'static str {
        match self {
            Qualifier::Const => "const",
            Qualifier::Input => "input",
            Qualifier::Simple => "simple",
            Qualifier::Series => "series",
        }
    }

    /// Result qualifier of combining two operands.
    pub fn join(self, other: Qualifier) -> Qualifier {
        self.max(other)
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a value qualified `arg` may be passed where `bound` is required.
pub fn accepts(bound: Qualifier, arg: Qualifier) -> bool {
    arg <= bound
}

/// A recoverable compile-time finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub position: usize,
    pub message: String,
}

/// Checker output consumed by codegen.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    /// Strongest qualifier seen per expression id, across inlined call sites.
    pub qualifiers: Vec<Option<Qualifier>>,
    pub warnings: Vec<Warning>,
}

impl Annotations {
    pub fn qualifier(&self, expr: &Expr) -> Qualifier {
        self.qualifiers
            .get(expr.id)
            .copied()
            .flatten()
            .unwrap_or(Qualifier::Series)
    }
}

struct Checker<'a> {
    script: &'a Script,
    functions: HashMap<&'a str, &'a FunctionDef>,
    reassigned: HashSet<String>,
    scopes: Vec<HashMap<String, Qualifier>>,
    call_stack: Vec<String>,
    loop_budget: usize,
    out: Annotations,
}

/// Names that are the target of `:=` or a compound assignment anywhere in
/// the script, including function bodies.
pub fn reassigned_names(script: &Script) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_reassigned(&script.body, &mut out);
    for def in &script.functions {
        collect_reassigned(&def.body, &mut out);
    }
    out
}

fn collect_reassigned(stmts: &[Stmt], out: &mut HashSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign { name, value, .. } => {
                out.insert(name.clone());
                collect_reassigned_expr(value, out);
            }
            StmtKind::Declare { value, .. }
            | StmtKind::Destructure { value, .. }
            | StmtKind::Expr(value) => collect_reassigned_expr(value, out),
            _ => {}
        }
    }
}

fn collect_reassigned_expr(expr: &Expr, out: &mut HashSet<String>) {
    match &expr.kind {
        ExprKind::If { then, otherwise, .. } => {
            collect_reassigned(then, out);
            if let Some(otherwise) = otherwise {
                collect_reassigned(otherwise, out);
            }
        }
        ExprKind::Switch { arms, .. } => {
            for arm in arms {
                collect_reassigned(&arm.body, out);
            }
        }
        ExprKind::For { body, .. } | ExprKind::While { body, .. } => collect_reassigned(body, out),
        _ => {}
    }
}

/// Fold a literal-only integer expression, used to bound `for` loops.
fn const_number(expr: &Expr) -> Option<f64> {
    use super::ast::{BinOp, UnOp};
    match &expr.kind {
        ExprKind::Literal(Literal::Int(v)) => Some(*v as f64),
        ExprKind::Literal(Literal::Float(v)) => Some(*v),
        ExprKind::Unary {
            op: UnOp::Neg,
            operand,
        } => const_number(operand).map(|v| -v),
        ExprKind::Binary { op, lhs, rhs } => {
            let (a, b) = (const_number(lhs)?, const_number(rhs)?);
            match op {
                BinOp::Add => Some(a + b),
                BinOp::Sub => Some(a - b),
                BinOp::Mul => Some(a * b),
                BinOp::Div if b != 0.0 => Some(a / b),
                _ => None,
            }
        }
        _ => None,
    }
}

impl<'a> Checker<'a> {
    fn new(script: &'a Script, loop_budget: usize) -> Self {
        Checker {
            script,
            functions: script.functions.iter().map(|f| (f.name.as_str(), f)).collect(),
            reassigned: reassigned_names(script),
            scopes: vec![HashMap::new()],
            call_stack: Vec::new(),
            loop_budget,
            out: Annotations {
                qualifiers: vec![None; script.expr_count],
                warnings: Vec::new(),
            },
        }
    }

    fn lookup(&self, name: &str) -> Option<Qualifier> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn bind(&mut self, name: &str, qualifier: Qualifier) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), qualifier);
        }
    }

    fn record(&mut self, expr: &Expr, qualifier: Qualifier) -> Qualifier {
        if let Some(slot) = self.out.qualifiers.get_mut(expr.id) {
            *slot = Some(slot.map_or(qualifier, |q| q.join(qualifier)));
        }
        qualifier
    }

    fn run(mut self) -> Result<Annotations, QualifierError> {
        let script = self.script;
        for arg in &script.header.args {
            let q = self.check_expr(&arg.value)?;
            if !accepts(Qualifier::Const, q) {
                return Err(QualifierError {
                    position: arg.position,
                    required: Qualifier::Const.name().to_string(),
                    got: q.name().to_string(),
                    message: "declaration arguments must be constant".to_string(),
                });
            }
        }
        self.check_block(&script.body)?;
        Ok(self.out)
    }

    /// Check statements in order; the block's value is its last statement.
    fn check_block(&mut self, stmts: &[Stmt]) -> Result<Qualifier, QualifierError> {
        let mut last = Qualifier::Const;
        for stmt in stmts {
            last = self.check_stmt(stmt)?;
        }
        Ok(last)
    }

    fn check_scoped_block(&mut self, stmts: &[Stmt]) -> Result<Qualifier, QualifierError> {
        self.scopes.push(HashMap::new());
        let result = self.check_block(stmts);
        self.scopes.pop();
        result
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<Qualifier, QualifierError> {
        match &stmt.kind {
            StmtKind::Declare {
                mode,
                qualifier,
                name,
                value,
                ..
            } => {
                let q = self.check_expr(value)?;
                if let Some(declared) = qualifier {
                    if !accepts(*declared, q) {
                        return Err(QualifierError {
                            position: value.position,
                            required: declared.name().to_string(),
                            got: q.name().to_string(),
                            message: format!("initializer of '{name}'"),
                        });
                    }
                }
                let bound = if *mode != DeclMode::Plain || self.reassigned.contains(name) {
                    Qualifier::Series
                } else {
                    qualifier.unwrap_or(q)
                };
                self.bind(name, bound);
                Ok(q)
            }
            StmtKind::Assign { value, .. } => self.check_expr(value),
            StmtKind::Destructure { names, value } => {
                let q = self.check_expr(value)?;
                for name in names {
                    let bound = if self.reassigned.contains(name) {
                        Qualifier::Series
                    } else {
                        q
                    };
                    self.bind(name, bound);
                }
                Ok(q)
            }
            StmtKind::Expr(expr) => self.check_expr(expr),
            StmtKind::Break | StmtKind::Continue | StmtKind::Import(_) => Ok(Qualifier::Const),
        }
    }

    fn check_expr(&mut self, expr: &Expr) -> Result<Qualifier, QualifierError> {
        let q = match &expr.kind {
            ExprKind::Literal(_) => Qualifier::Const,
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(q) => q,
                None => builtins::variable(name).map_or(Qualifier::Series, |(_, q)| q),
            },
            ExprKind::Call { callee, args } => self.check_call(callee, args)?,
            ExprKind::Order { command, args } => {
                if self.script.header.kind == ScriptKind::Indicator {
                    return Err(QualifierError {
                        position: expr.position,
                        required: "strategy declaration".to_string(),
                        got: "indicator declaration".to_string(),
                        message: format!("order command '{command}' in an indicator script"),
                    });
                }
                for arg in args {
                    self.check_expr(&arg.value)?;
                }
                Qualifier::Const
            }
            ExprKind::Unary { operand, .. } => self.check_expr(operand)?,
            ExprKind::Binary { op, lhs, rhs } => {
                if op.is_comparison() && (lhs.is_na_literal() || rhs.is_na_literal()) {
                    self.out.warnings.push(Warning {
                        position: expr.position,
                        message: "comparison with na is never true; use na(x) instead".to_string(),
                    });
                }
                let l = self.check_expr(lhs)?;
                let r = self.check_expr(rhs)?;
                l.join(r)
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let c = self.check_expr(cond)?;
                let t = self.check_expr(then)?;
                let o = self.check_expr(otherwise)?;
                c.join(t).join(o)
            }
            ExprKind::History { target, offset } => {
                let t = self.check_expr(target)?;
                self.check_expr(offset)?;
                if t != Qualifier::Series {
                    return Err(QualifierError {
                        position: expr.position,
                        required: Qualifier::Series.name().to_string(),
                        got: t.name().to_string(),
                        message: "history reference on a non-series value".to_string(),
                    });
                }
                Qualifier::Series
            }
            ExprKind::Tuple(items) => {
                let mut q = Qualifier::Const;
                for item in items {
                    q = q.join(self.check_expr(item)?);
                }
                q
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                let mut q = self.check_expr(cond)?;
                q = q.join(self.check_scoped_block(then)?);
                if let Some(otherwise) = otherwise {
                    q = q.join(self.check_scoped_block(otherwise)?);
                }
                q
            }
            ExprKind::Switch { subject, arms } => {
                let mut q = match subject {
                    Some(subject) => self.check_expr(subject)?,
                    None => Qualifier::Const,
                };
                for arm in arms {
                    if let Some(guard) = &arm.guard {
                        q = q.join(self.check_expr(guard)?);
                    }
                    q = q.join(self.check_scoped_block(&arm.body)?);
                }
                q
            }
            ExprKind::For {
                var,
                from,
                to,
                step,
                body,
            } => {
                self.check_expr(from)?;
                self.check_expr(to)?;
                if let Some(step) = step {
                    self.check_expr(step)?;
                }
                let bounds = (
                    const_number(from),
                    const_number(to),
                    step.as_deref().map_or(Some(1.0), const_number),
                );
                if let (Some(a), Some(b), Some(s)) = bounds {
                    let iterations = ((b - a).abs() / s.abs().max(f64::MIN_POSITIVE)).floor() + 1.0;
                    if iterations > self.loop_budget as f64 {
                        self.out.warnings.push(Warning {
                            position: expr.position,
                            message: format!(
                                "loop runs {iterations} iterations, over the per-bar budget of {}",
                                self.loop_budget
                            ),
                        });
                    }
                }
                self.scopes.push(HashMap::new());
                self.bind(var, Qualifier::Series);
                let result = self.check_block(body);
                self.scopes.pop();
                result?;
                Qualifier::Series
            }
            ExprKind::While { cond, body } => {
                self.check_expr(cond)?;
                self.check_scoped_block(body)?;
                Qualifier::Series
            }
        };
        Ok(self.record(expr, q))
    }

    fn check_call(&mut self, callee: &str, args: &[Arg]) -> Result<Qualifier, QualifierError> {
        if let Some(def) = self.functions.get(callee).copied() {
            return self.check_user_call(def, args);
        }

        let Some(sig) = builtins::lookup(callee) else {
            for arg in args {
                self.check_expr(&arg.value)?;
            }
            return Ok(Qualifier::Series);
        };

        let names: Vec<Option<&str>> = args.iter().map(|a| a.name.as_deref()).collect();
        let slots = sig.bind(&names).unwrap_or_default();
        let mut joined = Qualifier::Const;
        for (i, arg) in args.iter().enumerate() {
            let q = self.check_expr(&arg.value)?;
            joined = joined.join(q);
            let Some(slot) = slots.iter().position(|s| *s == Some(i)) else {
                continue;
            };
            if sig.builtin == Builtin::NoOp {
                continue;
            }
            let bound = sig.qualifier_at(slot);
            if !accepts(bound, q) {
                let param = sig.params.get(slot).or(sig.params.last()).map_or("argument", |p| p.name);
                return Err(QualifierError {
                    position: arg.position,
                    required: bound.name().to_string(),
                    got: q.name().to_string(),
                    message: format!("argument '{param}' of {callee}"),
                });
            }
        }

        let result = match sig.builtin {
            Builtin::Indicator(_) => Qualifier::Series,
            Builtin::Input(InputKind::Source) => Qualifier::Series,
            Builtin::Input(_) => Qualifier::Input,
            Builtin::Math(_) | Builtin::IsNa | Builtin::Nz => joined,
            Builtin::NoOp => Qualifier::Const,
        };
        Ok(result)
    }

    /// Check a user function body with its parameters bound to this call
    /// site's argument qualifiers.
    fn check_user_call(
        &mut self,
        def: &'a FunctionDef,
        args: &[Arg],
    ) -> Result<Qualifier, QualifierError> {
        let mut arg_qualifiers = Vec::with_capacity(args.len());
        for arg in args {
            arg_qualifiers.push(self.check_expr(&arg.value)?);
        }
        if self.call_stack.iter().any(|name| name == &def.name) {
            return Ok(Qualifier::Series);
        }

        let mut frame = HashMap::new();
        for (i, param) in def.params.iter().enumerate() {
            let supplied = args
                .iter()
                .position(|a| a.name.as_deref() == Some(param.name.as_str()))
                .or_else(|| (i < args.len() && args[i].name.is_none()).then_some(i));
            let q = supplied.map_or(Qualifier::Const, |index| arg_qualifiers[index]);
            if let Some(bound) = param.qualifier {
                if !accepts(bound, q) {
                    let position = supplied.map_or(def.position, |index| args[index].position);
                    return Err(QualifierError {
                        position,
                        required: bound.name().to_string(),
                        got: q.name().to_string(),
                        message: format!("argument '{}' of {}", param.name, def.name),
                    });
                }
            }
            let bound = if self.reassigned.contains(&param.name) {
                Qualifier::Series
            } else {
                param.qualifier.unwrap_or(q)
            };
            frame.insert(param.name.clone(), bound);
        }

        let globals = self.scopes.first().cloned().unwrap_or_default();
        let saved = std::mem::replace(&mut self.scopes, vec![globals, frame]);
        self.call_stack.push(def.name.clone());
        let result = self.check_block(&def.body);
        self.call_stack.pop();
        self.scopes = saved;
        result
    }
}

/// Enforce the qualifier lattice and statement ordering rules over a parsed
/// script. `loop_budget` bounds statically known loop lengths; exceeding it
/// is a warning, not an error.
pub fn check(script: &Script, loop_budget: usize) -> Result<Annotations, QualifierError> {
    Checker::new(script, loop_budget).run()
}
