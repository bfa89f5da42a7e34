//! Syntax tree produced by the parser.

use super::qualifier::Qualifier;

/// Parser-assigned expression id, dense from zero. The qualifier checker
/// annotates by id.
pub type ExprId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Strategy,
    Indicator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub kind: ScriptKind,
    pub args: Vec<Arg>,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub header: Header,
    pub functions: Vec<FunctionDef>,
    pub body: Vec<Stmt>,
    pub expr_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub qualifier: Option<Qualifier>,
    pub type_name: Option<String>,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclMode {
    Plain,
    /// Initialized once, persists across bars.
    Var,
    /// Persists across sub-bar steps of one bar.
    Varip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Reassign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl AssignOp {
    pub fn binary(self) -> Option<BinOp> {
        match self {
            AssignOp::Reassign => None,
            AssignOp::Add => Some(BinOp::Add),
            AssignOp::Sub => Some(BinOp::Sub),
            AssignOp::Mul => Some(BinOp::Mul),
            AssignOp::Div => Some(BinOp::Div),
            AssignOp::Mod => Some(BinOp::Mod),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Declare {
        mode: DeclMode,
        qualifier: Option<Qualifier>,
        type_name: Option<String>,
        name: String,
        value: Expr,
    },
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
    },
    Destructure {
        names: Vec<String>,
        value: Expr,
    },
    Expr(Expr),
    Break,
    Continue,
    Import(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Color(String),
    Na,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    /// `None` for the default arm.
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    /// Possibly dotted name such as `close`, `strategy.long`, `color.red`.
    Ident(String),
    Call {
        callee: String,
        args: Vec<Arg>,
    },
    /// `strategy.*` call in statement position.
    Order {
        command: String,
        args: Vec<Arg>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    History {
        target: Box<Expr>,
        offset: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    If {
        cond: Box<Expr>,
        then: Vec<Stmt>,
        otherwise: Option<Vec<Stmt>>,
    },
    Switch {
        subject: Option<Box<Expr>>,
        arms: Vec<SwitchArm>,
    },
    For {
        var: String,
        from: Box<Expr>,
        to: Box<Expr>,
        step: Option<Box<Expr>>,
        body: Vec<Stmt>,
    },
    While {
        cond: Box<Expr>,
        body: Vec<Stmt>,
    },
}

impl Expr {
    pub fn is_na_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(Literal::Na))
    }
}
