//! Domain error types: compile diagnostics, simulation faults and the
//! top-level error used by the CLI.

use serde::Serialize;
use std::fmt;

/// Compiler stage that produced a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Lex,
    Parse,
    Qualifier,
    Codegen,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Lex => "lex",
            Stage::Parse => "parse",
            Stage::Qualifier => "qualifier",
            Stage::Codegen => "codegen",
        };
        f.write_str(name)
    }
}

/// Unexpected character in the source text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unexpected character {unexpected:?} at position {position}")]
pub struct LexError {
    pub position: usize,
    pub unexpected: char,
}

/// Structural grammar error. Parsing stops at the first one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: expected {expected}, found {found}")]
pub struct ParseError {
    pub position: usize,
    pub expected: String,
    pub found: String,
}

/// Qualifier lattice violation or illegal declaration ordering.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("qualifier error at position {position}: {message} (required {required}, got {got})")]
pub struct QualifierError {
    pub position: usize,
    pub required: String,
    pub got: String,
    pub message: String,
}

/// A construct the parser accepts but the backend cannot execute.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unsupported construct at position {position}: {message}")]
pub struct CodegenError {
    pub position: usize,
    pub message: String,
}

/// A compile failure, always fatal to that compile attempt.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{stage} error at {line}:{column}: {message}")]
pub struct Diagnostic {
    pub stage: Stage,
    pub position: usize,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: Stage, position: usize, message: impl Into<String>) -> Self {
        Diagnostic {
            stage,
            position,
            line: 0,
            column: 0,
            message: message.into(),
        }
    }

    /// Fill in 1-based line/column from the byte offset.
    pub fn locate(mut self, source: &str) -> Self {
        let (line, column) = line_column(source, self.position);
        self.line = line;
        self.column = column;
        self
    }

    /// Format the error with a caret pointing at the offending column.
    pub fn display_with_context(&self, source: &str) -> String {
        let (line, column) = line_column(source, self.position);
        let text = source.lines().nth(line - 1).unwrap_or("");
        let caret = " ".repeat(column - 1) + "^";
        format!("{text}\n{caret}\n{err}", err = self)
    }
}

fn line_column(source: &str, position: usize) -> (usize, usize) {
    let clamped = position.min(source.len());
    let mut line = 1;
    let mut line_start = 0;
    for (i, ch) in source.char_indices() {
        if i >= clamped {
            break;
        }
        if ch == '\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    let column = source[line_start..clamped].chars().count() + 1;
    (line, column)
}

impl From<LexError> for Diagnostic {
    fn from(err: LexError) -> Self {
        Diagnostic::new(
            Stage::Lex,
            err.position,
            format!("unexpected character {:?}", err.unexpected),
        )
    }
}

impl From<ParseError> for Diagnostic {
    fn from(err: ParseError) -> Self {
        Diagnostic::new(
            Stage::Parse,
            err.position,
            format!("expected {}, found {}", err.expected, err.found),
        )
    }
}

impl From<QualifierError> for Diagnostic {
    fn from(err: QualifierError) -> Self {
        Diagnostic::new(
            Stage::Qualifier,
            err.position,
            format!("{} (required {}, got {})", err.message, err.required, err.got),
        )
    }
}

impl From<CodegenError> for Diagnostic {
    fn from(err: CodegenError) -> Self {
        Diagnostic::new(Stage::Codegen, err.position, err.message)
    }
}

/// A simulation-time fault. Some are absorbed into the result, the rest
/// abort the run.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeFault {
    #[error("series is empty")]
    EmptySeries,

    #[error("timestamps not strictly increasing at bar {index}")]
    NonMonotonicTimestamps { index: usize },

    #[error("invalid bar {index}: {reason}")]
    InvalidBar { index: usize, reason: String },

    #[error("loop budget of {limit} iterations exceeded at bar {bar}")]
    LoopBudgetExceeded { bar: usize, limit: usize },

    #[error("no sub-bar data at {resolution} minutes for the requested range")]
    MissingSubBars { resolution: u32 },

    #[error("evaluation failed at bar {bar}: {reason}")]
    Evaluation { bar: usize, reason: String },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

impl RuntimeFault {
    /// Recoverable faults are recorded and the run continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RuntimeFault::LoopBudgetExceeded { .. }
                | RuntimeFault::MissingSubBars { .. }
                | RuntimeFault::Evaluation { .. }
        )
    }
}

/// A recoverable fault absorbed into a simulation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedFault {
    pub bar: usize,
    pub cause: RuntimeFault,
}

/// Top-level error type for pinelab.
#[derive(Debug, thiserror::Error)]
pub enum PinelabError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Compile(#[from] Diagnostic),

    #[error(transparent)]
    Simulation(#[from] RuntimeFault),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&PinelabError> for std::process::ExitCode {
    fn from(err: &PinelabError) -> Self {
        let code: u8 = match err {
            PinelabError::Io(_) => 1,
            PinelabError::ConfigParse { .. } | PinelabError::ConfigInvalid { .. } => 2,
            PinelabError::Data { .. } => 3,
            PinelabError::Compile(_) => 4,
            PinelabError::Simulation(_) => 5,
        };
        std::process::ExitCode::from(code)
    }
}
