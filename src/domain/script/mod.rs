//! Script compiler: lexer, parser, qualifier checker and code generator,
//! plus the batch and step evaluators that run the generated program.

pub mod ast;
pub mod batch;
pub mod builtins;
pub mod codegen;
pub mod ir;
pub mod lexer;
pub mod machine;
pub mod parser;
pub mod qualifier;
pub mod step;

use tracing::{debug, warn};

use crate::domain::error::{Diagnostic, Stage};
use crate::domain::strategy::CompiledStrategy;

/// Per-bar ceiling on loop iterations.
pub const DEFAULT_LOOP_BUDGET: usize = 10_000;

/// Compile script source into an immutable [`CompiledStrategy`].
///
/// Fails with the first diagnostic of the first failing stage. Warnings
/// are logged and kept on the result.
pub fn compile(source: &str) -> Result<CompiledStrategy, Diagnostic> {
    compile_with_budget(source, DEFAULT_LOOP_BUDGET)
}

pub fn compile_with_budget(source: &str, loop_budget: usize) -> Result<CompiledStrategy, Diagnostic> {
    let locate = |d: Diagnostic| d.locate(source);
    let tokens = lexer::tokenize(source).map_err(|e| locate(e.into()))?;
    let script = parser::parse(tokens).map_err(|e| locate(e.into()))?;
    let annotations = qualifier::check(&script, loop_budget).map_err(|e| locate(e.into()))?;
    let lowered = codegen::generate(&script, &annotations).map_err(|e| locate(e.into()))?;

    for w in &annotations.warnings {
        let at = Diagnostic::new(Stage::Qualifier, w.position, "").locate(source);
        warn!(line = at.line, column = at.column, "{}", w.message);
    }

    let compiled = CompiledStrategy::new(lowered.meta, lowered.params, annotations.warnings, lowered.program)
        .map_err(|fault| locate(Diagnostic::new(Stage::Codegen, 0, fault.to_string())))?
        .with_loop_budget(loop_budget);
    debug!(
        title = %compiled.meta.title,
        params = compiled.params.len(),
        warmup = compiled.warmup(),
        "compiled script"
    );
    Ok(compiled)
}
