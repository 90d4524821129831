//! Ink Compiler Library
//!
//! Compiles Ink branching-narrative source into the bytecode `Program`
//! the runtime executes. The pipeline is staged: a two-mode scanner feeds
//! a recursive-descent parser, the resulting syntax tree is lowered to a
//! linear-index IR, and the code generator linearizes that IR to bytecode
//! plus per-path constant pools.
//!
//! Parse and lowering diagnostics accumulate instead of aborting; the
//! pipeline stops before code generation when any were recorded and the
//! error carries both the structured list and the rendered report.

pub mod ast;
pub mod codegen;
pub mod diagnostic;
pub mod ir;
pub mod lower;
pub mod parser;
pub mod scanner;
pub mod symtab;
pub mod token;

pub use ast::{Ast, AstNode, NodeId, NodeKind};
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use ir::{Ir, IrOp};
pub use lower::ROOT_PATH_NAME;
pub use parser::parse;
pub use scanner::{Grammar, Scanner};
pub use symtab::{ScopeStack, Symbol, SymbolKind, Symtab};
pub use token::{Token, TokenKind};

use tracing::debug;

use ink_core::{Flags, InkError, Program, SourceBuffer};

/// Compilation failure.
#[derive(Debug)]
pub enum CompileError {
    /// One or more diagnostics were recorded while parsing or lowering.
    /// `rendered` is the full human-readable report.
    Parse {
        diagnostics: Vec<Diagnostic>,
        rendered: String,
    },
    /// Code generation hit a hard limit.
    Gen(InkError),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Parse { rendered, .. } => write!(f, "{}", rendered),
            CompileError::Gen(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Parse { .. } => None,
            CompileError::Gen(err) => Some(err),
        }
    }
}

impl From<InkError> for CompileError {
    fn from(err: InkError) -> CompileError {
        CompileError::Gen(err)
    }
}

/// Compile a source buffer to a program.
///
/// `flags` controls the dump surfaces (`DUMP_AST`, `DUMP_IR`) and ANSI
/// color use in both dumps and diagnostics.
pub fn compile(source: &SourceBuffer, flags: Flags) -> Result<Program, CompileError> {
    let colors = flags.contains(Flags::COLOR);
    let ast = parser::parse(source);

    if flags.contains(Flags::DUMP_AST) {
        ast.print(source, colors);
    }

    let (ir, lowering_errors) = lower::lower(&ast, source);
    let mut diagnostics = ast.errors.clone();
    diagnostics.extend(lowering_errors);

    if !diagnostics.is_empty() {
        debug!(
            target: "inkc",
            count = diagnostics.len(),
            "aborting before code generation"
        );
        let rendered =
            diagnostic::render_all(source, source.filename(), &diagnostics, colors);
        return Err(CompileError::Parse {
            diagnostics,
            rendered,
        });
    }

    if flags.contains(Flags::DUMP_IR) {
        ir.print();
    }

    let program = codegen::generate(&ir)?;

    debug!(
        target: "inkc",
        paths = program.paths.len(),
        "story compiled"
    );
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_hello_world() {
        let source = SourceBuffer::from_bytes("test.ink", "Hello, world!\n");
        let program = compile(&source, Flags::empty()).unwrap();

        assert_eq!(program.paths.len(), 1);
        assert!(!program.paths[0].code.is_empty());
    }

    #[test]
    fn diagnostics_halt_the_pipeline() {
        let source = SourceBuffer::from_bytes("test.ink", "VAR x\nVAR x\n");
        let err = compile(&source, Flags::empty()).unwrap_err();

        match err {
            CompileError::Parse {
                diagnostics,
                rendered,
            } => {
                assert!(diagnostics
                    .iter()
                    .any(|d| d.kind == DiagnosticKind::Redefinition));
                assert!(rendered.contains("test.ink:2:5: error: redefinition of 'x'"));
            }
            CompileError::Gen(_) => panic!("expected a parse failure"),
        }
    }
}
