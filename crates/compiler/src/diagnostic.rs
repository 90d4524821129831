//! Diagnostic collection and rendering.
//!
//! The parser and the lowering pass record diagnostics without aborting;
//! the pipeline halts before code generation when any were recorded.
//! Rendering follows the compiler-standard shape:
//!
//! ```text
//! path:line:col: error: <message>
//!    2 | VAR x
//!      | ^
//! ```

use ink_core::SourceBuffer;

use crate::token::TokenKind;

/// What went wrong. Positions live on the enclosing `Diagnostic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    UnknownIdentifier,
    Redefinition,
    ConditionalEmpty,
    ExpectedElse,
    MultipleElse,
    FinalElseMisplaced,
    TooFewArguments,
    TooManyArguments,
    ExpectedToken(TokenKind),
    UnexpectedToken,
    NestingTooDeep,
    InvalidToken,
}

/// A single recorded problem, anchored to a source byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub start: usize,
    pub end: usize,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, start: usize, end: usize) -> Diagnostic {
        Diagnostic { kind, start, end }
    }

    /// Human-readable message. `lexeme` is the flagged source text.
    pub fn message(&self, lexeme: &str) -> String {
        match self.kind {
            DiagnosticKind::UnknownIdentifier => {
                format!("use of undeclared identifier '{}'", lexeme)
            }
            DiagnosticKind::Redefinition => format!("redefinition of '{}'", lexeme),
            DiagnosticKind::ConditionalEmpty => {
                "condition block with no conditions".to_string()
            }
            DiagnosticKind::ExpectedElse => {
                "expected '- else:' clause rather than extra condition".to_string()
            }
            DiagnosticKind::MultipleElse => {
                "multiple 'else' cases in conditional".to_string()
            }
            DiagnosticKind::FinalElseMisplaced => {
                "'else' case should always be the final case in conditional".to_string()
            }
            DiagnosticKind::TooFewArguments => {
                format!("too few arguments to '{}'", lexeme)
            }
            DiagnosticKind::TooManyArguments => {
                format!("too many arguments to '{}'", lexeme)
            }
            DiagnosticKind::ExpectedToken(kind) => format!("expected {}", kind.name()),
            DiagnosticKind::UnexpectedToken => format!("unexpected token '{}'", lexeme),
            DiagnosticKind::NestingTooDeep => "nesting too deep".to_string(),
            DiagnosticKind::InvalidToken => format!("invalid token '{}'", lexeme),
        }
    }
}

/// Render one diagnostic with its source snippet and caret.
pub fn render(
    source: &SourceBuffer,
    filename: &str,
    diagnostic: &Diagnostic,
    colors: bool,
) -> String {
    const RED_BOLD: &str = "\x1b[31m\x1b[1m";
    const RESET: &str = "\x1b[0m";

    let (line, col) = source.line_col(diagnostic.start);
    let (snippet_start, snippet_end) = source.line_span(diagnostic.start);
    let snippet = String::from_utf8_lossy(source.slice(snippet_start, snippet_end));
    let lexeme = String::from_utf8_lossy(source.slice(diagnostic.start, diagnostic.end));
    let (err_on, err_off) = if colors { (RED_BOLD, RESET) } else { ("", "") };

    format!(
        "{}:{}:{}: {}error:{} {}\n{:4} | {}\n     | {}^\n",
        filename,
        line + 1,
        col + 1,
        err_on,
        err_off,
        diagnostic.message(&lexeme),
        line + 1,
        snippet,
        " ".repeat(col),
    )
}

/// Render every diagnostic in recording order.
pub fn render_all(
    source: &SourceBuffer,
    filename: &str,
    diagnostics: &[Diagnostic],
    colors: bool,
) -> String {
    let mut out = String::new();

    for diagnostic in diagnostics {
        out.push_str(&render(source, filename, diagnostic, colors));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_line_and_column_one_based() {
        let source = SourceBuffer::from_bytes("story.ink", "VAR x\nVAR x\n");
        let diagnostic = Diagnostic::new(DiagnosticKind::Redefinition, 10, 11);
        let text = render(&source, "story.ink", &diagnostic, false);

        assert!(text.starts_with("story.ink:2:5: error: redefinition of 'x'\n"));
        assert!(text.contains("   2 | VAR x\n"));
        assert!(text.contains("     |     ^\n"));
    }

    #[test]
    fn colors_wrap_the_error_marker() {
        let source = SourceBuffer::from_bytes("story.ink", "oops\n");
        let diagnostic = Diagnostic::new(DiagnosticKind::UnexpectedToken, 0, 4);
        let text = render(&source, "story.ink", &diagnostic, true);

        assert!(text.contains("\x1b[31m\x1b[1merror:\x1b[0m"));
    }
}
