//! Error taxonomy and user-visible diagnostics.
//!
//! Every phase of the pipeline reports failure through a [`Diagnostic`]:
//! an error kind, a details string, and the source span it points at.
//! Runtime errors additionally carry the call-stack trace that was
//! active when they were raised. The rendered format is:
//!
//! ```text
//!   File <name>, line <L>, in <frame>     (trace lines, runtime only)
//! <ErrorKind>: <details>
//! File <name>, line <L>, column <C>
//! ```
//!
//! with 1-based line and column numbers.

use core::fmt;

use thiserror::Error;

use crate::span::Span;

/// The closed set of error kinds produced by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lexer: a character that starts no token.
    IllegalCharacter,
    /// Lexer: end of input inside a string literal.
    UnterminatedString,
    /// Parser: unexpected or missing token.
    IllegalSyntax,
    /// Interpreter: any evaluation failure.
    Runtime,
    /// Compiler backend: any lowering failure.
    Lowering,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::IllegalCharacter => "Illegal Character",
            ErrorKind::UnterminatedString => "Unterminated String",
            ErrorKind::IllegalSyntax => "Illegal Syntax",
            ErrorKind::Runtime => "Runtime Error",
            ErrorKind::Lowering => "Lowering Error",
        };
        f.write_str(name)
    }
}

/// One call-stack entry of a runtime error trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Display name of the frame (`<program>`, a function name, or a
    /// builtin name).
    pub name: String,
    /// 0-based line of the failing position inside this frame.
    pub line: u32,
}

/// A positioned, user-visible error.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub details: String,
    pub span: Span,
    /// Name of the source the error was raised in.
    pub file: String,
    /// Enclosing call frames, outermost first. Empty for non-runtime
    /// errors.
    pub trace: Vec<TraceFrame>,
}

impl Diagnostic {
    pub fn new(
        kind: ErrorKind,
        details: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Diagnostic {
        Diagnostic {
            kind,
            details: details.into(),
            span,
            file: file.into(),
            trace: Vec::new(),
        }
    }

    pub fn with_trace(mut self, trace: Vec<TraceFrame>) -> Diagnostic {
        self.trace = trace;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.trace {
            writeln!(
                f,
                "  File {}, line {}, in {}",
                self.file,
                frame.line + 1,
                frame.name
            )?;
        }
        writeln!(f, "{}: {}", self.kind, self.details)?;
        write!(
            f,
            "File {}, line {}, column {}",
            self.file,
            self.span.start.line + 1,
            self.span.start.column + 1
        )
    }
}

impl std::error::Error for Diagnostic {}

/// Library-boundary error for callers that also deal with I/O, such as
/// the CLI.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    fn span_at(line: u32, column: u32) -> Span {
        let pos = Position::new(0, line, column);
        Span::new(pos, pos)
    }

    #[test]
    fn renders_kind_details_and_position() {
        let diag = Diagnostic::new(
            ErrorKind::IllegalSyntax,
            "Expected ')'",
            span_at(2, 4),
            "demo.fl",
        );
        assert_eq!(
            diag.to_string(),
            "Illegal Syntax: Expected ')'\nFile demo.fl, line 3, column 5"
        );
    }

    #[test]
    fn renders_trace_outermost_first() {
        let diag = Diagnostic::new(
            ErrorKind::Runtime,
            "Division by zero",
            span_at(5, 0),
            "demo.fl",
        )
        .with_trace(vec![
            TraceFrame {
                name: "<program>".into(),
                line: 1,
            },
            TraceFrame {
                name: "f".into(),
                line: 5,
            },
        ]);
        let rendered = diag.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "  File demo.fl, line 2, in <program>");
        assert_eq!(lines[1], "  File demo.fl, line 6, in f");
        assert_eq!(lines[2], "Runtime Error: Division by zero");
        assert_eq!(lines[3], "File demo.fl, line 6, column 1");
    }
}
