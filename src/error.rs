//! Error types for loading, compiling and rendering templates.
//!
//! [`LoadError`] comes from reading template source off disk.
//! [`CompileError`] is produced while turning source into a
//! [`Program`](crate::Program) and carries the template location for
//! diagnostic formatting. [`EvalError`] is produced while directive code
//! runs and can originate from the interpreter, the registry, or the
//! host's [`Context`](crate::eval::Context) implementation; the render
//! entry points bind it to a source line as a [`RenderError`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::ast::span::Span;
use thiserror::Error;

/// Template name and 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    pub line: usize,
}

impl Location {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.line)
    }
}

// ── Load errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read template {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template {} is not valid {encoding} (byte offset {offset})", path.display())]
    Decode {
        path: PathBuf,
        encoding: String,
        offset: usize,
    },

    #[error("unsupported template encoding: {encoding}")]
    UnsupportedEncoding { encoding: String },
}

// ── Compile errors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Directive code does not parse.
    Syntax,
    /// `end`, `else` or `elsif` without an opener, or an opener that is
    /// never closed.
    UnbalancedBlock,
    /// A directive marker the tokenizer does not know how to translate.
    UnknownDirective,
}

#[derive(Debug, Clone, Error)]
#[error("{location}: {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, location: Location, message: impl Into<String>) -> Self {
        Self {
            kind,
            location,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with the offending template line for display.
    ///
    /// `source` is the template text the error was produced from and
    /// `start_line` the line number its first line was compiled as.
    pub fn format_with_source(&self, source: &str, start_line: usize) -> String {
        let index = self.location.line.saturating_sub(start_line);
        let source_line = source.lines().nth(index).unwrap_or("");
        let line = self.location.line;

        let mut output = format!(
            "Error: {}\n --> {}\n  |\n{line:>3} | {source_line}",
            self.message, self.location
        );

        if let Some(hint) = &self.hint {
            output.push_str(&format!("\n  = hint: {hint}"));
        }

        output
    }
}

// ── Eval errors ─────────────────────────────────────────────────────────

/// An error that occurs while directive code runs.
///
/// Carries a structured [`EvalErrorKind`], a human-readable message, an
/// optional [`Span`] into the directive's code, and an optional
/// underlying error cause.
///
/// # Error chaining
///
/// When a host's [`Context`](crate::eval::Context) implementation or a
/// registered function catches an underlying error (database, I/O, etc.),
/// it can preserve the original error chain using
/// [`with_source`](EvalError::with_source):
///
/// ```rust
/// use embr::EvalError;
///
/// fn example() -> Result<(), EvalError> {
///     let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
///     Err(EvalError::host_error("failed to load partial").with_source(io_err))
/// }
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub span: Option<Span>,
    pub message: String,
    /// The underlying error that caused this evaluation error, if any.
    ///
    /// Wrapped in `Arc` so that `EvalError` remains `Clone`.
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            span: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a span only if the error does not carry one yet.
    pub(crate) fn or_span(self, span: Span) -> Self {
        if self.span.is_none() {
            self.with_span(span)
        } else {
            self
        }
    }

    /// Attach an underlying error cause to this evaluation error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    // Convenience constructors for common error types

    pub fn undefined_variable(name: &str) -> Self {
        Self::new(
            EvalErrorKind::UndefinedVariable,
            format!("undefined variable: {name}"),
        )
    }

    pub fn undefined_function(name: &str) -> Self {
        Self::new(
            EvalErrorKind::UndefinedFunction,
            format!("undefined function: {name}"),
        )
    }

    pub fn type_error(expected: &str, got: &str) -> Self {
        Self::new(
            EvalErrorKind::TypeError,
            format!("expected {expected}, got {got}"),
        )
    }

    pub fn not_iterable(got: &str) -> Self {
        Self::new(
            EvalErrorKind::NotIterable,
            format!("for requires an array or map, got {got}"),
        )
    }

    pub fn host_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::HostError, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    UndefinedVariable,
    UndefinedFunction,
    TypeError,
    NotIterable,
    ArithmeticError,
    HostError,
    /// The render exceeded a configured resource limit (step count or
    /// iteration cap).
    ResourceLimit,
    /// The render was cancelled via an external cancellation token.
    Cancelled,
}

// ── Render errors ───────────────────────────────────────────────────────

/// An [`EvalError`] bound to the template line whose code raised it.
///
/// No partial output accompanies a render error.
#[derive(Debug, Clone, Error)]
#[error("{location}: {error}")]
pub struct RenderError {
    pub location: Location,
    #[source]
    pub error: EvalError,
}

impl RenderError {
    pub fn kind(&self) -> EvalErrorKind {
        self.error.kind
    }
}

/// Failure to build a template from a file.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_display_has_location() {
        let err = RenderError {
            location: Location::new("page.erb", 7),
            error: EvalError::undefined_variable("title"),
        };
        assert_eq!(err.to_string(), "page.erb:7: undefined variable: title");
        assert_eq!(err.kind(), EvalErrorKind::UndefinedVariable);
    }

    #[test]
    fn test_compile_error_format_with_source() {
        let source = "line one\n<% for %>\nline three";
        let err = CompileError::new(
            CompileErrorKind::Syntax,
            Location::new("t", 2),
            "expected identifier",
        )
        .with_hint("write `for item in items`");
        let formatted = err.format_with_source(source, 1);
        assert!(formatted.contains(" --> t:2"));
        assert!(formatted.contains("  2 | <% for %>"));
        assert!(formatted.contains("= hint: write `for item in items`"));
    }
}
