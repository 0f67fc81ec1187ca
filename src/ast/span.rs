/// Byte-offset range into a piece of source text.
///
/// Expression and statement nodes carry spans relative to their
/// directive's code, so a runtime failure can be mapped back to a line
/// of the original template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Merge two spans into one covering both ranges
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Number of line breaks in `text` before this span starts.
    pub fn lines_before(&self, text: &str) -> usize {
        let end = self.start.min(text.len());
        text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count()
    }
}

/// Wraps any AST node with its source location.
#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}
