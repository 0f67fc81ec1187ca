//! Splits template source into literal and directive segments.
//!
//! A directive is `<%`, an optional kind marker (`=`, `==` or `#`), the
//! code, and `%>`. At most one space directly inside each marker is not
//! part of the code. The whitespace that precedes a directive at the
//! start of its line, and the whitespace plus line break that follows
//! it, are captured with the directive so the compiler can decide
//! whether the directive owns its line.
//!
//! An opening `<%` without a closing `%>` is not a directive; it stays
//! part of the surrounding literal text.

use std::sync::LazyLock;

use regex::Regex;

use crate::ast::span::Span;

static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)(^[ \t]*)?<%(==?|#)? ?(.*?) ?%>([ \t]*\r?\n)?")
        .expect("directive pattern is a valid regex")
});

/// The four kinds of directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `<% code %>`: control flow or side effects, no output.
    Statement,
    /// `<%= expr %>`: output, passed through the template's escaper.
    Escaped,
    /// `<%== expr %>`: output, never escaped.
    Raw,
    /// `<%# text %>`: no output beyond its own line breaks.
    Comment,
}

impl DirectiveKind {
    /// Map the marker that follows `<%` to a kind.
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "" => Some(DirectiveKind::Statement),
            "=" => Some(DirectiveKind::Escaped),
            "==" => Some(DirectiveKind::Raw),
            "#" => Some(DirectiveKind::Comment),
            _ => None,
        }
    }
}

/// A directive as found in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive<'a> {
    /// Text between `<%` and the code: `""`, `"="`, `"=="` or `"#"`.
    pub marker: &'a str,
    pub code: &'a str,
    /// Byte offset of `code` in the source.
    pub code_start: usize,
    /// Horizontal whitespace between the start of the line and `<%`.
    /// `Some("")` when the directive starts its line.
    pub leading_space: Option<&'a str>,
    /// Horizontal whitespace plus the line break after `%>`, when
    /// nothing else follows on the line.
    pub trailing_space: Option<&'a str>,
    /// Covers the directive including captured whitespace.
    pub span: Span,
}

impl Directive<'_> {
    pub fn kind(&self) -> Option<DirectiveKind> {
        DirectiveKind::from_marker(self.marker)
    }

    pub fn has_leading_space(&self) -> bool {
        self.leading_space.is_some()
    }

    pub fn has_trailing_space(&self) -> bool {
        self.trailing_space.is_some()
    }

    /// Whether nothing but whitespace shares the line with this directive.
    pub fn owns_line(&self) -> bool {
        self.has_leading_space() && self.has_trailing_space()
    }
}

/// A piece of template source, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal { text: &'a str, span: Span },
    Directive(Directive<'a>),
}

impl Segment<'_> {
    pub fn span(&self) -> Span {
        match self {
            Segment::Literal { span, .. } => *span,
            Segment::Directive(d) => d.span,
        }
    }
}

/// Split `source` into segments whose spans cover it without gaps or
/// overlaps. Empty literals are never produced.
pub fn tokenize(source: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut pos = 0;

    for caps in DIRECTIVE.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        if whole.start() > pos {
            segments.push(Segment::Literal {
                text: &source[pos..whole.start()],
                span: Span::new(pos, whole.start()),
            });
        }

        let code = caps.get(3).unwrap();
        segments.push(Segment::Directive(Directive {
            marker: caps.get(2).map_or("", |m| m.as_str()),
            code: code.as_str(),
            code_start: code.start(),
            leading_space: caps.get(1).map(|m| m.as_str()),
            trailing_space: caps.get(4).map(|m| m.as_str()),
            span: Span::new(whole.start(), whole.end()),
        }));
        pos = whole.end();
    }

    if pos < source.len() {
        segments.push(Segment::Literal {
            text: &source[pos..],
            span: Span::new(pos, source.len()),
        });
    }

    segments
}
