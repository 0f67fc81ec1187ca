use std::borrow::Cow;
use std::fmt;

use super::expr::{Expr, Stmt};

/// One step of a compiled template.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Append literal template text verbatim.
    EmitLiteral(String),

    /// Evaluate an expression and append its text form, passed through
    /// the template's escaper when `escape` is set.
    EmitExpr {
        code: String,
        expr: Expr,
        escape: bool,
    },

    /// Evaluate a statement. Produces no output directly but may steer
    /// which of the following instructions run, and how often.
    RunStatement { code: String, stmt: Stmt },
}

/// The compiled, immutable instruction sequence of a template.
///
/// Instructions are kept in render order. Each one remembers the source
/// line its directive (or literal) started on, so render errors can
/// point back into the template.
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    instructions: Vec<Instruction>,
    lines: Vec<usize>,
}

impl Program {
    pub(crate) fn new(name: String, instructions: Vec<Instruction>, lines: Vec<usize>) -> Self {
        debug_assert_eq!(instructions.len(), lines.len());
        Self {
            name,
            instructions,
            lines,
        }
    }

    /// Name used in diagnostics (file path or the name given at compile time).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Source line the instruction at `index` starts on.
    pub fn line(&self, index: usize) -> usize {
        self.lines.get(index).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Listing of the program, one instruction per entry, each prefixed with
/// its source line. Literal text is single-quoted with quotes and
/// backslashes neutralized; everything else is shown as written.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, instruction) in self.instructions.iter().enumerate() {
            write!(f, "{:>4} ", self.line(index))?;
            match instruction {
                Instruction::EmitLiteral(text) => writeln!(f, "text '{}'", escape_literal(text))?,
                Instruction::EmitExpr {
                    code, escape: true, ..
                } => writeln!(f, "emit {code}")?,
                Instruction::EmitExpr {
                    code,
                    escape: false,
                    ..
                } => writeln!(f, "raw  {code}")?,
                Instruction::RunStatement { code, .. } => writeln!(f, "code {code}")?,
            }
        }
        Ok(())
    }
}

/// Backslash-escape `'` and `\` so `text` can sit inside single quotes.
pub fn escape_literal(text: &str) -> Cow<'_, str> {
    if !text.contains(['\'', '\\']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 4);
    for ch in text.chars() {
        if ch == '\'' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_literal_neutralizes_quotes_and_backslashes() {
        assert_eq!(escape_literal("it's"), "it\\'s");
        assert_eq!(escape_literal("a\\b"), "a\\\\b");
        assert!(matches!(escape_literal("plain"), Cow::Borrowed("plain")));
    }

    #[test]
    fn test_listing_quotes_literals() {
        let program = Program::new(
            "t".to_string(),
            vec![Instruction::EmitLiteral("don't".to_string())],
            vec![3],
        );
        assert_eq!(program.to_string(), "   3 text 'don\\'t'\n");
    }
}
