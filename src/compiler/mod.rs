//! Template compiler.
//!
//! Turns template source into a [`Program`]: the [tokenizer] splits the
//! source into segments, each segment is translated into instructions,
//! and block statements (`for`, `while`, `if`/`unless` chains) are linked
//! to their `elsif`/`else`/`end` so the interpreter can jump between
//! them.
//!
//! Whitespace handling follows the layout of the source:
//!
//! - A statement that is alone on its line (only horizontal whitespace
//!   before it, only whitespace and a line break after it) contributes
//!   nothing from that line to the output.
//! - Everywhere else, whitespace captured around a directive is emitted
//!   as literal text, including around a comment on its own line.
//! - A comment emits one line break for every line break in its body,
//!   keeping the output's line count in step with the source.

pub mod tokenizer;

use crate::ast::expr::{BlockEnd, StmtKind};
use crate::ast::program::{Instruction, Program};
use crate::error::{CompileError, CompileErrorKind, Location};
use crate::parser::{self, SyntaxError};

pub use tokenizer::{Directive, DirectiveKind, Segment, tokenize};

/// Where a template's source came from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Name reported in errors, usually a file path.
    pub name: String,
    /// Line number of the first line of the source.
    pub start_line: usize,
}

impl SourceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_line: 1,
        }
    }

    pub fn start_line(mut self, line: usize) -> Self {
        self.start_line = line;
        self
    }
}

impl Default for SourceInfo {
    fn default() -> Self {
        Self::new("(template)")
    }
}

/// Compile template source into a [`Program`].
pub fn compile(source: &str, info: &SourceInfo) -> Result<Program, CompileError> {
    let mut compiler = Compiler::new(source, info);
    for segment in tokenize(source) {
        compiler.translate(segment)?;
    }
    let program = compiler.finish()?;

    tracing::debug!(
        name = %info.name,
        instructions = program.len(),
        "compiled template"
    );
    Ok(program)
}

struct Compiler<'a> {
    source: &'a str,
    info: &'a SourceInfo,
    instructions: Vec<Instruction>,
    lines: Vec<usize>,
    // Line counting is incremental: segments arrive in source order.
    counted_to: usize,
    line: usize,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str, info: &'a SourceInfo) -> Self {
        Self {
            source,
            info,
            instructions: Vec::new(),
            lines: Vec::new(),
            counted_to: 0,
            line: info.start_line,
        }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        if offset > self.counted_to {
            self.line += self.source.as_bytes()[self.counted_to..offset]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.counted_to = offset;
        }
        self.line
    }

    fn location(&self, line: usize) -> Location {
        Location::new(self.info.name.clone(), line)
    }

    fn push(&mut self, instruction: Instruction, line: usize) {
        self.instructions.push(instruction);
        self.lines.push(line);
    }

    fn push_text(&mut self, text: Option<&str>, offset: usize) {
        if let Some(text) = text
            && !text.is_empty()
        {
            let line = self.line_at(offset);
            self.push(Instruction::EmitLiteral(text.to_string()), line);
        }
    }

    fn translate(&mut self, segment: Segment<'_>) -> Result<(), CompileError> {
        let directive = match segment {
            Segment::Literal { text, span } => {
                self.push_text(Some(text), span.start);
                return Ok(());
            }
            Segment::Directive(directive) => directive,
        };

        let Some(kind) = directive.kind() else {
            let line = self.line_at(directive.span.start);
            return Err(CompileError::new(
                CompileErrorKind::UnknownDirective,
                self.location(line),
                format!("unknown directive marker `<%{}`", directive.marker),
            ));
        };

        let lspace_at = directive.span.start;
        let rspace_at = directive.span.end - directive.trailing_space.map_or(0, str::len);
        let owns_line = directive.owns_line();

        match kind {
            DirectiveKind::Statement => {
                if !owns_line {
                    self.push_text(directive.leading_space, lspace_at);
                }
                let line = self.line_at(directive.code_start);
                let stmt = parser::parse_statement(directive.code)
                    .map_err(|e| self.syntax_error(e, directive.code, line))?;
                self.push(
                    Instruction::RunStatement {
                        code: directive.code.to_string(),
                        stmt,
                    },
                    line,
                );
                if !owns_line {
                    self.push_text(directive.trailing_space, rspace_at);
                }
            }
            DirectiveKind::Escaped | DirectiveKind::Raw => {
                self.push_text(directive.leading_space, lspace_at);
                let line = self.line_at(directive.code_start);
                let expr = parser::parse_expr(directive.code)
                    .map_err(|e| self.syntax_error(e, directive.code, line))?;
                self.push(
                    Instruction::EmitExpr {
                        code: directive.code.to_string(),
                        expr,
                        escape: kind == DirectiveKind::Escaped,
                    },
                    line,
                );
                self.push_text(directive.trailing_space, rspace_at);
            }
            DirectiveKind::Comment => {
                self.push_text(directive.leading_space, lspace_at);
                let newlines = "\n".repeat(directive.code.matches('\n').count());
                self.push_text(Some(&newlines), directive.code_start);
                self.push_text(directive.trailing_space, rspace_at);
            }
        }
        Ok(())
    }

    fn syntax_error(&self, e: SyntaxError, code: &str, line: usize) -> CompileError {
        let line = line + e.span.lines_before(code);
        CompileError::new(CompileErrorKind::Syntax, self.location(line), e.message)
            .with_hint(format!("in directive code `{}`", code.trim()))
    }

    fn finish(mut self) -> Result<Program, CompileError> {
        link_blocks(&mut self.instructions, &self.lines, &self.info.name)?;
        Ok(Program::new(
            self.info.name.clone(),
            self.instructions,
            self.lines,
        ))
    }
}

// ── Block linking ───────────────────────────────────────────────────────

enum OpenBlock {
    For(usize),
    While(usize),
    /// Indices of the `if`/`unless`, each `elsif`, and the `else`.
    Conditional { branches: Vec<usize>, has_else: bool },
}

fn stmt_at(instructions: &mut [Instruction], index: usize) -> Option<&mut StmtKind> {
    match &mut instructions[index] {
        Instruction::RunStatement { stmt, .. } => Some(&mut stmt.node),
        _ => None,
    }
}

/// Resolve the jump targets of every block statement.
fn link_blocks(
    instructions: &mut [Instruction],
    lines: &[usize],
    name: &str,
) -> Result<(), CompileError> {
    let unbalanced = |index: usize, message: String| {
        CompileError::new(
            CompileErrorKind::UnbalancedBlock,
            Location::new(name, lines[index]),
            message,
        )
    };

    let mut open: Vec<OpenBlock> = Vec::new();

    for index in 0..instructions.len() {
        let Some(stmt) = stmt_at(instructions, index) else {
            continue;
        };

        match stmt {
            StmtKind::For { .. } => open.push(OpenBlock::For(index)),
            StmtKind::While { .. } => open.push(OpenBlock::While(index)),
            StmtKind::If { .. } => open.push(OpenBlock::Conditional {
                branches: vec![index],
                has_else: false,
            }),
            StmtKind::Elsif { .. } | StmtKind::Else { .. } => {
                let is_else = matches!(stmt, StmtKind::Else { .. });
                let keyword = if is_else { "else" } else { "elsif" };
                match open.last_mut() {
                    Some(OpenBlock::Conditional { branches, has_else }) if !*has_else => {
                        branches.push(index);
                        *has_else = is_else;
                    }
                    Some(OpenBlock::Conditional { .. }) => {
                        return Err(unbalanced(index, format!("`{keyword}` after `else`")));
                    }
                    _ => {
                        return Err(unbalanced(index, format!("`{keyword}` without `if`"))
                            .with_hint("start the chain with `<% if condition %>`"));
                    }
                }
            }
            StmtKind::End(_) => {
                let block_end = match open.pop() {
                    None => {
                        return Err(unbalanced(index, "`end` without an open block".to_string()));
                    }
                    Some(OpenBlock::For(start)) => {
                        if let Some(StmtKind::For { end, .. }) = stmt_at(instructions, start) {
                            *end = index;
                        }
                        BlockEnd::For { start }
                    }
                    Some(OpenBlock::While(start)) => {
                        if let Some(StmtKind::While { end, .. }) = stmt_at(instructions, start) {
                            *end = index;
                        }
                        BlockEnd::While { start }
                    }
                    Some(OpenBlock::Conditional { branches, .. }) => {
                        link_conditional(instructions, &branches, index);
                        BlockEnd::Conditional
                    }
                };
                if let Some(StmtKind::End(end)) = stmt_at(instructions, index) {
                    *end = block_end;
                }
            }
            StmtKind::Noop | StmtKind::Assign { .. } | StmtKind::Eval(_) => {}
        }
    }

    if let Some(block) = open.pop() {
        let (index, keyword) = match block {
            OpenBlock::For(i) => (i, "for"),
            OpenBlock::While(i) => (i, "while"),
            OpenBlock::Conditional { branches, .. } => (branches[0], "if"),
        };
        return Err(unbalanced(index, format!("`{keyword}` is never closed"))
            .with_hint("add `<% end %>` after the block body"));
    }

    Ok(())
}

fn link_conditional(instructions: &mut [Instruction], branches: &[usize], end_index: usize) {
    for (position, &branch) in branches.iter().enumerate() {
        let following = branches.get(position + 1).copied().unwrap_or(end_index);
        match stmt_at(instructions, branch) {
            Some(StmtKind::If { next, .. }) => *next = following,
            Some(StmtKind::Elsif { next, end, .. }) => {
                *next = following;
                *end = end_index;
            }
            Some(StmtKind::Else { end }) => *end = end_index,
            _ => {}
        }
    }
}
