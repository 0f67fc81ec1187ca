//! Directive code parser, built on [pest](https://pest.rs/).
//!
//! The grammar is defined in `code.pest`. This module converts pest's
//! parse tree into the typed statements and expressions defined in
//! [`crate::ast`].
//!
//! Spans in the produced nodes are byte offsets into the code string that
//! was parsed, not into the enclosing template; the compiler maps them to
//! template lines.

use std::iter::Peekable;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::ast::expr::*;
use crate::ast::span::{Span, Spanned};
use crate::ast::value::Value;

#[derive(Parser)]
#[grammar = "parser/code.pest"]
struct CodeParser;

/// A directive's code failed to parse.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} at offset {}", .span.start)]
pub struct SyntaxError {
    pub span: Span,
    pub message: String,
}

impl SyntaxError {
    fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

/// Parse the code of a statement directive (`<% ... %>`).
///
/// Empty code yields [`StmtKind::Noop`]. Block statements come back
/// unlinked; see [`StmtKind`].
pub fn parse_statement(code: &str) -> Result<Stmt, SyntaxError> {
    let mut pairs = CodeParser::parse(Rule::statement, code).map_err(pest_error)?;
    let statement = pairs.next().unwrap();
    let span = pair_span(&statement);

    let Some(inner) = statement
        .into_inner()
        .find(|p| p.as_rule() != Rule::EOI)
    else {
        return Ok(Spanned::new(StmtKind::Noop, span));
    };

    build_stmt(inner)
}

/// Parse the code of an output directive (`<%= ... %>`, `<%== ... %>`).
///
/// Empty code yields a `nil` literal, which renders as nothing.
pub fn parse_expr(code: &str) -> Result<Expr, SyntaxError> {
    let mut pairs = CodeParser::parse(Rule::expression, code).map_err(pest_error)?;
    let expression = pairs.next().unwrap();
    let span = pair_span(&expression);

    match expression.into_inner().find(|p| p.as_rule() == Rule::expr) {
        Some(expr) => build_expr(expr),
        None => Ok(Spanned::new(ExprKind::Literal(Value::Nil), span)),
    }
}

fn pest_error(e: pest::error::Error<Rule>) -> SyntaxError {
    let span = match &e.location {
        pest::error::InputLocation::Pos(p) => Span::new(*p, *p + 1),
        pest::error::InputLocation::Span((s, e)) => Span::new(*s, *e),
    };
    SyntaxError::new(span, format!("syntax error: {}", e.variant.message()))
}

fn pair_span(pair: &Pair<Rule>) -> Span {
    let s = pair.as_span();
    Span::new(s.start(), s.end())
}

// -- Statement building --------------------------------------------------

fn build_stmt(pair: Pair<Rule>) -> Result<Stmt, SyntaxError> {
    let span = pair_span(&pair);

    let kind = match pair.as_rule() {
        Rule::for_stmt => {
            let mut names = Vec::new();
            let mut iterable = None;
            for child in pair.into_inner() {
                match child.as_rule() {
                    Rule::identifier => names.push(child.as_str().to_string()),
                    Rule::expr => iterable = Some(build_expr(child)?),
                    _ => {}
                }
            }
            let binding = match names.len() {
                1 => LoopBinding::Single(names.remove(0)),
                _ => LoopBinding::Pair(names.remove(0), names.remove(0)),
            };
            StmtKind::For {
                binding,
                iterable: iterable.unwrap(),
                end: 0,
            }
        }
        Rule::while_stmt => StmtKind::While {
            condition: first_expr(pair)?,
            end: 0,
        },
        Rule::if_stmt => StmtKind::If {
            condition: first_expr(pair)?,
            negate: false,
            next: 0,
        },
        Rule::unless_stmt => StmtKind::If {
            condition: first_expr(pair)?,
            negate: true,
            next: 0,
        },
        Rule::elsif_stmt => StmtKind::Elsif {
            condition: first_expr(pair)?,
            next: 0,
            end: 0,
        },
        Rule::else_stmt => StmtKind::Else { end: 0 },
        Rule::end_stmt => StmtKind::End(BlockEnd::Pending),
        Rule::assign_stmt => {
            let mut inner = pair.into_inner();
            let target = build_variable(inner.next().unwrap());
            let value = first_expr_of(inner)?;
            StmtKind::Assign { target, value }
        }
        Rule::expr => StmtKind::Eval(build_expr(pair)?),
        rule => {
            return Err(SyntaxError::new(
                span,
                format!("unexpected rule in statement position: {rule:?}"),
            ));
        }
    };

    Ok(Spanned::new(kind, span))
}

fn first_expr(pair: Pair<Rule>) -> Result<Expr, SyntaxError> {
    first_expr_of(pair.into_inner())
}

fn first_expr_of<'i>(mut pairs: impl Iterator<Item = Pair<'i, Rule>>) -> Result<Expr, SyntaxError> {
    let expr = pairs.find(|p| p.as_rule() == Rule::expr).unwrap();
    build_expr(expr)
}

// -- Expression building -------------------------------------------------

fn build_expr(pair: Pair<Rule>) -> Result<Expr, SyntaxError> {
    let mut inner = pair.into_inner();

    let first = build_unary_expr(inner.next().unwrap())?;

    // Collect (bin_op, unary_expr) pairs, then fold by precedence.
    let mut rest = Vec::new();
    while let Some(op_pair) = inner.next() {
        let op = parse_bin_op(op_pair.as_str());
        let right = build_unary_expr(inner.next().unwrap())?;
        rest.push((op, right));
    }

    Ok(climb(first, &mut rest.into_iter().peekable(), 0))
}

/// Precedence climbing over a flat operator/operand list. All operators
/// are left-associative.
fn climb(
    mut left: Expr,
    rest: &mut Peekable<std::vec::IntoIter<(BinOp, Expr)>>,
    min_precedence: u8,
) -> Expr {
    while let Some((op, _)) = rest.peek()
        && op.precedence() >= min_precedence
    {
        let op = *op;
        let Some((_, mut right)) = rest.next() else {
            break;
        };

        while let Some((next, _)) = rest.peek()
            && next.precedence() > op.precedence()
        {
            right = climb(right, rest, op.precedence() + 1);
        }

        let merged_span = left.span.merge(right.span);
        left = Spanned::new(
            ExprKind::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            merged_span,
        );
    }
    left
}

fn build_unary_expr(pair: Pair<Rule>) -> Result<Expr, SyntaxError> {
    let mut ops = Vec::new();
    let mut operand = None;

    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::unary_op => {
                let op = match child.as_str() {
                    "-" => UnaryOp::Neg,
                    _ => UnaryOp::Not,
                };
                ops.push((op, child.as_span().start()));
            }
            _ => operand = Some(build_postfix_expr(child)?),
        }
    }

    let mut expr = operand.unwrap();
    for (op, start) in ops.into_iter().rev() {
        let span = Span::new(start, expr.span.end);
        expr = Spanned::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(expr),
            },
            span,
        );
    }
    Ok(expr)
}

fn build_postfix_expr(pair: Pair<Rule>) -> Result<Expr, SyntaxError> {
    let mut inner = pair.into_inner();
    let mut expr = build_primary(inner.next().unwrap())?;

    for postfix in inner {
        let span = expr.span.merge(pair_span(&postfix));
        let kind = match postfix.as_rule() {
            Rule::field_access => {
                let name = postfix.into_inner().next().unwrap().as_str().to_string();
                ExprKind::Field {
                    target: Box::new(expr),
                    name,
                }
            }
            Rule::index_access => {
                let index = build_expr(postfix.into_inner().next().unwrap())?;
                ExprKind::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                }
            }
            Rule::method_call => {
                let mut parts = postfix.into_inner();
                let name = parts.next().unwrap().as_str().to_string();
                let mut args = vec![expr];
                if let Some(arg_list) = parts.next() {
                    args.extend(build_arg_list(arg_list)?);
                }
                ExprKind::Call(FunctionCall { name, args })
            }
            rule => {
                return Err(SyntaxError::new(
                    span,
                    format!("unexpected rule in postfix position: {rule:?}"),
                ));
            }
        };
        expr = Spanned::new(kind, span);
    }

    Ok(expr)
}

fn build_primary(pair: Pair<Rule>) -> Result<Expr, SyntaxError> {
    let span = pair_span(&pair);
    let rule = pair.as_rule();

    match rule {
        Rule::expr => build_expr(pair),
        Rule::variable => Ok(Spanned::new(ExprKind::Variable(build_variable(pair)), span)),
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = inner.next().unwrap().as_str().to_string();
            let args = match inner.next() {
                Some(arg_list) => build_arg_list(arg_list)?,
                None => Vec::new(),
            };
            Ok(Spanned::new(ExprKind::Call(FunctionCall { name, args }), span))
        }
        Rule::string => {
            let s = extract_string_content(pair);
            Ok(Spanned::new(ExprKind::Literal(Value::String(s)), span))
        }
        Rule::number => {
            let n: f64 = pair.as_str().parse().map_err(|_| {
                SyntaxError::new(span, format!("invalid number: {}", pair.as_str()))
            })?;
            Ok(Spanned::new(ExprKind::Literal(Value::Number(n)), span))
        }
        Rule::bool_literal => {
            let b = pair.as_str() == "true";
            Ok(Spanned::new(ExprKind::Literal(Value::Bool(b)), span))
        }
        Rule::nil_literal => Ok(Spanned::new(ExprKind::Literal(Value::Nil), span)),
        Rule::array_literal => {
            let mut elements = Vec::new();
            for inner_pair in pair.into_inner() {
                if inner_pair.as_rule() == Rule::expr {
                    elements.push(build_expr(inner_pair)?);
                }
            }
            Ok(Spanned::new(ExprKind::ArrayLiteral(elements), span))
        }
        Rule::map_literal => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let mut parts = entry.into_inner();
                let key_pair = parts.next().unwrap();
                let key = match key_pair.as_rule() {
                    Rule::string => extract_string_content(key_pair),
                    _ => key_pair.as_str().to_string(),
                };
                let value = build_expr(parts.next().unwrap())?;
                entries.push((key, value));
            }
            Ok(Spanned::new(ExprKind::MapLiteral(entries), span))
        }
        _ => Err(SyntaxError::new(
            span,
            format!("unexpected rule in primary position: {rule:?}"),
        )),
    }
}

fn build_variable(pair: Pair<Rule>) -> VariableRef {
    let mut context_only = false;
    let mut name = String::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::context_sigil => context_only = true,
            _ => name = part.as_str().to_string(),
        }
    }
    VariableRef { name, context_only }
}

fn build_arg_list(pair: Pair<Rule>) -> Result<Vec<Expr>, SyntaxError> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::expr)
        .map(build_expr)
        .collect()
}

// -- Helpers -------------------------------------------------------------

fn extract_string_content(pair: Pair<Rule>) -> String {
    // string = ${ "\"" ~ dq_inner ~ "\"" | "'" ~ sq_inner ~ "'" }
    let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");

    let mut result = String::new();
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some('\\') => result.push('\\'),
                Some(c) => {
                    result.push('\\');
                    result.push(c);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(ch);
        }
    }
    result
}

fn parse_bin_op(s: &str) -> BinOp {
    match s {
        "==" => BinOp::Eq,
        "!=" => BinOp::NotEq,
        "<" => BinOp::Lt,
        ">" => BinOp::Gt,
        "<=" => BinOp::LtEq,
        ">=" => BinOp::GtEq,
        "&&" | "and" => BinOp::And,
        "||" | "or" => BinOp::Or,
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Rem,
        _ => unreachable!("unknown operator: {s}"),
    }
}
