//! Program execution engine.
//!
//! The interpreter runs a compiled [`Program`] top to bottom, appending
//! literal text and expression output to an accumulator. Statement
//! instructions steer the instruction pointer: block statements carry the
//! jump targets the compiler linked for them, so a loop body is simply
//! the run of instructions between a `for` and its `end`.
//!
//! Loop bindings live in an internal scope stack and never reach the
//! host's [`Context`]; every other variable read or write goes through it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ast::expr::*;
use crate::ast::program::{Instruction, Program};
use crate::ast::span::Span;
use crate::ast::value::Value;
use crate::error::{EvalError, EvalErrorKind, Location, RenderError};
use crate::escape::Escaper;
use crate::registry::Registry;

mod context;

pub use context::{Context, Namespace, RenderInput};

/// Run `program` against `ctx`, producing the complete output text.
///
/// With [`Escaper::Html`], escaped expressions are converted through
/// [`Context::escape`]; with [`Escaper::Text`] they emit their plain text
/// form. On failure no partial output is returned.
pub fn execute(
    program: &Program,
    escaper: Escaper,
    ctx: &mut dyn Context,
    registry: &Registry,
    options: EvalOptions,
) -> Result<String, RenderError> {
    let mut machine = Machine::new(program, escaper, registry, options);
    machine.run(ctx).map_err(|fault| fault.into_render_error(program))
}

/// Evaluate a parsed expression and return its [`Value`] directly.
///
/// This is the evaluation counterpart to [`parse_expr`](crate::parse_expr):
/// the result keeps its type instead of being converted to text.
///
/// ```rust
/// use embr::{parse_expr, eval_expr_value, Namespace, Registry, Value};
///
/// let expr = parse_expr("hp > 50 && name.upcase() == \"ADA\"").unwrap();
/// let mut ns = Namespace::new();
/// ns.insert("hp", 75i64).insert("name", "ada");
///
/// let result = eval_expr_value(&expr, &mut ns, &Registry::with_builtins()).unwrap();
/// assert_eq!(result, Value::Bool(true));
/// ```
pub fn eval_expr_value(
    expr: &Expr,
    ctx: &mut dyn Context,
    registry: &Registry,
) -> Result<Value, EvalError> {
    let empty = Program::new(String::new(), Vec::new(), Vec::new());
    let mut machine = Machine::new(&empty, Escaper::Text, registry, EvalOptions::default());
    machine.eval_expr(expr, ctx)
}

// ── Evaluation options ──────────────────────────────────────────────────

/// Resource limits and cancellation for a render.
///
/// Create with [`EvalOptions::new()`] and chain builder methods:
///
/// ```rust
/// use embr::EvalOptions;
/// use std::sync::Arc;
/// use std::sync::atomic::AtomicBool;
///
/// let token = Arc::new(AtomicBool::new(false));
/// let opts = EvalOptions::new()
///     .max_steps(10_000)
///     .max_iterations(1_000)
///     .cancellation_token(token);
/// ```
#[derive(Clone, Default)]
pub struct EvalOptions {
    /// Maximum number of executed instructions before the render fails
    /// with a [`ResourceLimit`](EvalErrorKind::ResourceLimit) error.
    /// `None` means unlimited.
    pub max_steps: Option<u64>,

    /// Maximum number of loop iterations, across all `for` and `while`
    /// loops of the render. `None` means unlimited.
    pub max_iterations: Option<u64>,

    /// An external flag that can be set to `true` to cancel an
    /// in-progress render. Checked before each instruction.
    pub cancellation_token: Option<Arc<AtomicBool>>,
}

impl EvalOptions {
    /// Create a new `EvalOptions` with no limits.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_steps(mut self, limit: u64) -> Self {
        self.max_steps = Some(limit);
        self
    }

    pub fn max_iterations(mut self, limit: u64) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    /// Attach a cancellation token. Set the `AtomicBool` to `true` from
    /// another thread to abort the render.
    pub fn cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = Some(token);
        self
    }
}

impl std::fmt::Debug for EvalOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalOptions")
            .field("max_steps", &self.max_steps)
            .field("max_iterations", &self.max_iterations)
            .field("cancellation_token", &self.cancellation_token.is_some())
            .finish()
    }
}

// ── Lexical scope stack ─────────────────────────────────────────────────

struct ScopeFrame {
    bindings: HashMap<String, Value>,
}

impl ScopeFrame {
    fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    fn set(&mut self, name: String, value: Value) {
        self.bindings.insert(name, value);
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

/// A `for` loop in progress: the items still to visit.
struct LoopFrame<'p> {
    items: std::vec::IntoIter<Value>,
    binding: &'p LoopBinding,
}

/// An error raised while running the instruction at `index`.
struct Fault {
    index: usize,
    error: EvalError,
}

impl Fault {
    fn into_render_error(self, program: &Program) -> RenderError {
        let mut line = program.line(self.index);
        if let Some(span) = self.error.span
            && let Some(code) = program.instructions().get(self.index).and_then(code_of)
        {
            line += span.lines_before(code);
        }
        RenderError {
            location: Location::new(program.name(), line),
            error: self.error,
        }
    }
}

fn code_of(instruction: &Instruction) -> Option<&str> {
    match instruction {
        Instruction::EmitLiteral(_) => None,
        Instruction::EmitExpr { code, .. } | Instruction::RunStatement { code, .. } => Some(code),
    }
}

struct Machine<'p> {
    program: &'p Program,
    escaper: Escaper,
    registry: &'p Registry,
    options: EvalOptions,
    scopes: Vec<ScopeFrame>,
    loops: Vec<LoopFrame<'p>>,
    step_count: u64,
    iteration_count: u64,
    /// Set when a false condition jumps to an `elsif`, which must then
    /// test its own condition instead of closing the chain.
    testing_branch: bool,
}

impl<'p> Machine<'p> {
    fn new(
        program: &'p Program,
        escaper: Escaper,
        registry: &'p Registry,
        options: EvalOptions,
    ) -> Self {
        Self {
            program,
            escaper,
            registry,
            options,
            scopes: Vec::new(),
            loops: Vec::new(),
            step_count: 0,
            iteration_count: 0,
            testing_branch: false,
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(ScopeFrame::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: String, value: Value) {
        if let Some(frame) = self.scopes.last_mut() {
            frame.set(name, value);
        }
    }

    fn resolve_lexical(&self, name: &str) -> Option<Value> {
        for frame in self.scopes.iter().rev() {
            if let Some(val) = frame.get(name) {
                return Some(val.clone());
            }
        }
        None
    }

    /// Check resource limits and cancellation. Called once per instruction.
    fn check_limits(&mut self) -> Result<(), EvalError> {
        self.step_count += 1;

        if let Some(max) = self.options.max_steps
            && self.step_count > max
        {
            return Err(EvalError::new(
                EvalErrorKind::ResourceLimit,
                format!("render exceeded maximum of {max} steps"),
            ));
        }

        if let Some(ref token) = self.options.cancellation_token
            && token.load(Ordering::Relaxed)
        {
            return Err(EvalError::new(EvalErrorKind::Cancelled, "render cancelled"));
        }

        Ok(())
    }

    /// Check iteration limit. Called once per loop iteration.
    fn check_iteration_limit(&mut self) -> Result<(), EvalError> {
        self.iteration_count += 1;

        if let Some(max) = self.options.max_iterations
            && self.iteration_count > max
        {
            return Err(EvalError::new(
                EvalErrorKind::ResourceLimit,
                format!("render exceeded maximum of {max} loop iterations"),
            ));
        }

        Ok(())
    }

    // ── Program execution ───────────────────────────────────────────────

    fn run(&mut self, ctx: &mut dyn Context) -> Result<String, Fault> {
        let program = self.program;
        let instructions = program.instructions();
        let mut output = String::new();

        let mut pc = 0;
        while pc < instructions.len() {
            pc = self
                .step(pc, &instructions[pc], &mut output, ctx)
                .map_err(|error| Fault { index: pc, error })?;
        }

        Ok(output)
    }

    /// Execute one instruction and return the index of the next one.
    fn step(
        &mut self,
        pc: usize,
        instruction: &'p Instruction,
        output: &mut String,
        ctx: &mut dyn Context,
    ) -> Result<usize, EvalError> {
        self.check_limits()?;

        match instruction {
            Instruction::EmitLiteral(text) => {
                output.push_str(text);
                Ok(pc + 1)
            }
            Instruction::EmitExpr { expr, escape, .. } => {
                let value = self.eval_expr(expr, ctx)?;
                match (*escape, self.escaper) {
                    (true, Escaper::Html) => output.push_str(&ctx.escape(&value)),
                    _ => output.push_str(&value.to_output_string()),
                }
                Ok(pc + 1)
            }
            Instruction::RunStatement { stmt, .. } => self.exec_stmt(pc, stmt, ctx),
        }
    }

    fn exec_stmt(
        &mut self,
        pc: usize,
        stmt: &'p Stmt,
        ctx: &mut dyn Context,
    ) -> Result<usize, EvalError> {
        match &stmt.node {
            StmtKind::Noop => Ok(pc + 1),

            StmtKind::Assign { target, value } => {
                let value = self.eval_expr(value, ctx)?;
                self.assign(target, value, ctx)
                    .map_err(|e| e.or_span(stmt.span))?;
                Ok(pc + 1)
            }

            StmtKind::Eval(expr) => {
                self.eval_expr(expr, ctx)?;
                Ok(pc + 1)
            }

            StmtKind::For {
                binding,
                iterable,
                end,
            } => self.enter_for(pc, binding, iterable, *end, ctx),

            StmtKind::While { condition, end } => {
                if self.eval_expr(condition, ctx)?.is_truthy() {
                    self.check_iteration_limit()
                        .map_err(|e| e.with_span(condition.span))?;
                    Ok(pc + 1)
                } else {
                    Ok(*end + 1)
                }
            }

            StmtKind::If {
                condition,
                negate,
                next,
            } => {
                if self.eval_expr(condition, ctx)?.is_truthy() != *negate {
                    Ok(pc + 1)
                } else {
                    Ok(self.branch_to(*next))
                }
            }

            StmtKind::Elsif {
                condition, next, ..
            } if self.testing_branch => {
                self.testing_branch = false;
                if self.eval_expr(condition, ctx)?.is_truthy() {
                    Ok(pc + 1)
                } else {
                    Ok(self.branch_to(*next))
                }
            }

            // Reached by falling out of the previous branch's body.
            StmtKind::Elsif { end, .. } | StmtKind::Else { end } => Ok(*end + 1),

            StmtKind::End(BlockEnd::For { start }) => self.advance_for(*start, pc),
            StmtKind::End(BlockEnd::While { start }) => Ok(*start),
            StmtKind::End(BlockEnd::Conditional | BlockEnd::Pending) => Ok(pc + 1),
        }
    }

    /// Where to continue after a false condition whose chain continues
    /// at `next`. An `elsif` is entered so it tests its own condition;
    /// the body after an `else` or `end` runs directly.
    fn branch_to(&mut self, next: usize) -> usize {
        match self.program.instructions().get(next) {
            Some(Instruction::RunStatement { stmt, .. })
                if matches!(stmt.node, StmtKind::Elsif { .. }) =>
            {
                self.testing_branch = true;
                next
            }
            _ => next + 1,
        }
    }

    // ── Loops ───────────────────────────────────────────────────────────

    fn enter_for(
        &mut self,
        pc: usize,
        binding: &'p LoopBinding,
        iterable: &Expr,
        end: usize,
        ctx: &mut dyn Context,
    ) -> Result<usize, EvalError> {
        let value = self.eval_expr(iterable, ctx)?;
        let items = match value {
            Value::Array(items) => items,
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                .collect(),
            other => {
                return Err(EvalError::not_iterable(other.type_name()).with_span(iterable.span));
            }
        };

        tracing::trace!(items = items.len(), line = self.program.line(pc), "entering for loop");

        let mut items = items.into_iter();
        let Some(first) = items.next() else {
            return Ok(end + 1);
        };

        self.push_scope();
        self.loops.push(LoopFrame { items, binding });
        self.check_iteration_limit()?;
        self.bind_loop_item(binding, first)?;
        Ok(pc + 1)
    }

    fn advance_for(&mut self, start: usize, pc: usize) -> Result<usize, EvalError> {
        let next = self.loops.last_mut().map(|frame| (frame.items.next(), frame.binding));
        match next {
            Some((Some(item), binding)) => {
                self.check_iteration_limit()?;
                self.bind_loop_item(binding, item)?;
                Ok(start + 1)
            }
            _ => {
                self.loops.pop();
                self.pop_scope();
                Ok(pc + 1)
            }
        }
    }

    fn bind_loop_item(&mut self, binding: &LoopBinding, item: Value) -> Result<(), EvalError> {
        match binding {
            LoopBinding::Single(name) => self.bind(name.clone(), item),
            LoopBinding::Pair(first, second) => {
                let type_name = item.type_name();
                let mut parts = item
                    .into_array()
                    .ok_or_else(|| EvalError::type_error("a pair to destructure", type_name))?
                    .into_iter();
                let a = parts.next().unwrap_or_default();
                let b = parts.next().unwrap_or_default();
                self.bind(first.clone(), a);
                self.bind(second.clone(), b);
            }
        }
        Ok(())
    }

    // ── Variables ───────────────────────────────────────────────────────

    /// Resolve a variable reference.
    ///
    /// - **`name`**: loop bindings first, innermost loop winning, then
    ///   the context. Undefined everywhere is an error.
    /// - **`@name`**: the context only. Undefined reads as `nil`.
    fn resolve_variable(
        &self,
        var: &VariableRef,
        span: Span,
        ctx: &dyn Context,
    ) -> Result<Value, EvalError> {
        if !var.context_only
            && let Some(val) = self.resolve_lexical(&var.name)
        {
            return Ok(val);
        }

        match ctx.get(&var.name).map_err(|e| e.or_span(span))? {
            Some(val) => Ok(val),
            None if var.context_only => Ok(Value::Nil),
            None => Err(EvalError::undefined_variable(&var.name).with_span(span)),
        }
    }

    fn assign(
        &mut self,
        target: &VariableRef,
        value: Value,
        ctx: &mut dyn Context,
    ) -> Result<(), EvalError> {
        if !target.context_only
            && let Some(frame) = self
                .scopes
                .iter_mut()
                .rev()
                .find(|frame| frame.get(&target.name).is_some())
        {
            frame.set(target.name.clone(), value);
            return Ok(());
        }
        ctx.set(&target.name, value)
    }

    // ── Expression evaluation ───────────────────────────────────────────

    fn eval_expr(&mut self, expr: &Expr, ctx: &mut dyn Context) -> Result<Value, EvalError> {
        let span = expr.span;
        match &expr.node {
            ExprKind::Literal(val) => Ok(val.clone()),

            ExprKind::ArrayLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for elem in elements {
                    values.push(self.eval_expr(elem, ctx)?);
                }
                Ok(Value::Array(values))
            }

            ExprKind::MapLiteral(entries) => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval_expr(value, ctx)?);
                }
                Ok(Value::Map(map))
            }

            ExprKind::Variable(var) => self.resolve_variable(var, span, ctx),

            ExprKind::Field { target, name } => {
                let target = self.eval_expr(target, ctx)?;
                match target {
                    Value::Map(mut map) => Ok(map.remove(name).unwrap_or_default()),
                    other => Err(EvalError::type_error(
                        &format!("map for field `{name}`"),
                        other.type_name(),
                    )
                    .with_span(span)),
                }
            }

            ExprKind::Index { target, index } => {
                let target = self.eval_expr(target, ctx)?;
                let index = self.eval_expr(index, ctx)?;
                eval_index(target, &index, span)
            }

            ExprKind::Call(call) => {
                let mut args = Vec::with_capacity(call.args.len());
                for arg in &call.args {
                    args.push(self.eval_expr(arg, ctx)?);
                }
                self.registry
                    .call(&call.name, args, ctx)
                    .map_err(|e| e.or_span(span))
            }

            ExprKind::BinaryOp {
                left,
                op: BinOp::And,
                right,
            } => {
                let result = self.eval_expr(left, ctx)?.is_truthy()
                    && self.eval_expr(right, ctx)?.is_truthy();
                Ok(Value::Bool(result))
            }

            ExprKind::BinaryOp {
                left,
                op: BinOp::Or,
                right,
            } => {
                let result = self.eval_expr(left, ctx)?.is_truthy()
                    || self.eval_expr(right, ctx)?.is_truthy();
                Ok(Value::Bool(result))
            }

            ExprKind::BinaryOp { left, op, right } => {
                let left_val = self.eval_expr(left, ctx)?;
                let right_val = self.eval_expr(right, ctx)?;
                eval_binary_op(&left_val, *op, &right_val, span)
            }

            ExprKind::UnaryOp { op, operand } => {
                let val = self.eval_expr(operand, ctx)?;
                eval_unary_op(*op, &val, span)
            }
        }
    }
}

// ── Pure operator evaluation ────────────────────────────────────────────

fn eval_index(target: Value, index: &Value, span: Span) -> Result<Value, EvalError> {
    match target {
        Value::Array(mut items) => {
            let Some(position) = resolve_position(index, items.len(), span)? else {
                return Ok(Value::Nil);
            };
            Ok(items.swap_remove(position))
        }
        Value::String(s) => {
            let count = s.chars().count();
            let Some(position) = resolve_position(index, count, span)? else {
                return Ok(Value::Nil);
            };
            Ok(s.chars()
                .nth(position)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or_default())
        }
        Value::Map(mut map) => match index {
            Value::String(key) => Ok(map.remove(key).unwrap_or_default()),
            other => Err(EvalError::type_error("string key", other.type_name()).with_span(span)),
        },
        other => Err(
            EvalError::type_error("array, string or map to index", other.type_name())
                .with_span(span),
        ),
    }
}

/// Map a possibly negative index onto `0..len`. `None` when out of range.
fn resolve_position(index: &Value, len: usize, span: Span) -> Result<Option<usize>, EvalError> {
    let n = require_number(index, span)?;
    if n.fract() != 0.0 {
        return Err(EvalError::type_error("integer index", "fractional number").with_span(span));
    }
    let n = n as i64;
    let position = if n < 0 { len as i64 + n } else { n };
    Ok((0..len as i64).contains(&position).then_some(position as usize))
}

fn eval_binary_op(left: &Value, op: BinOp, right: &Value, span: Span) -> Result<Value, EvalError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinOp::NotEq => Ok(Value::Bool(!values_equal(left, right))),

        BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq => {
            let ordering = match (left, right) {
                (Value::String(l), Value::String(r)) => l.partial_cmp(r),
                _ => {
                    let l = require_number(left, span)?;
                    let r = require_number(right, span)?;
                    l.partial_cmp(&r)
                }
            };
            let result = ordering.is_some_and(|ord| match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Gt => ord.is_gt(),
                BinOp::LtEq => ord.is_le(),
                _ => ord.is_ge(),
            });
            Ok(Value::Bool(result))
        }

        BinOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),

        BinOp::Add => eval_add(left, right, span),
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            let l = require_number(left, span)?;
            let r = require_number(right, span)?;
            let result = match op {
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div | BinOp::Rem => {
                    if r == 0.0 {
                        return Err(EvalError::new(
                            EvalErrorKind::ArithmeticError,
                            if op == BinOp::Div {
                                "division by zero"
                            } else {
                                "modulo by zero"
                            },
                        )
                        .with_span(span));
                    }
                    if op == BinOp::Div { l / r } else { l % r }
                }
                _ => unreachable!(),
            };
            Ok(Value::Number(result))
        }
    }
}

fn eval_add(left: &Value, right: &Value, span: Span) -> Result<Value, EvalError> {
    if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
        return Ok(Value::Number(l + r));
    }
    if let (Value::Array(l), Value::Array(r)) = (left, right) {
        return Ok(Value::Array(l.iter().chain(r).cloned().collect()));
    }
    if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
        return Ok(Value::String(format!(
            "{}{}",
            left.to_output_string(),
            right.to_output_string()
        )));
    }
    Err(EvalError::type_error(
        "numbers, strings or arrays",
        &format!("{} + {}", left.type_name(), right.type_name()),
    )
    .with_span(span))
}

fn eval_unary_op(op: UnaryOp, val: &Value, span: Span) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!val.is_truthy())),
        UnaryOp::Neg => {
            let n = require_number(val, span)?;
            Ok(Value::Number(-n))
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        _ => left == right,
    }
}

fn require_number(val: &Value, span: Span) -> Result<f64, EvalError> {
    val.as_number()
        .ok_or_else(|| EvalError::type_error("number", val.type_name()).with_span(span))
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{SourceInfo, compile};

    fn render_in(source: &str, ns: &mut Namespace) -> Result<String, RenderError> {
        let program = compile(source, &SourceInfo::new("t.erb")).expect("compile failed");
        let escaper = ns.escaper();
        execute(
            &program,
            escaper,
            ns,
            &Registry::with_builtins(),
            EvalOptions::default(),
        )
    }

    fn render_simple(source: &str) -> String {
        render_in(source, &mut Namespace::new()).expect("render failed")
    }

    #[test]
    fn test_literal() {
        assert_eq!(render_simple("Hello, world!"), "Hello, world!");
    }

    #[test]
    fn test_variable_substitution() {
        let mut ns = Namespace::new();
        ns.insert("name", "Alice");
        assert_eq!(
            render_in("Hello, <%= name %>!", &mut ns).unwrap(),
            "Hello, Alice!"
        );
    }

    #[test]
    fn test_html_escapes_only_escaped_expressions() {
        let mut ns = Namespace::html();
        ns.insert("x", "<b>");
        assert_eq!(
            render_in("<i><%= x %>|<%== x %></i>", &mut ns).unwrap(),
            "<i>&lt;b&gt;|<b></i>"
        );
    }

    #[test]
    fn test_text_mode_does_not_escape() {
        let mut ns = Namespace::new();
        ns.insert("x", "<b>");
        assert_eq!(render_in("<%= x %>", &mut ns).unwrap(), "<b>");
    }

    #[test]
    fn test_if_true() {
        let mut ns = Namespace::new();
        ns.insert("show", true);
        assert_eq!(
            render_in("<% if show %>yes<% end %>", &mut ns).unwrap(),
            "yes"
        );
    }

    #[test]
    fn test_if_false_with_else() {
        let mut ns = Namespace::new();
        ns.insert("show", false);
        assert_eq!(
            render_in("<% if show %>yes<% else %>no<% end %>", &mut ns).unwrap(),
            "no"
        );
    }

    #[test]
    fn test_elsif_chain() {
        let source = "<% if x == 1 %>one<% elsif x == 2 %>two<% elsif x == 3 %>three<% else %>other<% end %>";
        for (x, expected) in [(1, "one"), (2, "two"), (3, "three"), (4, "other")] {
            let mut ns = Namespace::new();
            ns.insert("x", x);
            assert_eq!(render_in(source, &mut ns).unwrap(), expected);
        }
    }

    #[test]
    fn test_unless() {
        let mut ns = Namespace::new();
        ns.insert("items", Vec::<Value>::new());
        assert_eq!(
            render_in("<% unless items %>none<% else %>has items<% end %>", &mut ns).unwrap(),
            "none"
        );
    }

    #[test]
    fn test_for_loop() {
        assert_eq!(
            render_simple(r#"<% for item in ["a", "b", "c"] %><%= item %>, <% end %>"#),
            "a, b, c, "
        );
    }

    #[test]
    fn test_for_over_empty_array_skips_body() {
        assert_eq!(render_simple("[<% for x in [] %>body<% end %>]"), "[]");
    }

    #[test]
    fn test_for_over_map_pairs() {
        assert_eq!(
            render_simple(r#"<% for k, v in {b: 2, a: 1} %><%= k %>=<%= v %>;<% end %>"#),
            "a=1;b=2;"
        );
    }

    #[test]
    fn test_nested_loops() {
        assert_eq!(
            render_simple("<% for i in [1, 2] %><% for j in [1, 2] %><%= i * j %> <% end %><% end %>"),
            "1 2 2 4 "
        );
    }

    #[test]
    fn test_loop_binding_shadows_context_and_does_not_leak() {
        let mut ns = Namespace::new();
        ns.insert("item", "outer");
        assert_eq!(
            render_in("<% for item in [1, 2] %><%= item %><% end %><%= item %>", &mut ns).unwrap(),
            "12outer"
        );
        assert_eq!(ns.get("item").unwrap(), Some(Value::from("outer")));
    }

    #[test]
    fn test_while_loop_with_context_counter() {
        let mut ns = Namespace::new();
        ns.insert("i", 0i64);
        assert_eq!(
            render_in("<% while i < 3 %><%= i %><% i = i + 1 %><% end %>", &mut ns).unwrap(),
            "012"
        );
        assert_eq!(ns.get("i").unwrap(), Some(Value::Number(3.0)));
    }

    #[test]
    fn test_assignment_writes_context() {
        let mut ns = Namespace::new();
        render_in("<% @greeting = \"hi\" %>", &mut ns).unwrap();
        assert_eq!(ns.get("greeting").unwrap(), Some(Value::from("hi")));
    }

    #[test]
    fn test_assignment_to_loop_variable_stays_in_loop() {
        let mut ns = Namespace::new();
        assert_eq!(
            render_in("<% for x in [1, 2] %><% x = x * 10 %><%= x %> <% end %>", &mut ns).unwrap(),
            "10 20 "
        );
        assert_eq!(ns.get("x").unwrap(), None);
    }

    #[test]
    fn test_context_sigil_reads_nil_when_unset() {
        assert_eq!(render_simple("[<%= @missing %>]"), "[]");
    }

    #[test]
    fn test_undefined_variable_errors_with_line() {
        let err = render_in("line one\n\n<%= missing %>", &mut Namespace::new()).unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::UndefinedVariable);
        assert_eq!(err.location, Location::new("t.erb", 3));
        assert_eq!(err.to_string(), "t.erb:3: undefined variable: missing");
    }

    #[test]
    fn test_error_line_counts_newlines_inside_code() {
        let err = render_in("a\n<%= [1,\n  2,\n  missing] %>", &mut Namespace::new()).unwrap_err();
        assert_eq!(err.location.line, 4);
    }

    #[test]
    fn test_elsif_error_reports_its_own_line() {
        let source = "<% if false %>\nx\n<% elsif missing %>\ny\n<% end %>\n";
        let err = render_in(source, &mut Namespace::new()).unwrap_err();
        assert_eq!(err.to_string(), "t.erb:3: undefined variable: missing");

        let source = "<% if false %>a<% elsif false %>b<% elsif [\n1,\nnope] %>c<% end %>";
        let err = render_in(source, &mut Namespace::new()).unwrap_err();
        assert_eq!(err.location.line, 3);
    }

    #[test]
    fn test_elsif_body_after_taken_branch_is_skipped() {
        let source = "<% if true %>a<% elsif missing %>b<% else %>c<% end %>";
        assert_eq!(render_simple(source), "a");
    }

    #[test]
    fn test_error_line_follows_comment() {
        let err = render_in("<%# one\ntwo\nthree %>\n<%= nope %>", &mut Namespace::new()).unwrap_err();
        assert_eq!(err.location.line, 4);
    }

    #[test]
    fn test_for_requires_iterable() {
        let mut ns = Namespace::new();
        ns.insert("n", 5i64);
        let err = render_in("<% for x in n %><% end %>", &mut ns).unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::NotIterable);
    }

    #[test]
    fn test_arithmetic_operators() {
        assert_eq!(render_simple("<%= 1 + 2 * 3 %>"), "7");
        assert_eq!(render_simple("<%= (1 + 2) * 3 %>"), "9");
        assert_eq!(render_simple("<%= 7 / 2 %>"), "3.5");
        assert_eq!(render_simple("<%= 7 % 3 %>"), "1");
        assert_eq!(render_simple("<%= -2 - 3 %>"), "-5");
    }

    #[test]
    fn test_division_by_zero() {
        let err = render_in("<%= 1 / 0 %>", &mut Namespace::new()).unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::ArithmeticError);
    }

    #[test]
    fn test_string_and_array_concatenation() {
        assert_eq!(render_simple(r#"<%= "n" + 1 %>"#), "n1");
        assert_eq!(render_simple("<%= len([1] + [2, 3]) %>"), "3");
    }

    #[test]
    fn test_comparison_type_error() {
        let err = render_in(r#"<%= 1 < "a" %>"#, &mut Namespace::new()).unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::TypeError);
    }

    #[test]
    fn test_string_comparison() {
        assert_eq!(render_simple(r#"<%= "a" < "b" %>"#), "true");
    }

    #[test]
    fn test_short_circuit_skips_right_side() {
        assert_eq!(render_simple("<%= false && missing %>"), "false");
        assert_eq!(render_simple("<%= true || missing %>"), "true");
    }

    #[test]
    fn test_field_and_index_access() {
        let mut ns = Namespace::new();
        let mut user = std::collections::BTreeMap::new();
        user.insert("name".to_string(), Value::from("Ada"));
        user.insert("tags".to_string(), Value::from(vec!["x", "y", "z"]));
        ns.insert("user", user);
        assert_eq!(
            render_in(
                r#"<%= user.name %> <%= user["name"] %> <%= user.tags[-1] %> <%= user.tags[9] %>|<%= user.age %>"#,
                &mut ns
            )
            .unwrap(),
            "Ada Ada z |"
        );
    }

    #[test]
    fn test_field_on_non_map_errors() {
        let mut ns = Namespace::new();
        ns.insert("n", 3i64);
        let err = render_in("<%= n.name %>", &mut ns).unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::TypeError);
    }

    #[test]
    fn test_method_call_sugar() {
        let mut ns = Namespace::new();
        ns.insert("name", "ada");
        assert_eq!(render_in("<%= name.upcase() %>", &mut ns).unwrap(), "ADA");
    }

    #[test]
    fn test_undefined_function() {
        let err = render_in("<%= nope(1) %>", &mut Namespace::new()).unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::UndefinedFunction);
    }

    #[test]
    fn test_deep_equality() {
        assert_eq!(render_simple("<%= [1, [2]] == [1, [2]] %>"), "true");
        assert_eq!(render_simple("<%= {a: 1} != {a: 2} %>"), "true");
    }

    #[test]
    fn test_number_equality_is_exact() {
        let mut ns = Namespace::new();
        ns.insert("inf", f64::INFINITY);
        ns.insert("tiny", 0.1 + 0.2);
        assert_eq!(render_in("<%= inf == inf %>", &mut ns).unwrap(), "true");
        assert_eq!(render_in("<%= [inf] == [inf] %>", &mut ns).unwrap(), "true");
        assert_eq!(render_in("<%= tiny == 0.3 %>", &mut ns).unwrap(), "false");
        assert_eq!(render_in("<%= 2 == 2.0 %>", &mut ns).unwrap(), "true");
    }

    #[test]
    fn test_host_context_error_propagates() {
        struct Failing;
        impl Context for Failing {
            fn get(&self, _name: &str) -> Result<Option<Value>, EvalError> {
                Err(EvalError::host_error("backend unavailable"))
            }
            fn set(&mut self, _name: &str, _value: Value) -> Result<(), EvalError> {
                Ok(())
            }
        }

        let program = compile("<%= x %>", &SourceInfo::default()).unwrap();
        let err = execute(
            &program,
            Escaper::Text,
            &mut Failing,
            &Registry::new(),
            EvalOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::HostError);
        assert_eq!(err.to_string(), "(template):1: backend unavailable");
    }

    #[test]
    fn test_custom_context_escape_is_used_in_html_mode() {
        struct Shouting(Namespace);
        impl Context for Shouting {
            fn get(&self, name: &str) -> Result<Option<Value>, EvalError> {
                self.0.get(name)
            }
            fn set(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
                self.0.set(name, value)
            }
            fn escape(&self, value: &Value) -> String {
                value.to_output_string().to_uppercase()
            }
        }

        let mut ctx = Shouting(Namespace::new());
        ctx.0.insert("x", "hi");
        let program = compile("<%= x %> <%== x %>", &SourceInfo::default()).unwrap();
        let out = execute(
            &program,
            Escaper::Html,
            &mut ctx,
            &Registry::new(),
            EvalOptions::default(),
        )
        .unwrap();
        assert_eq!(out, "HI hi");
    }

    #[test]
    fn test_eval_expr_value_keeps_type() {
        let expr = crate::parser::parse_expr("[1, 2] + [3]").unwrap();
        let value = eval_expr_value(&expr, &mut Namespace::new(), &Registry::new()).unwrap();
        assert_eq!(value, Value::from(vec![1i64, 2, 3]));
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = EvalError::host_error("failed to load").with_source(io_err);
        assert!(err.source().is_some());
        let cloned = err.clone();
        assert_eq!(cloned.source().map(|e| e.to_string()).as_deref(), Some("file missing"));
    }
}

// ── Resource limits and options tests ───────────────────────────────────

#[cfg(test)]
mod options_tests {
    use super::*;
    use crate::compiler::{SourceInfo, compile};

    fn render_with(source: &str, opts: EvalOptions) -> Result<String, RenderError> {
        let program = compile(source, &SourceInfo::default()).expect("compile failed");
        execute(
            &program,
            Escaper::Text,
            &mut Namespace::new(),
            &Registry::with_builtins(),
            opts,
        )
    }

    #[test]
    fn test_step_limit() {
        let src = r#"<% for item in ["a", "b", "c", "d", "e"] %><%= item %><% end %>"#;
        let err = render_with(src, EvalOptions::new().max_steps(3)).unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::ResourceLimit);
        assert!(err.error.message.contains("steps"));
    }

    #[test]
    fn test_step_limit_sufficient() {
        let out = render_with("Hello, world!", EvalOptions::new().max_steps(100)).unwrap();
        assert_eq!(out, "Hello, world!");
    }

    #[test]
    fn test_iteration_limit() {
        let src = "<% for item in range(10) %><%= item %><% end %>";
        let err = render_with(src, EvalOptions::new().max_iterations(5)).unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::ResourceLimit);
        assert!(err.error.message.contains("loop iterations"));
    }

    #[test]
    fn test_iteration_limit_stops_infinite_while() {
        let err = render_with("<% while true %>x<% end %>", EvalOptions::new().max_iterations(50))
            .unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::ResourceLimit);
    }

    #[test]
    fn test_iteration_limit_sufficient() {
        let src = r#"<% for item in ["a", "b", "c"] %><%= item %><% end %>"#;
        let out = render_with(src, EvalOptions::new().max_iterations(3)).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_cancellation() {
        let token = Arc::new(AtomicBool::new(true));
        let err = render_with("Hello!", EvalOptions::new().cancellation_token(token)).unwrap_err();
        assert_eq!(err.kind(), EvalErrorKind::Cancelled);
    }

    #[test]
    fn test_cancellation_not_triggered() {
        let token = Arc::new(AtomicBool::new(false));
        let out = render_with("Hello!", EvalOptions::new().cancellation_token(token)).unwrap();
        assert_eq!(out, "Hello!");
    }
}
