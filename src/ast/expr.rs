use super::{span::Spanned, value::Value};

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Literal value: "hello", 42, true, nil
    Literal(Value),

    /// Array literal: [1, 2, "three"]
    ArrayLiteral(Vec<Expr>),

    /// Map literal: {"a": 1, b: 2}
    MapLiteral(Vec<(String, Expr)>),

    /// Variable reference: `name` or `@name`
    Variable(VariableRef),

    /// Field access: `user.name`
    Field { target: Box<Expr>, name: String },

    /// Index access: `items[0]`, `user["name"]`
    Index { target: Box<Expr>, index: Box<Expr> },

    /// Function call: `upcase(name)`. Method-style calls (`name.upcase()`)
    /// are desugared into this form with the receiver as first argument.
    Call(FunctionCall),

    /// Binary operation: a == b, a + b
    BinaryOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },

    /// Unary operation: !condition, -number
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
}

#[derive(Debug, Clone)]
pub struct VariableRef {
    pub name: String,
    /// `true` for `@name`: looked up in the context only, and an unset
    /// name reads as `nil` instead of failing.
    pub context_only: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Comparison
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Logical
    And,
    Or,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    pub fn precedence(&self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::NotEq => 3,
            BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

pub type Stmt = Spanned<StmtKind>;

/// A statement directive after parsing.
///
/// Block statements refer to other instructions of the same program by
/// index. The parser leaves those indices at `0`; the compiler links
/// them once the whole instruction sequence is known.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Empty directive code.
    Noop,

    /// `name = expr` / `@name = expr`. A bare name that is bound by an
    /// enclosing loop rebinds the loop variable; otherwise the context is
    /// written.
    Assign { target: VariableRef, value: Expr },

    /// Any expression evaluated for its side effects.
    Eval(Expr),

    /// `for x in expr` / `for k, v in expr`; `end` is the index of the
    /// matching `end` instruction.
    For {
        binding: LoopBinding,
        iterable: Expr,
        end: usize,
    },

    /// `while expr`
    While { condition: Expr, end: usize },

    /// `if expr` / `unless expr`; `next` is the index of the following
    /// `elsif`, `else` or `end` of the same chain.
    If {
        condition: Expr,
        negate: bool,
        next: usize,
    },

    /// `elsif expr`; `end` is the index of the chain's `end`.
    Elsif {
        condition: Expr,
        next: usize,
        end: usize,
    },

    /// `else`
    Else { end: usize },

    /// `end`
    End(BlockEnd),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopBinding {
    Single(String),
    Pair(String, String),
}

/// What an `end` closes, as resolved by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// Unlinked; only present between parsing and linking.
    Pending,
    Conditional,
    For { start: usize },
    While { start: usize },
}
