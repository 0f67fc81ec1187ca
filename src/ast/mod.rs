//! Syntax tree and program types for embr.
//!
//! There are two layers:
//!
//! - **Program layer** ([`program`]): the flat, immutable instruction
//!   sequence a template compiles to. Literal text, expression output and
//!   statements appear in render order.
//! - **Code layer** ([`expr`]): expressions and statements parsed from the
//!   code inside directives. Expression results are converted to text only
//!   when an output directive emits them.

pub mod expr;
pub mod program;
pub mod span;
pub mod value;

// Convenience re-exports
pub use expr::*;
pub use program::{Instruction, Program};
pub use span::{Span, Spanned};
pub use value::Value;
