//! # embr
//!
//! Embedded-code text templates. Template source mixes literal text with
//! directives:
//!
//! | Directive        | Effect                                          |
//! |------------------|-------------------------------------------------|
//! | `<% code %>`     | run a statement (`for`, `if`, assignment, ...)  |
//! | `<%= expr %>`    | emit the value, escaped in HTML templates       |
//! | `<%== expr %>`   | emit the value unescaped                        |
//! | `<%# comment %>` | emit nothing (line breaks inside are kept)      |
//!
//! A [`Template`] compiles its source once into an immutable [`Program`]
//! and renders it any number of times against fresh variable bindings.
//! Statements and expressions are written in a small language: variables,
//! field and index access, calls to functions from a [`Registry`],
//! arithmetic, comparisons, and `for`/`while`/`if` blocks closed by `end`.
//!
//! ## Quick start
//!
//! ```rust
//! use embr::{Template, Value};
//!
//! let template = Template::html(
//!     "<h1><%= title %></h1>\n<% for item in items %>\n  <p><%= item %></p>\n<% end %>\n",
//! ).unwrap();
//!
//! let output = template
//!     .render([
//!         ("title", Value::from("Example")),
//!         ("items", Value::from(vec!["<A>", "B&B"])),
//!     ])
//!     .unwrap();
//! assert_eq!(output, "<h1>Example</h1>\n  <p>&lt;A&gt;</p>\n  <p>B&amp;B</p>\n");
//! ```
//!
//! ## Contexts
//!
//! Plain bindings are wrapped in a fresh [`Namespace`] for each render.
//! Pass `&mut` to any [`Context`] implementation instead to render against
//! host state; it is used as-is, and assignments made by the template
//! stay in it:
//!
//! ```rust
//! use embr::{Namespace, Template};
//!
//! let template = Template::text("<% @count = count + 1 %>count=<%= count %>").unwrap();
//! let mut ns = Namespace::new();
//! ns.insert("count", 1i64);
//!
//! assert_eq!(template.render(&mut ns).unwrap(), "count=2");
//! assert_eq!(template.render(&mut ns).unwrap(), "count=3");
//! ```
//!
//! ## Render options
//!
//! Use [`EvalOptions`] with [`Template::render_with`] to bound the work a
//! render may do:
//!
//! ```rust
//! use embr::{EvalErrorKind, EvalOptions, Namespace, Registry, Template};
//!
//! let template = Template::text("<% while true %>.<% end %>").unwrap();
//! let err = template
//!     .render_with(
//!         Namespace::new(),
//!         &Registry::with_builtins(),
//!         EvalOptions::new().max_iterations(1_000),
//!     )
//!     .unwrap_err();
//! assert_eq!(err.kind(), EvalErrorKind::ResourceLimit);
//! ```

pub mod ast;
pub mod compiler;
pub mod error;
pub mod escape;
pub mod eval;
pub mod loader;
mod parser;
pub mod registry;

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

pub use ast::program::{Instruction, Program};
pub use ast::span::{Span, Spanned};
pub use ast::value::Value;
pub use compiler::{SourceInfo, compile};
pub use error::{
    CompileError, CompileErrorKind, EvalError, EvalErrorKind, LoadError, Location, RenderError,
    TemplateError,
};
pub use escape::{Escaper, escape_html};
pub use eval::{Context, EvalOptions, Namespace, RenderInput, eval_expr_value, execute};
pub use loader::load_template_source;
pub use parser::{SyntaxError, parse_expr, parse_statement};
pub use registry::{
    ClosureFunction, FunctionSignature, ParamDef, Registry, TemplateFunction, ValueType,
};

fn builtin_registry() -> &'static Registry {
    static BUILTINS: OnceLock<Registry> = OnceLock::new();
    BUILTINS.get_or_init(Registry::with_builtins)
}

/// A compiled template bound to an escaping policy.
///
/// Immutable after construction; share it freely between threads and
/// render it concurrently, each call with its own context.
///
/// ```rust
/// use embr::Template;
///
/// let template = Template::text("HP: <%= hp %>").unwrap();
/// assert_eq!(template.render([("hp", 100i64)]).unwrap(), "HP: 100");
/// assert_eq!(template.render([("hp", 75i64)]).unwrap(), "HP: 75");
/// ```
#[derive(Debug, Clone)]
pub struct Template {
    program: Program,
    escaper: Escaper,
}

impl Template {
    /// Compile in-memory source, named `(template)` in diagnostics.
    pub fn from_string(source: &str, escaper: Escaper) -> Result<Self, CompileError> {
        Self::from_source(source, SourceInfo::default(), escaper)
    }

    /// Compile in-memory source with an explicit name and first line
    /// number for diagnostics.
    pub fn from_source(
        source: &str,
        info: SourceInfo,
        escaper: Escaper,
    ) -> Result<Self, CompileError> {
        let program = compile(source, &info)?;
        Ok(Self { program, escaper })
    }

    /// Load a template file with [`load_template_source`] and compile it.
    /// The path is the template's name in diagnostics.
    pub fn from_file(
        path: impl AsRef<Path>,
        encoding: &str,
        escaper: Escaper,
    ) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let source = load_template_source(path, encoding)?;
        let info = SourceInfo::new(path.display().to_string());
        Ok(Self::from_source(&source, info, escaper)?)
    }

    /// A plain-text template: no output escaping.
    pub fn text(source: &str) -> Result<Self, CompileError> {
        Self::from_string(source, Escaper::Text)
    }

    /// An HTML template: `<%= %>` output is entity-escaped.
    pub fn html(source: &str) -> Result<Self, CompileError> {
        Self::from_string(source, Escaper::Html)
    }

    /// Load an HTML template from a file.
    pub fn load_html(path: impl AsRef<Path>, encoding: &str) -> Result<Self, TemplateError> {
        Self::from_file(path, encoding, Escaper::Html)
    }

    /// Render with the built-in functions and no resource limits.
    pub fn render<'a>(&self, input: impl Into<RenderInput<'a>>) -> Result<String, RenderError> {
        self.render_with(input, builtin_registry(), EvalOptions::default())
    }

    /// Render with a custom function registry and options.
    pub fn render_with<'a>(
        &self,
        input: impl Into<RenderInput<'a>>,
        registry: &Registry,
        options: EvalOptions,
    ) -> Result<String, RenderError> {
        match input.into() {
            RenderInput::Bindings(bindings) => {
                let mut ctx = self.new_context(bindings);
                execute(&self.program, self.escaper, &mut ctx, registry, options)
            }
            RenderInput::Namespace(mut ctx) => {
                execute(&self.program, self.escaper, &mut ctx, registry, options)
            }
            RenderInput::Context(ctx) => {
                execute(&self.program, self.escaper, ctx, registry, options)
            }
        }
    }

    /// Build the context a render from `bindings` would run against.
    pub fn new_context(&self, bindings: HashMap<String, Value>) -> Namespace {
        Namespace::from_bindings(bindings, self.escaper)
    }

    /// The compiled program, for inspection.
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn escaper(&self) -> Escaper {
        self.escaper
    }
}
