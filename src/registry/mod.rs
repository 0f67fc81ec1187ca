//! Function registration for directive code.
//!
//! The [`Registry`] stores the functions that directive code can call,
//! either as `name(args)` or method-style as `receiver.name(args)`. The
//! host populates a registry before rendering, usually starting from
//! [`Registry::with_builtins`].
//!
//! There are two ways to register functions:
//!
//! - **Closure-based**: Use [`ClosureFunction`] for simple cases where a
//!   full trait implementation would be boilerplate.
//! - **Trait-based**: Implement [`TemplateFunction`] directly for more
//!   control, or let the `#[template_function]` macro in the
//!   `embr_macros` crate generate the implementation from a plain
//!   function signature.

mod builtins;

use crate::ast::value::Value;
use crate::error::{EvalError, EvalErrorKind};
use crate::eval::Context;
use std::collections::HashMap;

// ── Trait definitions ───────────────────────────────────────────────────

/// A function callable from directive code.
///
/// Functions receive their arguments already evaluated, in call order,
/// together with mutable access to the render's context.
pub trait TemplateFunction: Send + Sync {
    /// Execute the function with pre-evaluated positional arguments.
    fn call(&self, args: Vec<Value>, ctx: &mut dyn Context) -> Result<Value, EvalError>;

    /// Declare this function's name and parameter expectations.
    fn signature(&self) -> FunctionSignature;
}

// ── Signatures ──────────────────────────────────────────────────────────

/// Describes a function's name and expected parameters.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ParamDef>,
    /// Accept any number of arguments of any type; `params` is then
    /// documentation only.
    pub variadic: bool,
}

impl FunctionSignature {
    /// Check argument count and types against the declared parameters.
    pub fn validate(&self, args: &[Value]) -> Result<(), EvalError> {
        if self.variadic {
            return Ok(());
        }

        let required = self.params.iter().filter(|p| p.required).count();
        let max = self.params.len();
        if args.len() < required || args.len() > max {
            let expected = if required == max {
                format!("{max}")
            } else {
                format!("{required} to {max}")
            };
            return Err(EvalError::new(
                EvalErrorKind::TypeError,
                format!(
                    "{}() takes {expected} argument{}, got {}",
                    self.name,
                    if max == 1 { "" } else { "s" },
                    args.len()
                ),
            ));
        }

        for (param, arg) in self.params.iter().zip(args) {
            if !param.required && arg.is_nil() {
                continue;
            }
            if let Some(expected) = param.expected_type
                && !expected.matches(arg)
            {
                return Err(EvalError::new(
                    EvalErrorKind::TypeError,
                    format!(
                        "{}(): argument `{}` must be {}, got {}",
                        self.name,
                        param.name,
                        expected.describe(),
                        arg.type_name()
                    ),
                ));
            }
        }

        Ok(())
    }
}

/// A positional parameter definition for a function signature.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub expected_type: Option<ValueType>,
    pub required: bool,
}

impl ParamDef {
    pub fn required(name: impl Into<String>, expected_type: ValueType) -> Self {
        Self {
            name: name.into(),
            expected_type: Some(expected_type),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, expected_type: ValueType) -> Self {
        Self {
            name: name.into(),
            expected_type: Some(expected_type),
            required: false,
        }
    }
}

/// Type tag used in signatures for runtime validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Bool,
    Array,
    Map,
    /// Accepts any value type.
    Any,
}

impl ValueType {
    /// Check whether a runtime [`Value`] matches this type expectation.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::String => matches!(value, Value::String(_)),
            ValueType::Number => matches!(value, Value::Number(_)),
            ValueType::Bool => matches!(value, Value::Bool(_)),
            ValueType::Array => matches!(value, Value::Array(_)),
            ValueType::Map => matches!(value, Value::Map(_)),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ValueType::Any => "any value",
            ValueType::String => "a string",
            ValueType::Number => "a number",
            ValueType::Bool => "a bool",
            ValueType::Array => "an array",
            ValueType::Map => "a map",
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────────

struct Entry {
    signature: FunctionSignature,
    function: Box<dyn TemplateFunction>,
}

/// Stores registered functions for use during rendering.
///
/// ```rust
/// use embr::{ClosureFunction, ParamDef, Registry, Value, ValueType};
///
/// let mut registry = Registry::with_builtins();
///
/// registry.register(
///     ClosureFunction::new("double", |args| {
///         let n = args[0].as_number().unwrap_or(0.0);
///         Ok(Value::Number(n * 2.0))
///     })
///     .params(vec![ParamDef::required("n", ValueType::Number)]),
/// );
/// assert!(registry.contains("double"));
/// ```
pub struct Registry {
    functions: HashMap<String, Entry>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A registry holding the built-in function set (`len`, `upcase`,
    /// `join`, `range`, ...).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    /// Register a function. If a function with the same name already
    /// exists, it is replaced.
    pub fn register(&mut self, function: impl TemplateFunction + 'static) {
        let signature = function.signature();
        self.functions.insert(
            signature.name.clone(),
            Entry {
                signature,
                function: Box::new(function),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Names of all registered functions, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Validate the arguments against the function's signature and
    /// dispatch the call. Returns [`EvalError`] if the function is not
    /// registered.
    pub fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        ctx: &mut dyn Context,
    ) -> Result<Value, EvalError> {
        match self.functions.get(name) {
            Some(entry) => {
                entry.signature.validate(&args)?;
                entry.function.call(args, ctx)
            }
            None => Err(EvalError::undefined_function(name)),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.names())
            .finish()
    }
}

// ── Closure-based convenience wrapper ───────────────────────────────────

/// A [`TemplateFunction`] implementation backed by a closure.
///
/// Use this for simple functions where implementing the trait manually
/// would be boilerplate. Closure functions do not receive the context;
/// for functions that read or write variables, implement
/// [`TemplateFunction`] directly.
///
/// Without [`params`](ClosureFunction::params) the function accepts any
/// arguments.
///
/// ```rust
/// use embr::{ClosureFunction, Value};
///
/// let greet = ClosureFunction::new("greet", |args| {
///     let name = args.first().and_then(|v| v.as_string()).unwrap_or("world");
///     Ok(Value::String(format!("Hello, {name}!")))
/// });
/// ```
pub struct ClosureFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, EvalError> + Send + Sync,
{
    sig: FunctionSignature,
    func: F,
}

impl<F> ClosureFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, EvalError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            sig: FunctionSignature {
                name: name.into(),
                params: Vec::new(),
                variadic: true,
            },
            func,
        }
    }

    /// Declare the parameters, turning on argument validation.
    pub fn params(mut self, params: Vec<ParamDef>) -> Self {
        self.sig.params = params;
        self.sig.variadic = false;
        self
    }
}

impl<F> TemplateFunction for ClosureFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value, EvalError> + Send + Sync,
{
    fn call(&self, args: Vec<Value>, _ctx: &mut dyn Context) -> Result<Value, EvalError> {
        (self.func)(args)
    }

    fn signature(&self) -> FunctionSignature {
        self.sig.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Namespace;

    fn call(registry: &Registry, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        registry.call(name, args, &mut Namespace::new())
    }

    #[test]
    fn test_unknown_function() {
        let err = call(&Registry::new(), "nope", vec![]).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UndefinedFunction);
        assert_eq!(err.message, "undefined function: nope");
    }

    #[test]
    fn test_variadic_closure_accepts_anything() {
        let mut registry = Registry::new();
        registry.register(ClosureFunction::new("count", |args| Ok(Value::from(args.len()))));
        assert_eq!(
            call(&registry, "count", vec![Value::Nil, Value::from(1i64)]).unwrap(),
            Value::Number(2.0)
        );
    }

    #[test]
    fn test_declared_params_are_validated() {
        let mut registry = Registry::new();
        registry.register(
            ClosureFunction::new("half", |args| {
                Ok(Value::Number(args[0].as_number().unwrap_or(0.0) / 2.0))
            })
            .params(vec![ParamDef::required("n", ValueType::Number)]),
        );

        assert_eq!(
            call(&registry, "half", vec![Value::from(4i64)]).unwrap(),
            Value::Number(2.0)
        );

        let err = call(&registry, "half", vec![]).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeError);
        assert_eq!(err.message, "half() takes 1 argument, got 0");

        let err = call(&registry, "half", vec![Value::from("x")]).unwrap_err();
        assert_eq!(err.message, "half(): argument `n` must be a number, got string");
    }

    #[test]
    fn test_optional_params_arity_message() {
        let sig = FunctionSignature {
            name: "join".to_string(),
            params: vec![
                ParamDef::required("items", ValueType::Array),
                ParamDef::optional("sep", ValueType::String),
            ],
            variadic: false,
        };
        let err = sig.validate(&[]).unwrap_err();
        assert_eq!(err.message, "join() takes 1 to 2 arguments, got 0");
        assert!(sig.validate(&[Value::Array(vec![])]).is_ok());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = Registry::new();
        registry.register(ClosureFunction::new("f", |_| Ok(Value::from(1i64))));
        registry.register(ClosureFunction::new("f", |_| Ok(Value::from(2i64))));
        assert_eq!(call(&registry, "f", vec![]).unwrap(), Value::Number(2.0));
        assert_eq!(registry.names(), vec!["f"]);
    }

    #[test]
    fn test_trait_function_can_write_context() {
        struct Remember;
        impl TemplateFunction for Remember {
            fn call(&self, args: Vec<Value>, ctx: &mut dyn Context) -> Result<Value, EvalError> {
                ctx.set("remembered", args.into_iter().next().unwrap_or_default())?;
                Ok(Value::Nil)
            }
            fn signature(&self) -> FunctionSignature {
                FunctionSignature {
                    name: "remember".to_string(),
                    params: vec![ParamDef::required("value", ValueType::Any)],
                    variadic: false,
                }
            }
        }

        let mut registry = Registry::new();
        registry.register(Remember);
        let mut ns = Namespace::new();
        registry
            .call("remember", vec![Value::from("x")], &mut ns)
            .unwrap();
        assert_eq!(ns.get("remembered").unwrap(), Some(Value::from("x")));
    }
}
