use std::collections::{BTreeMap, HashMap};

use crate::ast::value::Value;
use crate::error::EvalError;
use crate::escape::Escaper;

/// The variable namespace directive code runs against.
///
/// The interpreter calls these methods for `name`/`@name` reads, for
/// assignments, and when an escaped expression is emitted by an HTML
/// template. Loop bindings (`for item in ...`) are managed by the
/// interpreter itself and never reach the context.
///
/// Implement this trait to back a render with host state, or to change
/// how values are escaped; the default `escape` emits the plain text
/// form.
pub trait Context {
    /// Look up a variable by name.
    ///
    /// Return `Ok(None)` if the variable does not exist. A bare `name`
    /// then fails with an undefined-variable error, while `@name` reads
    /// as `nil`.
    fn get(&self, name: &str) -> Result<Option<Value>, EvalError>;

    /// Store a variable.
    fn set(&mut self, name: &str, value: Value) -> Result<(), EvalError>;

    /// Text form of `value` for an escaped expression in an HTML
    /// template.
    fn escape(&self, value: &Value) -> String {
        value.to_output_string()
    }
}

/// The in-memory [`Context`] built for each render from plain bindings.
///
/// Carries the escaping policy of the template it was created for.
///
/// ```rust
/// use embr::{Context, Namespace, Value};
///
/// let mut ns = Namespace::html();
/// ns.insert("title", "<T>");
/// assert_eq!(ns.get("title").unwrap(), Some(Value::from("<T>")));
/// assert_eq!(ns.escape(&Value::from("<T>")), "&lt;T&gt;");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    variables: HashMap<String, Value>,
    escaper: Escaper,
}

impl Namespace {
    /// An empty plain-text namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty namespace that escapes for HTML.
    pub fn html() -> Self {
        Self::with_escaper(Escaper::Html)
    }

    pub fn with_escaper(escaper: Escaper) -> Self {
        Self {
            variables: HashMap::new(),
            escaper,
        }
    }

    /// One entry per binding.
    pub fn from_bindings(bindings: HashMap<String, Value>, escaper: Escaper) -> Self {
        Self {
            variables: bindings,
            escaper,
        }
    }

    /// Set a variable. Accepts any type that implements `Into<Value>`
    /// (strings, numbers, booleans, vectors, maps).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn escaper(&self) -> Escaper {
        self.escaper
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl Context for Namespace {
    fn get(&self, name: &str) -> Result<Option<Value>, EvalError> {
        Ok(self.variables.get(name).cloned())
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), EvalError> {
        self.variables.insert(name.to_string(), value);
        Ok(())
    }

    fn escape(&self, value: &Value) -> String {
        self.escaper.escape(value)
    }
}

/// What a render call runs against: plain bindings, which are wrapped in
/// a fresh [`Namespace`] matching the template's escaper, or a context
/// that is used as-is.
pub enum RenderInput<'a> {
    Bindings(HashMap<String, Value>),
    Namespace(Namespace),
    Context(&'a mut dyn Context),
}

impl std::fmt::Debug for RenderInput<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderInput::Bindings(b) => f.debug_tuple("Bindings").field(b).finish(),
            RenderInput::Namespace(ns) => f.debug_tuple("Namespace").field(ns).finish(),
            RenderInput::Context(_) => f.write_str("Context(..)"),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> From<HashMap<K, V>> for RenderInput<'_> {
    fn from(bindings: HashMap<K, V>) -> Self {
        RenderInput::Bindings(
            bindings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> From<BTreeMap<K, V>> for RenderInput<'_> {
    fn from(bindings: BTreeMap<K, V>) -> Self {
        RenderInput::Bindings(
            bindings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> From<Vec<(K, V)>> for RenderInput<'_> {
    fn from(bindings: Vec<(K, V)>) -> Self {
        RenderInput::Bindings(
            bindings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for RenderInput<'_> {
    fn from(bindings: [(K, V); N]) -> Self {
        RenderInput::Bindings(
            bindings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<Namespace> for RenderInput<'_> {
    fn from(namespace: Namespace) -> Self {
        RenderInput::Namespace(namespace)
    }
}

impl<'a, C: Context + 'a> From<&'a mut C> for RenderInput<'a> {
    fn from(context: &'a mut C) -> Self {
        RenderInput::Context(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_get_set() {
        let mut ns = Namespace::new();
        assert_eq!(ns.get("x").unwrap(), None);
        ns.set("x", Value::from(1i64)).unwrap();
        assert_eq!(ns.get("x").unwrap(), Some(Value::Number(1.0)));
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn test_base_escape_is_plain_text() {
        let ns = Namespace::new();
        assert_eq!(ns.escape(&Value::from("<b>")), "<b>");
    }

    #[test]
    fn test_html_namespace_escapes() {
        let ns = Namespace::html();
        assert_eq!(ns.escape(&Value::from("a & b")), "a &amp; b");
    }

    #[test]
    fn test_from_bindings_keeps_every_entry() {
        let mut bindings = HashMap::new();
        bindings.insert("a".to_string(), Value::from(1i64));
        bindings.insert("b".to_string(), Value::from("two"));
        let ns = Namespace::from_bindings(bindings, Escaper::Text);
        assert_eq!(ns.get("a").unwrap(), Some(Value::Number(1.0)));
        assert_eq!(ns.get("b").unwrap(), Some(Value::from("two")));
    }

    #[test]
    fn test_render_input_conversions() {
        assert!(matches!(
            RenderInput::from([("title", "T")]),
            RenderInput::Bindings(b) if b.get("title") == Some(&Value::from("T"))
        ));
        assert!(matches!(
            RenderInput::from(Namespace::new()),
            RenderInput::Namespace(_)
        ));
        let mut ns = Namespace::new();
        assert!(matches!(
            RenderInput::from(&mut ns),
            RenderInput::Context(_)
        ));
    }
}
