use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// The set of runtime value types a template namespace can hold.
///
/// Directive code produces `Value`s during rendering. When a `Value` is
/// emitted by an expression directive it is converted to text via
/// [`to_output_string`](Value::to_output_string); everywhere else the
/// variant is preserved so that conditions and arithmetic behave.
///
/// Conversion from common Rust types is provided via `From` impls:
///
/// ```rust
/// use embr::Value;
///
/// let s: Value = "hello".into();
/// let n: Value = 42i64.into();
/// let b: Value = true.into();
/// let a: Value = vec!["a", "b"].into();
/// let none: Value = Option::<i64>::None.into();
/// assert_eq!(none, Value::Nil);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    Array(Vec<Value>),
    /// String-keyed mapping, iterated in key order.
    Map(BTreeMap<String, Value>),
    /// The absence of a value. Falsy, renders as an empty string.
    #[default]
    Nil,
}

impl Value {
    /// Convert this value to its text form for template output.
    ///
    /// - `String`: returned as-is
    /// - `Number`: formatted without trailing `.0` for whole numbers
    /// - `Bool`: `"true"` or `"false"`
    /// - `Array`: elements joined with `", "`
    /// - `Map`: `{key: value, ...}`
    /// - `Nil`: empty string
    pub fn to_output_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|v| v.to_output_string())
                .collect::<Vec<_>>()
                .join(", "),
            Value::Map(entries) => {
                let body = entries
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.to_output_string()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{body}}}")
            }
            Value::Nil => String::new(),
        }
    }

    /// Type name for diagnostic messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Nil => "nil",
        }
    }

    /// Truthiness check, used by `if`, `while`, `unless` and the logical
    /// operators.
    ///
    /// Falsy values: empty string, `0`, `false`, empty array, empty map,
    /// `nil`. Everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0,
            Value::Bool(b) => *b,
            Value::Array(a) => !a.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Nil => false,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_output_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Nil)
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(m: BTreeMap<String, V>) -> Self {
        Value::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Value {
    fn from(m: HashMap<String, V>) -> Self {
        Value::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_numbers_render_without_fraction() {
        assert_eq!(Value::Number(3.0).to_output_string(), "3");
        assert_eq!(Value::Number(-2.0).to_output_string(), "-2");
        assert_eq!(Value::Number(2.5).to_output_string(), "2.5");
    }

    #[test]
    fn test_nil_renders_empty() {
        assert_eq!(Value::Nil.to_output_string(), "");
        assert!(!Value::Nil.is_truthy());
    }

    #[test]
    fn test_collections_render() {
        let arr: Value = vec![1i64, 2, 3].into();
        assert_eq!(arr.to_output_string(), "1, 2, 3");

        let mut m = BTreeMap::new();
        m.insert("b".to_string(), Value::from(2i64));
        m.insert("a".to_string(), Value::from("x"));
        assert_eq!(Value::Map(m).to_output_string(), "{a: x, b: 2}");
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::from("x").is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Array(vec![]).is_truthy());
        assert!(!Value::Map(BTreeMap::new()).is_truthy());
        assert!(Value::Bool(true).is_truthy());
    }
}
