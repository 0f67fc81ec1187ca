use super::{ClosureFunction, ParamDef, Registry, ValueType};
use crate::ast::value::Value;
use crate::error::{EvalError, EvalErrorKind};
use crate::escape::escape_html;

use super::ValueType::{Any, Array, Map, Number, String as Str};

/// Install every built-in function into `registry`.
pub(super) fn register_all(registry: &mut Registry) {
    let string_fns: [(&str, fn(&str) -> String); 5] = [
        ("upcase", |s| s.to_uppercase()),
        ("downcase", |s| s.to_lowercase()),
        ("capitalize", capitalize),
        ("trim", |s| s.trim().to_string()),
        ("h", |s| escape_html(s).into_owned()),
    ];
    for (name, transform) in string_fns {
        registry.register(
            ClosureFunction::new(name, move |args| {
                Ok(Value::String(transform(&first_arg(args).to_output_string())))
            })
            .params(vec![ParamDef::required("value", Any)]),
        );
    }

    registry.register(
        ClosureFunction::new("str", |args| {
            Ok(Value::String(first_arg(args).to_output_string()))
        })
        .params(vec![ParamDef::required("value", Any)]),
    );

    registry.register(
        ClosureFunction::new("len", |args| len(&first_arg(args)))
            .params(vec![ParamDef::required("value", Any)]),
    );

    registry.register(
        ClosureFunction::new("join", |args| {
            let mut args = args.into_iter();
            let items = args.next().and_then(Value::into_array).unwrap_or_default();
            let sep = args.next().map(|v| v.to_output_string()).unwrap_or_default();
            let parts: Vec<String> = items.iter().map(Value::to_output_string).collect();
            Ok(Value::String(parts.join(&sep)))
        })
        .params(vec![
            ParamDef::required("items", Array),
            ParamDef::optional("separator", Str),
        ]),
    );

    registry.register(
        ClosureFunction::new("range", |args| range(&args)).params(vec![
            ParamDef::required("start_or_end", Number),
            ParamDef::optional("end", Number),
        ]),
    );

    registry.register(
        ClosureFunction::new("keys", |args| match first_arg(args) {
            Value::Map(map) => Ok(Value::Array(map.into_keys().map(Value::String).collect())),
            _ => Ok(Value::Nil),
        })
        .params(vec![ParamDef::required("map", Map)]),
    );

    registry.register(
        ClosureFunction::new("values", |args| match first_arg(args) {
            Value::Map(map) => Ok(Value::Array(map.into_values().collect())),
            _ => Ok(Value::Nil),
        })
        .params(vec![ParamDef::required("map", Map)]),
    );

    registry.register(
        ClosureFunction::new("first", |args| edge(first_arg(args), true))
            .params(vec![ParamDef::required("value", Any)]),
    );

    registry.register(
        ClosureFunction::new("last", |args| edge(first_arg(args), false))
            .params(vec![ParamDef::required("value", Any)]),
    );

    registry.register(
        ClosureFunction::new("reverse", |args| match first_arg(args) {
            Value::Array(mut items) => {
                items.reverse();
                Ok(Value::Array(items))
            }
            Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
            other => Err(EvalError::type_error("array or string", other.type_name())),
        })
        .params(vec![ParamDef::required("value", Any)]),
    );

    registry.register(
        ClosureFunction::new("default", |args| {
            let mut args = args.into_iter();
            let value = args.next().unwrap_or_default();
            let fallback = args.next().unwrap_or_default();
            Ok(if value.is_nil() { fallback } else { value })
        })
        .params(vec![
            ParamDef::required("value", Any),
            ParamDef::required("fallback", Any),
        ]),
    );
}

fn first_arg(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or_default()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
    }
}

fn len(value: &Value) -> Result<Value, EvalError> {
    match value {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(items) => Ok(Value::from(items.len())),
        Value::Map(map) => Ok(Value::from(map.len())),
        other => Err(EvalError::type_error("string, array or map", other.type_name())),
    }
}

fn edge(value: Value, front: bool) -> Result<Value, EvalError> {
    match value {
        Value::Array(mut items) => Ok(if front {
            items.into_iter().next().unwrap_or_default()
        } else {
            items.pop().unwrap_or_default()
        }),
        Value::String(s) => {
            let c = if front { s.chars().next() } else { s.chars().next_back() };
            Ok(c.map(|c| Value::String(c.to_string())).unwrap_or_default())
        }
        other => Err(EvalError::type_error("array or string", other.type_name())),
    }
}

/// Longest array `range` will build.
const MAX_RANGE_LEN: i64 = 1_000_000;

/// `range(end)` counts from 0; `range(start, end)` from `start`. Both
/// exclude `end`.
fn range(args: &[Value]) -> Result<Value, EvalError> {
    let bounds: Vec<i64> = args
        .iter()
        .map(|v| {
            let n = v.as_number().unwrap_or(0.0);
            if n.fract() != 0.0 {
                return Err(EvalError::new(
                    EvalErrorKind::TypeError,
                    format!("range() bounds must be integers, got {n}"),
                ));
            }
            Ok(n as i64)
        })
        .collect::<Result<_, _>>()?;

    let (start, end) = match bounds.as_slice() {
        [end] => (0, *end),
        [start, end] => (*start, *end),
        _ => (0, 0),
    };
    let len = end.saturating_sub(start);
    if len > MAX_RANGE_LEN {
        return Err(EvalError::new(
            EvalErrorKind::ResourceLimit,
            format!("range() of {len} items exceeds the maximum of {MAX_RANGE_LEN}"),
        ));
    }
    Ok(Value::Array((start..end).map(Value::from).collect()))
}
