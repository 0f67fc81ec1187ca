use std::collections::BTreeMap;

use embr::registry::TemplateFunction;
use embr::{Context, EvalError, EvalErrorKind, Namespace, Registry, Template, Value};
use embr_macros::template_function;

// ── Pure functions ──────────────────────────────────────────────────────

#[template_function(name = "greet")]
fn greet(name: String) -> Result<Value, EvalError> {
    Ok(Value::String(format!("Hello, {name}!")))
}

#[template_function(name = "double")]
fn double_number(n: f64) -> Result<Value, EvalError> {
    Ok(Value::Number(n * 2.0))
}

#[template_function(name = "yesno")]
fn yes_no(flag: bool) -> Result<Value, EvalError> {
    Ok(Value::String(if flag { "yes" } else { "no" }.to_string()))
}

#[template_function(name = "pick")]
fn pick_first(items: Vec<Value>) -> Result<Value, EvalError> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| EvalError::new(EvalErrorKind::HostError, "empty array"))
}

#[template_function(name = "repeat")]
fn repeat_text(text: String, count: i64, sep: Option<String>) -> Result<Value, EvalError> {
    let parts = vec![text; count.max(0) as usize];
    Ok(Value::String(parts.join(&sep.unwrap_or_default())))
}

#[template_function(name = "size")]
fn map_size(map: BTreeMap<String, Value>) -> Result<Value, EvalError> {
    Ok(Value::from(map.len()))
}

// Name defaults to the function's own.
#[template_function]
fn shout(text: Value) -> Result<Value, EvalError> {
    Ok(Value::String(text.to_output_string().to_uppercase()))
}

// ── Functions with context access ───────────────────────────────────────

#[template_function(name = "remember")]
fn remember(key: String, value: Value, ctx: &mut dyn Context) -> Result<Value, EvalError> {
    ctx.set(&key, value)?;
    Ok(Value::Nil)
}

#[template_function(name = "recall")]
fn recall(key: String, ctx: &mut dyn Context) -> Result<Value, EvalError> {
    Ok(ctx.get(&key)?.unwrap_or_default())
}

fn make_registry() -> Registry {
    let mut registry = Registry::with_builtins();
    registry.register(GreetFunction);
    registry.register(DoubleNumberFunction);
    registry.register(YesNoFunction);
    registry.register(PickFirstFunction);
    registry.register(RepeatTextFunction);
    registry.register(MapSizeFunction);
    registry.register(ShoutFunction);
    registry.register(RememberFunction);
    registry.register(RecallFunction);
    registry
}

fn render(source: &str, ns: &mut Namespace) -> Result<String, embr::RenderError> {
    Template::text(source)
        .expect("compile failed")
        .render_with(ns, &make_registry(), Default::default())
}

fn render_simple(source: &str) -> String {
    render(source, &mut Namespace::new()).expect("render failed")
}

// ── Tests ───────────────────────────────────────────────────────────────

#[test]
fn test_macro_string_function() {
    assert_eq!(render_simple(r#"<%= greet("world") %>"#), "Hello, world!");
}

#[test]
fn test_macro_number_function() {
    assert_eq!(render_simple("<%= double(21) %>"), "42");
}

#[test]
fn test_macro_bool_function() {
    assert_eq!(render_simple("<%= yesno(1 < 2) %>"), "yes");
}

#[test]
fn test_macro_array_function() {
    assert_eq!(render_simple(r#"<%= pick(["alpha", "beta"]) %>"#), "alpha");
}

#[test]
fn test_macro_map_function() {
    assert_eq!(render_simple("<%= size({a: 1, b: 2}) %>"), "2");
}

#[test]
fn test_macro_optional_argument() {
    assert_eq!(render_simple(r#"<%= repeat("ab", 3) %>"#), "ababab");
    assert_eq!(render_simple(r#"<%= repeat("ab", 3, "-") %>"#), "ab-ab-ab");
    assert_eq!(render_simple(r#"<%= repeat("ab", 2, nil) %>"#), "abab");
}

#[test]
fn test_macro_default_name_and_method_call() {
    assert_eq!(render_simple(r#"<%= "hey".shout() %>"#), "HEY");
}

#[test]
fn test_macro_signature() {
    let sig = RepeatTextFunction.signature();
    assert_eq!(sig.name, "repeat");
    assert!(!sig.variadic);
    let required: Vec<bool> = sig.params.iter().map(|p| p.required).collect();
    assert_eq!(required, vec![true, true, false]);
    assert_eq!(ShoutFunction.signature().name, "shout");
}

#[test]
fn test_macro_with_ctx_sets_variable() {
    let mut ns = Namespace::new();
    ns.insert("name", "Sarah");
    let out = render(
        "Name: <%= name %>\n<% remember(\"name\", \"Alice\") %>\nNew name: <%= name %>",
        &mut ns,
    )
    .unwrap();
    assert_eq!(out, "Name: Sarah\nNew name: Alice");
    assert_eq!(ns.get("name").unwrap(), Some(Value::from("Alice")));
}

#[test]
fn test_macro_with_ctx_reads_variable() {
    let mut ns = Namespace::new();
    ns.insert("score", 42i64);
    assert_eq!(render(r#"<%= recall("score") %>"#, &mut ns).unwrap(), "42");
}

#[test]
fn test_type_validation_rejects_wrong_type() {
    let err = render("<%= greet(42) %>", &mut Namespace::new()).unwrap_err();
    assert_eq!(err.kind(), EvalErrorKind::TypeError);
    assert!(err.error.message.contains("string"));
}

#[test]
fn test_whole_number_required() {
    let err = render(r#"<%= repeat("ab", 1.5) %>"#, &mut Namespace::new()).unwrap_err();
    assert_eq!(err.kind(), EvalErrorKind::TypeError);
    assert!(err.error.message.contains("whole number"));
}

#[test]
fn test_direct_call_validates_arguments() {
    // Bypasses the registry, so the generated extraction does the checking.
    let mut ns = Namespace::new();

    let err = GreetFunction.call(vec![], &mut ns).unwrap_err();
    assert_eq!(err.kind, EvalErrorKind::TypeError);
    assert!(err.message.contains("name"));

    let err = GreetFunction.call(vec![Value::Bool(true)], &mut ns).unwrap_err();
    assert_eq!(err.message, "argument `name` must be a string, got bool");

    assert_eq!(
        DoubleNumberFunction.call(vec![Value::Number(4.0)], &mut ns).unwrap(),
        Value::Number(8.0)
    );
}

#[test]
fn test_function_error_reports_line() {
    let err = render("ok\n<%= pick([]) %>", &mut Namespace::new()).unwrap_err();
    assert_eq!(err.kind(), EvalErrorKind::HostError);
    assert_eq!(err.location.line, 2);
}
