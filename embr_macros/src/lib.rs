use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{FnArg, ItemFn, Pat, Type, parse_macro_input};

/// Derive an `embr::TemplateFunction` implementation from a function.
///
/// The function's parameters become positional arguments, in order, with
/// automatic type validation. One reserved parameter name receives a
/// system value instead:
///
/// - `ctx` receives `&mut dyn embr::Context` (read and write variables)
///
/// The generated unit struct is named after the function in PascalCase
/// with a `Function` suffix (`fn word_count` becomes `WordCountFunction`)
/// and is registered with `Registry::register`.
///
/// # Attribute syntax
///
/// ```ignore
/// #[template_function]                  // callable as the function's name
/// #[template_function(name = "wc")]     // callable as `wc(...)`
/// ```
///
/// # Supported parameter types
/// - `Value` accepts any value, no validation
/// - `String` validates the arg is a string, passes the inner String
/// - `f64` validates the arg is a number, passes the inner f64
/// - `i64` validates the arg is a whole number
/// - `bool` validates the arg is a bool, passes the inner bool
/// - `Vec<Value>` validates the arg is an array, passes the inner Vec
/// - `BTreeMap<String, Value>` validates the arg is a map
/// - `Option<T>` for any of the above makes the argument optional;
///   a missing argument or `nil` passes `None`
///
/// # Examples
///
/// ```ignore
/// #[template_function(name = "repeat")]
/// fn repeat_text(text: String, count: i64, sep: Option<String>) -> Result<Value, EvalError> {
///     let parts = vec![text; count.max(0) as usize];
///     Ok(Value::String(parts.join(&sep.unwrap_or_default())))
/// }
/// ```
///
/// Function that writes the context:
/// ```ignore
/// #[template_function]
/// fn remember(key: String, value: Value, ctx: &mut dyn Context) -> Result<Value, EvalError> {
///     ctx.set(&key, value)?;
///     Ok(Value::Nil)
/// }
/// ```
#[proc_macro_attribute]
pub fn template_function(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as FunctionArgs);
    let input_fn = parse_macro_input!(item as ItemFn);

    let fn_name = &input_fn.sig.ident;
    let struct_name = format_ident!("{}Function", to_pascal_case(&fn_name.to_string()));
    let callable_name = args.name.unwrap_or_else(|| fn_name.to_string());

    let mut extractions = Vec::new();
    let mut param_names = Vec::new();
    let mut param_types = Vec::new();
    let mut param_defs = Vec::new();
    let mut call_args = Vec::new();
    let mut has_ctx = false;

    for fn_arg in &input_fn.sig.inputs {
        let FnArg::Typed(pat_type) = fn_arg else {
            return syn::Error::new_spanned(fn_arg, "template functions cannot take `self`")
                .to_compile_error()
                .into();
        };
        let Pat::Ident(ident) = &*pat_type.pat else {
            return syn::Error::new_spanned(&pat_type.pat, "expected a plain parameter name")
                .to_compile_error()
                .into();
        };

        let param_name = &ident.ident;
        let param_name_str = param_name.to_string();
        param_names.push(param_name.clone());
        call_args.push(quote! { #param_name });

        if param_name_str == "ctx" {
            has_ctx = true;
            param_types.push(quote! { &mut dyn embr::Context });
            continue;
        }

        let arg = generate_arg_extraction(&param_name_str, &pat_type.ty);
        extractions.push(arg.extraction);
        param_types.push(arg.rust_type);
        let value_type = arg.value_type;
        let required = arg.required;
        param_defs.push(quote! {
            embr::registry::ParamDef {
                name: #param_name_str.to_string(),
                expected_type: Some(#value_type),
                required: #required,
            }
        });
    }

    let fn_body = &input_fn.block;
    let output_ty = &input_fn.sig.output;
    let vis = &input_fn.vis;

    let ctx_binding = if has_ctx {
        quote! {}
    } else {
        quote! { let _ = ctx; }
    };

    let output = quote! {
        #vis struct #struct_name;

        impl #struct_name {
            fn execute(#(#param_names: #param_types),*) #output_ty #fn_body
        }

        impl embr::registry::TemplateFunction for #struct_name {
            fn call(
                &self,
                args: Vec<embr::Value>,
                ctx: &mut dyn embr::Context,
            ) -> Result<embr::Value, embr::EvalError> {
                #ctx_binding
                #[allow(unused_mut, unused_variables)]
                let mut args = args.into_iter();
                #(#extractions)*
                Self::execute(#(#call_args),*)
            }

            fn signature(&self) -> embr::registry::FunctionSignature {
                embr::registry::FunctionSignature {
                    name: #callable_name.to_string(),
                    params: vec![#(#param_defs),*],
                    variadic: false,
                }
            }
        }
    };

    output.into()
}

struct ArgExtraction {
    extraction: TokenStream2,
    value_type: TokenStream2,
    rust_type: TokenStream2,
    required: bool,
}

/// Generate the code that pulls the next positional argument out of the
/// `args` iterator and converts it to the parameter's Rust type.
fn generate_arg_extraction(name: &str, ty: &Type) -> ArgExtraction {
    let ident = format_ident!("{}", name);
    let type_str = quote!(#ty).to_string().replace(' ', "");

    if let Some(inner) = type_str
        .strip_prefix("Option<")
        .and_then(|rest| rest.strip_suffix('>'))
    {
        let (convert, value_type, rust_type) = conversion(name, inner);
        return ArgExtraction {
            extraction: quote! {
                let #ident = match args.next() {
                    None | Some(embr::Value::Nil) => None,
                    Some(value) => Some((#convert)(value)?),
                };
            },
            value_type,
            rust_type: quote! { Option<#rust_type> },
            required: false,
        };
    }

    let (convert, value_type, rust_type) = conversion(name, &type_str);
    ArgExtraction {
        extraction: quote! {
            let #ident = match args.next() {
                Some(value) => (#convert)(value)?,
                None => return Err(embr::EvalError::new(
                    embr::EvalErrorKind::TypeError,
                    format!("missing required argument: {}", #name),
                )),
            };
        },
        value_type,
        rust_type,
        required: true,
    }
}

/// Returns (conversion closure, value_type token, rust_type token) for a
/// supported parameter type. Unknown types are passed through as `Value`.
fn conversion(name: &str, type_str: &str) -> (TokenStream2, TokenStream2, TokenStream2) {
    let mismatch = |expected: &str| {
        quote! {
            other => Err(embr::EvalError::new(
                embr::EvalErrorKind::TypeError,
                format!("argument `{}` must be {}, got {}", #name, #expected, other.type_name()),
            ))
        }
    };

    match type_str {
        "String" => {
            let mismatch = mismatch("a string");
            (
                quote! {
                    |value: embr::Value| -> Result<String, embr::EvalError> {
                        match value {
                            embr::Value::String(s) => Ok(s),
                            #mismatch,
                        }
                    }
                },
                quote! { embr::registry::ValueType::String },
                quote! { String },
            )
        }
        "f64" => {
            let mismatch = mismatch("a number");
            (
                quote! {
                    |value: embr::Value| -> Result<f64, embr::EvalError> {
                        match value {
                            embr::Value::Number(n) => Ok(n),
                            #mismatch,
                        }
                    }
                },
                quote! { embr::registry::ValueType::Number },
                quote! { f64 },
            )
        }
        "i64" => {
            let mismatch = mismatch("a whole number");
            (
                quote! {
                    |value: embr::Value| -> Result<i64, embr::EvalError> {
                        match value {
                            embr::Value::Number(n) if n.fract() == 0.0 => Ok(n as i64),
                            #mismatch,
                        }
                    }
                },
                quote! { embr::registry::ValueType::Number },
                quote! { i64 },
            )
        }
        "bool" => {
            let mismatch = mismatch("a bool");
            (
                quote! {
                    |value: embr::Value| -> Result<bool, embr::EvalError> {
                        match value {
                            embr::Value::Bool(b) => Ok(b),
                            #mismatch,
                        }
                    }
                },
                quote! { embr::registry::ValueType::Bool },
                quote! { bool },
            )
        }
        "Vec<Value>" => {
            let mismatch = mismatch("an array");
            (
                quote! {
                    |value: embr::Value| -> Result<Vec<embr::Value>, embr::EvalError> {
                        match value {
                            embr::Value::Array(items) => Ok(items),
                            #mismatch,
                        }
                    }
                },
                quote! { embr::registry::ValueType::Array },
                quote! { Vec<embr::Value> },
            )
        }
        "BTreeMap<String,Value>" => {
            let mismatch = mismatch("a map");
            (
                quote! {
                    |value: embr::Value| -> Result<std::collections::BTreeMap<String, embr::Value>, embr::EvalError> {
                        match value {
                            embr::Value::Map(map) => Ok(map),
                            #mismatch,
                        }
                    }
                },
                quote! { embr::registry::ValueType::Map },
                quote! { std::collections::BTreeMap<String, embr::Value> },
            )
        }
        _ => (
            quote! {
                |value: embr::Value| -> Result<embr::Value, embr::EvalError> { Ok(value) }
            },
            quote! { embr::registry::ValueType::Any },
            quote! { embr::Value },
        ),
    }
}

fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

// -- Attribute arg parsing -----------------------------------------------

struct FunctionArgs {
    name: Option<String>,
}

impl syn::parse::Parse for FunctionArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(FunctionArgs { name: None });
        }
        let ident: syn::Ident = input.parse()?;
        if ident != "name" {
            return Err(syn::Error::new(
                ident.span(),
                format!("unexpected key `{ident}`, expected `name`"),
            ));
        }
        input.parse::<syn::Token![=]>()?;
        let lit: syn::LitStr = input.parse()?;
        Ok(FunctionArgs {
            name: Some(lit.value()),
        })
    }
}
