//! Output escaping policies.

use std::borrow::Cow;

use crate::ast::value::Value;

/// How escaped-expression output (`<%= ... %>`) is transformed.
///
/// Chosen once when a [`Template`](crate::Template) is built. Raw
/// expressions (`<%== ... %>`) and literal text are never escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escaper {
    /// Plain text: values are emitted as their text form.
    #[default]
    Text,
    /// HTML: `&`, `<`, `>`, `"` and `'` are replaced by entities.
    Html,
}

impl Escaper {
    /// Convert `value` to text and apply this policy.
    pub fn escape(&self, value: &Value) -> String {
        let text = value.to_output_string();
        match self {
            Escaper::Text => text,
            Escaper::Html => match escape_html(&text) {
                Cow::Borrowed(_) => text,
                Cow::Owned(escaped) => escaped,
            },
        }
    }
}

/// Replace the five HTML-significant characters with their entities in
/// one left-to-right pass.
///
/// ```rust
/// assert_eq!(embr::escape_html("<a href='x'>B&B</a>"), "&lt;a href=&#39;x&#39;&gt;B&amp;B&lt;/a&gt;");
/// ```
pub fn escape_html(text: &str) -> Cow<'_, str> {
    let Some(first) = text.find(['&', '<', '>', '"', '\'']) else {
        return Cow::Borrowed(text);
    };

    let mut out = String::with_capacity(text.len() + 16);
    out.push_str(&text[..first]);
    for ch in text[first..].chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_each_special_character() {
        assert_eq!(escape_html("<AAA>"), "&lt;AAA&gt;");
        assert_eq!(escape_html("B&B"), "B&amp;B");
        assert_eq!(escape_html("\"CCC\""), "&quot;CCC&quot;");
        assert_eq!(escape_html("'D'"), "&#39;D&#39;");
    }

    #[test]
    fn test_entities_are_not_reescaped_in_one_pass() {
        assert_eq!(escape_html("&lt;"), "&amp;lt;");
    }

    #[test]
    fn test_text_policy_is_identity() {
        let value = Value::from("<b>");
        assert_eq!(Escaper::Text.escape(&value), "<b>");
        assert_eq!(Escaper::Html.escape(&value), "&lt;b&gt;");
    }

    #[test]
    fn test_non_string_values() {
        assert_eq!(Escaper::Html.escape(&Value::Number(3.0)), "3");
        assert_eq!(Escaper::Html.escape(&Value::Nil), "");
    }

    fn unescape(text: &str) -> String {
        text.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&")
    }

    proptest! {
        #[test]
        fn escaped_output_has_no_special_characters(s in ".*") {
            let escaped = escape_html(&s);
            prop_assert!(!escaped.contains(['<', '>', '"', '\'']));
        }

        #[test]
        fn escaping_is_reversible(s in ".*") {
            prop_assert_eq!(unescape(&escape_html(&s)), s);
        }

        #[test]
        fn plain_text_is_borrowed(s in "[a-zA-Z0-9 ]*") {
            prop_assert!(matches!(escape_html(&s), Cow::Borrowed(_)));
        }
    }
}
