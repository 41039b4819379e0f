//! Expression Hider
//!
//! Every `{{ … }}` span is replaced by `{{<hex>}}` before the markup parser
//! runs, so expression text containing `<`, `>` or quotes cannot be
//! misread as markup. One trailing newline after the span is kept outside the
//! token. Hygiene prefixing of `$` variables happens at hide time.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::codec;
use crate::hygiene::prefix_variables;

lazy_static! {
    /// Source-form expression span.
    pub static ref EXPRESSION: Regex = Regex::new(r"\{\{([^{}]+?)\}\}(\n?)").unwrap();
    static ref HIDDEN: Regex = Regex::new(r"\{\{([0-9a-f]+)\}\}(\n?)").unwrap();
}

pub fn hidden_token(content: &str) -> String {
    format!("{{{{{}}}}}", codec::encode(content))
}

/// Hide every expression span, prefixing its `$` variables with `prefix`.
pub fn hide_expressions(markup: &str, prefix: &str) -> String {
    EXPRESSION
        .replace_all(markup, |caps: &Captures| {
            let content = prefix_variables(&caps[1], "$", prefix);
            format!("{}{}", hidden_token(&content), &caps[2])
        })
        .into_owned()
}

/// Rewrite every hidden expression. `f` receives the decoded content and
/// returns the full replacement text (a token or raw markup); the trailing
/// newline is preserved.
pub fn replace_hidden<F>(markup: &str, mut f: F) -> String
where
    F: FnMut(&str) -> String,
{
    HIDDEN
        .replace_all(markup, |caps: &Captures| match codec::decode(&caps[1]) {
            Some(content) => format!("{}{}", f(&content), &caps[2]),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Rewrite the content of every hidden expression in place.
pub fn map_hidden<F>(markup: &str, mut f: F) -> String
where
    F: FnMut(&str) -> String,
{
    replace_hidden(markup, |content| hidden_token(&f(content)))
}

/// Turn hidden tokens back into `{{content}}`.
pub fn restore_expressions(markup: &str) -> String {
    replace_hidden(markup, |content| format!("{{{{{}}}}}", content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hide_encodes_and_prefixes() {
        let hidden = hide_expressions("<p>{{ $x.Name }}</p>", "$Card_");
        assert_eq!(hidden, format!("<p>{}</p>", hidden_token(" $Card_x.Name ")));
    }

    #[test]
    fn test_markup_inside_expression_is_opaque() {
        let hidden = hide_expressions(r#"<a title="{{ if lt .A 3 }}">"#, "$P_");
        assert!(!hidden.contains("lt .A"));
        assert_eq!(restore_expressions(&hidden), r#"<a title="{{ if lt .A 3 }}">"#);
    }

    #[test]
    fn test_trailing_newline_survives() {
        let hidden = hide_expressions("{{ .A }}\nnext", "$P_");
        assert_eq!(restore_expressions(&hidden), "{{ .A }}\nnext");
    }

    #[test]
    fn test_map_hidden_rewrites_content() {
        let hidden = hide_expressions("{{ .A }} {{ .B }}", "$P_");
        let mapped = map_hidden(&hidden, |c| c.to_lowercase());
        assert_eq!(restore_expressions(&mapped), "{{ .a }} {{ .b }}");
    }

    #[test]
    fn test_unhidden_braces_are_left_alone() {
        assert_eq!(restore_expressions("{{zz}}"), "{{zz}}");
    }
}
