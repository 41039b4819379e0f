//! Tag Rewriter
//!
//! Replaces component-invocation tags in raw markup with opaque placeholder
//! elements the HTML parser leaves alone:
//!
//! - `<Card $a="x">`      → `<melt-<hex Card> melt-attributes="<hex attrs>">`
//! - `</Card>`            → `</melt-<hex Card>>`
//! - `<Card/>`            → open + close placeholder pair
//! - `-Header="<b>…</b>"` → synthetic `<melt-partial-<hex Header>>` child
//! - `<slot>`             → default-slot marker
//! - `<-Header>`          → named-partial marker
//! - `<global>`           → flags the component as deferred, emits nothing

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::codec;
use crate::error::{Warning, WarningKind};

pub const PLACEHOLDER_PREFIX: &str = "melt-";
pub const PARTIAL_PREFIX: &str = "melt-partial-";
pub const ATTRIBUTES_KEY: &str = "melt-attributes";
pub const SLOT_MARKER: &str = "[[slot]]";

lazy_static! {
    static ref COMPONENT_TAG: Regex = Regex::new(
        r#"<(?P<closing>[/-]?)(?P<name>(?:[A-Z]|slot|global)[a-zA-Z0-9_-]*)(?P<attributes>(?:[^>"/]+|"[^"]*")*|)(?P<self_closing>/?)>"#
    )
    .unwrap();
    static ref MARKER: Regex = Regex::new(r"\[\[(?:slot|partial:([A-Za-z0-9_-]+))\]\]").unwrap();
}

pub fn partial_marker(name: &str) -> String {
    format!("[[partial:{}]]", name)
}

/// Replace every partial marker with the body `lookup` returns (empty when
/// it returns `None`), and every slot marker with `slot`. Inserted text is not
/// rescanned.
pub fn fill_markers<'a, F>(markup: &str, slot: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    MARKER
        .replace_all(markup, |caps: &Captures| match caps.get(1) {
            Some(name) => lookup(name.as_str()).unwrap_or_default().to_string(),
            None => slot.to_string(),
        })
        .into_owned()
}

/// Remove every slot and partial marker.
pub fn strip_markers(markup: &str) -> String {
    MARKER.replace_all(markup, "").into_owned()
}

/// Output of [`rewrite_tags`].
#[derive(Debug, Default)]
pub struct Rewritten {
    pub markup: String,
    pub global: bool,
    pub warnings: Vec<Warning>,
}

/// Placeholder element name for an invocation of `name`.
pub fn placeholder_name(name: &str) -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, codec::encode(name))
}

/// Decoded view of a placeholder element name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Invocation(String),
    Partial(String),
}

pub fn classify_placeholder(tag: &str) -> Option<Placeholder> {
    if let Some(rest) = tag.strip_prefix(PARTIAL_PREFIX) {
        return codec::decode(rest).map(Placeholder::Partial);
    }
    let rest = tag.strip_prefix(PLACEHOLDER_PREFIX)?;
    codec::decode(rest).map(Placeholder::Invocation)
}

/// Split on `sep` outside of double-quoted strings. A space separator matches
/// any whitespace. Empty segments are kept.
pub fn split_ignore_quotes(s: &str, sep: char) -> Vec<String> {
    let mut result = Vec::new();
    let mut part = String::new();
    let mut quoted = false;

    for c in s.chars() {
        if c == '"' {
            quoted = !quoted;
            part.push(c);
            continue;
        }

        let is_sep = if sep == ' ' { c.is_whitespace() } else { c == sep };
        if !quoted && is_sep {
            result.push(std::mem::take(&mut part));
            continue;
        }

        part.push(c);
    }

    result.push(part);
    result
}

fn trim_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

/// Rewrite every invocation tag in `raw`. `path` is only used for warnings.
pub fn rewrite_tags(raw: &str, path: &str) -> Rewritten {
    let mut global = false;
    let mut warnings = Vec::new();

    let markup = COMPONENT_TAG.replace_all(raw, |caps: &Captures| {
        let whole = &caps[0];
        let closing = &caps["closing"];
        let name = &caps["name"];
        let attributes = &caps["attributes"];
        let self_closing = !caps["self_closing"].is_empty();

        let reserved = name == "slot" || name == "global";
        if !reserved && !name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return whole.to_string();
        }

        if name == "global" {
            global = true;
            return String::new();
        }

        if name == "slot" {
            return if closing.is_empty() {
                SLOT_MARKER.to_string()
            } else {
                String::new()
            };
        }

        if closing == "-" {
            return partial_marker(name);
        }

        let mut kept = String::new();
        let mut children = String::new();

        for attribute in split_ignore_quotes(attributes, ' ') {
            if attribute.is_empty() {
                continue;
            }

            let Some(partial) = attribute.strip_prefix('-') else {
                kept.push_str(&attribute);
                kept.push(' ');
                continue;
            };

            let pair = split_ignore_quotes(partial, '=');
            if pair.len() < 2 {
                warnings.push(Warning::new(
                    WarningKind::MalformedAttribute,
                    path,
                    format!("partial attribute '{}' on <{}> has no value", attribute, name),
                ));
                continue;
            }

            let tag = format!("{}{}", PARTIAL_PREFIX, codec::encode(&pair[0]));
            children.push_str(&format!("<{}>{}</{}>", tag, trim_quotes(&pair[1]), tag));
        }

        let tag = placeholder_name(name);

        if closing == "/" {
            return format!("</{}>", tag);
        }

        let open = format!("<{} {}=\"{}\">", tag, ATTRIBUTES_KEY, codec::encode(&kept));

        if self_closing {
            format!("{}{}</{}>", open, children, tag)
        } else {
            format!("{}{}", open, children)
        }
    });

    for warning in &warnings {
        tracing::warn!(path = %warning.path, "{}", warning.message);
    }

    Rewritten {
        markup: markup.into_owned(),
        global,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(name: &str, attributes: &str) -> String {
        format!(
            "<{} melt-attributes=\"{}\">",
            placeholder_name(name),
            codec::encode(attributes)
        )
    }

    #[test]
    fn test_open_and_close_tags() {
        let out = rewrite_tags("<Card $title=\"Hi\">body</Card>", "a.html");
        let expected = format!("{}body</{}>", open("Card", "$title=\"Hi\" "), placeholder_name("Card"));
        assert_eq!(out.markup, expected);
        assert!(!out.global);
    }

    #[test]
    fn test_self_closing_expands_to_pair() {
        let out = rewrite_tags("<Icon/>", "a.html");
        assert_eq!(
            out.markup,
            format!("{}</{}>", open("Icon", ""), placeholder_name("Icon"))
        );
    }

    #[test]
    fn test_quoted_attribute_may_contain_markup_characters() {
        let out = rewrite_tags(r#"<Link $href="/a>b" />"#, "a.html");
        assert!(out.markup.starts_with(&open("Link", r#"$href="/a>b" "#)));
    }

    #[test]
    fn test_partial_attribute_becomes_child() {
        let out = rewrite_tags(r#"<Card -Header="<b>x</b>"/>"#, "a.html");
        let partial = format!("{}{}", PARTIAL_PREFIX, codec::encode("Header"));
        assert_eq!(
            out.markup,
            format!(
                "{}<{p}><b>x</b></{p}></{}>",
                open("Card", ""),
                placeholder_name("Card"),
                p = partial
            )
        );
    }

    #[test]
    fn test_malformed_partial_attribute_is_dropped() {
        let out = rewrite_tags(r#"<Card -Header $a="1"/>"#, "a.html");
        assert!(out.markup.starts_with(&open("Card", "$a=\"1\" ")));
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].kind, WarningKind::MalformedAttribute);
    }

    #[test]
    fn test_reserved_tags() {
        let out = rewrite_tags("<global><div><slot></slot><-Footer></div>", "a.html");
        assert!(out.global);
        assert_eq!(out.markup, "<div>[[slot]][[partial:Footer]]</div>");
    }

    #[test]
    fn test_lowercase_lookalikes_are_untouched() {
        let raw = "<slotted><globals><div class=\"A\"></div>";
        assert_eq!(rewrite_tags(raw, "a.html").markup, raw);
    }

    #[test]
    fn test_classify_placeholder() {
        assert_eq!(
            classify_placeholder(&placeholder_name("Card")),
            Some(Placeholder::Invocation("Card".to_string()))
        );
        let partial = format!("{}{}", PARTIAL_PREFIX, codec::encode("Header"));
        assert_eq!(
            classify_placeholder(&partial),
            Some(Placeholder::Partial("Header".to_string()))
        );
        assert_eq!(classify_placeholder("div"), None);
    }

    #[test]
    fn test_fill_markers() {
        let out = fill_markers("a[[slot]]b[[partial:X]]c[[partial:Y]]", "S", |name| {
            (name == "X").then_some("P")
        });
        assert_eq!(out, "aSbPc");

        let passthrough = fill_markers("[[partial:X]]|[[slot]]", "[[slot]]", |_| Some("[[slot]]"));
        assert_eq!(passthrough, "[[slot]]|[[slot]]");
        assert_eq!(strip_markers("a[[slot]]b[[partial:X]]"), "ab");
    }

    #[test]
    fn test_split_ignore_quotes() {
        assert_eq!(
            split_ignore_quotes(r#"$a="x y" .B=.C"#, ' '),
            vec![r#"$a="x y""#.to_string(), ".B=.C".to_string()]
        );
        assert_eq!(
            split_ignore_quotes(r#"$a="x=y""#, '='),
            vec!["$a".to_string(), r#""x=y""#.to_string()]
        );
    }
}
