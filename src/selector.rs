//! CSS selector matching against a [`Document`].
//!
//! Matching is done by `scraper` (servo's `selectors` engine over html5ever).
//! The arena is serialized with a node-id attribute on every element and
//! reparsed, and the matched elements map back to arena ids.
//!
//! State pseudo-classes (`:hover`, `:focus`, ...) and pseudo-elements do not
//! change which element a rule lands on, so they are removed before matching.
//! Every other selector goes to the engine as written; one it cannot parse
//! is an error and selects nothing.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use scraper::Html;
use thiserror::Error;

use crate::dom::{Document, NodeId};
use crate::visitor::ElementCollector;

const NODE_ATTRIBUTE: &str = "data-smelt-node";

const STATE_PSEUDO_CLASSES: &[&str] = &[
    "hover",
    "active",
    "focus",
    "focus-within",
    "focus-visible",
    "visited",
    "link",
    "any-link",
    "target",
    "checked",
    "disabled",
    "enabled",
    "indeterminate",
    "default",
    "valid",
    "invalid",
    "required",
    "optional",
    "read-only",
    "read-write",
    "placeholder-shown",
    "autofill",
    // Legacy single-colon pseudo-elements.
    "before",
    "after",
    "first-line",
    "first-letter",
];

lazy_static! {
    static ref PSEUDO: Regex = Regex::new(r"(::?)([A-Za-z][A-Za-z0-9-]*)(\([^()]*\))?").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("selector '{selector}' is not supported: {message}")]
    Unsupported { selector: String, message: String },
}

/// A parsed selector.
#[derive(Debug, Clone)]
pub struct Selector {
    inner: scraper::Selector,
}

/// Drop state pseudo-classes and pseudo-elements. A compound left empty
/// becomes `*`.
fn matchable(selector: &str) -> String {
    PSEUDO
        .replace_all(selector, |caps: &Captures| {
            let element = &caps[1] == "::";
            let name = caps[2].to_ascii_lowercase();
            if !element && !STATE_PSEUDO_CLASSES.contains(&name.as_str()) {
                return caps[0].to_string();
            }

            let start = caps.get(0).map_or(0, |m| m.start());
            let compound_start = selector[..start]
                .chars()
                .last()
                .map_or(true, |c| c.is_whitespace() || matches!(c, '>' | '+' | '~' | ',' | '('));
            if compound_start {
                "*".to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

fn is_full_document(doc: &Document) -> bool {
    doc.element_children(doc.root())
        .iter()
        .any(|id| doc.tag_name(*id) == Some("html"))
}

/// Markup of `doc` with every element carrying its arena id.
fn tracked_markup(doc: &Document) -> String {
    let elements = ElementCollector::new(|_: &Document, _, _: &str| true, false).collect(doc, doc.root());
    let mut tracked = doc.clone();
    for id in elements {
        tracked.set_attr(id, NODE_ATTRIBUTE, id.0.to_string());
    }
    tracked.to_html()
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(SelectorError::Empty);
        }

        let inner = scraper::Selector::parse(&matchable(source)).map_err(|e| SelectorError::Unsupported {
            selector: source.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { inner })
    }

    /// Every element of `doc` matched by this selector, in document order.
    pub fn select(&self, doc: &Document) -> Vec<NodeId> {
        let markup = tracked_markup(doc);
        let html = if is_full_document(doc) {
            Html::parse_document(&markup)
        } else {
            Html::parse_fragment(&markup)
        };

        html.select(&self.inner)
            .filter_map(|element| element.value().attr(NODE_ATTRIBUTE))
            .filter_map(|id| id.parse().ok())
            .map(NodeId)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(doc: &Document, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|id| {
                let tag = doc.tag_name(*id).unwrap_or_default();
                match doc.attr(*id, "id") {
                    Some(i) => format!("{}#{}", tag, i),
                    None => tag.to_string(),
                }
            })
            .collect()
    }

    fn select(markup: &str, selector: &str) -> Vec<String> {
        let doc = Document::parse_fragment(markup);
        let selector = Selector::parse(selector).unwrap();
        names(&doc, &selector.select(&doc))
    }

    const MARKUP: &str = r#"<div id="a" class="card big"><p id="b">x</p><span id="c" data-k="v-1"></span><p id="d"></p></div><p id="e"></p>"#;

    #[test]
    fn test_simple_selectors() {
        assert_eq!(select(MARKUP, "p"), vec!["p#b", "p#d", "p#e"]);
        assert_eq!(select(MARKUP, ".card.big"), vec!["div#a"]);
        assert_eq!(select(MARKUP, "#c"), vec!["span#c"]);
        assert_eq!(select(MARKUP, "*").len(), 5);
    }

    #[test]
    fn test_attribute_selectors() {
        assert_eq!(select(MARKUP, "[data-k]"), vec!["span#c"]);
        assert_eq!(select(MARKUP, "[data-k|=v]"), vec!["span#c"]);
        assert_eq!(select(MARKUP, "[data-k^=\"v-\"]"), vec!["span#c"]);
        assert!(select(MARKUP, "[data-k=v]").is_empty());
    }

    #[test]
    fn test_combinators() {
        assert_eq!(select(MARKUP, ".card p"), vec!["p#b", "p#d"]);
        assert_eq!(select(MARKUP, "div>p"), vec!["p#b", "p#d"]);
        assert_eq!(select(MARKUP, "p+span"), vec!["span#c"]);
        assert_eq!(select(MARKUP, "p~p"), vec!["p#d"]);
        assert_eq!(select(MARKUP, "div+p"), vec!["p#e"]);
    }

    #[test]
    fn test_structural_pseudo_classes() {
        assert_eq!(select(MARKUP, "div p:first-child"), vec!["p#b"]);
        assert_eq!(select(MARKUP, "div p:last-child"), vec!["p#d"]);
        assert_eq!(select(MARKUP, "div :nth-child(2)"), vec!["span#c"]);
        assert_eq!(select(MARKUP, "p:not(#b)"), vec!["p#d", "p#e"]);
    }

    #[test]
    fn test_negation_and_nth_child_select_only_their_nodes() {
        let markup = r#"<p class="skip">a</p><p>b</p><ul><li>1</li><li>2</li></ul>"#;
        let doc = Document::parse_fragment(markup);

        let kept = Selector::parse("p:not(.skip)").unwrap().select(&doc);
        assert_eq!(kept.iter().map(|id| doc.serialize(*id)).collect::<Vec<_>>(), vec!["<p>b</p>"]);

        let second = Selector::parse("li:nth-child(2)").unwrap().select(&doc);
        assert_eq!(second.iter().map(|id| doc.serialize(*id)).collect::<Vec<_>>(), vec!["<li>2</li>"]);
    }

    #[test]
    fn test_state_pseudo_classes_and_elements_are_ignored() {
        assert_eq!(select(MARKUP, "p:hover::before"), vec!["p#b", "p#d", "p#e"]);
        assert_eq!(select(MARKUP, "div :focus"), vec!["p#b", "span#c", "p#d"]);
        assert_eq!(matchable("a:hover > b::after"), "a > b");
        assert_eq!(matchable(":hover"), "*");
    }

    #[test]
    fn test_full_document_matching() {
        let doc = Document::parse_document("<html><head></head><body><main><p>x</p></main></body></html>");
        let found = Selector::parse("body > main p").unwrap().select(&doc);
        assert_eq!(names(&doc, &found), vec!["p"]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Selector::parse("  ").unwrap_err(), SelectorError::Empty);
        assert!(matches!(Selector::parse("a >"), Err(SelectorError::Unsupported { .. })));
        assert!(matches!(Selector::parse("p:frobnicate"), Err(SelectorError::Unsupported { .. })));
    }
}
