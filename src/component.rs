//! Compiled component and root data model, plus extraction of the source
//! block tags (`import`, `default`, `style`).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::dom::{Document, NodeId};
use crate::error::{CompileError, CompileResult, Warning, WarningKind};
use crate::generate::GenerationData;
use crate::hide;
use crate::naming::{component_name, resolve_relative};
use crate::template::Template;

/// One compiled source file, identified by its normalized path.
#[derive(Debug, Clone, Default)]
pub struct Component {
    pub name: String,
    pub path: String,
    /// Final executable template.
    pub template: Template,
    /// Scoped CSS of this component alone.
    pub style: String,
    /// Rendered at request time through a handler instead of being inlined.
    pub global: bool,
    /// Global components this one defers to, in first-use order.
    pub globals: Vec<String>,
    /// `$name` → literal, merged under invocation attributes.
    pub defaults: BTreeMap<String, String>,
    /// Flattened body with hidden expressions and slot/partial markers,
    /// inlined by callers.
    pub partials_template: String,
    pub generation: GenerationData,
    pub warnings: Vec<Warning>,
}

impl Component {
    pub fn source(&self) -> &str {
        self.template.source()
    }

    pub fn record(&self) -> ComponentRecord {
        ComponentRecord {
            name: self.name.clone(),
            path: self.path.clone(),
            template: self.source().to_string(),
            style: self.style.clone(),
            global: self.global,
            globals: self.globals.clone(),
        }
    }
}

/// Persisted form of a [`Component`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub name: String,
    pub path: String,
    pub template: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub globals: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROOTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Wrapper document rendered around a component with `{Body, Data}`.
#[derive(Debug, Clone)]
pub struct Root {
    pub name: String,
    pub path: String,
    pub template: Template,
}

/// Persisted form of a [`Root`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    pub path: String,
    pub template: String,
}

impl Root {
    /// Parse `raw` as a full document and prepare its template. Expressions
    /// are kept opaque while the markup parser runs.
    pub fn compile(path: &str, raw: &str) -> CompileResult<Self> {
        let hidden = hide::hide_expressions(raw, "");
        let document = Document::parse_document(&hidden);
        let source = hide::restore_expressions(&document.to_html());

        let template = Template::parse(path, source).map_err(|source| CompileError::TemplateParse {
            path: path.to_string(),
            source,
        })?;

        Ok(Self {
            name: component_name(path),
            path: path.to_string(),
            template,
        })
    }

    pub fn record(&self) -> RootRecord {
        RootRecord {
            path: self.path.clone(),
            template: self.template.source().to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK TAGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Top-level `import`, `default` and `style` blocks pulled out of a parsed
/// component body.
#[derive(Debug, Default)]
pub struct Blocks {
    /// Alias → normalized path.
    pub imports: HashMap<String, String>,
    pub defaults: BTreeMap<String, String>,
    pub style: String,
    /// Serialized body without the blocks.
    pub body: String,
    pub warnings: Vec<Warning>,
}

/// Split block text into its first word and the remainder.
fn pair(text: &str) -> Option<(String, String)> {
    let (key, value) = text.trim().split_once(char::is_whitespace)?;
    let value = value.trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Extract block tags from the top level of `doc`. `style_enabled` decides
/// whether `<style>` contents are kept or reported.
pub fn extract_blocks(path: &str, doc: &Document, style_enabled: bool) -> Blocks {
    let mut blocks = Blocks::default();
    let children: Vec<NodeId> = doc.children(doc.root()).to_vec();

    for child in children {
        match doc.tag_name(child) {
            Some("import") => match pair(&doc.text_content(child)) {
                Some((alias, relative)) => {
                    let resolved = resolve_relative(path, &relative);
                    tracing::debug!(%path, %alias, import = %resolved, "import");
                    blocks.imports.insert(alias, resolved);
                }
                None => {
                    let message = format!("<import> needs an alias and a path: '{}'", doc.text_content(child).trim());
                    tracing::warn!(%path, "{}", message);
                    blocks
                        .warnings
                        .push(Warning::new(WarningKind::MalformedAttribute, path, message));
                }
            },

            Some("default") => {
                let raw = hide::restore_expressions(&doc.text_content(child));
                match pair(&raw) {
                    Some((key, value)) if key.starts_with('$') => {
                        blocks.defaults.insert(key, value);
                    }
                    Some((key, value)) => {
                        let message = format!(
                            "default is only supported for $ variables: <default>{} {}</default>",
                            key, value
                        );
                        tracing::warn!(%path, "{}", message);
                        blocks
                            .warnings
                            .push(Warning::new(WarningKind::InvalidDefault, path, message));
                    }
                    None => {
                        let message = format!("<default> needs a name and a value: '{}'", raw.trim());
                        tracing::warn!(%path, "{}", message);
                        blocks
                            .warnings
                            .push(Warning::new(WarningKind::InvalidDefault, path, message));
                    }
                }
            }

            Some("style") => {
                if style_enabled {
                    blocks.style.push_str(&doc.text_content(child));
                } else {
                    tracing::warn!(%path, "style engine is disabled, <style> ignored");
                    blocks.warnings.push(Warning::new(
                        WarningKind::StyleDisabled,
                        path,
                        "style engine is disabled, <style> ignored",
                    ));
                }
            }

            _ => blocks.body.push_str(&doc.serialize(child)),
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ExecContext;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_extract_blocks() {
        let markup = hide::hide_expressions(
            "<import>Card ../ui/card.html</import>\n<default>$title \"Untitled page\"</default><default>.Bad x</default><style>p{a:b}</style><p>{{ .X }}</p>",
            "$Page_",
        );
        let doc = Document::parse_fragment(&markup);
        let blocks = extract_blocks("pages/home.html", &doc, true);

        assert_eq!(blocks.imports.get("Card").map(String::as_str), Some("ui/card.html"));
        assert_eq!(
            blocks.defaults.get("$title").map(String::as_str),
            Some("\"Untitled page\"")
        );
        assert_eq!(blocks.style, "p{a:b}");
        assert_eq!(hide::restore_expressions(&blocks.body), "\n<p>{{ .X }}</p>");
        assert_eq!(blocks.warnings.len(), 1);
        assert_eq!(blocks.warnings[0].kind, WarningKind::InvalidDefault);
    }

    #[test]
    fn test_style_disabled_warns() {
        let doc = Document::parse_fragment("<style>p{}</style>");
        let blocks = extract_blocks("a.html", &doc, false);
        assert!(blocks.style.is_empty());
        assert_eq!(blocks.warnings[0].kind, WarningKind::StyleDisabled);
    }

    #[test]
    fn test_root_keeps_document_and_expressions() {
        let root = Root::compile(
            "root.html",
            r#"<!DOCTYPE html><html><head><title>{{ .Data.Title }}</title></head><body class="{{ if .Data.Dark }}dark{{ end }}">{{ html .Body }}</body></html>"#,
        )
        .unwrap();

        let out = root
            .template
            .execute(
                &json!({"Body": "<p>hi</p>", "Data": {"Title": "T", "Dark": true}}),
                ExecContext::default(),
            )
            .unwrap();
        assert_eq!(
            out,
            r#"<!DOCTYPE html><html><head><title>T</title></head><body class="dark"><p>hi</p></body></html>"#
        );
        assert_eq!(root.name, "Root");
    }
}
