//! Style Scoping Engine
//!
//! Aggregated `<style>` text is handed to an external transpiler, then every
//! resulting rule is classified by its selector marker:
//!
//! - `%g selector` global: emitted unmodified
//! - `%s selector` scoped-shared: `.<prefix>-scoped-<Name>` appended, class
//!   attached after inlining so it also reaches inlined children
//! - anything else local: `.<prefix>-<Name>` appended, class attached to
//!   matches in the component's own tree; rules matching nothing are dropped

use std::io::Write as _;
use std::process::{Command, Stdio};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::dom::{Document, NodeId};
use crate::error::{Warning, WarningKind};
use crate::selector::Selector;
use crate::tags::PLACEHOLDER_PREFIX;

const GLOBAL_MARKER: &str = "#melt-internal-global";
const SCOPED_MARKER: &str = "#melt-internal-scoped";

/// Diagnostics from the transpiler name their input with this marker.
const STDIN_MARKER: &str = "stdin";

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref SELECTOR_MARKER: Regex = Regex::new(r"%([gs])([\s.#\[:>*])").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPILER COLLABORATOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum TranspileError {
    #[error("could not run '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Failed(String),
}

/// Expanded CSS plus the diagnostics reported while producing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transpiled {
    pub css: String,
    pub events: Vec<String>,
}

pub trait StyleTranspiler: Send + Sync {
    fn transpile(&self, source: &str) -> Result<Transpiled, TranspileError>;

    /// Transpile a stylesheet file. Relative imports resolve against its
    /// directory when the implementation supports it.
    fn transpile_file(&self, path: &str) -> Result<Transpiled, TranspileError> {
        let source = std::fs::read_to_string(path).map_err(|e| TranspileError::Failed(e.to_string()))?;
        self.transpile(&source)
    }
}

/// Dart Sass as a child process. The call is synchronous with no timeout.
#[derive(Debug, Clone)]
pub struct SassProcess {
    pub executable: String,
}

impl SassProcess {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn run(&self, args: &[&str], input: Option<&str>) -> Result<Transpiled, TranspileError> {
        let spawn_error = |source| TranspileError::Spawn {
            executable: self.executable.clone(),
            source,
        };

        let mut child = Command::new(&self.executable)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).map_err(spawn_error)?;
        }

        let output = child.wait_with_output().map_err(spawn_error)?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(TranspileError::Failed(stderr.trim().to_string()));
        }

        Ok(Transpiled {
            css: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            events: stderr
                .split("\n\n")
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

impl StyleTranspiler for SassProcess {
    fn transpile(&self, source: &str) -> Result<Transpiled, TranspileError> {
        self.run(&["--stdin", "--no-source-map", "--style=compressed"], Some(source))
    }

    fn transpile_file(&self, path: &str) -> Result<Transpiled, TranspileError> {
        self.run(&["--no-source-map", "--style=compressed", path], None)
    }
}

/// Plain CSS pass-through: strips comments and whitespace the way a
/// compressed transpiler would, without expanding nesting.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCss;

impl StyleTranspiler for PlainCss {
    fn transpile(&self, source: &str) -> Result<Transpiled, TranspileError> {
        Ok(Transpiled {
            css: compress(source),
            events: Vec::new(),
        })
    }
}

fn compress(source: &str) -> String {
    let source = COMMENT.replace_all(source, "");
    let mut out = String::with_capacity(source.len());
    let mut pending_space = false;
    let mut depth = 0usize;

    for c in source.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }

        let tight = matches!(c, '{' | '}' | ';' | ',' | '>') || (c == ':' && depth > 0);
        let last_tight = out
            .chars()
            .last()
            .is_some_and(|l| matches!(l, '{' | '}' | ';' | ',' | '>') || (l == ':' && depth > 0));

        if pending_space && !tight && !last_tight {
            out.push(' ');
        }
        pending_space = false;

        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if out.ends_with(';') {
                    out.pop();
                }
            }
            _ => {}
        }

        out.push(c);
    }

    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// CSS STRUCTURE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
enum CssItem {
    Rule { selector: String, body: String },
    AtBlock { prelude: String, body: String },
    Statement(String),
}

/// Index of the `}` closing the `{` at `open`, skipping quoted strings.
fn find_balanced_brace_end(css: &str, open: usize) -> Option<usize> {
    let bytes = css.as_bytes();
    let mut depth = 0usize;
    let mut in_string: Option<u8> = None;
    let mut i = open;

    while i < bytes.len() {
        let c = bytes[i];

        if c == b'\\' {
            i += 2;
            continue;
        }

        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        match c {
            b'"' | b'\'' => in_string = Some(c),
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }

        i += 1;
    }

    None
}

fn parse_css(css: &str) -> Vec<CssItem> {
    let bytes = css.as_bytes();
    let mut items = Vec::new();
    let mut start = 0;
    let mut i = 0;
    let mut in_string: Option<u8> = None;

    while i < bytes.len() {
        let c = bytes[i];

        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        match c {
            b'"' | b'\'' => in_string = Some(c),
            b';' => {
                let statement = css[start..=i].trim();
                if !statement.is_empty() {
                    items.push(CssItem::Statement(statement.to_string()));
                }
                start = i + 1;
            }
            b'{' => {
                let Some(end) = find_balanced_brace_end(css, i) else {
                    break;
                };
                let prelude = css[start..i].trim().to_string();
                let body = css[i + 1..end].to_string();
                items.push(if prelude.starts_with('@') {
                    CssItem::AtBlock { prelude, body }
                } else {
                    CssItem::Rule {
                        selector: prelude,
                        body,
                    }
                });
                i = end + 1;
                start = i;
                continue;
            }
            _ => {}
        }

        i += 1;
    }

    let rest = css[start.min(css.len())..].trim();
    if !rest.is_empty() {
        items.push(CssItem::Statement(rest.to_string()));
    }

    items
}

/// Split a selector list on top-level commas.
fn split_selector_list(selector: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in selector.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(selector[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(selector[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// Append `.class` to a selector, before any pseudo-element.
pub fn scope_selector(selector: &str, class: &str) -> String {
    let selector = selector.trim();
    let mut depth = 0i32;
    let bytes = selector.as_bytes();

    for i in 0..bytes.len() {
        match bytes[i] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                return format!("{}.{}{}", &selector[..i], class, &selector[i..]);
            }
            _ => {}
        }
    }

    format!("{}.{}", selector, class)
}

fn strip_marker(selector: &str, marker: &str) -> Option<String> {
    if !selector.contains(marker) {
        return None;
    }
    let spaced = format!("{} ", marker);
    Some(selector.replace(&spaced, "").replace(marker, "").trim().to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPING
// ═══════════════════════════════════════════════════════════════════════════════

pub fn local_class(prefix: &str, name: &str) -> String {
    format!("{}-{}", prefix, name)
}

pub fn scoped_class(prefix: &str, name: &str) -> String {
    format!("{}-scoped-{}", prefix, name)
}

/// Output of [`build_style`].
#[derive(Debug, Default)]
pub struct StyleOutput {
    pub css: String,
    /// Scoped-shared selectors, matched after inlining.
    pub scoped: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// Add `class` to every matched element, at most once per element.
/// Placeholder elements never receive classes.
pub fn attach_class(doc: &mut Document, nodes: &[NodeId], class: &str) {
    for id in nodes {
        let Some(tag) = doc.tag_name(*id) else {
            continue;
        };
        if tag.starts_with(PLACEHOLDER_PREFIX) {
            continue;
        }

        match doc.attr(*id, "class") {
            Some(existing) if existing.split_whitespace().any(|c| c == class) => {}
            Some(existing) if !existing.trim().is_empty() => {
                let value = format!("{} {}", existing, class);
                doc.set_attr(*id, "class", value);
            }
            _ => doc.set_attr(*id, "class", class.to_string()),
        }
    }
}

/// Attach the scoped-shared class for every recorded selector.
pub fn attach_scoped(doc: &mut Document, selectors: &[String], class: &str) {
    for selector in selectors {
        if let Ok(parsed) = Selector::parse(selector) {
            let matches = parsed.select(doc);
            attach_class(doc, &matches, class);
        }
    }
}

struct Scoper<'a> {
    path: &'a str,
    local: String,
    scoped: String,
    selectors: Vec<String>,
    warnings: Vec<Warning>,
}

impl Scoper<'_> {
    fn scope_rules(&mut self, css: &str, doc: &mut Document) -> String {
        let mut out = String::new();
        let mut at_rules = String::new();

        for item in parse_css(css) {
            match item {
                CssItem::Statement(statement) => out.push_str(&statement),

                CssItem::AtBlock { prelude, body } => {
                    let scopable = ["@media", "@supports", "@container", "@layer", "@document"]
                        .iter()
                        .any(|p| prelude.starts_with(p));
                    let inner = if scopable {
                        self.scope_rules(&body, doc)
                    } else {
                        body
                    };
                    if scopable && inner.is_empty() {
                        continue;
                    }
                    at_rules.push_str(&format!("{}{{{}}}", prelude, inner));
                }

                CssItem::Rule { selector, body } => {
                    for part in split_selector_list(&selector) {
                        self.scope_rule(part, &body, doc, &mut out);
                    }
                }
            }
        }

        out + &at_rules
    }

    fn scope_rule(&mut self, selector: &str, body: &str, doc: &mut Document, out: &mut String) {
        if let Some(global) = strip_marker(selector, GLOBAL_MARKER) {
            out.push_str(&format!("{}{{{}}}", global, body));
            return;
        }

        if let Some(shared) = strip_marker(selector, SCOPED_MARKER) {
            out.push_str(&format!("{}{{{}}}", scope_selector(&shared, &self.scoped), body));
            self.selectors.push(shared);
            return;
        }

        let matches = match Selector::parse(selector) {
            Ok(parsed) => parsed.select(doc),
            Err(e) => {
                tracing::debug!(path = %self.path, %selector, error = %e, "selector not matchable");
                Vec::new()
            }
        };

        if matches.is_empty() {
            let warning = Warning::new(
                WarningKind::UnmatchedRule,
                self.path,
                format!("rule '{}' matches nothing and was dropped", selector),
            );
            tracing::debug!(path = %self.path, %selector, "dropping unmatched rule");
            self.warnings.push(warning);
            return;
        }

        attach_class(doc, &matches, &self.local);
        out.push_str(&format!("{}{{{}}}", scope_selector(selector, &self.local), body));
    }
}

/// Transpile and scope the aggregated style text of one component, attaching
/// local classes to `doc`. A transpiler failure yields empty CSS and a warning.
pub fn build_style(
    path: &str,
    name: &str,
    prefix: &str,
    source: &str,
    doc: &mut Document,
    transpiler: &dyn StyleTranspiler,
) -> StyleOutput {
    let mut output = StyleOutput::default();

    let source = COMMENT.replace_all(source, "");
    let source = SELECTOR_MARKER.replace_all(&source, |caps: &regex::Captures| {
        let marker = if &caps[1] == "g" { GLOBAL_MARKER } else { SCOPED_MARKER };
        format!("{}{}", marker, &caps[2])
    });

    let transpiled = match transpiler.transpile(&source) {
        Ok(transpiled) => transpiled,
        Err(e) => {
            let message = e.to_string().replace(STDIN_MARKER, path);
            tracing::error!(%path, "style transpilation failed: {}", message);
            output
                .warnings
                .push(Warning::new(WarningKind::StyleTranspile, path, message));
            return output;
        }
    };

    for event in transpiled.events {
        let message = event.replace(STDIN_MARKER, path);
        tracing::warn!(%path, "{}", message);
        output
            .warnings
            .push(Warning::new(WarningKind::StyleTranspile, path, message));
    }

    let mut scoper = Scoper {
        path,
        local: local_class(prefix, name),
        scoped: scoped_class(prefix, name),
        selectors: Vec::new(),
        warnings: Vec::new(),
    };

    output.css = scoper.scope_rules(&transpiled.css, doc);
    output.scoped = scoper.selectors;
    output.warnings.extend(scoper.warnings);
    output
}

/// Order aggregated component styles: global rules, scoped-shared rules,
/// component-local rules, then at-rule blocks.
pub fn sort_styles(styles: &str, prefix: &str) -> String {
    let scoped_token = format!(".{}-scoped-", prefix);
    let local_token = format!(".{}-", prefix);

    let mut global = String::new();
    let mut scoped = String::new();
    let mut local = String::new();
    let mut at_rules = String::new();

    for item in parse_css(styles) {
        match item {
            CssItem::Statement(statement) => global.push_str(&statement),
            CssItem::AtBlock { prelude, body } => {
                at_rules.push_str(&format!("{}{{{}}}", prelude, body));
            }
            CssItem::Rule { selector, body } => {
                let rule = format!("{}{{{}}}", selector, body);
                if selector.contains(&scoped_token) {
                    scoped.push_str(&rule);
                } else if selector.contains(&local_token) {
                    local.push_str(&rule);
                } else {
                    global.push_str(&rule);
                }
            }
        }
    }

    global + &scoped + &local + &at_rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Failing;

    impl StyleTranspiler for Failing {
        fn transpile(&self, _source: &str) -> Result<Transpiled, TranspileError> {
            Err(TranspileError::Failed("Error: expected \"}\".\n  stdin 1:4".to_string()))
        }
    }

    fn build(markup: &str, css: &str) -> (StyleOutput, Document) {
        let mut doc = Document::parse_fragment(markup);
        let out = build_style("card.html", "Card", "melt", css, &mut doc, &PlainCss);
        (out, doc)
    }

    #[test]
    fn test_compress() {
        assert_eq!(
            compress(".a > .b ,\n .c { color : red ; margin: 0 auto; }"),
            ".a>.b,.c{color:red;margin:0 auto}"
        );
    }

    #[test]
    fn test_local_rules_are_scoped_and_attached() {
        let (out, doc) = build(
            r#"<div class="box"><p>x</p></div>"#,
            ".box { color: red } p::first-line { color: blue }",
        );
        assert_eq!(
            out.css,
            ".box.melt-Card{color:red}p.melt-Card::first-line{color:blue}"
        );
        assert_eq!(
            doc.to_html(),
            r#"<div class="box melt-Card"><p class="melt-Card">x</p></div>"#
        );
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_functional_pseudo_classes_limit_attachment() {
        let (out, doc) = build(
            r#"<p class="skip">a</p><p>b</p><ul><li>1</li><li>2</li></ul>"#,
            "p:not(.skip) { a: b } li:nth-child(2) { c: d }",
        );
        assert_eq!(
            doc.to_html(),
            r#"<p class="skip">a</p><p class="melt-Card">b</p><ul><li>1</li><li class="melt-Card">2</li></ul>"#
        );
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_unsupported_selector_matches_nothing() {
        let (out, doc) = build("<p>x</p>", "p:frobnicate { a: b }");
        assert_eq!(out.css, "");
        assert_eq!(doc.to_html(), "<p>x</p>");
        assert_eq!(out.warnings[0].kind, WarningKind::UnmatchedRule);
    }

    #[test]
    fn test_unmatched_local_rule_is_dropped() {
        let (out, _) = build("<div></div>", "div { a: b } .missing { c: d }");
        assert_eq!(out.css, "div.melt-Card{a:b}");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].kind, WarningKind::UnmatchedRule);
    }

    #[test]
    fn test_global_and_scoped_markers() {
        let (out, doc) = build("<div></div>", "%g body { m: 0 } %s .title { w: 1 }");
        assert_eq!(out.css, "body{m:0}.title.melt-scoped-Card{w:1}");
        assert_eq!(out.scoped, vec![".title".to_string()]);
        assert_eq!(doc.to_html(), "<div></div>");
    }

    #[test]
    fn test_media_queries_are_scoped_and_kept_last() {
        let (out, _) = build(
            "<div></div>",
            "@media (max-width: 10px) { div { a: b } .gone { c: d } } div { e: f } @keyframes k { from { o: 0 } }",
        );
        assert_eq!(
            out.css,
            "div.melt-Card{e:f}@media (max-width: 10px){div.melt-Card{a:b}}@keyframes k{from{o:0}}"
        );
    }

    #[test]
    fn test_attach_is_idempotent_and_skips_placeholders() {
        let mut doc = Document::parse_fragment(r#"<p class="melt-Card"></p><melt-4361 class="x"></melt-4361>"#);
        let all = doc.descendants(doc.root());
        attach_class(&mut doc, &all, "melt-Card");
        attach_class(&mut doc, &all, "melt-Card");
        assert_eq!(
            doc.to_html(),
            r#"<p class="melt-Card"></p><melt-4361 class="x"></melt-4361>"#
        );
    }

    #[test]
    fn test_transpile_failure_yields_empty_style() {
        let mut doc = Document::parse_fragment("<div></div>");
        let out = build_style("pages/card.html", "Card", "melt", "div {", &mut doc, &Failing);
        assert_eq!(out.css, "");
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("pages/card.html 1:4"));
    }

    #[test]
    fn test_sort_styles_order() {
        let styles = "@media print{a.melt-A{x:y}}p.melt-A{l:1}.t.melt-scoped-B{s:1}body{g:1}";
        assert_eq!(
            sort_styles(styles, "melt"),
            "body{g:1}.t.melt-scoped-B{s:1}p.melt-A{l:1}@media print{a.melt-A{x:y}}"
        );
    }

    #[test]
    fn test_scope_selector_inserts_before_pseudo_element() {
        assert_eq!(scope_selector("a:hover", "c"), "a:hover.c");
        assert_eq!(scope_selector("a::after", "c"), "a.c::after");
        assert_eq!(scope_selector("a[x='::']", "c"), "a[x='::'].c");
    }
}
