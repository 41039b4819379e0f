//! Paste Engine
//!
//! Replaces invocation placeholders with the invoked component's partials
//! template. Per invocation:
//!
//! 1. Defaults of the callee are merged under the tag's own attributes.
//! 2. Each `.Name` / `$name` attribute is bound either as a constant or, for
//!    expression values, to a fresh `$argN` declared in front of the fragment.
//! 3. Every hidden expression of the callee is rewritten against the bindings.
//! 4. Partial and slot markers are filled from the placeholder's children.
//! 5. The result is parsed in isolation and spliced in place of the placeholder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec;
use crate::component::Component;
use crate::dom::{Document, NodeId, NodeKind};
use crate::error::{Warning, WarningKind};
use crate::hide::{self, hidden_token};
use crate::hygiene::{prefix_variables, replace_variables};
use crate::naming::namespace_prefix;
use crate::tags::{self, classify_placeholder, split_ignore_quotes, Placeholder, ATTRIBUTES_KEY};

/// A bound invocation attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// Substituted verbatim.
    Constant(String),
    /// Name of the intermediate variable holding the evaluated expression.
    Bound(String),
}

/// Monotonic source of intermediate variable indices, shared by every
/// compilation that uses the same compiler.
#[derive(Debug, Clone, Default)]
pub struct Sequence(Arc<AtomicU64>);

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_variable(&self) -> String {
        format!("$arg{}", self.next())
    }
}

/// Where the paste engine gets compiled callees from.
pub trait ComponentSource {
    /// Compiled callee at `path`. `chain` lists the components whose
    /// compilation led here, outermost first, ending with the caller.
    fn resolve(&self, path: &str, chain: &[String]) -> Option<Arc<Component>>;

    /// Record that `caller` inlines `callee`.
    fn add_dependency(&self, callee: &str, caller: &str);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARGUMENT BINDING
// ═══════════════════════════════════════════════════════════════════════════════

fn is_expression_value(value: &str) -> bool {
    value.starts_with(['.', '$', '('])
}

fn is_bare_literal(value: &str) -> bool {
    value == "true" || value == "false" || value.parse::<f64>().is_ok()
}

/// Quote a constant for use inside a larger expression.
fn quote_literal(value: &str) -> String {
    if is_bare_literal(value) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Result of binding a tag's attributes against a callee.
#[derive(Debug, Default)]
pub struct Bindings {
    pub arguments: HashMap<String, Argument>,
    /// Hidden `{{- $argN := value}}` declarations, in attribute order.
    pub declarations: String,
    /// Attributes dropped for lacking a name or value half.
    pub warnings: Vec<Warning>,
}

/// Bind `attributes` (raw `name=value` strings from the tag) for an
/// invocation of `callee` made from `caller_path`, whose namespace is
/// `caller_prefix`.
pub fn bind_arguments(
    callee: &Component,
    caller_path: &str,
    caller_prefix: &str,
    attributes: &[String],
    sequence: &Sequence,
) -> Bindings {
    let callee_prefix = namespace_prefix(&callee.name);
    let mut bindings = Bindings::default();

    let mut pairs: Vec<(String, String)> = callee
        .defaults
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for attribute in attributes {
        let attribute = attribute.trim();
        if attribute.is_empty() {
            continue;
        }
        let pair = split_ignore_quotes(attribute, '=');
        let (name, value) = match pair.as_slice() {
            [name, value] if !name.is_empty() && !value.is_empty() => (name, value),
            _ => {
                let message = format!("attribute '{}' on <{}> has no value", attribute, callee.name);
                tracing::warn!(path = %caller_path, "{}", message);
                bindings
                    .warnings
                    .push(Warning::new(WarningKind::MalformedAttribute, caller_path, message));
                continue;
            }
        };
        pairs.retain(|(existing, _)| existing != name);
        pairs.push((name.clone(), value.clone()));
    }

    for (name, value) in pairs {
        if !name.starts_with(['.', '$']) {
            continue;
        }
        let name = prefix_variables(&name, "$", &callee_prefix);

        if !is_expression_value(&value) {
            let literal = value.trim_matches('"');
            let literal = hide::hide_expressions(literal, caller_prefix);
            bindings.arguments.insert(name, Argument::Constant(literal));
            continue;
        }

        let variable = sequence.next_variable();
        let expression = prefix_variables(&value, "$", caller_prefix);
        bindings
            .declarations
            .push_str(&hidden_token(&format!("- {} := {}", variable, expression)));
        bindings.arguments.insert(name, Argument::Bound(variable));
    }

    bindings
}

/// Rewrite every hidden expression of `markup` against `arguments`.
pub fn apply_arguments(markup: &str, arguments: &HashMap<String, Argument>) -> String {
    if arguments.is_empty() {
        return markup.to_string();
    }

    let replacements: HashMap<String, String> = arguments
        .iter()
        .map(|(name, argument)| {
            let value = match argument {
                Argument::Constant(value) => quote_literal(value),
                Argument::Bound(variable) => variable.clone(),
            };
            (name.clone(), value)
        })
        .collect();

    hide::replace_hidden(markup, |content| {
        let trimmed = content.trim();
        if let Some(Argument::Constant(value)) = arguments.get(trimmed) {
            return value.clone();
        }
        hidden_token(&replace_variables(content, &replacements))
    })
}

/// Prefix `%` references inside a caller-supplied partial body with the
/// callee namespace.
fn localize_partial(body: &str, callee_prefix: &str) -> String {
    hide::map_hidden(body, |content| prefix_variables(content, "%", callee_prefix))
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Inlines every placeholder of one component's document.
pub struct Paster<'a> {
    pub caller_path: &'a str,
    pub caller_prefix: String,
    /// Alias → normalized component path.
    pub imports: &'a HashMap<String, String>,
    pub source: &'a dyn ComponentSource,
    pub sequence: &'a Sequence,
    /// Paths being compiled on this call stack, ending with the caller.
    pub chain: &'a [String],
    pub comments: bool,
    /// Global components encountered, in first-seen order.
    pub globals: Vec<String>,
    pub warnings: Vec<Warning>,
}

struct Captured {
    attributes: Vec<String>,
    partials: HashMap<String, String>,
    slot: String,
}

impl<'a> Paster<'a> {
    pub fn new(
        caller_path: &'a str,
        caller_name: &str,
        imports: &'a HashMap<String, String>,
        source: &'a dyn ComponentSource,
        sequence: &'a Sequence,
    ) -> Self {
        Self {
            caller_path,
            caller_prefix: namespace_prefix(caller_name),
            imports,
            source,
            sequence,
            chain: &[],
            comments: false,
            globals: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_chain(mut self, chain: &'a [String]) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_comments(mut self, comments: bool) -> Self {
        self.comments = comments;
        self
    }

    /// Inline every invocation under the document root, then unwrap any
    /// placeholder left unresolved.
    pub fn paste_document(&mut self, doc: &mut Document) {
        let root = doc.root();
        for child in doc.children(root).to_vec() {
            self.process(doc, child);
        }
        unwrap_placeholders(doc);
    }

    fn process(&mut self, doc: &mut Document, id: NodeId) {
        let invocation = match doc.tag_name(id).and_then(classify_placeholder) {
            Some(Placeholder::Invocation(alias)) => Some(alias),
            _ => None,
        };

        if let Some(alias) = invocation {
            if let Some(inserted) = self.paste(doc, id, &alias) {
                for node in inserted {
                    self.process(doc, node);
                }
                return;
            }
        }

        for child in doc.children(id).to_vec() {
            self.process(doc, child);
        }
    }

    fn unresolved(&mut self, message: String) {
        tracing::warn!(path = %self.caller_path, "{}", message);
        self.warnings.push(Warning::new(
            WarningKind::UnresolvedReference,
            self.caller_path,
            message,
        ));
    }

    fn capture(doc: &Document, id: NodeId) -> Captured {
        let attributes = doc
            .attr(id, ATTRIBUTES_KEY)
            .and_then(codec::decode)
            .map(|raw| split_ignore_quotes(&raw, ' '))
            .unwrap_or_default();

        let mut partials = HashMap::new();
        let mut slot = String::new();

        for child in doc.children(id) {
            match doc.tag_name(*child).and_then(classify_placeholder) {
                Some(Placeholder::Partial(name)) => {
                    partials.insert(name, doc.serialize_children(*child));
                }
                _ => slot.push_str(&doc.serialize(*child)),
            }
        }

        Captured {
            attributes,
            partials,
            slot,
        }
    }

    /// Replace the placeholder `id`. Returns the inserted nodes, or `None`
    /// when the invocation could not be resolved.
    fn paste(&mut self, doc: &mut Document, id: NodeId, alias: &str) -> Option<Vec<NodeId>> {
        let Some(path) = self.imports.get(alias).cloned() else {
            self.unresolved(format!("<{}> is not imported", alias));
            return None;
        };

        self.source.add_dependency(&path, self.caller_path);

        if path == self.caller_path || self.chain.contains(&path) {
            self.unresolved(format!("<{}> imports {} in a cycle", alias, path));
            return None;
        }

        let standalone = [self.caller_path.to_string()];
        let chain = if self.chain.is_empty() { &standalone[..] } else { self.chain };
        let Some(callee) = self.source.resolve(&path, chain) else {
            self.unresolved(format!("<{}> could not be compiled from {}", alias, path));
            return None;
        };

        if callee.global {
            tracing::debug!(path = %self.caller_path, global = %path, "deferring global component");
            if !self.globals.contains(&path) {
                self.globals.push(path.clone());
            }
            let marker = hidden_token(&format!("global {}", quote_literal(&path)));
            let fragment = fragment_of_text(&marker);
            return Some(doc.replace_with_fragment(id, &fragment));
        }

        // Globals the callee defers become globals of this page too.
        for global in &callee.globals {
            if !self.globals.contains(global) {
                self.globals.push(global.clone());
            }
        }

        let captured = Self::capture(doc, id);
        let mut bindings = bind_arguments(
            &callee,
            self.caller_path,
            &self.caller_prefix,
            &captured.attributes,
            self.sequence,
        );
        self.warnings.append(&mut bindings.warnings);
        let argumented = apply_arguments(&callee.partials_template, &bindings.arguments);

        let callee_prefix = namespace_prefix(&callee.name);
        let wrap = |name: &str, body: String| -> String {
            if self.comments {
                format!("<!-- + {} -->\n{}<!-- - {} -->\n", name, body, name)
            } else {
                body
            }
        };

        let partials: HashMap<String, String> = captured
            .partials
            .into_iter()
            .map(|(name, body)| {
                let body = wrap(&name, localize_partial(&body, &callee_prefix));
                (name, body)
            })
            .collect();
        let slot = wrap("Slot", localize_partial(&captured.slot, &callee_prefix));

        let filled = tags::fill_markers(&argumented, &slot, |name| partials.get(name).map(String::as_str));

        let mut markup = bindings.declarations;
        if self.comments {
            markup.push_str(&format!("<!-- + {}: {} -->", alias, path));
        }
        markup.push_str(&filled);
        if self.comments {
            markup.push_str(&format!("<!-- - {} -->", alias));
        }

        tracing::debug!(path = %self.caller_path, callee = %path, "inlined component");

        let fragment = Document::parse_fragment(&markup);
        Some(doc.replace_with_fragment(id, &fragment))
    }
}

fn fragment_of_text(text: &str) -> Document {
    let mut fragment = Document::new();
    let root = fragment.root();
    fragment.append(root, NodeKind::Text(text.to_string()));
    fragment
}

/// Unwrap every remaining placeholder element, keeping its children.
pub fn unwrap_placeholders(doc: &mut Document) {
    let leftover: Vec<NodeId> = doc
        .descendants(doc.root())
        .into_iter()
        .filter(|id| doc.tag_name(*id).and_then(classify_placeholder).is_some())
        .collect();

    // Innermost first, so outer unwraps carry already-flattened children.
    for id in leftover.into_iter().rev() {
        doc.unwrap(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hide::restore_expressions;
    use crate::tags::rewrite_tags;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn component(name: &str, partials_template: &str) -> Component {
        Component {
            name: name.to_string(),
            path: format!("{}.html", name.to_lowercase()),
            partials_template: partials_template.to_string(),
            ..Component::default()
        }
    }

    #[derive(Default)]
    struct Table {
        components: HashMap<String, Arc<Component>>,
        edges: Mutex<Vec<(String, String)>>,
    }

    impl ComponentSource for Table {
        fn resolve(&self, path: &str, _chain: &[String]) -> Option<Arc<Component>> {
            self.components.get(path).cloned()
        }

        fn add_dependency(&self, callee: &str, caller: &str) {
            self.edges.lock().push((callee.to_string(), caller.to_string()));
        }
    }

    fn paste(markup: &str, table: &Table, imports: &[(&str, &str)]) -> (String, Vec<String>, Vec<Warning>) {
        let imports: HashMap<String, String> = imports
            .iter()
            .map(|(a, p)| (a.to_string(), p.to_string()))
            .collect();
        let sequence = Sequence::new();
        let rewritten = rewrite_tags(markup, "page.html");
        let hidden = hide::hide_expressions(&rewritten.markup, "$Page_");
        let mut doc = Document::parse_fragment(&hidden);

        let mut paster = Paster::new("page.html", "Page", &imports, table, &sequence);
        paster.paste_document(&mut doc);
        (restore_expressions(&doc.to_html()), paster.globals, paster.warnings)
    }

    fn hidden(markup: &str, name: &str) -> String {
        hide::hide_expressions(markup, &namespace_prefix(name))
    }

    #[test]
    fn test_constant_argument_substitutes_raw_text() {
        let mut table = Table::default();
        table.components.insert(
            "title.html".to_string(),
            Arc::new(component("Title", &hidden("<h1>{{ $text }}</h1>", "Title"))),
        );

        let (out, _, warnings) = paste(
            r#"<Title $text="Hello"/>"#,
            &table,
            &[("Title", "title.html")],
        );
        assert_eq!(out, "<h1>Hello</h1>");
        assert!(warnings.is_empty());
        assert_eq!(
            table.edges.lock().as_slice(),
            &[("title.html".to_string(), "page.html".to_string())]
        );
    }

    #[test]
    fn test_constant_inside_larger_expression_is_quoted() {
        let mut table = Table::default();
        table.components.insert(
            "t.html".to_string(),
            Arc::new(component("T", &hidden(r#"{{ if eq $kind "a" }}A{{ end }}"#, "T"))),
        );

        let (out, _, _) = paste(r#"<T $kind="a"/>"#, &table, &[("T", "t.html")]);
        assert_eq!(out, r#"{{ if eq "a" "a" }}A{{ end }}"#);
    }

    #[test]
    fn test_expression_argument_is_declared() {
        let mut table = Table::default();
        table.components.insert(
            "card.html".to_string(),
            Arc::new(component("Card", &hidden("<p>{{ .Title }} {{ $n }}</p>", "Card"))),
        );

        let (out, _, _) = paste(
            r#"<Card .Title=.Heading $n=$count/>"#,
            &table,
            &[("Card", "card.html")],
        );
        assert_eq!(
            out,
            "{{- $arg0 := .Heading}}{{- $arg1 := $Page_count}}<p>{{ $arg0 }} {{ $arg1 }}</p>"
        );
    }

    #[test]
    fn test_two_inlines_get_distinct_variables() {
        let mut table = Table::default();
        table.components.insert(
            "card.html".to_string(),
            Arc::new(component("Card", &hidden("<p>{{ $v }}</p>", "Card"))),
        );

        let (out, _, _) = paste(
            "<Card $v=.A/><Card $v=.B/>",
            &table,
            &[("Card", "card.html")],
        );
        assert_eq!(
            out,
            "{{- $arg0 := .A}}<p>{{ $arg0 }}</p>{{- $arg1 := .B}}<p>{{ $arg1 }}</p>"
        );
    }

    #[test]
    fn test_slot_and_partials_are_filled() {
        let mut table = Table::default();
        table.components.insert(
            "box.html".to_string(),
            Arc::new(component(
                "Box",
                &format!("<div><header>{}</header>{}</div>", tags::partial_marker("Head"), tags::SLOT_MARKER),
            )),
        );

        let (out, _, _) = paste(
            r#"<Box -Head="<b>H</b>"><i>body</i></Box>"#,
            &table,
            &[("Box", "box.html")],
        );
        assert_eq!(out, "<div><header><b>H</b></header><i>body</i></div>");
    }

    #[test]
    fn test_defaults_are_overridden_by_attributes() {
        let mut callee = component("Btn", &hidden("{{ $size }}|{{ $kind }}", "Btn"));
        callee.defaults = BTreeMap::from([
            ("$size".to_string(), "\"m\"".to_string()),
            ("$kind".to_string(), "\"plain\"".to_string()),
        ]);
        let mut table = Table::default();
        table.components.insert("btn.html".to_string(), Arc::new(callee));

        let (out, _, _) = paste(r#"<Btn $kind="primary"/>"#, &table, &[("Btn", "btn.html")]);
        assert_eq!(out, "m|primary");
    }

    #[test]
    fn test_unknown_alias_is_left_and_reported() {
        let table = Table::default();
        let (out, _, warnings) = paste("<Missing><p>x</p></Missing>", &table, &[]);
        assert_eq!(out, "<p>x</p>");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::UnresolvedReference);
    }

    #[test]
    fn test_callee_on_the_chain_is_a_cycle() {
        let mut table = Table::default();
        table
            .components
            .insert("outer.html".to_string(), Arc::new(component("Outer", "<b></b>")));

        let imports = HashMap::from([("Outer".to_string(), "outer.html".to_string())]);
        let chain = vec!["outer.html".to_string(), "page.html".to_string()];
        let sequence = Sequence::new();
        let mut doc = Document::parse_fragment(&rewrite_tags("<p><Outer/></p>", "page.html").markup);
        let mut paster = Paster::new("page.html", "Page", &imports, &table, &sequence).with_chain(&chain);
        paster.paste_document(&mut doc);

        assert_eq!(doc.to_html(), "<p></p>");
        assert_eq!(paster.warnings[0].kind, WarningKind::UnresolvedReference);
        assert!(paster.warnings[0].message.contains("cycle"));
    }

    #[test]
    fn test_global_callee_becomes_marker() {
        let mut callee = component("Nav", "<nav></nav>");
        callee.global = true;
        let mut table = Table::default();
        table.components.insert("nav.html".to_string(), Arc::new(callee));

        let (out, globals, _) = paste("<Nav/><Nav/>", &table, &[("Nav", "nav.html")]);
        assert_eq!(out, r#"{{global "nav.html"}}{{global "nav.html"}}"#);
        assert_eq!(globals, vec!["nav.html".to_string()]);
    }

    #[test]
    fn test_globals_of_inlined_callee_are_inherited() {
        let mut shell = component("Shell", &hidden(r#"<header>{{global "nav.html"}}</header>"#, "Shell"));
        shell.globals = vec!["nav.html".to_string()];
        let mut table = Table::default();
        table.components.insert("shell.html".to_string(), Arc::new(shell));

        let (out, globals, _) = paste("<Shell/><Shell/>", &table, &[("Shell", "shell.html")]);
        assert_eq!(out, r#"<header>{{global "nav.html"}}</header><header>{{global "nav.html"}}</header>"#);
        assert_eq!(globals, vec!["nav.html".to_string()]);
    }

    #[test]
    fn test_attribute_without_value_is_reported() {
        let mut table = Table::default();
        table.components.insert(
            "card.html".to_string(),
            Arc::new(component("Card", &hidden("<b>{{ $title }}</b>", "Card"))),
        );

        let (out, _, warnings) = paste(r#"<Card $title $size="s"/>"#, &table, &[("Card", "card.html")]);
        assert_eq!(out, "<b>{{ $Card_title }}</b>");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::MalformedAttribute);
        assert!(warnings[0].message.contains("$title"));
    }

    #[test]
    fn test_component_comments() {
        let mut table = Table::default();
        table
            .components
            .insert("a.html".to_string(), Arc::new(component("A", "<b></b>")));

        let imports: HashMap<String, String> =
            HashMap::from([("A".to_string(), "a.html".to_string())]);
        let sequence = Sequence::new();
        let mut doc = Document::parse_fragment(&rewrite_tags("<A/>", "p.html").markup);
        Paster::new("p.html", "P", &imports, &table, &sequence)
            .with_comments(true)
            .paste_document(&mut doc);

        assert_eq!(doc.to_html(), "<!-- + A: a.html --><b></b><!-- - A -->");
    }

    #[test]
    fn test_partial_percent_variables_use_callee_namespace() {
        let mut table = Table::default();
        table.components.insert(
            "list.html".to_string(),
            Arc::new(component(
                "List",
                &hidden(
                    &format!("{{{{ range $item := .Items }}}}{}{{{{ end }}}}", tags::partial_marker("Row")),
                    "List",
                ),
            )),
        );

        let (out, _, _) = paste(
            r#"<List -Row="<li>{{ %item }}</li>"/>"#,
            &table,
            &[("List", "list.html")],
        );
        assert_eq!(out, "{{ range $List_item := .Items }}<li>{{ $List_item }}</li>{{ end }}");
    }
}
