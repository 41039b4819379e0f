//! Type/Code Generator
//!
//! Records which data fields each template of a component reads and which
//! named blocks it invokes with which field, then emits a Rust module with one
//! data struct per template and typed render entry points.
//!
//! Field types, in order of precedence:
//! 1. `@type("T", "alias path")` annotation on the first use of the field
//! 2. the data struct of the one block invoked with that field
//! 3. a merged struct when several blocks are invoked with it
//! 4. `serde_json::Value`

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::component::{Component, Root};
use crate::hide::EXPRESSION;
use crate::naming::component_name;

lazy_static! {
    static ref TYPE_ANNOTATION: Regex =
        Regex::new(r#"@type\("([^"]+)"(?:,\s?"([^"]+)")?\)"#).unwrap();
}

/// Key of the component's own (unnamed) template.
pub const DEFAULT_TEMPLATE: &str = "";

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "box", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "static", "struct", "super", "trait", "true", "type",
    "unsafe", "use", "where", "while", "yield",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationData {
    /// Template → field (`.Name`) → declared type.
    pub templates: BTreeMap<String, BTreeMap<String, Option<String>>>,
    /// Template → field → blocks invoked with that field.
    pub calls: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// Alias → module path, from type annotations.
    pub imports: BTreeMap<String, String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Split on `sep`, keeping `@type(…)` annotations whole.
fn split_ignore_type(s: &str, sep: char) -> Vec<String> {
    let mut result = Vec::new();
    let mut part = String::new();
    let mut depth = 0usize;

    for c in s.chars() {
        if part.starts_with("@type(") || (part == "@type" && c == '(') {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }

        if c == sep && depth == 0 {
            result.push(std::mem::take(&mut part));
            continue;
        }
        part.push(c);
    }

    result.push(part);
    result.into_iter().filter(|t| !t.is_empty()).collect()
}

/// `.Items.Name)` → `.Items`; `None` for anything that is not a field.
fn field_head(token: &str) -> Option<String> {
    let token = token.trim_start_matches('(').trim_end_matches(')');
    let rest = token.strip_prefix('.')?;
    let name: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
    if name.is_empty() {
        return None;
    }
    Some(format!(".{}", name))
}

#[derive(Debug, PartialEq)]
enum Frame {
    Template(String),
    Scope,
    Transparent,
}

/// Collect generation data from a final template and strip its type
/// annotations.
pub fn extract_generation_data(template: &str) -> (GenerationData, String) {
    let mut data = GenerationData::default();
    data.templates.insert(DEFAULT_TEMPLATE.to_string(), BTreeMap::new());
    let mut frames = vec![Frame::Template(DEFAULT_TEMPLATE.to_string())];

    for caps in EXPRESSION.captures_iter(template) {
        let content: String = caps[1]
            .chars()
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .collect();
        let mut tokens = split_ignore_type(&content, ' ');
        if tokens.first().map(String::as_str) == Some("-") {
            tokens.remove(0);
        }
        if tokens.last().map(String::as_str) == Some("-") {
            tokens.pop();
        }
        if tokens.is_empty() {
            continue;
        }

        // Fields inside range/with read a different dot.
        let current = frames.iter().rev().find_map(|frame| match frame {
            Frame::Template(name) => Some(Some(name.clone())),
            Frame::Scope => Some(None),
            Frame::Transparent => None,
        });

        if let Some(Some(current)) = current {
            for (i, token) in tokens.iter().enumerate() {
                let Some(field) = field_head(token) else {
                    continue;
                };

                let mut declared = None;
                if let Some(caps) = tokens.get(i + 1).and_then(|t| TYPE_ANNOTATION.captures(t)) {
                    declared = Some(caps[1].to_string());
                    if let Some(source) = caps.get(2) {
                        let mut parts = source.as_str().split_whitespace();
                        if let Some(alias) = parts.next() {
                            let path = parts.next().unwrap_or_default().to_string();
                            data.imports.insert(alias.to_string(), path);
                        }
                    }
                }

                data.templates
                    .entry(current.clone())
                    .or_default()
                    .entry(field)
                    .or_insert(declared);
            }
        }

        let keyword = tokens[0].as_str();
        match keyword {
            "define" => {
                if let Some(name) = tokens.get(1) {
                    let name = name.trim_matches('"').to_string();
                    data.templates.entry(name.clone()).or_default();
                    frames.push(Frame::Template(name));
                }
            }
            "block" | "template" => {
                let (Some(name), Some(variable)) = (tokens.get(1), tokens.get(2)) else {
                    if keyword == "block" {
                        frames.push(Frame::Transparent);
                    }
                    continue;
                };
                let name = name.trim_matches('"').to_string();
                let parent = match frames.iter().rev().find_map(|f| match f {
                    Frame::Template(n) => Some(n.clone()),
                    _ => None,
                }) {
                    Some(parent) => parent,
                    None => DEFAULT_TEMPLATE.to_string(),
                };

                if let Some(field) = field_head(variable) {
                    let called = data.calls.entry(parent).or_default().entry(field).or_default();
                    if !called.contains(&name) {
                        called.push(name.clone());
                    }
                }
                data.templates.entry(name.clone()).or_default();

                if keyword == "block" {
                    frames.push(Frame::Template(name));
                }
            }
            "range" | "with" => frames.push(Frame::Scope),
            "if" => frames.push(Frame::Transparent),
            "end" => {
                if frames.len() > 1 {
                    frames.pop();
                }
            }
            _ => {}
        }
    }

    let stripped = TYPE_ANNOTATION.replace_all(template, "").into_owned();
    (data, stripped)
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMING
// ═══════════════════════════════════════════════════════════════════════════════

pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::new();

    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c.is_alphanumeric() {
            out.push(*c);
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }

    let out = out.trim_end_matches('_').to_string();
    if RUST_KEYWORDS.contains(&out.as_str()) {
        format!("r#{}", out)
    } else {
        out
    }
}

fn pascal(name: &str) -> String {
    component_name(name.trim_matches('"'))
}

fn data_type(component: &str, template: &str) -> String {
    if template == DEFAULT_TEMPLATE {
        format!("{}Data", component)
    } else {
        format!("{}{}Data", component, pascal(template))
    }
}

fn path_constant(path: &str) -> String {
    snake_case(&component_name(path)).trim_start_matches("r#").to_uppercase()
}

// ═══════════════════════════════════════════════════════════════════════════════
// EMISSION
// ═══════════════════════════════════════════════════════════════════════════════

struct TypeWriter<'a> {
    component: &'a str,
    data: &'a GenerationData,
    /// Struct name → field name → type, in emission order.
    structs: BTreeMap<String, BTreeMap<String, String>>,
}

impl<'a> TypeWriter<'a> {
    fn field_type(&mut self, template: &str, field: &str, declared: Option<&String>, seen: &mut BTreeSet<String>) -> String {
        if let Some(declared) = declared {
            return declared.clone();
        }

        let called = self
            .data
            .calls
            .get(template)
            .and_then(|c| c.get(field))
            .cloned()
            .unwrap_or_default();

        match called.as_slice() {
            [] => "serde_json::Value".to_string(),
            [single] => data_type(self.component, single),
            several => {
                let name = format!(
                    "{}{}{}Merged",
                    self.component,
                    pascal(template),
                    pascal(field.trim_start_matches('.'))
                );
                if seen.insert(name.clone()) {
                    let mut fields = BTreeMap::new();
                    for block in several {
                        let variables = self.data.templates.get(block).cloned().unwrap_or_default();
                        for (variable, declared) in variables {
                            if variable == "." {
                                continue;
                            }
                            let ty = self.field_type(block, &variable, declared.as_ref(), seen);
                            fields.insert(variable, ty);
                        }
                    }
                    self.structs.insert(name.clone(), fields);
                }
                name
            }
        }
    }

    fn collect(mut self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut seen = BTreeSet::new();
        for (template, variables) in &self.data.templates {
            let mut fields = BTreeMap::new();
            for (variable, declared) in variables {
                if variable == "." {
                    continue;
                }
                let ty = self.field_type(template, variable, declared.as_ref(), &mut seen);
                fields.insert(variable.clone(), ty);
            }
            self.structs.insert(data_type(self.component, template), fields);
        }
        self.structs
            .entry(data_type(self.component, DEFAULT_TEMPLATE))
            .or_default();
        self.structs
    }
}

fn write_struct(out: &mut String, name: &str, fields: &BTreeMap<String, String>) {
    let _ = writeln!(out, "#[derive(Debug, Default, Clone, Serialize)]");
    if fields.is_empty() {
        let _ = writeln!(out, "pub struct {} {{}}\n", name);
        return;
    }
    let _ = writeln!(out, "pub struct {} {{", name);
    for (field, ty) in fields {
        let raw = field.trim_start_matches('.');
        let _ = writeln!(out, "    #[serde(rename = \"{}\")]", raw);
        let _ = writeln!(out, "    pub {}: {},", snake_case(raw), ty);
    }
    let _ = writeln!(out, "}}\n");
}

/// Emit the accessor module for every compiled component and root.
pub fn generate_module(components: &[Arc<Component>], roots: &[Arc<Root>]) -> String {
    let mut components: Vec<&Arc<Component>> = components.iter().collect();
    components.sort_by(|a, b| a.path.cmp(&b.path));
    let mut roots: Vec<&Arc<Root>> = roots.iter().collect();
    roots.sort_by(|a, b| a.path.cmp(&b.path));

    let mut out = String::from("// Code generated by smelt; DO NOT EDIT.\n\n");

    let mut imports: BTreeMap<String, String> = BTreeMap::new();
    for component in &components {
        imports.extend(component.generation.imports.clone());
    }

    out.push_str("use std::sync::Arc;\n\n");
    out.push_str("use serde::Serialize;\n");
    out.push_str("use serde_json::{Map, Value};\n");
    out.push_str("use smelt::{GlobalHandler, GlobalOption, LoadError, Registry, RenderError, RenderRequest};\n");
    for (alias, path) in &imports {
        if path.is_empty() {
            let _ = writeln!(out, "use {};", alias);
        } else {
            let _ = writeln!(out, "use {} as {};", path, alias);
        }
    }
    out.push('\n');

    out.push_str("// roots\n");
    for root in &roots {
        let _ = writeln!(out, "pub const {}: &str = \"{}\";", path_constant(&root.path), root.path);
    }
    out.push_str("\n// components\n");
    for component in &components {
        let _ = writeln!(
            out,
            "pub const {}: &str = \"{}\";",
            path_constant(&component.path),
            component.path
        );
    }
    out.push('\n');

    write_load(&mut out, &components);

    for component in &components {
        let structs = TypeWriter {
            component: &component.name,
            data: &component.generation,
            structs: BTreeMap::new(),
        }
        .collect();

        for (name, fields) in &structs {
            write_struct(&mut out, name, fields);
        }

        let function = snake_case(&component.name);
        let data = data_type(&component.name, DEFAULT_TEMPLATE);
        let _ = writeln!(
            out,
            "pub fn write_{f}(\n    registry: &Registry,\n    request: &RenderRequest,\n    data: &{d},\n    options: &[GlobalOption],\n) -> Result<String, RenderError> {{\n    registry.render(\"{p}\", request, data, options)\n}}\n",
            f = function.trim_start_matches("r#"),
            d = data,
            p = component.path
        );

        for template in component.generation.templates.keys() {
            if template == DEFAULT_TEMPLATE {
                continue;
            }
            let _ = writeln!(
                out,
                "pub fn write_{f}_{b}(registry: &Registry, data: &{d}) -> Result<String, RenderError> {{\n    registry.render_template(\"{p}\", \"{t}\", data)\n}}\n",
                f = function.trim_start_matches("r#"),
                b = snake_case(&pascal(template)).trim_start_matches("r#"),
                d = data_type(&component.name, template),
                p = component.path,
                t = template
            );
        }
    }

    out.trim_end().to_string() + "\n"
}

fn write_load(out: &mut String, components: &[&Arc<Component>]) {
    let globals: Vec<&&Arc<Component>> = components.iter().filter(|c| c.global).collect();

    out.push_str("#[derive(Default)]\npub struct GlobalHandlers {\n");
    for component in &globals {
        let _ = writeln!(
            out,
            "    pub {}: Option<Box<dyn Fn(&RenderRequest, &Map<String, Value>) -> {} + Send + Sync>>,",
            snake_case(&component.name),
            data_type(&component.name, DEFAULT_TEMPLATE)
        );
    }
    out.push_str("}\n\n");

    out.push_str("pub fn load(registry: &mut Registry, handlers: GlobalHandlers) -> Result<(), LoadError> {\n");
    if globals.is_empty() {
        out.push_str("    let _ = (registry, handlers);\n");
    }
    for component in &globals {
        let field = snake_case(&component.name);
        let data = data_type(&component.name, DEFAULT_TEMPLATE);
        let _ = writeln!(
            out,
            "    let handler: GlobalHandler = match handlers.{f} {{\n        Some(handler) => Arc::new(move |request, arguments| {{\n            serde_json::to_value(handler(request, arguments)).unwrap_or_default()\n        }}),\n        None => Arc::new(|_, _| serde_json::to_value({d}::default()).unwrap_or_default()),\n    }};\n    registry.set_global_handler(\"{p}\", handler)?;",
            f = field,
            d = data,
            p = component.path
        );
    }
    out.push_str("    Ok(())\n}\n\n");
}
