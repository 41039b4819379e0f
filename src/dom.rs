//! Document Tree Builder
//!
//! Parses intermediate markup with html5ever and copies the result into an
//! index arena. Nodes are addressed by [`NodeId`]; every parent owns an
//! explicit child list, so splicing and removal are list surgery.

use std::fmt::Write as _;

use tendril::TendrilSink;
use html5ever::{parse_document, parse_fragment, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Doctype(String),
    Element { name: String, attrs: Vec<Attribute> },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERIALIZATION TABLES
// ═══════════════════════════════════════════════════════════════════════════════

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PARSING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Parse markup as the content of a `<body>`; the root's children are the
    /// fragment's top-level nodes with no synthetic wrapper.
    pub fn parse_fragment(markup: &str) -> Self {
        let context = QualName::new(
            None,
            Namespace::from("http://www.w3.org/1999/xhtml"),
            LocalName::from("body"),
        );
        let dom = parse_fragment(RcDom::default(), ParseOpts::default(), context, vec![]).one(markup);

        let mut document = Self::new();
        let root = document.root();

        // Fragment parsing yields document → <html> → content.
        for child in dom.document.children.borrow().iter() {
            if let NodeData::Element { .. } = child.data {
                for grandchild in child.children.borrow().iter() {
                    document.import_handle(grandchild, root);
                }
            }
        }

        document
    }

    /// Parse a full document, keeping doctype and `html`/`head`/`body`.
    pub fn parse_document(markup: &str) -> Self {
        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(markup);

        let mut document = Self::new();
        let root = document.root();
        for child in dom.document.children.borrow().iter() {
            document.import_handle(child, root);
        }
        document
    }

    fn import_handle(&mut self, handle: &Handle, parent: NodeId) {
        match &handle.data {
            NodeData::Document => {
                for child in handle.children.borrow().iter() {
                    self.import_handle(child, parent);
                }
            }

            NodeData::Doctype { name, .. } => {
                self.append(parent, NodeKind::Doctype(name.to_string()));
            }

            NodeData::Text { contents } => {
                self.append_text(parent, &contents.borrow());
            }

            NodeData::Comment { contents } => {
                self.append(parent, NodeKind::Comment(contents.to_string()));
            }

            NodeData::Element {
                name,
                attrs,
                template_contents,
                ..
            } => {
                let attrs = attrs
                    .borrow()
                    .iter()
                    .map(|a| Attribute {
                        name: match &a.name.prefix {
                            Some(prefix) => format!("{}:{}", prefix, a.name.local),
                            None => a.name.local.to_string(),
                        },
                        value: a.value.to_string(),
                    })
                    .collect();

                let id = self.append(
                    parent,
                    NodeKind::Element {
                        name: name.local.to_string(),
                        attrs,
                    },
                );

                // <template> keeps its content in a separate fragment.
                if let Some(contents) = template_contents.borrow().as_ref() {
                    for child in contents.children.borrow().iter() {
                        self.import_handle(child, id);
                    }
                }

                for child in handle.children.borrow().iter() {
                    self.import_handle(child, id);
                }
            }

            NodeData::ProcessingInstruction { .. } => {}
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn attrs(&self, id: NodeId) -> &[Attribute] {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attrs, .. } => attrs,
            _ => &[],
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: String) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id.0].kind {
            match attrs.iter_mut().find(|a| a.name == name) {
                Some(existing) => existing.value = value,
                None => attrs.push(Attribute {
                    name: name.to_string(),
                    value,
                }),
            }
        }
    }

    /// Element children only.
    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.tag_name(*c).is_some())
            .collect()
    }

    /// Every node below `id` in document order (excluding `id`).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Concatenated text of the direct text children of `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.children(id)
            .iter()
            .filter_map(|c| match self.kind(*c) {
                NodeKind::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Append text, merging with a trailing text sibling.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        if let Some(&last) = self.nodes[parent.0].children.last() {
            if let NodeKind::Text(existing) = &mut self.nodes[last.0].kind {
                existing.push_str(text);
                return;
            }
        }
        self.append(parent, NodeKind::Text(text.to_string()));
    }

    /// Remove `id` from its parent's child list. The node stays in the arena
    /// but is unreachable.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    /// Replace `id` by its own children.
    pub fn unwrap(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent else {
            return;
        };
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in &children {
            self.nodes[child.0].parent = Some(parent);
        }

        let siblings = &mut self.nodes[parent.0].children;
        if let Some(index) = siblings.iter().position(|c| *c == id) {
            siblings.splice(index..=index, children);
        }
        self.nodes[id.0].parent = None;
    }

    /// Copy the subtree at `source_id` of `source` into this arena, unattached.
    fn copy_from(&mut self, source: &Document, source_id: NodeId, parent: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind: source.kind(source_id).clone(),
            parent: Some(parent),
            children: Vec::new(),
        });
        for child in source.children(source_id) {
            let copied = self.copy_from(source, *child, id);
            self.nodes[id.0].children.push(copied);
        }
        id
    }

    /// Replace `id` with the top-level nodes of `fragment`.
    pub fn replace_with_fragment(&mut self, id: NodeId, fragment: &Document) -> Vec<NodeId> {
        let Some(parent) = self.nodes[id.0].parent else {
            return Vec::new();
        };

        let copied: Vec<NodeId> = fragment
            .children(fragment.root())
            .iter()
            .map(|child| self.copy_from(fragment, *child, parent))
            .collect();

        let siblings = &mut self.nodes[parent.0].children;
        if let Some(index) = siblings.iter().position(|c| *c == id) {
            siblings.splice(index..=index, copied.iter().copied());
        }
        self.nodes[id.0].parent = None;

        copied
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn to_html(&self) -> String {
        self.serialize_children(self.root())
    }

    pub fn serialize_children(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.serialize_into(&mut out, *child);
        }
        out
    }

    pub fn serialize(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.serialize_into(&mut out, id);
        out
    }

    fn serialize_into(&self, out: &mut String, id: NodeId) {
        match self.kind(id) {
            NodeKind::Root => {
                for child in self.children(id) {
                    self.serialize_into(out, *child);
                }
            }

            NodeKind::Doctype(name) => {
                let _ = write!(out, "<!DOCTYPE {}>", name);
            }

            NodeKind::Comment(text) => {
                let _ = write!(out, "<!--{}-->", text);
            }

            NodeKind::Text(text) => {
                let raw = self
                    .parent(id)
                    .and_then(|p| self.tag_name(p))
                    .is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag));
                if raw {
                    out.push_str(text);
                } else {
                    escape_text(out, text);
                }
            }

            NodeKind::Element { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for attr in attrs {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    escape_attribute(out, &attr.value);
                    out.push('"');
                }
                out.push('>');

                if VOID_ELEMENTS.contains(&name.as_str()) {
                    return;
                }

                if matches!(name.as_str(), "pre" | "textarea" | "listing") {
                    if let Some(NodeKind::Text(text)) = self.children(id).first().map(|c| self.kind(*c)) {
                        if text.starts_with('\n') {
                            out.push('\n');
                        }
                    }
                }

                for child in self.children(id) {
                    self.serialize_into(out, *child);
                }

                let _ = write!(out, "</{}>", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fragment_has_no_wrapper() {
        let doc = Document::parse_fragment("<p>a</p>text<br>");
        assert_eq!(doc.children(doc.root()).len(), 3);
        assert_eq!(doc.to_html(), "<p>a</p>text<br>");
    }

    #[test]
    fn test_fragment_keeps_style_in_place() {
        let doc = Document::parse_fragment("<div></div><style>a > b {}</style>");
        assert_eq!(doc.to_html(), "<div></div><style>a > b {}</style>");
    }

    #[test]
    fn test_text_and_attribute_escaping() {
        let doc = Document::parse_fragment(r#"<a title="x &quot;y&quot; &amp; z">1 &lt; 2</a>"#);
        assert_eq!(doc.to_html(), r#"<a title="x &quot;y&quot; &amp; z">1 &lt; 2</a>"#);
    }

    #[test]
    fn test_full_document_keeps_structure() {
        let doc = Document::parse_document("<!DOCTYPE html><html><head><title>t</title></head><body>b</body></html>");
        assert_eq!(
            doc.to_html(),
            "<!DOCTYPE html><html><head><title>t</title></head><body>b</body></html>"
        );
    }

    #[test]
    fn test_unwrap_splices_children() {
        let mut doc = Document::parse_fragment("<div><span>a</span><b>b</b></div>");
        let div = doc.children(doc.root())[0];
        let span = doc.children(div)[0];
        doc.unwrap(span);
        assert_eq!(doc.to_html(), "<div>a<b>b</b></div>");
    }

    #[test]
    fn test_replace_with_fragment() {
        let mut doc = Document::parse_fragment("<ul><x-slot></x-slot><li>3</li></ul>");
        let ul = doc.children(doc.root())[0];
        let slot = doc.children(ul)[0];
        let fragment = Document::parse_fragment("<li>1</li><li>2</li>");
        let inserted = doc.replace_with_fragment(slot, &fragment);
        assert_eq!(inserted.len(), 2);
        assert_eq!(doc.to_html(), "<ul><li>1</li><li>2</li><li>3</li></ul>");
        assert_eq!(doc.parent(inserted[0]), Some(ul));
    }

    #[test]
    fn test_set_attr_and_descendants() {
        let mut doc = Document::parse_fragment("<div><p class=\"a\"></p></div>");
        let all = doc.descendants(doc.root());
        assert_eq!(all.len(), 2);
        doc.set_attr(all[1], "class", "a b".to_string());
        doc.set_attr(all[0], "id", "x".to_string());
        assert_eq!(doc.to_html(), "<div id=\"x\"><p class=\"a b\"></p></div>");
    }

    #[test]
    fn test_template_contents_are_kept() {
        let doc = Document::parse_fragment("<template><p>x</p></template>");
        assert_eq!(doc.to_html(), "<template><p>x</p></template>");
    }
}
