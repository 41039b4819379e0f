use crate::dom::{Document, NodeId, NodeKind};

/// Result of visiting one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Descend into the node's children.
    Continue,
    /// Do not descend, but keep walking siblings.
    SkipSubtree,
    /// End the whole traversal.
    Stop,
}

/// The NodeVisitor trait is the single traversal mechanism over a [`Document`].
///
/// Rules:
/// 1. Traversal is pre-order, children in document order.
/// 2. Implementers override `visit_*` methods and steer the walk with the
///    returned [`Visit`].
/// 3. Visitors only read. Mutations are collected and applied after the walk,
///    so node ids stay valid during traversal.
pub trait NodeVisitor {
    fn visit_element(&mut self, _doc: &Document, _id: NodeId, _name: &str) -> Visit {
        Visit::Continue
    }

    fn visit_text(&mut self, _doc: &Document, _id: NodeId, _text: &str) -> Visit {
        Visit::Continue
    }

    fn visit_comment(&mut self, _doc: &Document, _id: NodeId, _text: &str) -> Visit {
        Visit::Continue
    }

    fn visit_node(&mut self, doc: &Document, id: NodeId) -> Visit {
        walk_node(self, doc, id)
    }
}

/// Walk the children of `id`. Returns [`Visit::Stop`] if the walk was ended.
pub fn walk_children<V: NodeVisitor + ?Sized>(visitor: &mut V, doc: &Document, id: NodeId) -> Visit {
    for child in doc.children(id) {
        if visitor.visit_node(doc, *child) == Visit::Stop {
            return Visit::Stop;
        }
    }
    Visit::Continue
}

pub fn walk_node<V: NodeVisitor + ?Sized>(visitor: &mut V, doc: &Document, id: NodeId) -> Visit {
    let outcome = match doc.kind(id) {
        NodeKind::Element { name, .. } => visitor.visit_element(doc, id, name),
        NodeKind::Text(text) => visitor.visit_text(doc, id, text),
        NodeKind::Comment(text) => visitor.visit_comment(doc, id, text),
        NodeKind::Root => Visit::Continue,
        NodeKind::Doctype(_) => Visit::SkipSubtree,
    };

    match outcome {
        Visit::Continue => walk_children(visitor, doc, id),
        Visit::SkipSubtree => Visit::Continue,
        Visit::Stop => Visit::Stop,
    }
}

/// Collects elements accepted by a predicate.
pub struct ElementCollector<F> {
    pub predicate: F,
    pub found: Vec<NodeId>,
    /// Do not look inside accepted elements.
    pub skip_matched: bool,
}

impl<F: FnMut(&Document, NodeId, &str) -> bool> ElementCollector<F> {
    pub fn new(predicate: F, skip_matched: bool) -> Self {
        Self {
            predicate,
            found: Vec::new(),
            skip_matched,
        }
    }

    pub fn collect(mut self, doc: &Document, from: NodeId) -> Vec<NodeId> {
        walk_children(&mut self, doc, from);
        self.found
    }
}

impl<F: FnMut(&Document, NodeId, &str) -> bool> NodeVisitor for ElementCollector<F> {
    fn visit_element(&mut self, doc: &Document, id: NodeId, name: &str) -> Visit {
        if (self.predicate)(doc, id, name) {
            self.found.push(id);
            if self.skip_matched {
                return Visit::SkipSubtree;
            }
        }
        Visit::Continue
    }
}
