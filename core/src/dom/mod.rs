//! Page model
//!
//! A `Document` is an arena of nodes addressed by [`NodeId`]. The live page
//! and every detached clone made for a capture use the same type; only the
//! live page ever has observers registered on it.
//!
//! Elements carry an optional document-space layout rectangle. Client
//! coordinates (what `getBoundingClientRect` would report) are derived from
//! it by subtracting the viewport scroll offset.
//!
//! # Submodules
//!
//! - `selector` - CSS subset used to locate items and markers
//! - `observer` - mutation/resize/intersection observer registry
//! - `spec` - serde fixtures that build documents

pub mod observer;
pub mod selector;
pub mod spec;

use std::fmt;

use crate::geometry::{Rect, Viewport, intersects_viewport};

pub use observer::{Notice, ObserverId, ObserverKind};
pub use selector::{Selector, SelectorError};
pub use spec::{NodeSpec, PageSpec};

use observer::ObserverRegistry;

/// Elements that never have children or a closing tag in markup.
const VOID_ELEMENTS: &[&str] = &["img", "br", "hr", "input", "meta", "link", "source"];

// ─────────────────────────────────────────────────────────────────────────────
// Nodes
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a node inside one particular document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// An element: tag name plus attributes in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    attrs: Vec<(String, String)>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attrs: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if the value changed
    fn set_attr(&mut self, name: &str, value: &str) -> bool {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) if v == value => false,
            Some((_, v)) => {
                *v = value.to_string();
                true
            }
            None => {
                self.attrs.push((name.to_string(), value.to_string()));
                true
            }
        }
    }

    fn remove_attr(&mut self, name: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|(k, _)| k != name);
        before != self.attrs.len()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    layout: Option<Rect>,
}

/// Errors from structural document operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomError {
    #[error("unknown {0}")]
    UnknownNode(NodeId),
    #[error("{0} is not an element")]
    NotAnElement(NodeId),
    #[error("cannot insert {child} under {parent}: would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
    #[error("no element matches id `{0}`")]
    MissingId(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Document
// ─────────────────────────────────────────────────────────────────────────────

pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    body: NodeId,
    viewport: Viewport,
    observers: ObserverRegistry,
    activations: Vec<NodeId>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len())
            .field("viewport", &self.viewport)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Document {
    /// Create an empty page: `<html><body></body></html>`
    pub fn new(viewport: Viewport) -> Self {
        let mut doc = Self::with_root("html", viewport);
        let body = doc.push_node(NodeData::Element(Element::new("body")), None);
        doc.link(doc.root, body);
        doc.body = body;
        doc
    }

    /// Create a document whose root is a single element of the given tag.
    /// Detached clones use this shape.
    pub fn with_root(tag: &str, viewport: Viewport) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            body: NodeId(0),
            viewport,
            observers: ObserverRegistry::default(),
            activations: Vec::new(),
        };
        let root = doc.push_node(NodeData::Element(Element::new(tag)), None);
        doc.root = root;
        doc.body = root;
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────

    fn push_node(&mut self, data: NodeData, layout: Option<Rect>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
            layout,
        });
        id
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Create a detached element
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeData::Element(Element::new(tag)), None)
    }

    /// Create a detached text node
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Text(text.to_string()), None)
    }

    fn check(&self, id: NodeId) -> Result<&Node, DomError> {
        self.nodes.get(id.0).ok_or(DomError::UnknownNode(id))
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element, DomError> {
        match self.nodes.get_mut(id.0) {
            Some(Node {
                data: NodeData::Element(el),
                ..
            }) => Ok(el),
            Some(_) => Err(DomError::NotAnElement(id)),
            None => Err(DomError::UnknownNode(id)),
        }
    }

    /// Append `child` as the last child of `parent`, moving it if attached elsewhere.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.check(child)?;
        if !matches!(self.check(parent)?.data, NodeData::Element(_)) {
            return Err(DomError::NotAnElement(parent));
        }
        if self.ancestors_inclusive(parent).contains(&child) {
            return Err(DomError::Cycle { parent, child });
        }
        if let Some(old) = self.nodes[child.0].parent {
            self.nodes[old.0].children.retain(|c| *c != child);
            self.notify_mutation(old);
        }
        self.link(parent, child);
        self.notify_mutation(parent);
        self.refresh_intersections();
        Ok(())
    }

    /// Detach a node (and its subtree) from its parent
    pub fn remove(&mut self, node: NodeId) -> Result<(), DomError> {
        let parent = self.check(node)?.parent;
        if let Some(parent) = parent {
            self.nodes[parent.0].children.retain(|c| *c != node);
            self.nodes[node.0].parent = None;
            self.notify_mutation(parent);
            self.refresh_intersections();
        }
        Ok(())
    }

    /// Remove every child of `node`
    pub fn clear_children(&mut self, node: NodeId) -> Result<(), DomError> {
        self.check(node)?;
        let children = std::mem::take(&mut self.nodes[node.0].children);
        if children.is_empty() {
            return Ok(());
        }
        for child in children {
            self.nodes[child.0].parent = None;
        }
        self.notify_mutation(node);
        self.refresh_intersections();
        Ok(())
    }

    /// Replace `old` with `new` in `old`'s parent
    pub fn replace_with(&mut self, old: NodeId, new: NodeId) -> Result<(), DomError> {
        self.check(new)?;
        let Some(parent) = self.check(old)?.parent else {
            return Ok(());
        };
        if let Some(prev) = self.nodes[new.0].parent {
            self.nodes[prev.0].children.retain(|c| *c != new);
        }
        let slot = self.nodes[parent.0]
            .children
            .iter()
            .position(|c| *c == old)
            .ok_or(DomError::UnknownNode(old))?;
        self.nodes[parent.0].children[slot] = new;
        self.nodes[new.0].parent = Some(parent);
        self.nodes[old.0].parent = None;
        self.notify_mutation(parent);
        Ok(())
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        if self.element_mut(node)?.set_attr(name, value) {
            self.notify_mutation(node);
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> Result<(), DomError> {
        if self.element_mut(node)?.remove_attr(name) {
            self.notify_mutation(node);
        }
        Ok(())
    }

    /// Replace all children of `node` with a single text node
    pub fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        self.element_mut(node)?;
        let children = std::mem::take(&mut self.nodes[node.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
        let text_node = self.create_text(text);
        self.link(node, text_node);
        self.notify_mutation(node);
        Ok(())
    }

    /// Add or remove a class token
    pub fn toggle_class(&mut self, node: NodeId, class: &str, on: bool) -> Result<(), DomError> {
        let el = self.element_mut(node)?;
        if el.has_class(class) == on {
            return Ok(());
        }
        let mut classes: Vec<String> = el
            .attr("class")
            .unwrap_or_default()
            .split_whitespace()
            .filter(|c| *c != class)
            .map(str::to_string)
            .collect();
        if on {
            classes.push(class.to_string());
        }
        self.set_attribute(node, "class", &classes.join(" "))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn data(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes.get(node.0).map(|n| &n.data)
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match self.data(node)? {
            NodeData::Element(el) => Some(el),
            NodeData::Text(_) => None,
        }
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|el| el.tag.as_str())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?.attr(name)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    /// `node` followed by each ancestor up to the root it hangs from
    pub fn ancestors_inclusive(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id.0 >= self.nodes.len() {
                break;
            }
            chain.push(id);
            cursor = self.nodes[id.0].parent;
        }
        chain
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.ancestors_inclusive(node).last() == Some(&self.root)
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors_inclusive(node).contains(&ancestor)
    }

    /// Descendants of `node` in document order, excluding `node`
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    pub fn query_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|id| selector.matches(self, *id))
            .collect()
    }

    pub fn query(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|id| selector.matches(self, *id))
    }

    /// First connected element whose `id` attribute equals `id`
    pub fn find_by_id(&self, id: &str) -> Option<NodeId> {
        std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .find(|n| self.attribute(*n, "id") == Some(id))
    }

    /// Concatenated text of every text node under `node`
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        for id in std::iter::once(node).chain(self.descendants(node)) {
            if let Some(NodeData::Text(t)) = self.data(id) {
                out.push_str(t);
            }
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Markup
    // ─────────────────────────────────────────────────────────────────────────

    /// Serialize `node` and its subtree. Attribute order is preserved, so the
    /// output is stable across runs.
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_markup(node, &mut out);
        out
    }

    fn write_markup(&self, node: NodeId, out: &mut String) {
        match self.data(node) {
            Some(NodeData::Text(t)) => out.push_str(&escape_text(t)),
            Some(NodeData::Element(el)) => {
                out.push('<');
                out.push_str(&el.tag);
                for (k, v) in el.attrs() {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(v));
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&el.tag.as_str()) {
                    return;
                }
                for child in self.children(node) {
                    self.write_markup(*child, out);
                }
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
            None => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cloning
    // ─────────────────────────────────────────────────────────────────────────

    /// Deep-copy `node` into a new detached document rooted at the copy.
    ///
    /// The clone shares nothing with this document: no observers, no
    /// activations. Layout rectangles are copied unchanged.
    pub fn clone_subtree(&self, node: NodeId) -> Result<Document, DomError> {
        self.check(node)?;
        let el = self.element(node).ok_or(DomError::NotAnElement(node))?;
        let mut clone = Document::with_root(&el.tag, self.viewport);
        let root = clone.root;
        clone.nodes[root.0].data = NodeData::Element(el.clone());
        clone.nodes[root.0].layout = self.nodes[node.0].layout;
        for child in self.children(node) {
            let copied = clone.copy_from(self, *child, (0.0, 0.0));
            clone.link(root, copied);
        }
        Ok(clone)
    }

    /// Copy a subtree from `src` and append it under `parent`.
    ///
    /// Rectangles are translated so the imported root lands on `parent`'s
    /// layout origin. Returns the id of the imported root in this document.
    pub fn import(&mut self, src: &Document, src_node: NodeId, parent: NodeId) -> Result<NodeId, DomError> {
        src.check(src_node)?;
        self.check(parent)?;
        let offset = match (self.layout_rect(parent), src.layout_rect(src_node)) {
            (Some(to), Some(from)) => (to.top - from.top, to.left - from.left),
            _ => (0.0, 0.0),
        };
        let copied = self.copy_from(src, src_node, offset);
        self.append_child(parent, copied)?;
        Ok(copied)
    }

    fn copy_from(&mut self, src: &Document, node: NodeId, offset: (f64, f64)) -> NodeId {
        let source = &src.nodes[node.0];
        let layout = source.layout.map(|r| r.translated(offset.0, offset.1));
        let id = self.push_node(source.data.clone(), layout);
        for child in &source.children {
            let copied = self.copy_from(src, *child, offset);
            self.link(id, copied);
        }
        id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Geometry
    // ─────────────────────────────────────────────────────────────────────────

    /// Document-space rectangle assigned by layout
    pub fn layout_rect(&self, node: NodeId) -> Option<Rect> {
        self.nodes.get(node.0)?.layout
    }

    /// Client-space rectangle of a connected, laid-out element
    pub fn bounding_rect(&self, node: NodeId) -> Option<Rect> {
        if !self.is_connected(node) {
            return None;
        }
        self.layout_rect(node)
            .map(|r| r.translated(-self.viewport.scroll_y, -self.viewport.scroll_x))
    }

    /// Assign a new layout rectangle. Size changes notify resize observers.
    pub fn set_layout(&mut self, node: NodeId, rect: Option<Rect>) -> Result<(), DomError> {
        self.check(node)?;
        let previous = self.nodes[node.0].layout;
        self.nodes[node.0].layout = rect;
        let resized = match (previous, rect) {
            (Some(a), Some(b)) => a.width != b.width || a.height != b.height,
            (None, None) => false,
            _ => true,
        };
        if resized {
            self.observers.record_resize(node);
        }
        self.refresh_intersections();
        Ok(())
    }

    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.viewport.scroll_x = x.max(0.0);
        self.viewport.scroll_y = y.max(0.0);
        self.refresh_intersections();
    }

    pub fn scroll_by(&mut self, dy: f64) {
        self.scroll_to(self.viewport.scroll_x, self.viewport.scroll_y + dy);
    }

    /// Window resize: notifies resize observers on the root and body
    pub fn resize_viewport(&mut self, width: f64, height: f64) {
        self.viewport.width = width;
        self.viewport.height = height;
        self.observers.record_resize(self.root);
        if self.body != self.root {
            self.observers.record_resize(self.body);
        }
        self.refresh_intersections();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────────────────

    /// Watch `target` and its whole subtree for structural, attribute and text changes
    pub fn observe_mutations(&mut self, target: NodeId) -> ObserverId {
        self.observers.register(ObserverKind::Mutation, target, None)
    }

    /// Watch `target` for size changes
    pub fn observe_resize(&mut self, target: NodeId) -> ObserverId {
        self.observers.register(ObserverKind::Resize, target, None)
    }

    /// Watch `target`'s intersection with the viewport. An initial notice
    /// carrying the current state is queued immediately.
    pub fn observe_intersection(&mut self, target: NodeId) -> ObserverId {
        let state = self.intersecting(target);
        self.observers
            .register(ObserverKind::Intersection, target, Some(state))
    }

    /// Release an observer. Undelivered notices for it are dropped.
    pub fn disconnect(&mut self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Drain queued notices in the order they were produced
    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.observers.take_pending()
    }

    fn notify_mutation(&mut self, target: NodeId) {
        if self.observers.is_empty() {
            return;
        }
        let chain = self.ancestors_inclusive(target);
        self.observers.record_mutation(target, &chain);
    }

    fn intersecting(&self, node: NodeId) -> bool {
        self.bounding_rect(node)
            .is_some_and(|r| intersects_viewport(&r, self.viewport.height))
    }

    fn refresh_intersections(&mut self) {
        if self.observers.is_empty() {
            return;
        }
        let states: Vec<(NodeId, bool)> = self
            .observers
            .intersection_targets()
            .into_iter()
            .map(|t| (t, self.intersecting(t)))
            .collect();
        for (target, state) in states {
            self.observers.record_intersection(target, state);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Activation
    // ─────────────────────────────────────────────────────────────────────────

    /// Request a click on a live node. The embedding host drains these and
    /// performs the real activation.
    pub fn activate(&mut self, node: NodeId) -> Result<(), DomError> {
        self.check(node)?;
        self.activations.push(node);
        Ok(())
    }

    pub fn take_activations(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.activations)
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}
