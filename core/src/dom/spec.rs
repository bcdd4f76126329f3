//! Serde fixtures that build documents.
//!
//! Used by tests and by the CLI's page files:
//!
//! ```json
//! {
//!   "viewport": { "width": 800, "height": 600 },
//!   "body": [
//!     { "tag": "div", "attrs": { "id": "base-container" }, "children": [
//!       { "tag": "article", "rect": { "top": 0, "left": 0, "width": 540, "height": 400 },
//!         "text": "hello" }
//!     ]}
//!   ]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{DomError, Document, NodeId};
use crate::geometry::{Rect, Viewport};

/// One element and its subtree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Text appended before the children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn rect(mut self, top: f64, left: f64, width: f64, height: f64) -> Self {
        self.rect = Some(Rect::new(top, left, width, height));
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.children.extend(children);
        self
    }
}

/// A whole page: viewport plus the children of `<body>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub body: Vec<NodeSpec>,
}

impl PageSpec {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn build(&self) -> Result<Document, DomError> {
        let mut doc = Document::new(self.viewport);
        let body = doc.body();
        for node in &self.body {
            doc.build_node(node, body)?;
        }
        Ok(doc)
    }
}

impl Document {
    /// Build `spec` and append it under `parent`
    pub fn build_node(&mut self, spec: &NodeSpec, parent: NodeId) -> Result<NodeId, DomError> {
        let id = self.create_element(&spec.tag);
        for (k, v) in &spec.attrs {
            self.set_attribute(id, k, v)?;
        }
        if let Some(rect) = spec.rect {
            self.set_layout(id, Some(rect))?;
        }
        if let Some(text) = &spec.text {
            let t = self.create_text(text);
            self.append_child(id, t)?;
        }
        for child in &spec.children {
            self.build_node(child, id)?;
        }
        self.append_child(parent, id)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Selector;

    #[test]
    fn builds_page_from_json() {
        let json = r#"{
            "viewport": { "width": 800, "height": 600 },
            "body": [
                { "tag": "div", "attrs": { "id": "base-container" }, "children": [
                    { "tag": "article", "rect": { "top": 10, "left": 0, "width": 540, "height": 400 },
                      "text": "first" },
                    { "tag": "article", "text": "second" }
                ]}
            ]
        }"#;
        let page = PageSpec::from_json(json).unwrap();
        let doc = page.build().unwrap();

        let items = doc.query_all(doc.root(), &Selector::parse("#base-container article").unwrap());
        assert_eq!(items.len(), 2);
        assert_eq!(doc.text_content(items[0]), "first");
        assert_eq!(doc.layout_rect(items[0]).unwrap().top, 10.0);
        assert!(doc.layout_rect(items[1]).is_none());
        assert_eq!(doc.viewport().scroll_y, 0.0);
    }

    #[test]
    fn builder_matches_json_shape() {
        let spec = NodeSpec::new("article")
            .attr("class", "post")
            .rect(0.0, 0.0, 100.0, 50.0)
            .child(NodeSpec::new("p").text("hi"));
        let json = serde_json::to_string(&spec).unwrap();
        let back: NodeSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
