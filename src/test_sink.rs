//! Recording in-memory sink for tests.
//!
//! Bindings are applied as soon as they are handed over and kept, so a test
//! can call [`MockSink::refresh`] to re-run every computed binding under a
//! node, the way a reactive host would after a dependency changed.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::reactive::Binding;
use crate::runtime::escape_html;
use crate::sink::DomSink;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element(String),
    Text,
    Comment,
}

enum Bound {
    Attribute(String, Binding<String>),
    Text(Binding<String>),
    Html(Binding<String>),
    Children(Binding<Vec<MockNode>>),
}

#[derive(Default)]
struct NodeState {
    text: String,
    html: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<MockNode>,
    bindings: Vec<Arc<Bound>>,
}

struct NodeData {
    kind: NodeKind,
    state: Mutex<NodeState>,
}

#[derive(Clone)]
pub struct MockNode(Arc<NodeData>);

impl PartialEq for MockNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for MockNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_html())
    }
}

impl MockNode {
    fn new(kind: NodeKind, text: &str) -> Self {
        MockNode(Arc::new(NodeData {
            kind,
            state: Mutex::new(NodeState {
                text: text.to_string(),
                ..NodeState::default()
            }),
        }))
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.0.state.lock().unwrap()
    }

    pub fn kind(&self) -> NodeKind {
        self.0.kind.clone()
    }

    pub fn tag(&self) -> Option<String> {
        match &self.0.kind {
            NodeKind::Element(tag) => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn text(&self) -> String {
        self.state().text.clone()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.state()
            .attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn children(&self) -> Vec<MockNode> {
        self.state().children.clone()
    }

    pub fn html(&self) -> Option<String> {
        self.state().html.clone()
    }

    /// Number of computed bindings attached to this node.
    pub fn computed_bindings(&self) -> usize {
        self.state()
            .bindings
            .iter()
            .filter(|bound| match bound.as_ref() {
                Bound::Attribute(_, b) | Bound::Text(b) | Bound::Html(b) => b.is_computed(),
                Bound::Children(b) => b.is_computed(),
            })
            .count()
    }

    pub fn to_html(&self) -> String {
        let state = self.state();
        match &self.0.kind {
            NodeKind::Text => match &state.html {
                Some(html) => html.clone(),
                None => escape_html(&state.text),
            },
            NodeKind::Comment => format!("<!--{}-->", state.text),
            NodeKind::Element(tag) => {
                let mut out = format!("<{}", tag);
                for (name, value) in &state.attributes {
                    out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
                }
                out.push('>');
                match &state.html {
                    Some(html) => out.push_str(html),
                    None => {
                        for child in &state.children {
                            out.push_str(&child.to_html());
                        }
                    }
                }
                out.push_str(&format!("</{}>", tag));
                out
            }
        }
    }

    fn apply(&self, bound: &Bound) {
        // Computed outside the lock: recomputation may touch other nodes.
        match bound {
            Bound::Attribute(name, binding) => {
                let value = binding.get();
                let mut state = self.state();
                match state.attributes.iter_mut().find(|(n, _)| n == name) {
                    Some(entry) => entry.1 = value,
                    None => state.attributes.push((name.clone(), value)),
                }
            }
            Bound::Text(binding) => {
                let text = binding.get();
                self.state().text = text;
            }
            Bound::Html(binding) => {
                let html = binding.get();
                let mut state = self.state();
                state.html = Some(html);
                state.children.clear();
            }
            Bound::Children(binding) => {
                let children = binding.get();
                let mut state = self.state();
                state.children = children;
                state.html = None;
            }
        }
    }

    fn bind(&self, bound: Bound) {
        let bound = Arc::new(bound);
        self.apply(&bound);
        self.state().bindings.push(bound);
    }

    /// Re-run this node's bindings, then refresh the resulting children.
    pub fn refresh(&self) {
        let bindings = self.state().bindings.clone();
        for bound in &bindings {
            self.apply(bound);
        }
        for child in self.children() {
            child.refresh();
        }
    }
}

#[derive(Default)]
pub struct MockSink {
    created: AtomicUsize,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Nodes allocated so far, of any kind.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn refresh(&self, node: &MockNode) {
        node.refresh();
    }

    fn allocate(&self, kind: NodeKind, text: &str) -> MockNode {
        self.created.fetch_add(1, Ordering::SeqCst);
        MockNode::new(kind, text)
    }
}

impl DomSink for MockSink {
    type Node = MockNode;

    fn create_element(&self, tag: &str) -> MockNode {
        self.allocate(NodeKind::Element(tag.to_string()), "")
    }

    fn create_text(&self, text: &str) -> MockNode {
        self.allocate(NodeKind::Text, text)
    }

    fn create_comment(&self, text: &str) -> MockNode {
        self.allocate(NodeKind::Comment, text)
    }

    fn set_attribute(&self, node: &MockNode, name: &str, value: &str) {
        node.bind(Bound::Attribute(name.to_string(), Binding::Static(value.to_string())));
    }

    fn bind_attribute(&self, node: &MockNode, name: &str, value: Binding<String>) {
        node.bind(Bound::Attribute(name.to_string(), value));
    }

    fn bind_text(&self, node: &MockNode, text: Binding<String>) {
        node.bind(Bound::Text(text));
    }

    fn bind_html(&self, node: &MockNode, html: Binding<String>) {
        node.bind(Bound::Html(html));
    }

    fn bind_children(&self, node: &MockNode, children: Binding<Vec<MockNode>>) {
        node.bind(Bound::Children(children));
    }

    fn outer_html(&self, node: &MockNode) -> String {
        node.to_html()
    }
}
