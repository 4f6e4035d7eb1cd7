//! # DOM Sink Contract
//!
//! The execution model never mutates output nodes itself. It asks a sink to
//! allocate nodes and to bind attribute, text, markup and child content; the
//! sink owns physical mutation and decides how computed bindings are kept
//! up to date.

use crate::reactive::Binding;

pub trait DomSink: Send + Sync + 'static {
    /// Handle to an output node. Cloning must yield the same node.
    type Node: Clone + Send + Sync + 'static;

    fn create_element(&self, tag: &str) -> Self::Node;
    fn create_text(&self, text: &str) -> Self::Node;
    fn create_comment(&self, text: &str) -> Self::Node;

    fn set_attribute(&self, node: &Self::Node, name: &str, value: &str);
    fn bind_attribute(&self, node: &Self::Node, name: &str, value: Binding<String>);

    /// Text content of a text node.
    fn bind_text(&self, node: &Self::Node, text: Binding<String>);
    /// Raw markup content, replacing any children.
    fn bind_html(&self, node: &Self::Node, html: Binding<String>);
    /// Ordered child list of an element.
    fn bind_children(&self, node: &Self::Node, children: Binding<Vec<Self::Node>>);

    /// Serialized markup of a node, used when children are concatenated into
    /// a markup binding.
    fn outer_html(&self, node: &Self::Node) -> String;
}
