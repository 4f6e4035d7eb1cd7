use crate::validate::{
    BlockNode, CommentNode, ElementNode, ExpressionNode, PartialNode, TemplateIR, TemplateNode,
    TextNode,
};

/// The TemplateVisitor trait defines the single authoritative traversal mechanism for template IR.
///
/// Rules:
/// 1. Traversal order is document order and fixed.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers MUST call `walk_*` functions to continue traversal unless pruning is intended.
pub trait TemplateVisitor {
    fn visit_root(&mut self, root: &TemplateIR) {
        walk_root(self, root);
    }

    fn visit_node(&mut self, node: &TemplateNode) {
        walk_node(self, node);
    }

    fn visit_element(&mut self, element: &ElementNode) {
        walk_element(self, element);
    }

    fn visit_block(&mut self, block: &BlockNode) {
        walk_block(self, block);
    }

    fn visit_text(&mut self, _text: &TextNode) {}

    fn visit_comment(&mut self, _comment: &CommentNode) {}

    fn visit_expression(&mut self, _expression: &ExpressionNode) {}

    fn visit_partial(&mut self, _partial: &PartialNode) {}

    fn visit_children(&mut self, children: &[TemplateNode]) {
        walk_children(self, children);
    }
}

pub fn walk_root<V: TemplateVisitor + ?Sized>(visitor: &mut V, root: &TemplateIR) {
    visitor.visit_children(&root.nodes);
}

pub fn walk_children<V: TemplateVisitor + ?Sized>(visitor: &mut V, children: &[TemplateNode]) {
    for node in children {
        visitor.visit_node(node);
    }
}

pub fn walk_node<V: TemplateVisitor + ?Sized>(visitor: &mut V, node: &TemplateNode) {
    match node {
        TemplateNode::Element(el) => visitor.visit_element(el),
        TemplateNode::Text(t) => visitor.visit_text(t),
        TemplateNode::Comment(c) => visitor.visit_comment(c),
        TemplateNode::Expression(e) => visitor.visit_expression(e),
        TemplateNode::Block(b) => visitor.visit_block(b),
        TemplateNode::Partial(p) => visitor.visit_partial(p),
    }
}

pub fn walk_element<V: TemplateVisitor + ?Sized>(visitor: &mut V, element: &ElementNode) {
    visitor.visit_children(&element.children);
}

pub fn walk_block<V: TemplateVisitor + ?Sized>(visitor: &mut V, block: &BlockNode) {
    visitor.visit_children(&block.children);
}

/// Collects the names of every partial a template references, in document order.
#[derive(Default)]
pub struct PartialCollector {
    pub names: Vec<String>,
}

impl TemplateVisitor for PartialCollector {
    fn visit_partial(&mut self, partial: &PartialNode) {
        if !self.names.contains(&partial.name) {
            self.names.push(partial.name.clone());
        }
    }
}

pub fn collect_partial_names(ir: &TemplateIR) -> Vec<String> {
    let mut collector = PartialCollector::default();
    collector.visit_root(ir);
    collector.names
}
