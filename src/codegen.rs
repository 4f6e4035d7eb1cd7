//! # Template Compiler
//!
//! Lowers [`TemplateIR`] into an arena of node builders. One builder per IR
//! node, children wired by nesting, every builder carrying a non-owning
//! handle to its parent. Block builders own the memo store that the
//! execution model consults.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::expression::{parse_expression, Expr};
use crate::memo::BlockMemo;
use crate::template::TemplateOptions;
use crate::validate::{
    AttributeIR, AttributeSegment, BlockNode, CompilerError, SourceLocation, TemplateIR,
    TemplateNode, ERR_EXPRESSION, ERR_UNKNOWN_BLOCK,
};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuilderId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum CompiledSegment {
    Static(String),
    Dynamic(Expr),
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledAttribute {
    pub name: String,
    pub segments: Arc<Vec<CompiledSegment>>,
}

impl CompiledAttribute {
    pub fn is_dynamic(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, CompiledSegment::Dynamic(_)))
    }

    /// Concatenated value of an attribute without expressions.
    pub fn static_value(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                CompiledSegment::Static(text) => Some(text.as_str()),
                CompiledSegment::Dynamic(_) => None,
            })
            .collect()
    }
}

/// Item of an `each` sequence: a value, or the else-branch sentinel standing
/// in for an empty array.
#[derive(Debug, Clone)]
pub(crate) enum EachItem {
    Value(Value),
    Else,
}

#[derive(Debug)]
pub(crate) struct EachState<N> {
    pub items: Vec<EachItem>,
    /// One group of output nodes per item.
    pub groups: Vec<Vec<N>>,
}

impl<N> Default for EachState<N> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            groups: Vec::new(),
        }
    }
}

pub(crate) enum Builder<N> {
    Root {
        children: Vec<BuilderId>,
    },
    Element {
        tag: String,
        attributes: Vec<CompiledAttribute>,
        children: Vec<BuilderId>,
    },
    Text {
        text: String,
    },
    Comment {
        text: String,
    },
    DynamicText {
        expression: Arc<Expr>,
    },
    DynamicHtml {
        expression: Arc<Expr>,
    },
    Each {
        source: Expr,
        children: Vec<BuilderId>,
        else_branch: Option<BuilderId>,
        memo: BlockMemo<EachState<N>>,
    },
    Conditional {
        condition: Expr,
        negate: bool,
        children: Vec<BuilderId>,
        branches: Vec<BuilderId>,
        memo: BlockMemo<HashMap<usize, Vec<N>>>,
    },
    /// `elif` with a condition, `else` without.
    ConditionBranch {
        condition: Option<Expr>,
        children: Vec<BuilderId>,
    },
    Fsm {
        target: Expr,
        states: Vec<(String, BuilderId)>,
        memo: BlockMemo<HashMap<String, Vec<N>>>,
    },
    FsmState {
        name: String,
        children: Vec<BuilderId>,
    },
    With {
        expression: Expr,
        children: Vec<BuilderId>,
    },
    /// Resolved at render time. Without an argument the partial renders
    /// against the current context rather than `undefined`.
    Partial {
        name: String,
        argument: Option<Expr>,
    },
}

impl<N> Builder<N> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Builder::Root { .. } => "root",
            Builder::Element { .. } => "element",
            Builder::Text { .. } => "text",
            Builder::Comment { .. } => "comment",
            Builder::DynamicText { .. } => "dynamic-text",
            Builder::DynamicHtml { .. } => "dynamic-html",
            Builder::Each { .. } => "each",
            Builder::Conditional { .. } => "conditional",
            Builder::ConditionBranch { .. } => "condition-branch",
            Builder::Fsm { .. } => "fsm",
            Builder::FsmState { .. } => "fsm-state",
            Builder::With { .. } => "with",
            Builder::Partial { .. } => "partial",
        }
    }

    fn children_mut(&mut self) -> Option<&mut Vec<BuilderId>> {
        match self {
            Builder::Root { children }
            | Builder::Element { children, .. }
            | Builder::Each { children, .. }
            | Builder::Conditional { children, .. }
            | Builder::ConditionBranch { children, .. }
            | Builder::FsmState { children, .. }
            | Builder::With { children, .. } => Some(children),
            _ => None,
        }
    }
}

pub(crate) struct BuilderNode<N> {
    pub kind: Builder<N>,
    pub parent: Option<BuilderId>,
}

/// Compiled builder arena. Immutable after compilation apart from the memo
/// stores inside block builders.
pub(crate) struct Program<N> {
    nodes: Vec<BuilderNode<N>>,
    root: BuilderId,
}

impl<N> Program<N> {
    pub fn root(&self) -> BuilderId {
        self.root
    }

    pub fn builder(&self, id: BuilderId) -> &Builder<N> {
        &self.nodes[id.0].kind
    }

    pub fn parent(&self, id: BuilderId) -> Option<BuilderId> {
        self.nodes[id.0].parent
    }

    /// Number of ancestors between `id` and the root.
    pub fn depth(&self, id: BuilderId) -> usize {
        std::iter::successors(self.parent(id), |&parent| self.parent(parent)).count()
    }

    pub fn root_children(&self) -> &[BuilderId] {
        match self.builder(self.root()) {
            Builder::Root { children } => children,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

struct Compiler<'a, N> {
    nodes: Vec<BuilderNode<N>>,
    options: &'a TemplateOptions,
}

fn compile_expression(source: &str, location: &SourceLocation) -> Result<Expr, CompilerError> {
    parse_expression(source).map_err(|e| {
        CompilerError::with_details(
            ERR_EXPRESSION,
            &format!("Invalid expression `{}`: {}", source, e),
            location.line,
            location.column,
            Some(source.to_string()),
            vec![],
        )
    })
}

fn optional_expression(source: &str, location: &SourceLocation) -> Result<Option<Expr>, CompilerError> {
    if source.trim().is_empty() {
        Ok(None)
    } else {
        compile_expression(source, location).map(Some)
    }
}

impl<'a, N> Compiler<'a, N> {
    fn alloc(&mut self, kind: Builder<N>, parent: Option<BuilderId>) -> BuilderId {
        let id = BuilderId(self.nodes.len());
        self.nodes.push(BuilderNode { kind, parent });
        id
    }

    fn set_children(&mut self, id: BuilderId, ids: Vec<BuilderId>) {
        if let Some(children) = self.nodes[id.0].kind.children_mut() {
            *children = ids;
        }
    }

    fn lower_children(
        &mut self,
        nodes: &[TemplateNode],
        parent: BuilderId,
    ) -> Result<Vec<BuilderId>, CompilerError> {
        let mut ids = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(id) = self.lower(node, parent)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn lower(&mut self, node: &TemplateNode, parent: BuilderId) -> Result<Option<BuilderId>, CompilerError> {
        let parent = Some(parent);
        let id = match node {
            TemplateNode::Text(text) => self.alloc(
                Builder::Text {
                    text: text.value.clone(),
                },
                parent,
            ),
            TemplateNode::Comment(comment) => self.alloc(
                Builder::Comment {
                    text: comment.value.clone(),
                },
                parent,
            ),
            TemplateNode::Expression(expression) => {
                let compiled = Arc::new(compile_expression(&expression.expression, &expression.location)?);
                let kind = if expression.escaped {
                    Builder::DynamicText {
                        expression: compiled,
                    }
                } else {
                    Builder::DynamicHtml {
                        expression: compiled,
                    }
                };
                self.alloc(kind, parent)
            }
            TemplateNode::Partial(partial) => {
                let argument = optional_expression(&partial.argument, &partial.location)?;
                self.alloc(
                    Builder::Partial {
                        name: partial.name.clone(),
                        argument,
                    },
                    parent,
                )
            }
            TemplateNode::Element(element) => {
                let attributes = element
                    .attributes
                    .iter()
                    .map(compile_attribute)
                    .collect::<Result<Vec<_>, _>>()?;
                let id = self.alloc(
                    Builder::Element {
                        tag: element.tag.clone(),
                        attributes,
                        children: Vec::new(),
                    },
                    parent,
                );
                let children = self.lower_children(&element.children, id)?;
                self.set_children(id, children);
                id
            }
            TemplateNode::Block(block) => return self.lower_block(block, parent),
        };
        Ok(Some(id))
    }

    fn lower_block(&mut self, block: &BlockNode, parent: Option<BuilderId>) -> Result<Option<BuilderId>, CompilerError> {
        let location = &block.location;
        let id = match block.tag.as_str() {
            "each" => {
                let source = compile_expression(&block.argument, location)?;
                let id = self.alloc(
                    Builder::Each {
                        source,
                        children: Vec::new(),
                        else_branch: None,
                        memo: BlockMemo::new(),
                    },
                    parent,
                );
                let (primary, branches) = self.lower_branched(&block.children, id)?;
                self.set_children(id, primary);
                if let Some(Builder::Each { else_branch, .. }) = self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
                    *else_branch = branches.last().copied();
                }
                id
            }
            "if" | "unless" => {
                let condition = compile_expression(&block.argument, location)?;
                let id = self.alloc(
                    Builder::Conditional {
                        condition,
                        negate: block.tag == "unless",
                        children: Vec::new(),
                        branches: Vec::new(),
                        memo: BlockMemo::new(),
                    },
                    parent,
                );
                let (primary, branch_ids) = self.lower_branched(&block.children, id)?;
                self.set_children(id, primary);
                if let Some(Builder::Conditional { branches, .. }) = self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
                    *branches = branch_ids;
                }
                id
            }
            "fsm" => {
                let target = compile_expression(&block.argument, location)?;
                let id = self.alloc(
                    Builder::Fsm {
                        target,
                        states: Vec::new(),
                        memo: BlockMemo::new(),
                    },
                    parent,
                );
                let mut state_ids = Vec::new();
                for child in &block.children {
                    let TemplateNode::Block(state) = child else {
                        continue;
                    };
                    if state.tag != "state" {
                        continue;
                    }
                    let name = state
                        .argument
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    let state_id = self.alloc(
                        Builder::FsmState {
                            name: name.clone(),
                            children: Vec::new(),
                        },
                        Some(id),
                    );
                    let children = self.lower_children(&state.children, state_id)?;
                    self.set_children(state_id, children);
                    state_ids.push((name, state_id));
                }
                if let Some(Builder::Fsm { states, .. }) = self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
                    *states = state_ids;
                }
                id
            }
            "with" => {
                let expression = compile_expression(&block.argument, location)?;
                let id = self.alloc(
                    Builder::With {
                        expression,
                        children: Vec::new(),
                    },
                    parent,
                );
                let children = self.lower_children(&block.children, id)?;
                self.set_children(id, children);
                id
            }
            other => {
                if self.options.strict_blocks {
                    return Err(CompilerError::with_details(
                        ERR_UNKNOWN_BLOCK,
                        &format!("Unknown block {{{{#{}}}}}", other),
                        location.line,
                        location.column,
                        None,
                        vec!["Known blocks: each, if, unless, fsm, with".to_string()],
                    ));
                }
                debug!(tag = other, line = location.line, "dropping unknown block");
                return Ok(None);
            }
        };
        Ok(Some(id))
    }

    /// Splits block children into primary content and `elif`/`else` branch
    /// builders.
    fn lower_branched(
        &mut self,
        children: &[TemplateNode],
        owner: BuilderId,
    ) -> Result<(Vec<BuilderId>, Vec<BuilderId>), CompilerError> {
        let mut primary = Vec::new();
        let mut branches = Vec::new();
        for child in children {
            match child {
                TemplateNode::Block(branch) if branch.is_branch() => {
                    let condition = match branch.tag.as_str() {
                        "elif" => Some(compile_expression(&branch.argument, &branch.location)?),
                        _ => None,
                    };
                    let id = self.alloc(
                        Builder::ConditionBranch {
                            condition,
                            children: Vec::new(),
                        },
                        Some(owner),
                    );
                    let branch_children = self.lower_children(&branch.children, id)?;
                    self.set_children(id, branch_children);
                    branches.push(id);
                }
                other => {
                    if let Some(id) = self.lower(other, owner)? {
                        primary.push(id);
                    }
                }
            }
        }
        Ok((primary, branches))
    }
}

fn compile_attribute(attribute: &AttributeIR) -> Result<CompiledAttribute, CompilerError> {
    let segments = attribute
        .value
        .iter()
        .map(|segment| match segment {
            AttributeSegment::Static(text) => Ok(CompiledSegment::Static(text.clone())),
            AttributeSegment::Dynamic(source) => {
                compile_expression(source, &attribute.location).map(CompiledSegment::Dynamic)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompiledAttribute {
        name: attribute.name.clone(),
        segments: Arc::new(segments),
    })
}

/// Compile validated IR into a builder arena.
pub(crate) fn compile<N>(ir: &TemplateIR, options: &TemplateOptions) -> Result<Program<N>, CompilerError> {
    let mut compiler = Compiler {
        nodes: Vec::new(),
        options,
    };
    let root = compiler.alloc(Builder::Root { children: Vec::new() }, None);
    let children = compiler.lower_children(&ir.nodes, root)?;
    compiler.set_children(root, children);
    Ok(Program {
        nodes: compiler.nodes,
        root,
    })
}
