//! # Node-Builder Execution
//!
//! `create` per builder kind. Blocks consult their memo store so that
//! re-invocations under the same `(context, lineage)` key reuse output:
//! `each` reconciles item lists and only builds groups for new items, `if`
//! and `fsm` build each branch at most once per key. `with` is never
//! memoized.
//!
//! A block holds its memo store for the whole of its `create`, so a second
//! render of the same key on another thread waits and then reuses the first
//! render's output. The lock is reentrant: recursive partials entering the
//! same block on the same thread proceed, borrowing the store only around
//! lookup and write-back.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::codegen::{Builder, BuilderId, CompiledAttribute, CompiledSegment, EachItem, EachState};
use crate::evaluate::evaluate;
use crate::expression::{Expr, Literal};
use crate::memo::BlockMemo;
use crate::reactive::Binding;
use crate::reconcile::reconcile;
use crate::sink::DomSink;
use crate::template::{EachEquality, PartialRegistry, Template};
use crate::value::{Lineage, Value};

/// What a builder produced: one node, or a flat run of nodes.
#[derive(Debug, Clone)]
pub enum Output<N> {
    Node(N),
    Nodes(Vec<N>),
}

impl<N> Output<N> {
    pub fn into_nodes(self) -> Vec<N> {
        match self {
            Output::Node(node) => vec![node],
            Output::Nodes(nodes) => nodes,
        }
    }

    fn extend_into(self, out: &mut Vec<N>) {
        match self {
            Output::Node(node) => out.push(node),
            Output::Nodes(nodes) => out.extend(nodes),
        }
    }
}

/// Collaborators a render needs. Cheap to clone; captured by computed
/// bindings.
pub(crate) struct Runtime<S: DomSink> {
    pub sink: Arc<S>,
    pub partials: Arc<PartialRegistry<S>>,
}

impl<S: DomSink> Clone for Runtime<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            partials: Arc::clone(&self.partials),
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Attribute text; array values join with a single space.
fn attribute_value(segments: &[CompiledSegment], context: &Value, lineage: &Lineage) -> String {
    segments
        .iter()
        .map(|segment| match segment {
            CompiledSegment::Static(text) => text.clone(),
            CompiledSegment::Dynamic(expression) => match evaluate(expression, context, lineage) {
                Value::Array(items) => items
                    .iter()
                    .map(Value::to_display_string)
                    .collect::<Vec<_>>()
                    .join(" "),
                other => other.to_display_string(),
            },
        })
        .collect()
}

/// Non-arrays become a one-item sequence; an empty array with an else
/// branch becomes the else sentinel.
fn each_items(source: Value, has_else: bool) -> Vec<EachItem> {
    match source {
        Value::Array(items) if items.is_empty() && has_else => vec![EachItem::Else],
        Value::Array(items) => items.iter().cloned().map(EachItem::Value).collect(),
        other => vec![EachItem::Value(other)],
    }
}

impl EachItem {
    fn matches(&self, other: &EachItem, equality: EachEquality) -> bool {
        match (self, other) {
            (EachItem::Else, EachItem::Else) => true,
            (EachItem::Value(a), EachItem::Value(b)) => match equality {
                EachEquality::Identity => a.is_same(b),
                EachEquality::Structural => a.deep_equals(b),
            },
            _ => false,
        }
    }
}

/// Per-key cache lookup followed by create-and-store on a miss, all under
/// the block's guard.
fn cached_branch<K, N, F>(
    memo: &BlockMemo<HashMap<K, Vec<N>>>,
    key: K,
    context: &Value,
    lineage: &Lineage,
    create: F,
) -> Vec<N>
where
    K: std::hash::Hash + Eq,
    N: Clone,
    F: FnOnce() -> Vec<N>,
{
    let guard = memo.enter();
    let cached = guard
        .store()
        .get(context, lineage)
        .and_then(|branches| branches.get(&key).cloned());
    if let Some(nodes) = cached {
        trace!("reusing cached branch output");
        return nodes;
    }

    let nodes = create();
    let mut store = guard.store();
    match store.get_mut(context, lineage) {
        Some(branches) => branches.entry(key).or_insert(nodes).clone(),
        None => {
            let mut branches = HashMap::new();
            branches.insert(key, nodes.clone());
            store.set(context, lineage, branches);
            nodes
        }
    }
}

impl<S: DomSink> Template<S> {
    /// Root creation: lineage `[context]`; a lone element child is returned
    /// as is, anything else goes into a container element.
    pub(crate) fn render_root(self: &Arc<Self>, rt: &Runtime<S>, context: &Value) -> S::Node {
        let lineage = Lineage::root(context.clone());
        let children = self.program.root_children();
        if let [only] = children {
            if let Builder::Element {
                tag,
                attributes,
                children,
            } = self.program.builder(*only)
            {
                return self.create_element(tag, attributes, children, rt, context, &lineage);
            }
        }
        let container = rt.sink.create_element(&self.options.container_tag);
        self.bind_child_content(&container, children, rt, context, &lineage);
        container
    }

    pub(crate) fn create(
        self: &Arc<Self>,
        id: BuilderId,
        rt: &Runtime<S>,
        context: &Value,
        lineage: &Lineage,
    ) -> Output<S::Node> {
        let builder = self.program.builder(id);
        trace!(
            builder = builder.kind_name(),
            depth = self.program.depth(id),
            "create"
        );
        match builder {
            Builder::Root { children } | Builder::ConditionBranch { children, .. } => {
                Output::Nodes(self.create_children(children, rt, context, lineage))
            }
            Builder::FsmState { name, children } => {
                trace!(state = %name, "entering fsm state");
                Output::Nodes(self.create_children(children, rt, context, lineage))
            }
            Builder::Element {
                tag,
                attributes,
                children,
            } => Output::Node(self.create_element(tag, attributes, children, rt, context, lineage)),
            Builder::Text { text } => Output::Node(rt.sink.create_text(text)),
            Builder::Comment { text } => Output::Node(rt.sink.create_comment(text)),
            Builder::DynamicText { expression } => {
                let node = rt.sink.create_text("");
                rt.sink
                    .bind_text(&node, display_binding(expression, context, lineage));
                Output::Node(node)
            }
            Builder::DynamicHtml { expression } => {
                let node = rt.sink.create_text("");
                rt.sink
                    .bind_html(&node, display_binding(expression, context, lineage));
                Output::Node(node)
            }
            Builder::Each {
                source,
                children,
                else_branch,
                memo,
            } => Output::Nodes(self.create_each(
                source,
                children,
                *else_branch,
                memo,
                rt,
                context,
                lineage,
            )),
            Builder::Conditional {
                condition,
                negate,
                children,
                branches,
                memo,
            } => {
                let selected = if evaluate(condition, context, lineage).truthy() != *negate {
                    Some(0)
                } else {
                    branches
                        .iter()
                        .position(|&branch| match self.program.builder(branch) {
                            Builder::ConditionBranch {
                                condition: Some(condition),
                                ..
                            } => evaluate(condition, context, lineage).truthy(),
                            _ => true,
                        })
                        .map(|position| position + 1)
                };
                let Some(index) = selected else {
                    return Output::Nodes(Vec::new());
                };
                Output::Nodes(cached_branch(memo, index, context, lineage, || {
                    if index == 0 {
                        self.create_children(children, rt, context, lineage)
                    } else {
                        self.create(branches[index - 1], rt, context, lineage)
                            .into_nodes()
                    }
                }))
            }
            Builder::Fsm {
                target,
                states,
                memo,
            } => {
                let state = match evaluate(target, context, lineage) {
                    Value::Machine(machine) => machine.state(),
                    Value::String(name) => name.to_string(),
                    other => {
                        trace!(value = ?other, "fsm target is not a state machine");
                        return Output::Nodes(Vec::new());
                    }
                };
                let Some(&(_, state_id)) = states.iter().find(|(name, _)| *name == state) else {
                    trace!(%state, "fsm has no matching state");
                    return Output::Nodes(Vec::new());
                };
                Output::Nodes(cached_branch(memo, state, context, lineage, || {
                    self.create(state_id, rt, context, lineage).into_nodes()
                }))
            }
            Builder::With {
                expression,
                children,
            } => {
                let rebound = evaluate(expression, context, lineage);
                let inner = lineage.push(rebound.clone());
                Output::Nodes(self.create_children(children, rt, &rebound, &inner))
            }
            Builder::Partial { name, argument } => {
                let Some(partial) = rt.partials.get(name) else {
                    debug!(partial = %name, "partial is not registered; rendering nothing");
                    return Output::Nodes(Vec::new());
                };
                let partial_context = match argument {
                    Some(argument) => evaluate(argument, context, lineage),
                    None => context.clone(),
                };
                Output::Node(partial.render_root(rt, &partial_context))
            }
        }
    }

    fn create_children(
        self: &Arc<Self>,
        children: &[BuilderId],
        rt: &Runtime<S>,
        context: &Value,
        lineage: &Lineage,
    ) -> Vec<S::Node> {
        let mut nodes = Vec::with_capacity(children.len());
        for &child in children {
            self.create(child, rt, context, lineage).extend_into(&mut nodes);
        }
        nodes
    }

    fn create_element(
        self: &Arc<Self>,
        tag: &str,
        attributes: &[CompiledAttribute],
        children: &[BuilderId],
        rt: &Runtime<S>,
        context: &Value,
        lineage: &Lineage,
    ) -> S::Node {
        let element = rt.sink.create_element(tag);
        for attribute in attributes {
            if attribute.is_dynamic() {
                let segments = Arc::clone(&attribute.segments);
                let (context, lineage) = (context.clone(), lineage.clone());
                rt.sink.bind_attribute(
                    &element,
                    &attribute.name,
                    Binding::computed(move || attribute_value(&segments, &context, &lineage)),
                );
            } else {
                rt.sink
                    .set_attribute(&element, &attribute.name, &attribute.static_value());
            }
        }
        self.bind_child_content(&element, children, rt, context, lineage);
        element
    }

    /// Children become a computed child list, or a computed markup string
    /// when any child emits raw markup.
    fn bind_child_content(
        self: &Arc<Self>,
        node: &S::Node,
        children: &[BuilderId],
        rt: &Runtime<S>,
        context: &Value,
        lineage: &Lineage,
    ) {
        if children.is_empty() {
            return;
        }
        let has_markup = children
            .iter()
            .any(|&child| matches!(self.program.builder(child), Builder::DynamicHtml { .. }));

        let template = Arc::clone(self);
        let runtime = rt.clone();
        let children = children.to_vec();
        let (context, lineage) = (context.clone(), lineage.clone());
        if has_markup {
            rt.sink.bind_html(
                node,
                Binding::computed(move || {
                    template.concatenated_markup(&children, &runtime, &context, &lineage)
                }),
            );
        } else {
            rt.sink.bind_children(
                node,
                Binding::computed(move || {
                    template.create_children(&children, &runtime, &context, &lineage)
                }),
            );
        }
    }

    fn concatenated_markup(
        self: &Arc<Self>,
        children: &[BuilderId],
        rt: &Runtime<S>,
        context: &Value,
        lineage: &Lineage,
    ) -> String {
        let mut markup = String::new();
        for &child in children {
            match self.program.builder(child) {
                Builder::DynamicHtml { expression } => {
                    markup.push_str(&evaluate(expression, context, lineage).to_display_string())
                }
                Builder::DynamicText { expression } => markup.push_str(&escape_html(
                    &evaluate(expression, context, lineage).to_display_string(),
                )),
                Builder::Text { text } => markup.push_str(&escape_html(text)),
                _ => {
                    for node in self.create(child, rt, context, lineage).into_nodes() {
                        markup.push_str(&rt.sink.outer_html(&node));
                    }
                }
            }
        }
        markup
    }

    #[allow(clippy::too_many_arguments)]
    fn create_each(
        self: &Arc<Self>,
        source: &Expr,
        children: &[BuilderId],
        else_branch: Option<BuilderId>,
        memo: &BlockMemo<EachState<S::Node>>,
        rt: &Runtime<S>,
        context: &Value,
        lineage: &Lineage,
    ) -> Vec<S::Node> {
        let items = each_items(evaluate(source, context, lineage), else_branch.is_some());

        let guard = memo.enter();
        let prior = {
            let mut store = guard.store();
            match store.get_mut(context, lineage) {
                Some(state) => std::mem::take(state),
                None => {
                    store.set(context, lineage, EachState::default());
                    EachState::default()
                }
            }
        };

        let equality = self.options.each_equality;
        let diff = reconcile(&prior.items, &items, |a, b| a.matches(b, equality));
        trace!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            moved = diff.moved.len(),
            "each reconciled"
        );

        let mut groups = prior.groups;
        diff.replay(&mut groups, |added| match &added.item {
            EachItem::Else => else_branch
                .map(|branch| self.create(branch, rt, context, lineage).into_nodes())
                .unwrap_or_default(),
            EachItem::Value(item) => {
                let inner = lineage.push(item.clone());
                self.create_children(children, rt, context, &inner)
            }
        });

        let nodes = groups.iter().flatten().cloned().collect();
        if let Some(state) = guard.store().get_mut(context, lineage) {
            *state = EachState { items, groups };
        }
        nodes
    }
}

/// Literal expressions bind statically, everything else recomputes.
fn display_binding(expression: &Arc<Expr>, context: &Value, lineage: &Lineage) -> Binding<String> {
    if let Expr::Literal { value } = expression.as_ref() {
        return Binding::Static(match value {
            Literal::String(text) => text.clone(),
            other => other.to_value().to_display_string(),
        });
    }
    let expression = Arc::clone(expression);
    let (context, lineage) = (context.clone(), lineage.clone());
    Binding::computed(move || evaluate(&expression, &context, &lineage).to_display_string())
}
