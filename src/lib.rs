//! # Reactive Template Engine
//!
//! Compiles mustache-flavoured HTML templates into trees of node builders and
//! executes them against a host-provided [`DomSink`].
//!
//! ## Pipeline
//!
//! 1. **Front end** (`parse`): template text to [`TemplateIR`]. Structural
//!    mistakes are fatal `TPL-ERR-STRUCTURE` errors.
//! 2. **Validation** (`validate`): branch placement and ordering checks that
//!    also apply to IR handed in as JSON.
//! 3. **Compilation** (`codegen`): one builder per IR node in an arena, block
//!    builders owning a memo store keyed by `(context, lineage)`.
//! 4. **Execution** (`runtime`): builders allocate nodes through the sink and
//!    hand it computed bindings; `each` blocks reconcile item lists with the
//!    sequence differ in `reconcile` so unchanged items keep their nodes.
//!
//! ## Invariants
//!
//! 1. **No ambient state**: context and lineage are passed explicitly; the
//!    only shared mutable state is the per-block memo stores, the compile
//!    cache and the partial registry, each behind its own lock.
//! 2. **Reuse**: re-invoking a block under an identical key never recreates
//!    output for unchanged items or previously selected branches.
//! 3. **Leniency at runtime**: evaluation gaps produce `undefined`, missing
//!    partials and unknown blocks produce nothing. Only compilation fails.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod cache;
mod codegen;
mod evaluate;
mod expression;
mod memo;
mod parse;
mod reactive;
mod reconcile;
mod runtime;
mod sink;
mod template;
mod validate;
mod value;
mod visitor;

#[cfg(test)]
mod test_sink;

#[cfg(test)]
mod expression_tests;
#[cfg(test)]
mod reconcile_tests;
#[cfg(test)]
mod safety_tests;

pub use cache::TemplateCache;
pub use evaluate::evaluate;
pub use expression::{parse_expression, BinaryOp, Expr, ExpressionError, Literal, LogicalOp, UnaryOp};
pub use memo::MemoStore;
pub use parse::parse_template;
pub use reactive::{Binding, Computation, ReactiveCell, Signal, StateMachine};
pub use reconcile::{
    apply, reconcile, reconcile_eq, Added, Diff, IndexChanged, Mapping, Moved, Removed,
};
pub use runtime::{escape_html, Output};
pub use sink::DomSink;
pub use template::{EachEquality, PartialRegistry, Template, TemplateEngine, TemplateOptions};
pub use validate::*;
pub use value::{Lineage, NativeFunction, Value};
pub use visitor::{collect_partial_names, TemplateVisitor};

/// Diff two JSON arrays with structural equality and return the diff as JSON.
#[cfg(feature = "napi")]
#[napi]
pub fn reconcile_json_native(from_json: String, to_json: String) -> napi::Result<String> {
    let from: Vec<serde_json::Value> = serde_json::from_str(&from_json)
        .map_err(|e| napi::Error::from_reason(format!("From parse error: {}", e)))?;
    let to: Vec<serde_json::Value> = serde_json::from_str(&to_json)
        .map_err(|e| napi::Error::from_reason(format!("To parse error: {}", e)))?;

    let diff = reconcile_eq(&from, &to);
    serde_json::to_string(&diff)
        .map_err(|e| napi::Error::from_reason(format!("Serialize error: {}", e)))
}

/// Parse and validate a template, returning its IR as JSON.
#[cfg(feature = "napi")]
#[napi]
pub fn parse_template_native(source: String) -> napi::Result<String> {
    let ir = parse_template(&source).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    validate_ir(&ir).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    Ok(ir.to_json())
}
