#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::visitor::{walk_block, walk_element, TemplateVisitor};

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_STRUCTURE: &str = "TPL-ERR-STRUCTURE";
pub const ERR_EXPRESSION: &str = "TPL-ERR-EXPR";
pub const ERR_UNKNOWN_BLOCK: &str = "TPL-ERR-BLOCK";
pub const ERR_IR: &str = "TPL-ERR-IR";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_STRUCTURE => {
            "Elements and blocks nest properly; every opened element or block is closed in order."
        }
        ERR_EXPRESSION => "Every expression in a template parses before the template is compiled.",
        ERR_UNKNOWN_BLOCK => "In strict mode, only each, if, unless, fsm and with blocks compile.",
        ERR_IR => "Template IR handed in as JSON matches the IR schema.",
        _ => "Unknown invariant.",
    }
}

fn get_error_type(code: &str) -> &'static str {
    match code {
        ERR_STRUCTURE => "TEMPLATE_STRUCTURE_ERROR",
        ERR_EXPRESSION => "EXPRESSION_SYNTAX_ERROR",
        ERR_UNKNOWN_BLOCK => "UNKNOWN_BLOCK_ERROR",
        ERR_IR => "IR_FORMAT_ERROR",
        _ => "COMPILER_INVARIANT_VIOLATION",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message} (line {line}, column {column})")]
pub struct CompilerError {
    pub code: String,
    pub error_type: String,
    pub message: String,
    pub guarantee: String,
    pub line: u32,
    pub column: u32,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, line: u32, column: u32) -> Self {
        Self::with_details(code, message, line, column, None, vec![])
    }

    pub fn at(code: &str, message: &str, location: &SourceLocation) -> Self {
        Self::new(code, message, location.line, location.column)
    }

    pub fn with_details(
        code: &str,
        message: &str,
        line: u32,
        column: u32,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            error_type: get_error_type(code).to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            line,
            column,
            context,
            hints,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IR TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Element(ElementNode),
    Text(TextNode),
    Comment(CommentNode),
    Expression(ExpressionNode),
    Block(BlockNode),
    Partial(PartialNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub tag: String,
    #[serde(default)]
    pub attributes: Vec<AttributeIR>,
    #[serde(default)]
    pub children: Vec<TemplateNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub value: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    pub value: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionNode {
    pub expression: String,
    /// `false` for triple-stache markup output.
    #[serde(default = "default_escaped")]
    pub escaped: bool,
    #[serde(default)]
    pub location: SourceLocation,
}

fn default_escaped() -> bool {
    true
}

/// `{{#tag argument}} ... {{/tag}}`. Branch markers (`elif`, `else`) and
/// `state` sections are blocks nested directly inside their owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockNode {
    pub tag: String,
    #[serde(default)]
    pub argument: String,
    #[serde(default)]
    pub children: Vec<TemplateNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

impl BlockNode {
    pub fn is_branch(&self) -> bool {
        matches!(self.tag.as_str(), "elif" | "else")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialNode {
    pub name: String,
    #[serde(default)]
    pub argument: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum AttributeSegment {
    Static(String),
    Dynamic(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeIR {
    pub name: String,
    #[serde(default)]
    pub value: Vec<AttributeSegment>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemplateIR {
    #[serde(default)]
    pub raw: String,
    pub nodes: Vec<TemplateNode>,
}

impl TemplateIR {
    pub fn from_json(json: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(json).map_err(|e| {
            CompilerError::new(
                ERR_IR,
                &format!("Failed to parse IR JSON: {}", e),
                e.line() as u32,
                e.column() as u32,
            )
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Marker pushed for elements so branch checks only see direct block parents.
const ELEMENT_SCOPE: &str = "<element>";

#[derive(Default)]
struct StructureValidator {
    scopes: Vec<String>,
    error: Option<CompilerError>,
}

impl StructureValidator {
    fn fail(&mut self, message: String, location: &SourceLocation) {
        if self.error.is_none() {
            self.error = Some(CompilerError::at(ERR_STRUCTURE, &message, location));
        }
    }

    fn check_branch_placement(&mut self, block: &BlockNode) {
        let parent = self.scopes.last().map(String::as_str);
        let allowed = match (block.tag.as_str(), parent) {
            ("elif", Some("if" | "unless")) => true,
            ("else", Some("if" | "unless" | "each")) => true,
            ("state", Some("fsm")) => true,
            _ => false,
        };
        if !allowed {
            let owners = match block.tag.as_str() {
                "elif" => "{{#if}} or {{#unless}}",
                "else" => "{{#if}}, {{#unless}} or {{#each}}",
                _ => "{{#fsm}}",
            };
            self.fail(
                format!("{{{{{}}}}} must be placed directly inside {}", block.tag, owners),
                &block.location,
            );
        }
        if block.tag == "state" && block.argument.trim().is_empty() {
            self.fail("{{#state}} requires a state name".to_string(), &block.location);
        }
    }

    /// Branches come after the primary content, and `else` comes last.
    fn check_branch_order(&mut self, block: &BlockNode) {
        let mut seen_branch = false;
        let mut seen_else = false;
        for child in &block.children {
            match child {
                TemplateNode::Block(branch) if branch.is_branch() => {
                    if seen_else {
                        self.fail(
                            format!("{{{{{}}}}} after {{{{else}}}} in {{{{#{}}}}}", branch.tag, block.tag),
                            &branch.location,
                        );
                    }
                    seen_branch = true;
                    seen_else = branch.tag == "else";
                }
                TemplateNode::Text(text) if seen_branch && text.value.trim().is_empty() => {}
                other if seen_branch => {
                    self.fail(
                        format!("Content after a branch in {{{{#{}}}}} belongs inside the branch", block.tag),
                        &node_location(other),
                    );
                }
                _ => {}
            }
        }
    }
}

impl TemplateVisitor for StructureValidator {
    fn visit_element(&mut self, element: &ElementNode) {
        self.scopes.push(ELEMENT_SCOPE.to_string());
        walk_element(self, element);
        self.scopes.pop();
    }

    fn visit_block(&mut self, block: &BlockNode) {
        if self.error.is_some() {
            return;
        }
        if block.is_branch() || block.tag == "state" {
            self.check_branch_placement(block);
        }
        if matches!(block.tag.as_str(), "if" | "unless" | "each") {
            self.check_branch_order(block);
        }
        self.scopes.push(block.tag.clone());
        walk_block(self, block);
        self.scopes.pop();
    }

    fn visit_partial(&mut self, partial: &PartialNode) {
        if partial.name.trim().is_empty() {
            self.fail("Partial reference without a name".to_string(), &partial.location);
        }
    }
}

pub(crate) fn node_location(node: &TemplateNode) -> SourceLocation {
    match node {
        TemplateNode::Element(n) => n.location,
        TemplateNode::Text(n) => n.location,
        TemplateNode::Comment(n) => n.location,
        TemplateNode::Expression(n) => n.location,
        TemplateNode::Block(n) => n.location,
        TemplateNode::Partial(n) => n.location,
    }
}

/// Structural checks that the front end guarantees for parsed templates and
/// that IR handed in as JSON must also satisfy.
pub fn validate_ir(ir: &TemplateIR) -> Result<(), CompilerError> {
    let mut validator = StructureValidator::default();
    validator.visit_root(ir);
    match validator.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
