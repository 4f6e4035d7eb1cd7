//! Parse Module for the template front end
//!
//! Turns a mustache-flavoured HTML template into [`TemplateIR`]:
//! 1. mustache tags are swapped for inert placeholders,
//! 2. the placeholder text runs through html5ever's tokenizer,
//! 3. a stack of open elements and blocks rebuilds the tree, resolving the
//!    placeholders back into expression, block and partial nodes.

use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
    TokenizerResult,
};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use tendril::StrTendril;
use tracing::{instrument, trace};

use crate::validate::{
    AttributeIR, AttributeSegment, BlockNode, CommentNode, CompilerError, ElementNode,
    ExpressionNode, PartialNode, SourceLocation, TemplateIR, TemplateNode, TextNode,
    ERR_STRUCTURE,
};

lazy_static! {
    /// `{{{raw}}}` first, then `{{sigil body}}`.
    static ref MUSTACHE_RE: Regex =
        Regex::new(r"(?s)\{\{\{\s*(.*?)\s*\}\}\}|\{\{\s*([#/>!]?)\s*(.*?)\s*\}\}").unwrap();

    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{tpl\{[#/]?(\d+)\}tpl\}").unwrap();

    static ref VOID_ELEMENTS: HashSet<&'static str> = [
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
        "source", "track", "wbr",
    ]
    .into_iter()
    .collect();

    static ref SVG_TAGS: HashSet<&'static str> = [
        "svg", "g", "path", "circle", "ellipse", "line", "polyline", "polygon", "rect", "text",
        "tspan", "defs", "use", "symbol", "marker", "pattern", "mask", "clippath",
        "lineargradient", "radialgradient", "filter", "fegaussianblur",
    ]
    .into_iter()
    .collect();

    /// html5ever lowercases attribute names; SVG needs these camelCased.
    static ref SVG_ATTR_CASE_MAP: HashMap<&'static str, &'static str> = [
        ("viewbox", "viewBox"),
        ("preserveaspectratio", "preserveAspectRatio"),
        ("gradientunits", "gradientUnits"),
        ("gradienttransform", "gradientTransform"),
        ("patternunits", "patternUnits"),
        ("patterntransform", "patternTransform"),
        ("clippathunits", "clipPathUnits"),
        ("maskunits", "maskUnits"),
        ("markerwidth", "markerWidth"),
        ("markerheight", "markerHeight"),
        ("refx", "refX"),
        ("refy", "refY"),
        ("pathlength", "pathLength"),
        ("textlength", "textLength"),
        ("stddeviation", "stdDeviation"),
    ]
    .into_iter()
    .collect();
}

fn correct_svg_attribute_name(attr_name: &str, tag_name: &str) -> String {
    if SVG_TAGS.contains(tag_name) {
        if let Some(&corrected) = SVG_ATTR_CASE_MAP.get(attr_name) {
            return corrected.to_string();
        }
    }
    attr_name.to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// MUSTACHE EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Mustache {
    Value { expression: String, escaped: bool },
    Open { tag: String, argument: String },
    Close { tag: String },
    Branch { tag: String, argument: String },
    Partial { name: String, argument: String },
}

struct Extracted {
    text: String,
    mustaches: Vec<(Mustache, SourceLocation)>,
}

fn location_of(source: &str, offset: usize) -> SourceLocation {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map_or(before, |newline| &before[newline + 1..])
        .chars()
        .count()
        + 1;
    SourceLocation {
        line: line as u32,
        column: column as u32,
    }
}

/// `"each items"` → `("each", "items")`.
fn split_tag(body: &str) -> (String, String) {
    match body.split_once(char::is_whitespace) {
        Some((tag, rest)) => (tag.to_string(), rest.trim().to_string()),
        None => (body.to_string(), String::new()),
    }
}

/// `else`, `elif x` and `else if x`.
fn branch_marker(body: &str) -> Option<Mustache> {
    let (tag, argument) = split_tag(body);
    match tag.as_str() {
        "else" if argument.is_empty() => Some(Mustache::Branch {
            tag: "else".to_string(),
            argument,
        }),
        "else" => {
            let (keyword, condition) = split_tag(&argument);
            (keyword == "if").then(|| Mustache::Branch {
                tag: "elif".to_string(),
                argument: condition,
            })
        }
        "elif" => Some(Mustache::Branch {
            tag: "elif".to_string(),
            argument,
        }),
        _ => None,
    }
}

fn extract_mustaches(source: &str) -> Extracted {
    let mut text = String::with_capacity(source.len());
    let mut mustaches = Vec::new();
    let mut last = 0;

    for caps in MUSTACHE_RE.captures_iter(source) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        text.push_str(&source[last..whole.start()]);
        last = whole.end();

        let mustache = if let Some(raw) = caps.get(1) {
            Mustache::Value {
                expression: raw.as_str().to_string(),
                escaped: false,
            }
        } else {
            let sigil = caps.get(2).map_or("", |m| m.as_str());
            let body = caps.get(3).map_or("", |m| m.as_str()).trim();
            match sigil {
                "!" => continue,
                "#" => branch_marker(body).unwrap_or_else(|| {
                    let (tag, argument) = split_tag(body);
                    Mustache::Open { tag, argument }
                }),
                "/" => Mustache::Close {
                    tag: body.to_string(),
                },
                ">" => {
                    let (name, argument) = split_tag(body);
                    Mustache::Partial { name, argument }
                }
                _ => branch_marker(body).unwrap_or_else(|| Mustache::Value {
                    expression: body.to_string(),
                    escaped: true,
                }),
            }
        };

        let sigil = match mustache {
            Mustache::Open { .. } => "#",
            Mustache::Close { .. } => "/",
            _ => "",
        };
        text.push_str(&format!("{{tpl{{{}{}}}tpl}}", sigil, mustaches.len()));
        mustaches.push((mustache, location_of(source, whole.start())));
    }
    text.push_str(&source[last..]);

    Extracted { text, mustaches }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE BUILDING
// ═══════════════════════════════════════════════════════════════════════════════

enum FrameKind {
    Root,
    Element {
        tag: String,
        attributes: Vec<AttributeIR>,
    },
    Block {
        tag: String,
        argument: String,
    },
    Branch {
        tag: String,
        argument: String,
    },
}

struct Frame {
    kind: FrameKind,
    children: Vec<TemplateNode>,
    location: SourceLocation,
}

impl Frame {
    fn new(kind: FrameKind, location: SourceLocation) -> Self {
        Self {
            kind,
            children: Vec::new(),
            location,
        }
    }

    fn describe(&self) -> String {
        match &self.kind {
            FrameKind::Root => "template root".to_string(),
            FrameKind::Element { tag, .. } => format!("<{}>", tag),
            FrameKind::Block { tag, .. } => format!("{{{{#{}}}}}", tag),
            FrameKind::Branch { tag, .. } => format!("{{{{{}}}}}", tag),
        }
    }

    fn into_node(self) -> Option<TemplateNode> {
        let location = self.location;
        let children = self.children;
        match self.kind {
            FrameKind::Root => None,
            FrameKind::Element { tag, attributes } => Some(TemplateNode::Element(ElementNode {
                tag,
                attributes,
                children,
                location,
            })),
            FrameKind::Block { tag, argument } | FrameKind::Branch { tag, argument } => {
                Some(TemplateNode::Block(BlockNode {
                    tag,
                    argument,
                    children,
                    location,
                }))
            }
        }
    }
}

fn structure_error(message: String, location: SourceLocation) -> CompilerError {
    CompilerError::at(ERR_STRUCTURE, &message, &location)
}

struct IrSink<'a> {
    mustaches: &'a [(Mustache, SourceLocation)],
    stack: Vec<Frame>,
    text: String,
    text_location: SourceLocation,
    error: Option<CompilerError>,
}

impl<'a> IrSink<'a> {
    fn new(mustaches: &'a [(Mustache, SourceLocation)]) -> Self {
        Self {
            mustaches,
            stack: vec![Frame::new(FrameKind::Root, SourceLocation { line: 1, column: 1 })],
            text: String::new(),
            text_location: SourceLocation::default(),
            error: None,
        }
    }

    fn mustache(&self, caps: &Captures) -> Result<(Mustache, SourceLocation), CompilerError> {
        caps.get(1)
            .and_then(|id| id.as_str().parse::<usize>().ok())
            .and_then(|id| self.mustaches.get(id))
            .cloned()
            .ok_or_else(|| structure_error("Unresolved placeholder".to_string(), self.text_location))
    }

    fn push_node(&mut self, node: TemplateNode) {
        if let Some(frame) = self.stack.last_mut() {
            frame.children.push(node);
        }
    }

    fn push_text(&mut self, text: &str, location: SourceLocation) {
        if !text.is_empty() {
            self.push_node(TemplateNode::Text(TextNode {
                value: text.to_string(),
                location,
            }));
        }
    }

    fn pop_into_parent(&mut self) {
        if let Some(node) = self.stack.pop().and_then(Frame::into_node) {
            self.push_node(node);
        }
    }

    fn flush_text(&mut self) -> Result<(), CompilerError> {
        if self.text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.text);
        let location = self.text_location;
        let mut last = 0;

        for caps in PLACEHOLDER_RE.captures_iter(&text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            self.push_text(&text[last..whole.start()], location);
            last = whole.end();

            let (mustache, at) = self.mustache(&caps)?;
            match mustache {
                Mustache::Value { expression, escaped } => {
                    self.push_node(TemplateNode::Expression(ExpressionNode {
                        expression,
                        escaped,
                        location: at,
                    }))
                }
                Mustache::Partial { name, argument } => {
                    self.push_node(TemplateNode::Partial(PartialNode {
                        name,
                        argument,
                        location: at,
                    }))
                }
                Mustache::Open { tag, argument } => {
                    self.stack.push(Frame::new(FrameKind::Block { tag, argument }, at))
                }
                Mustache::Close { tag } => self.close_block(&tag, at)?,
                Mustache::Branch { tag, argument } => self.open_branch(tag, argument, at)?,
            }
        }
        self.push_text(&text[last..], location);
        Ok(())
    }

    fn close_block(&mut self, tag: &str, at: SourceLocation) -> Result<(), CompilerError> {
        loop {
            let Some(top) = self.stack.last() else {
                return Err(structure_error(format!("{{{{/{}}}}} has no open block", tag), at));
            };
            match &top.kind {
                FrameKind::Branch { .. } => self.pop_into_parent(),
                FrameKind::Block { tag: open, .. } if open == tag => {
                    self.pop_into_parent();
                    return Ok(());
                }
                FrameKind::Block { tag: open, .. } => {
                    return Err(structure_error(
                        format!(
                            "{{{{/{}}}}} closes {{{{#{}}}}} opened at line {}",
                            tag, open, top.location.line
                        ),
                        at,
                    ))
                }
                FrameKind::Element { tag: open, .. } => {
                    return Err(structure_error(
                        format!(
                            "Out of order: {{{{/{}}}}} closes a block while <{}> opened at line {} is still open",
                            tag, open, top.location.line
                        ),
                        at,
                    ))
                }
                FrameKind::Root => {
                    return Err(structure_error(
                        format!("{{{{/{}}}}} has no matching {{{{#{}}}}}", tag, tag),
                        at,
                    ))
                }
            }
        }
    }

    fn open_branch(
        &mut self,
        tag: String,
        argument: String,
        at: SourceLocation,
    ) -> Result<(), CompilerError> {
        if matches!(self.stack.last().map(|f| &f.kind), Some(FrameKind::Branch { .. })) {
            self.pop_into_parent();
        }
        let owner = match self.stack.last().map(|f| &f.kind) {
            Some(FrameKind::Block { tag: owner, .. }) => owner.as_str(),
            _ => "",
        };
        let allowed = match tag.as_str() {
            "else" => matches!(owner, "if" | "unless" | "each"),
            _ => matches!(owner, "if" | "unless"),
        };
        if !allowed {
            return Err(structure_error(
                format!("{{{{{}}}}} outside of {{{{#if}}}}, {{{{#unless}}}} or {{{{#each}}}}", tag),
                at,
            ));
        }
        self.stack
            .push(Frame::new(FrameKind::Branch { tag, argument }, at));
        Ok(())
    }

    fn attribute(
        &self,
        element: &str,
        name: &str,
        value: &str,
        location: SourceLocation,
    ) -> Result<AttributeIR, CompilerError> {
        if PLACEHOLDER_RE.is_match(name) {
            return Err(structure_error(
                format!("Mustache tags are not allowed in the attribute list of <{}>", element),
                location,
            ));
        }
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(value) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > last {
                segments.push(AttributeSegment::Static(value[last..whole.start()].to_string()));
            }
            last = whole.end();
            match self.mustache(&caps)? {
                (Mustache::Value { expression, .. }, _) => {
                    segments.push(AttributeSegment::Dynamic(expression))
                }
                (_, at) => {
                    return Err(structure_error(
                        format!(
                            "Block sections are not supported inside attribute `{}` of <{}>",
                            name, element
                        ),
                        at,
                    ))
                }
            }
        }
        if last < value.len() {
            segments.push(AttributeSegment::Static(value[last..].to_string()));
        }
        Ok(AttributeIR {
            name: correct_svg_attribute_name(name, element),
            value: segments,
            location,
        })
    }

    fn start_tag(&mut self, tag: Tag, location: SourceLocation) -> Result<TokenSinkResult<()>, CompilerError> {
        let name = tag.name.to_string();
        let attributes = tag
            .attrs
            .iter()
            .map(|attr| self.attribute(&name, &attr.name.local, &attr.value, location))
            .collect::<Result<Vec<_>, _>>()?;

        if tag.self_closing || VOID_ELEMENTS.contains(name.as_str()) {
            self.push_node(TemplateNode::Element(ElementNode {
                tag: name,
                attributes,
                children: Vec::new(),
                location,
            }));
            return Ok(TokenSinkResult::Continue);
        }

        let raw = match name.as_str() {
            "script" => Some(RawKind::ScriptData),
            "style" => Some(RawKind::Rawtext),
            "textarea" | "title" => Some(RawKind::Rcdata),
            _ => None,
        };
        self.stack
            .push(Frame::new(FrameKind::Element { tag: name, attributes }, location));
        Ok(raw.map_or(TokenSinkResult::Continue, TokenSinkResult::RawData))
    }

    fn end_tag(&mut self, tag: Tag, location: SourceLocation) -> Result<(), CompilerError> {
        let name = tag.name.to_string();
        if VOID_ELEMENTS.contains(name.as_str()) {
            return Ok(());
        }
        let Some(top) = self.stack.last() else {
            return Err(structure_error(format!("Unexpected </{}>", name), location));
        };
        match &top.kind {
            FrameKind::Element { tag: open, .. } if *open == name => {}
            FrameKind::Element { tag: open, .. } => {
                return Err(structure_error(
                    format!(
                        "Closing tag </{}> does not match <{}> opened at line {}",
                        name, open, top.location.line
                    ),
                    location,
                ))
            }
            FrameKind::Root => {
                return Err(structure_error(
                    format!("Closing tag </{}> has no matching open tag", name),
                    location,
                ))
            }
            FrameKind::Block { .. } | FrameKind::Branch { .. } => {
                return Err(structure_error(
                    format!(
                        "Out of order: </{}> closes an element while {} opened at line {} is still open",
                        name,
                        top.describe(),
                        top.location.line
                    ),
                    location,
                ))
            }
        }
        self.pop_into_parent();
        Ok(())
    }

    fn handle(&mut self, token: Token, location: SourceLocation) -> Result<TokenSinkResult<()>, CompilerError> {
        self.flush_text()?;
        match token {
            Token::TagToken(tag) => match tag.kind.clone() {
                TagKind::StartTag => return self.start_tag(tag, location),
                TagKind::EndTag => self.end_tag(tag, location)?,
            },
            Token::CommentToken(text) => self.push_node(TemplateNode::Comment(CommentNode {
                value: text.to_string(),
                location,
            })),
            Token::ParseError(reason) => trace!(%reason, line = location.line, "lenient html parse error"),
            _ => {}
        }
        Ok(TokenSinkResult::Continue)
    }

    fn finish(mut self) -> Result<Vec<TemplateNode>, CompilerError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        self.flush_text()?;
        if self.stack.len() > 1 {
            if let Some(top) = self.stack.last() {
                return Err(structure_error(
                    format!("Unclosed {} at end of template", top.describe()),
                    top.location,
                ));
            }
        }
        Ok(self.stack.pop().map(|root| root.children).unwrap_or_default())
    }
}

impl<'a> TokenSink for IrSink<'a> {
    type Handle = ();

    fn process_token(&mut self, token: Token, line_number: u64) -> TokenSinkResult<()> {
        if self.error.is_some() {
            return TokenSinkResult::Continue;
        }
        let location = SourceLocation {
            line: line_number as u32,
            column: 1,
        };
        match token {
            Token::CharacterTokens(text) => {
                if self.text.is_empty() {
                    self.text_location = location;
                }
                self.text.push_str(&text);
                TokenSinkResult::Continue
            }
            Token::NullCharacterToken | Token::EOFToken => TokenSinkResult::Continue,
            other => match self.handle(other, location) {
                Ok(result) => result,
                Err(error) => {
                    self.error = Some(error);
                    TokenSinkResult::Continue
                }
            },
        }
    }
}

/// Leading and trailing whitespace around the template is not content.
fn trim_root_whitespace(nodes: &mut Vec<TemplateNode>) {
    let is_blank = |node: &TemplateNode| matches!(node, TemplateNode::Text(t) if t.value.trim().is_empty());
    while nodes.last().map_or(false, is_blank) {
        nodes.pop();
    }
    let leading = nodes.iter().take_while(|node| is_blank(node)).count();
    nodes.drain(..leading);
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN PARSING FUNCTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse a template string into IR.
#[instrument(level = "debug", skip_all, fields(len = source.len()))]
pub fn parse_template(source: &str) -> Result<TemplateIR, CompilerError> {
    let extracted = extract_mustaches(source);

    let mut tokenizer = Tokenizer::new(IrSink::new(&extracted.mustaches), TokenizerOpts::default());
    let mut queue = BufferQueue::default();
    queue.push_back(StrTendril::from_slice(&extracted.text));
    // IrSink never returns a script handle; resume anyway if one shows up.
    while let TokenizerResult::Script(()) = tokenizer.feed(&mut queue) {
        trace!("tokenizer paused on a script handle; resuming");
    }
    tokenizer.end();

    let mut nodes = tokenizer.sink.finish()?;
    trim_root_whitespace(&mut nodes);

    Ok(TemplateIR {
        raw: source.to_string(),
        nodes,
    })
}
