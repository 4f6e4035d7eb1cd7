//! # Templates and the Engine
//!
//! [`Template`] is a compiled, shareable builder arena. [`TemplateEngine`]
//! ties a sink to a compile cache and a partial registry and is the entry
//! point hosts use to compile and render.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument};

use crate::cache::TemplateCache;
use crate::codegen::{self, Program};
use crate::parse::parse_template;
use crate::runtime::Runtime;
use crate::sink::DomSink;
use crate::validate::{validate_ir, CompilerError, TemplateIR, ERR_IR};
use crate::value::Value;
use crate::visitor::collect_partial_names;

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// How `each` decides that an old item and a new item are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EachEquality {
    /// Reference identity for arrays and objects, value identity otherwise.
    #[default]
    Identity,
    /// Arrays and objects compare by contents.
    Structural,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateOptions {
    /// Element wrapping a root that is not a single element.
    pub container_tag: String,
    /// Reject unknown block tags instead of dropping them.
    pub strict_blocks: bool,
    pub each_equality: EachEquality,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            container_tag: "span".to_string(),
            strict_blocks: false,
            each_equality: EachEquality::Identity,
        }
    }
}

impl TemplateOptions {
    pub fn from_json(json: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(json).map_err(|e| {
            CompilerError::new(
                ERR_IR,
                &format!("Failed to parse template options: {}", e),
                e.line() as u32,
                e.column() as u32,
            )
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Template<S: DomSink> {
    pub(crate) program: Program<S::Node>,
    pub(crate) options: TemplateOptions,
    partial_names: Vec<String>,
    _sink: PhantomData<fn() -> S>,
}

impl<S: DomSink> Template<S> {
    pub fn from_ir(ir: &TemplateIR, options: TemplateOptions) -> Result<Self, CompilerError> {
        validate_ir(ir)?;
        let program = codegen::compile(ir, &options)?;
        Ok(Self {
            program,
            options,
            partial_names: collect_partial_names(ir),
            _sink: PhantomData,
        })
    }

    pub fn from_source(source: &str, options: TemplateOptions) -> Result<Self, CompilerError> {
        let ir = parse_template(source)?;
        Self::from_ir(&ir, options)
    }

    /// Partials referenced anywhere in the template, in document order.
    pub fn partial_names(&self) -> &[String] {
        &self.partial_names
    }

    pub fn builder_count(&self) -> usize {
        self.program.len()
    }
}

impl<S: DomSink> fmt::Debug for Template<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("builders", &self.program.len())
            .field("partials", &self.partial_names)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARTIALS
// ═══════════════════════════════════════════════════════════════════════════════

/// Named templates resolved by `{{> name}}` at render time.
pub struct PartialRegistry<S: DomSink> {
    partials: RwLock<HashMap<String, Arc<Template<S>>>>,
}

impl<S: DomSink> Default for PartialRegistry<S> {
    fn default() -> Self {
        Self {
            partials: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: DomSink> PartialRegistry<S> {
    pub fn register(&self, name: impl Into<String>, template: Arc<Template<S>>) {
        self.partials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), template);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Template<S>>> {
        self.partials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.partials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct TemplateEngine<S: DomSink> {
    runtime: Runtime<S>,
    cache: TemplateCache<S>,
    options: TemplateOptions,
}

impl<S: DomSink> TemplateEngine<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self::with_options(sink, TemplateOptions::default())
    }

    pub fn with_options(sink: Arc<S>, options: TemplateOptions) -> Self {
        Self {
            runtime: Runtime {
                sink,
                partials: Arc::new(PartialRegistry::default()),
            },
            cache: TemplateCache::new(),
            options,
        }
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.runtime.sink
    }

    pub fn partials(&self) -> &PartialRegistry<S> {
        &self.runtime.partials
    }

    /// Compile `source`, or return the template already compiled for it.
    #[instrument(level = "debug", skip_all, fields(len = source.len()))]
    pub fn compile(&self, source: &str) -> Result<Arc<Template<S>>, CompilerError> {
        self.cache.get_or_compile(source, || {
            Template::from_source(source, self.options.clone())
        })
    }

    /// Compile IR directly. Not cached.
    pub fn compile_ir(&self, ir: &TemplateIR) -> Result<Arc<Template<S>>, CompilerError> {
        Template::from_ir(ir, self.options.clone()).map(Arc::new)
    }

    /// Compile every uncached source in parallel and cache the results.
    /// Returns how many templates were newly compiled; the first failure
    /// aborts without caching anything.
    #[instrument(level = "debug", skip_all, fields(count = sources.len()))]
    pub fn precompile(&self, sources: &[&str]) -> Result<usize, CompilerError> {
        let mut pending: Vec<&str> = sources
            .iter()
            .copied()
            .filter(|source| !self.cache.contains(source))
            .collect();
        pending.sort_unstable();
        pending.dedup();

        let options = &self.options;
        let compiled = pending
            .par_iter()
            .map(|source| {
                Template::from_source(source, options.clone()).map(|template| (*source, template))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = compiled.len();
        for (source, template) in compiled {
            self.cache.insert(source, template);
        }
        debug!(count, "precompiled templates");
        Ok(count)
    }

    pub fn render(&self, template: &Arc<Template<S>>, context: &Value) -> S::Node {
        template.render_root(&self.runtime, context)
    }

    pub fn render_source(&self, source: &str, context: &Value) -> Result<S::Node, CompilerError> {
        let template = self.compile(source)?;
        Ok(self.render(&template, context))
    }

    pub fn register_partial(&self, name: impl Into<String>, template: Arc<Template<S>>) {
        let name = name.into();
        debug!(partial = %name, "registering partial");
        self.runtime.partials.register(name, template);
    }

    pub fn register_partial_source(
        &self,
        name: impl Into<String>,
        source: &str,
    ) -> Result<Arc<Template<S>>, CompilerError> {
        let template = self.compile(source)?;
        self.register_partial(name, Arc::clone(&template));
        Ok(template)
    }

    /// Number of distinct sources compiled and cached so far.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
