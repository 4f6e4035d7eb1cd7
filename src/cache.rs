use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::sink::DomSink;
use crate::template::Template;
use crate::validate::CompilerError;

/// Compiled templates keyed by the SHA-256 of their source text.
pub struct TemplateCache<S: DomSink> {
    entries: Mutex<HashMap<String, Arc<Template<S>>>>,
}

impl<S: DomSink> Default for TemplateCache<S> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: DomSink> TemplateCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<Template<S>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, source: &str) -> Option<Arc<Template<S>>> {
        self.entries().get(&Self::compute_hash(source)).cloned()
    }

    /// Store a template compiled elsewhere. An entry already cached for the
    /// same source wins and is returned.
    pub fn insert(&self, source: &str, template: Template<S>) -> Arc<Template<S>> {
        let hash = Self::compute_hash(source);
        Arc::clone(
            self.entries()
                .entry(hash)
                .or_insert_with(|| Arc::new(template)),
        )
    }

    /// Cached template for `source`, compiling it on a miss. The lock is held
    /// while compiling, so concurrent requests for one source compile it once.
    pub fn get_or_compile<F>(&self, source: &str, compile: F) -> Result<Arc<Template<S>>, CompilerError>
    where
        F: FnOnce() -> Result<Template<S>, CompilerError>,
    {
        let hash = Self::compute_hash(source);
        let mut entries = self.entries();
        if let Some(template) = entries.get(&hash) {
            debug!(hash = &hash[..12], "template cache hit");
            return Ok(Arc::clone(template));
        }
        debug!(hash = &hash[..12], "template cache miss");
        let template = Arc::new(compile()?);
        entries.insert(hash, Arc::clone(&template));
        Ok(template)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.entries().contains_key(&Self::compute_hash(source))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
