//! Compiled template cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use stencil_core::error::StencilResult;

use crate::parser::Template;

/// Compiled templates keyed by identity.
///
/// Compilation runs under the write lock after a second lookup, so
/// concurrent callers never observe two compiled templates for one identity.
#[derive(Default)]
pub struct TemplateCache {
    templates: RwLock<HashMap<String, Arc<Template>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Template>> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Returns the cached template for `key`, compiling it with `compile` on
    /// a miss. A failed compilation caches nothing.
    pub fn get_or_compile<F>(&self, key: &str, compile: F) -> StencilResult<Arc<Template>>
    where
        F: FnOnce() -> StencilResult<Template>,
    {
        if let Some(template) = self.get(key) {
            tracing::trace!(key, "template cache hit");
            return Ok(template);
        }
        let mut templates = self
            .templates
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(template) = templates.get(key) {
            return Ok(Arc::clone(template));
        }
        tracing::debug!(key, "template cache miss");
        let template = Arc::new(compile()?);
        templates.insert(key.to_string(), Arc::clone(&template));
        Ok(template)
    }

    pub fn len(&self) -> usize {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached template.
    pub fn clear(&self) {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
