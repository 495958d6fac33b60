//! Template loaders.
//!
//! Template loaders are responsible for finding and reading template source
//! text. The [`TemplateLoader`] trait defines the interface, with built-in
//! implementations for filesystem and string-based loading. Each loaded
//! template carries a canonical identity used as its cache key and in
//! diagnostics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use stencil_core::error::{StencilError, StencilResult};

/// Source text of a template together with its canonical identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub source: String,
    pub identity: String,
}

/// Loads template source text by name.
pub trait TemplateLoader: Send + Sync {
    /// Loads the template with the given name.
    ///
    /// # Errors
    ///
    /// Returns `TemplateDoesNotExist` if the template cannot be found.
    fn load(&self, name: &str) -> StencilResult<TemplateSource>;
}

/// Loads templates from one or more directories on the filesystem.
///
/// Names without an extension get the default extension appended. Each
/// directory is searched in order and the first match wins.
pub struct FileSystemLoader {
    dirs: Vec<PathBuf>,
    ext: String,
}

impl FileSystemLoader {
    /// Creates a loader rooted at `base_dir` with default extension `ext`.
    pub fn new(base_dir: impl Into<PathBuf>, ext: impl Into<String>) -> Self {
        Self {
            dirs: vec![base_dir.into()],
            ext: ext.into(),
        }
    }

    /// Adds a further directory to search after the existing ones.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.push(dir.into());
        self
    }

    /// Returns the relative file name for `name`, with the extension applied.
    fn file_name(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.extension().is_none() && !self.ext.is_empty() {
            let mut with_ext = name.to_string();
            with_ext.push('.');
            with_ext.push_str(self.ext.trim_start_matches('.'));
            PathBuf::from(with_ext)
        } else {
            path.to_path_buf()
        }
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> StencilResult<TemplateSource> {
        let file_name = self.file_name(name);
        for dir in &self.dirs {
            let path = dir.join(&file_name);
            if path.is_file() {
                let source = std::fs::read_to_string(&path).map_err(|e| {
                    StencilError::TemplateDoesNotExist(format!(
                        "error reading template '{}': {e}",
                        path.display()
                    ))
                })?;
                let identity = path
                    .canonicalize()
                    .unwrap_or(path)
                    .to_string_lossy()
                    .into_owned();
                tracing::debug!(template = name, identity = %identity, "loaded template");
                return Ok(TemplateSource { source, identity });
            }
        }

        Err(StencilError::TemplateDoesNotExist(format!(
            "template '{name}' not found in directories: {:?}",
            self.dirs
        )))
    }
}

/// Loads templates from an in-memory map of name to source strings.
pub struct StringLoader {
    templates: RwLock<HashMap<String, String>>,
}

impl StringLoader {
    /// Creates a new empty `StringLoader`.
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a `StringLoader` from a map of template names to source strings.
    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self {
            templates: RwLock::new(templates),
        }
    }

    /// Adds or replaces a template.
    pub fn add(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), source.into());
    }
}

impl Default for StringLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateLoader for StringLoader {
    fn load(&self, name: &str) -> StencilResult<TemplateSource> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|source| TemplateSource {
                source: source.clone(),
                identity: name.to_string(),
            })
            .ok_or_else(|| {
                StencilError::TemplateDoesNotExist(format!("template '{name}' not found in StringLoader"))
            })
    }
}
