//! Engine settings.
//!
//! [`EngineSettings`] holds the delimiter configuration, whitespace control,
//! escaping, caching, and loader options recognised by the engine. Every field
//! has a default so partial configuration files deserialize cleanly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{StencilError, StencilResult};

/// The comment start delimiter. Not configurable.
pub const COMMENT_START: &str = "{#";
/// The comment end delimiter. Not configurable.
pub const COMMENT_END: &str = "#}";

/// Configuration for a template engine.
///
/// # Examples
///
/// ```
/// use stencil_core::settings::EngineSettings;
///
/// let settings = EngineSettings {
///     block_start: "<%".into(),
///     block_end: "%>".into(),
///     variable_start: "<%=".into(),
///     variable_end: "%>".into(),
///     ..EngineSettings::default()
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Opening delimiter of block tags.
    pub block_start: String,
    /// Closing delimiter of block tags.
    pub block_end: String,
    /// Opening delimiter of variable interpolations.
    pub variable_start: String,
    /// Closing delimiter of variable interpolations.
    pub variable_end: String,
    /// Remove the first newline after a block tag.
    pub trim_blocks: bool,
    /// Strip whitespace before a block tag and after its close.
    pub lstrip_blocks: bool,
    /// HTML-escape interpolated values unless marked safe.
    pub autoescape: bool,
    /// Disable the compiled-template cache.
    pub no_cache: bool,
    /// Root directory for file-based templates.
    pub base_dir: PathBuf,
    /// Extension appended to template identifiers that have none.
    pub ext: String,
    /// Maximum nesting of includes, extends, and macro calls in one render.
    pub max_depth: usize,
    /// Use human-readable log output instead of JSON.
    pub debug: bool,
    /// Default log filter directive.
    pub log_level: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            block_start: "{%".to_string(),
            block_end: "%}".to_string(),
            variable_start: "{{".to_string(),
            variable_end: "}}".to_string(),
            trim_blocks: false,
            lstrip_blocks: false,
            autoescape: true,
            no_cache: false,
            base_dir: PathBuf::from("."),
            ext: "tpl".to_string(),
            max_depth: 64,
            debug: false,
            log_level: "info".to_string(),
        }
    }
}

impl EngineSettings {
    /// Checks the delimiter configuration.
    ///
    /// Delimiters must be non-empty, and the block and variable start
    /// delimiters must differ (otherwise no tag could be told apart from an
    /// interpolation).
    pub fn validate(&self) -> StencilResult<()> {
        let delimiters = [
            ("block_start", &self.block_start),
            ("block_end", &self.block_end),
            ("variable_start", &self.variable_start),
            ("variable_end", &self.variable_end),
        ];
        for (name, value) in delimiters {
            if value.is_empty() {
                return Err(StencilError::ConfigurationError(format!(
                    "delimiter `{name}` must not be empty"
                )));
            }
        }
        if self.block_start == self.variable_start {
            return Err(StencilError::ConfigurationError(format!(
                "block_start and variable_start must differ (both are `{}`)",
                self.block_start
            )));
        }
        if self.block_start == COMMENT_START || self.variable_start == COMMENT_START {
            return Err(StencilError::ConfigurationError(format!(
                "`{COMMENT_START}` is reserved for comments"
            )));
        }
        if self.max_depth == 0 {
            return Err(StencilError::ConfigurationError(
                "max_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
