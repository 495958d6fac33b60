//! # stencil-core
//!
//! Error types, diagnostics, settings, and logging shared by the stencil
//! template engine crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy, source spans, and diagnostic snippets
//! - [`settings`] - Engine configuration with defaults
//! - [`settings_loader`] - Loading settings from TOML/JSON and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{SourceSpan, StencilError, StencilResult, TemplateDiagnostic};
pub use settings::EngineSettings;
