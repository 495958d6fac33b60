//! # stencil-template
//!
//! A template engine with configurable delimiters, an expression language
//! with filters, template inheritance, includes, macros, and custom tags.
//!
//! ## Modules
//!
//! - [`lexer`] - Splits source text into text, variable, block, and comment tokens
//! - [`expr`] - Expression, filter chain, and attribute compilation
//! - [`eval`] - Expression evaluation against a scope
//! - [`context`] - Runtime values and the layered variable scope
//! - [`filters`] - Filter trait, registry, and built-in filters
//! - [`tags`] - Custom tag trait and registry
//! - [`parser`] - Builds the node tree of a compiled [`Template`]
//! - [`loaders`] - Filesystem and in-memory template loaders
//! - [`cache`] - Compiled template cache
//! - [`engine`] - The [`Engine`] entry point

pub mod cache;
pub mod context;
pub mod engine;
pub mod eval;
pub mod expr;
pub mod filters;
pub mod lexer;
pub mod loaders;
pub mod parser;
mod render;
pub mod tags;

pub use context::{Scope, Value};
pub use engine::Engine;
pub use filters::{Filter, FilterRegistry};
pub use loaders::{FileSystemLoader, StringLoader, TemplateLoader};
pub use parser::Template;
pub use tags::{CustomTag, TagContext, TagRegistry};
