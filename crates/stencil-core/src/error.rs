//! Core error types for the stencil template engine.
//!
//! This module provides the [`StencilError`] enum covering configuration,
//! template syntax, template rendering, loading, and serialization failures,
//! together with [`TemplateDiagnostic`], the payload carried by syntax and
//! render errors so callers can point at the offending source.

use std::fmt;

use thiserror::Error;

/// A half-open byte range `[start, end)` into a template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

impl SourceSpan {
    /// Creates a new span. `end` is clamped so it is never before `start`.
    pub const fn new(start: usize, end: usize) -> Self {
        let end = if end < start { start } else { end };
        Self { start, end }
    }

    /// Returns the length of the span in bytes.
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` if the span covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns this span moved forward by `offset` bytes.
    #[must_use]
    pub const fn shift(self, offset: usize) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// Details attached to a template syntax or render error.
///
/// A diagnostic always carries a message and the raw text that triggered it
/// (a tag payload or an expression). When a source position is known, the
/// engine fills in the template identity and a rendered snippet of the
/// surrounding lines via [`TemplateDiagnostic::locate`].
///
/// # Examples
///
/// ```
/// use stencil_core::error::{SourceSpan, TemplateDiagnostic};
///
/// let mut diag = TemplateDiagnostic::new("unexpected token", "abc abc")
///     .with_span(SourceSpan::new(7, 10));
/// diag.locate(Some("index.tpl"), "{{ abc abc }}");
/// assert_eq!(diag.file.as_deref(), Some("index.tpl"));
/// assert!(diag.snippet.unwrap().contains('^'));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDiagnostic {
    /// What went wrong.
    pub message: String,
    /// The raw tag payload or expression text involved.
    pub raw: String,
    /// The identity of the template, when known.
    pub file: Option<String>,
    /// Byte range of the offending text in the template source.
    pub span: Option<SourceSpan>,
    /// Rendered source lines with a caret run under `span`.
    pub snippet: Option<String>,
}

impl TemplateDiagnostic {
    /// Creates a diagnostic with no position information.
    pub fn new(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw: raw.into(),
            file: None,
            span: None,
            snippet: None,
        }
    }

    /// Attaches a source span.
    #[must_use]
    pub const fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    /// Fills in the template identity and, if a span is present, renders the
    /// snippet. Information already present is kept.
    pub fn locate(&mut self, file: Option<&str>, source: &str) {
        if self.file.is_none() {
            self.file = file.map(ToString::to_string);
        }
        if self.snippet.is_none() {
            if let Some(span) = self.span {
                self.snippet = Some(render_snippet(source, span));
            }
        }
    }
}

impl fmt::Display for TemplateDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.raw.is_empty() {
            write!(f, " in `{}`", self.raw)?;
        }
        if let Some(file) = &self.file {
            write!(f, " ({file})")?;
        }
        if let Some(snippet) = &self.snippet {
            write!(f, "\n{snippet}")?;
        }
        Ok(())
    }
}

/// The primary error type for the stencil engine.
#[derive(Error, Debug)]
pub enum StencilError {
    /// The engine was configured inconsistently (e.g. identical block and
    /// variable start delimiters, or a custom tag shadowing a built-in).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A template contains malformed tags or expressions.
    #[error("Template syntax error: {0}")]
    TemplateSyntaxError(Box<TemplateDiagnostic>),

    /// Evaluation failed while rendering a template.
    #[error("Template render error: {0}")]
    TemplateRenderError(Box<TemplateDiagnostic>),

    /// The requested template was not found by the loader.
    #[error("Template does not exist: {0}")]
    TemplateDoesNotExist(String),

    /// A value could not be converted to or from its serialized form.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StencilError {
    /// Creates a syntax error with no position information.
    pub fn syntax(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::TemplateSyntaxError(Box::new(TemplateDiagnostic::new(message, raw)))
    }

    /// Creates a syntax error pointing at `span`.
    pub fn syntax_at(message: impl Into<String>, raw: impl Into<String>, span: SourceSpan) -> Self {
        Self::TemplateSyntaxError(Box::new(TemplateDiagnostic::new(message, raw).with_span(span)))
    }

    /// Creates a render error with no position information.
    pub fn render(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::TemplateRenderError(Box::new(TemplateDiagnostic::new(message, raw)))
    }

    /// Creates a render error pointing at `span`.
    pub fn render_at(message: impl Into<String>, raw: impl Into<String>, span: SourceSpan) -> Self {
        Self::TemplateRenderError(Box::new(TemplateDiagnostic::new(message, raw).with_span(span)))
    }

    /// Returns the diagnostic for syntax and render errors.
    pub fn diagnostic(&self) -> Option<&TemplateDiagnostic> {
        match self {
            Self::TemplateSyntaxError(diag) | Self::TemplateRenderError(diag) => Some(diag),
            _ => None,
        }
    }

    /// Returns `true` for [`StencilError::TemplateSyntaxError`].
    pub const fn is_syntax_error(&self) -> bool {
        matches!(self, Self::TemplateSyntaxError(_))
    }

    /// Returns `true` for [`StencilError::TemplateRenderError`].
    pub const fn is_render_error(&self) -> bool {
        matches!(self, Self::TemplateRenderError(_))
    }

    /// Attaches the template identity and source snippet to syntax and
    /// render errors. Other variants pass through untouched.
    #[must_use]
    pub fn locate(mut self, file: Option<&str>, source: &str) -> Self {
        if let Self::TemplateSyntaxError(diag) | Self::TemplateRenderError(diag) = &mut self {
            diag.locate(file, source);
        }
        self
    }

    /// Attaches a span to a syntax or render error that has none yet.
    #[must_use]
    pub fn or_span(mut self, span: SourceSpan) -> Self {
        if let Self::TemplateSyntaxError(diag) | Self::TemplateRenderError(diag) = &mut self {
            if diag.span.is_none() {
                diag.span = Some(span);
            }
        }
        self
    }
}

/// A convenience type alias for `Result<T, StencilError>`.
pub type StencilResult<T> = Result<T, StencilError>;

/// Renders the source line containing `span`, one line of context on each
/// side, and a caret run under the offending range.
pub fn render_snippet(source: &str, span: SourceSpan) -> String {
    let start = floor_char_boundary(source, span.start);
    let end = floor_char_boundary(source, span.end.max(start));

    let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[start..].find('\n').map_or(source.len(), |i| start + i);
    let line_no = source[..start].matches('\n').count() + 1;

    let previous = (line_start > 0).then(|| {
        let prev_end = line_start - 1;
        let prev_start = source[..prev_end].rfind('\n').map_or(0, |i| i + 1);
        &source[prev_start..prev_end]
    });
    let next = (line_end < source.len()).then(|| {
        let next_start = line_end + 1;
        let next_end = source[next_start..]
            .find('\n')
            .map_or(source.len(), |i| next_start + i);
        &source[next_start..next_end]
    });

    let width = (line_no + 1).to_string().len();
    let mut out = String::new();
    if let Some(text) = previous {
        out.push_str(&format!("{:>width$} | {}\n", line_no - 1, text.trim_end_matches('\r')));
    }
    out.push_str(&format!(
        "{:>width$} | {}\n",
        line_no,
        source[line_start..line_end].trim_end_matches('\r')
    ));

    let indent: String = source[line_start..start]
        .chars()
        .map(|c| if c == '\t' { '\t' } else { ' ' })
        .collect();
    let carets = source[start..end.min(line_end)].chars().count().max(1);
    out.push_str(&format!("{:>width$} | {indent}{}", "", "^".repeat(carets)));

    if let Some(text) = next {
        out.push_str(&format!("\n{:>width$} | {}", line_no + 1, text.trim_end_matches('\r')));
    }
    out
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
