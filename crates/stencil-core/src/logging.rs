//! Logging integration for the stencil engine.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`EngineSettings`] and for creating per-render spans. Template warnings
//! (unclosed tags, macro-less imports) are emitted on the
//! [`WARNING_TARGET`] target.

use crate::settings::EngineSettings;

/// The `tracing` target used for non-fatal template warnings.
pub const WARNING_TARGET: &str = "stencil::template";

/// Sets up the global tracing subscriber based on the given settings.
///
/// `RUST_LOG` takes precedence; otherwise `settings.log_level` is used. In
/// debug mode a pretty, human-readable format is used; otherwise a
/// structured JSON format. Calling this more than once is harmless: later
/// calls leave the first subscriber in place.
pub fn setup_logging(settings: &EngineSettings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one top-level render call.
///
/// # Examples
///
/// ```
/// use stencil_core::logging::render_span;
///
/// let span = render_span("layout.tpl");
/// let _guard = span.enter();
/// tracing::debug!("rendering");
/// ```
pub fn render_span(template: &str) -> tracing::Span {
    tracing::info_span!("render", template = template)
}
