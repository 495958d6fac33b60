//! Integration tests for the engine's public rendering API.
//!
//! These tests render fixture templates from `tests/fixtures/` and string
//! templates, covering:
//! 1. Inheritance, includes, and imports
//! 2. Expressions and filters
//! 3. Custom tags

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use stencil_core::logging::WARNING_TARGET;
use stencil_core::{EngineSettings, StencilError, StencilResult};
use stencil_template::{CustomTag, Engine, FileSystemLoader, Scope, TagContext, Value};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

// ============================================================================
// Shared helpers
// ============================================================================

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture_engine() -> Engine {
    Engine::from_settings(EngineSettings {
        base_dir: fixtures(),
        ..EngineSettings::default()
    })
    .unwrap()
}

fn scope(data: serde_json::Value) -> Scope {
    Scope::from_json(data).unwrap()
}

/// Collects the messages of warnings logged under the template target.
#[derive(Clone, Default)]
struct WarningCapture {
    messages: Arc<Mutex<Vec<String>>>,
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for WarningCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() == tracing::Level::WARN && metadata.target() == WARNING_TARGET {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.messages.lock().unwrap().push(visitor.0);
        }
    }
}

impl WarningCapture {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

// ============================================================================
// Category 1: Inheritance, includes, and imports
// ============================================================================

#[test]
fn test_extends_with_include_in_block() {
    let engine = fixture_engine();
    let data = scope(serde_json::json!({"items": [{"name": "a"}, {"name": "b"}]}));
    assert_eq!(
        engine.render("page", &data).unwrap(),
        "<html><title>Items</title><main><ul><li>1. a</li><li>2. b</li></ul></main></html>"
    );
}

#[test]
fn test_multi_level_extends() {
    let engine = fixture_engine();
    let data = scope(serde_json::json!({"items": []}));
    assert_eq!(
        engine.render("section", &data).unwrap(),
        "<html><title>Section | Items</title><main><ul></ul></main></html>"
    );
}

#[test]
fn test_parent_renders_defaults() {
    let engine = fixture_engine();
    assert_eq!(
        engine.render("layout.tpl", &Scope::new()).unwrap(),
        "<html><title>Site</title><main>empty</main></html>"
    );
}

#[test]
fn test_import_with_alias() {
    let engine = fixture_engine();
    let data = Scope::new().with("query", "<x>");
    assert_eq!(
        engine.render("search", &data).unwrap(),
        r#"<label>Q</label><input name="q" value="&lt;x&gt;">"#
    );
}

#[test]
fn test_import_without_alias() {
    let engine = fixture_engine();
    assert_eq!(
        engine.render("search_flat", &Scope::new()).unwrap(),
        r#"<input name="a" value="">"#
    );
}

#[test]
fn test_import_from_string_template() {
    let engine = fixture_engine();
    let output = engine
        .render_string(r#"{% import "forms" as ui %}{{ ui.label('ok') }}"#, &Scope::new())
        .unwrap();
    assert_eq!(output, "<label>OK</label>");
}

#[test]
fn test_import_without_macros_warns() {
    let engine = fixture_engine();
    let capture = WarningCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    let output = tracing::subscriber::with_default(subscriber, || {
        engine.render_string(r#"{% import "plain" as p %}ok"#, &Scope::new())
    });

    assert_eq!(output.unwrap(), "ok");
    assert_eq!(capture.messages(), ["imported template defines no macros"]);
}

#[test]
fn test_import_with_macros_does_not_warn() {
    let engine = fixture_engine();
    let capture = WarningCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    let output = tracing::subscriber::with_default(subscriber, || {
        engine.render_string(r#"{% import "forms" as ui %}ok"#, &Scope::new())
    });

    assert_eq!(output.unwrap(), "ok");
    assert!(capture.messages().is_empty());
}

#[test]
fn test_missing_template_file() {
    let engine = fixture_engine();
    let err = engine.render("nope", &Scope::new()).unwrap_err();
    assert!(matches!(err, StencilError::TemplateDoesNotExist(_)));

    let err = engine
        .render_string(r#"{% include "nope" %}"#, &Scope::new())
        .unwrap_err();
    assert!(matches!(err, StencilError::TemplateDoesNotExist(_)));
}

#[test]
fn test_empty_include_name_is_render_error() {
    let engine = fixture_engine();
    let err = engine
        .render_string("{% include missing %}", &Scope::new())
        .unwrap_err();
    assert!(err.is_render_error());
}

#[test]
fn test_recursive_include_is_bounded() {
    let engine = Engine::from_settings(EngineSettings {
        base_dir: fixtures(),
        max_depth: 8,
        ..EngineSettings::default()
    })
    .unwrap();
    let err = engine.render("recursive", &Scope::new()).unwrap_err();
    assert!(err.is_render_error());
    assert!(err.to_string().contains("depth"));
}

#[test]
fn test_circular_extends_is_render_error() {
    let engine = fixture_engine();
    let err = engine.render("cycle_a", &Scope::new()).unwrap_err();
    assert!(err.is_render_error());
}

#[test]
fn test_custom_loader() {
    let loader = FileSystemLoader::new("/nonexistent", "tpl").with_dir(fixtures());
    let engine = Engine::new().with_loader(loader);
    assert_eq!(
        engine
            .render("partials/item", &Scope::new().with("name", "x"))
            .unwrap(),
        "<li>. x</li>"
    );
}

// ============================================================================
// Category 2: Expressions and filters
// ============================================================================

#[test]
fn test_round_trip_text() {
    let engine = Engine::new();
    let source = "plain <b>text</b> with } and { and % signs";
    assert_eq!(engine.render_string(source, &Scope::new()).unwrap(), source);
}

#[test]
fn test_safe_then_nl2br() {
    let engine = Engine::new();
    let data = Scope::new().with("test", "a\nb<div>");
    assert_eq!(
        engine.render_string("{{ test | safe | nl2br }}", &data).unwrap(),
        "a<br/>b<div>"
    );
}

#[test]
fn test_expression_operators() {
    let engine = Engine::new();
    let data = scope(serde_json::json!({
        "n": 5,
        "name": "stencil",
        "tags": ["a", "b"],
        "user": {"roles": ["admin"]},
    }));
    let cases = [
        ("{{ n + 1 }}", "6"),
        ("{{ n / 2 }}", "2.5"),
        ("{{ n % 2 }}", "1"),
        ("{{ -n }}", "-5"),
        ("{{ 'x' + n }}", "x5"),
        ("{{ n > 3 && n < 10 }}", "true"),
        ("{{ missing || 'fallback' }}", "fallback"),
        ("{{ !missing }}", "true"),
        ("{{ 'admin' in user.roles }}", "true"),
        ("{{ tags[1] }}", "b"),
        ("{{ user['roles'][0] }}", "admin"),
        ("{{ 'yes' if n == '5' else 'no' }}", "yes"),
        ("{{ n === '5' ? 'strict' : 'loose' }}", "loose"),
        ("{{ `${name}-${n}` }}", "stencil-5"),
        ("{{ name | upper | replace('S', '$') }}", "$TENCIL"),
        ("{{ (tags | reverse)[0] }}", "b"),
        ("{% for i in range(3) %}{{ i }}{% endfor %}", "012"),
    ];
    for (source, expected) in cases {
        assert_eq!(engine.render_string(source, &data).unwrap(), expected, "{source}");
    }
}

#[test]
fn test_calling_non_function_is_render_error() {
    let engine = Engine::new();
    let err = engine
        .render_string("{{ name() }}", &Scope::new().with("name", "x"))
        .unwrap_err();
    assert!(err.is_render_error());
}

#[test]
fn test_render_error_carries_location() {
    let engine = Engine::new();
    engine.add_string_template("broken", "line one\n{{ value | nope }}");
    let err = engine.render("broken", &Scope::new()).unwrap_err();
    let diagnostic = err.diagnostic().unwrap();
    assert_eq!(diagnostic.file.as_deref(), Some("broken"));
    assert!(diagnostic.snippet.is_some());
}

#[test]
fn test_unknown_tag_and_missing_close() {
    let engine = Engine::new();
    let err = engine
        .render_string("{% unknown %}", &Scope::new())
        .unwrap_err();
    assert!(err.is_syntax_error());

    let template = engine.compile_string("{% for a in b %}{{ a }}").unwrap();
    assert_eq!(template.warnings(), ["`for` was not closed"]);
}

#[test]
fn test_custom_delimiters_leave_default_syntax_as_text() {
    let engine = Engine::from_settings(EngineSettings {
        block_start: "<%".into(),
        block_end: "%>".into(),
        variable_start: "<%=".into(),
        variable_end: "%>".into(),
        ..EngineSettings::default()
    })
    .unwrap();
    let data = scope(serde_json::json!({"list": [1, 2]}));
    assert_eq!(
        engine
            .render_string("<% for i in list %><%= i %>{{ i }}<% endfor %>", &data)
            .unwrap(),
        "1{{ i }}2{{ i }}"
    );
}

// ============================================================================
// Category 3: Custom tags
// ============================================================================

/// Counts its own invocations in the render store.
struct Counter;

#[async_trait]
impl CustomTag for Counter {
    fn unary(&self) -> bool {
        true
    }

    fn no_attr(&self) -> bool {
        true
    }

    async fn render(
        &self,
        attrs: IndexMap<String, Value>,
        _scope: Scope,
        cx: &TagContext<'_>,
    ) -> StencilResult<Option<String>> {
        assert!(attrs.is_empty());
        let mut store = cx.store();
        let next = store.get("count").and_then(Value::as_integer).unwrap_or(0) + 1;
        store.insert("count".to_string(), Value::from(next));
        Ok(Some(next.to_string()))
    }
}

/// Wraps its rendered body in an element with the given class.
struct Wrap;

#[async_trait]
impl CustomTag for Wrap {
    fn attr_name(&self) -> &str {
        "class"
    }

    async fn render(
        &self,
        attrs: IndexMap<String, Value>,
        mut scope: Scope,
        cx: &TagContext<'_>,
    ) -> StencilResult<Option<String>> {
        let class = attrs.get("class").map(Value::to_display_string).unwrap_or_default();
        scope.set("wrapped", Value::Bool(true));
        let body = cx.render_children(&scope).await?;
        Ok(Some(format!("<div class=\"{class}\">{body}</div>")))
    }
}

/// Renders another template named by its attribute.
struct Embed;

#[async_trait]
impl CustomTag for Embed {
    fn unary(&self) -> bool {
        true
    }

    async fn render(
        &self,
        attrs: IndexMap<String, Value>,
        scope: Scope,
        cx: &TagContext<'_>,
    ) -> StencilResult<Option<String>> {
        let url = attrs.get("default").map(Value::to_display_string).unwrap_or_default();
        tokio::task::yield_now().await;
        let mut output = cx.include(&url, &scope).await?;
        output.push_str(&format!("@{}", cx.file()));
        Ok(Some(output))
    }
}

/// Renders nothing.
struct Silent;

#[async_trait]
impl CustomTag for Silent {
    fn unary(&self) -> bool {
        true
    }

    async fn render(
        &self,
        _attrs: IndexMap<String, Value>,
        _scope: Scope,
        _cx: &TagContext<'_>,
    ) -> StencilResult<Option<String>> {
        Ok(None)
    }
}

fn tag_engine() -> Engine {
    let mut engine = Engine::new();
    engine.register_tag("counter", Counter).unwrap();
    engine.register_tag("wrap", Wrap).unwrap();
    engine.register_tag("embed", Embed).unwrap();
    engine.register_tag("silent", Silent).unwrap();
    engine
}

#[test]
fn test_tag_registration_rejects_conflicts() {
    let mut engine = tag_engine();
    assert!(matches!(
        engine.register_tag("counter", Counter),
        Err(StencilError::ConfigurationError(_))
    ));
    assert!(matches!(
        engine.register_tag("for", Counter),
        Err(StencilError::ConfigurationError(_))
    ));
}

#[test]
fn test_store_is_shared_within_one_render() {
    let engine = tag_engine();
    let source = "{% counter %}{% counter ignored payload %}{% counter %}";
    assert_eq!(engine.render_string(source, &Scope::new()).unwrap(), "123");
    // A new render starts with an empty store.
    assert_eq!(engine.render_string(source, &Scope::new()).unwrap(), "123");
}

#[test]
fn test_block_tag_renders_children() {
    let engine = tag_engine();
    let data = Scope::new().with("name", "<b>");
    let output = engine
        .render_string(
            "{% wrap 'box' %}{{ name }}{% if wrapped %}!{% endif %}{% endwrap %}{{ wrapped }}",
            &data,
        )
        .unwrap();
    assert_eq!(output, r#"<div class="box">&lt;b&gt;!</div>"#);
}

#[test]
fn test_silent_tag_outputs_nothing() {
    let engine = tag_engine();
    assert_eq!(
        engine.render_string("a{% silent %}b", &Scope::new()).unwrap(),
        "ab"
    );
}

#[tokio::test]
async fn test_async_tag_includes_template() {
    let engine = tag_engine();
    engine.add_string_template("greeting", "hi {{ who }}");
    engine.add_string_template("host", "{% embed 'greeting' %}");
    let output = engine
        .render_async("host", &Scope::new().with("who", "there"))
        .await
        .unwrap();
    assert_eq!(output, "hi there@host");
}

#[tokio::test]
async fn test_concurrent_renders_share_engine() {
    let engine = Arc::new(tag_engine());
    engine.add_string_template("count", "{% counter %}{% counter %}{{ n }}");
    let handles: Vec<_> = (0..4)
        .map(|n| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .render_async("count", &Scope::new().with("n", n))
                    .await
            })
        })
        .collect();
    for (n, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), format!("12{n}"));
    }
}
