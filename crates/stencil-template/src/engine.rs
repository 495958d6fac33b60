//! Template engine: loading, compiling, caching and rendering templates.
//!
//! The [`Engine`] is the central entry point. It owns the delimiter syntax,
//! the template loader, the compiled-template cache and the per-engine
//! filter and custom tag registries. Each render call gets its own
//! renderer state, so one engine can serve concurrent renders.

use std::sync::Arc;

use stencil_core::error::{StencilError, StencilResult};
use stencil_core::logging::render_span;
use stencil_core::settings::EngineSettings;
use tracing::Instrument;

use crate::cache::TemplateCache;
use crate::context::{Scope, Value};
use crate::filters::{Filter, FilterRegistry};
use crate::lexer::Syntax;
use crate::loaders::{FileSystemLoader, StringLoader, TemplateLoader};
use crate::parser::Template;
use crate::render::Renderer;
use crate::tags::{CustomTag, TagRegistry};

/// Diagnostic name of templates compiled from strings.
const STRING_TEMPLATE_NAME: &str = "<string>";

/// The template engine.
///
/// # Examples
///
/// ```
/// use stencil_template::context::Scope;
/// use stencil_template::engine::Engine;
///
/// let engine = Engine::new();
/// engine.add_string_template("hello", "Hello {{ name }}!");
///
/// let scope = Scope::new().with("name", "World");
/// assert_eq!(engine.render("hello", &scope).unwrap(), "Hello World!");
/// assert_eq!(
///     engine.render_string("<b>{{ name }}</b>", &scope).unwrap(),
///     "<b>World</b>"
/// );
/// ```
pub struct Engine {
    settings: EngineSettings,
    syntax: Syntax,
    loader: Box<dyn TemplateLoader>,
    /// In-memory templates, consulted before `loader`.
    string_loader: StringLoader,
    /// Named templates, keyed by loader identity.
    cache: TemplateCache,
    /// Templates compiled from source text, keyed by the text.
    source_cache: TemplateCache,
    filters: FilterRegistry,
    tags: TagRegistry,
}

impl Engine {
    /// Creates an engine with default settings.
    pub fn new() -> Self {
        let settings = EngineSettings::default();
        Self {
            syntax: Syntax::default(),
            loader: Box::new(FileSystemLoader::new(&settings.base_dir, settings.ext.clone())),
            settings,
            string_loader: StringLoader::new(),
            cache: TemplateCache::new(),
            source_cache: TemplateCache::new(),
            filters: FilterRegistry::new(),
            tags: TagRegistry::new(),
        }
    }

    /// Creates an engine from settings, loading files from `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the settings are inconsistent.
    pub fn from_settings(settings: EngineSettings) -> StencilResult<Self> {
        let syntax = Syntax::from_settings(&settings)?;
        Ok(Self {
            syntax,
            loader: Box::new(FileSystemLoader::new(&settings.base_dir, settings.ext.clone())),
            settings,
            string_loader: StringLoader::new(),
            cache: TemplateCache::new(),
            source_cache: TemplateCache::new(),
            filters: FilterRegistry::new(),
            tags: TagRegistry::new(),
        })
    }

    /// Replaces the template loader.
    #[must_use]
    pub fn with_loader(mut self, loader: impl TemplateLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self.cache.clear();
        self
    }

    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub const fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub const fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    /// Adds or replaces an in-memory template.
    pub fn add_string_template(&self, name: &str, source: &str) {
        self.string_loader.add(name, source);
        self.cache.clear();
    }

    /// Registers a filter closure, shadowing any built-in of the same name.
    pub fn register_filter<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&Value, &[Value]) -> StencilResult<Value> + Send + Sync + 'static,
    {
        self.filters.register_fn(name, func);
    }

    /// Registers a [`Filter`] implementation.
    pub fn register_filter_impl(&mut self, filter: Box<dyn Filter>) {
        self.filters.register(filter);
    }

    /// Registers a custom tag.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the name is taken.
    pub fn register_tag(&mut self, name: &str, tag: impl CustomTag + 'static) -> StencilResult<()> {
        self.tags.register(name, tag)?;
        // Templates compiled earlier treated the name as unknown.
        self.cache.clear();
        self.source_cache.clear();
        Ok(())
    }

    fn compile(&self, identity: &str, source: &str) -> StencilResult<Arc<Template>> {
        let compile = || Template::compile(identity, source, &self.syntax, &self.tags);
        if self.settings.no_cache {
            return compile().map(Arc::new);
        }
        self.cache.get_or_compile(identity, compile)
    }

    /// Loads and compiles a template by name.
    ///
    /// # Errors
    ///
    /// Returns `TemplateDoesNotExist` if no loader knows the name, or a
    /// syntax error if it fails to compile.
    pub fn get_template(&self, name: &str) -> StencilResult<Arc<Template>> {
        self.load_template(name)
    }

    pub(crate) fn load_template(&self, name: &str) -> StencilResult<Arc<Template>> {
        let loaded = match self.string_loader.load(name) {
            Ok(loaded) => loaded,
            Err(StencilError::TemplateDoesNotExist(_)) => self.loader.load(name)?,
            Err(e) => return Err(e),
        };
        self.compile(&loaded.identity, &loaded.source)
    }

    /// Compiles template source text. Compiled sources are cached apart
    /// from named templates, so a source equal to a template name never
    /// aliases it.
    pub fn compile_string(&self, source: &str) -> StencilResult<Arc<Template>> {
        let compile = || Template::compile(STRING_TEMPLATE_NAME, source, &self.syntax, &self.tags);
        if self.settings.no_cache {
            return compile().map(Arc::new);
        }
        self.source_cache.get_or_compile(source, compile)
    }

    /// Renders a named template.
    pub fn render(&self, name: &str, scope: &Scope) -> StencilResult<String> {
        futures::executor::block_on(self.render_async(name, scope))
    }

    /// Renders template source text.
    pub fn render_string(&self, source: &str, scope: &Scope) -> StencilResult<String> {
        futures::executor::block_on(self.render_string_async(source, scope))
    }

    /// Renders a named template, awaiting async custom tags.
    pub async fn render_async(&self, name: &str, scope: &Scope) -> StencilResult<String> {
        let template = self.load_template(name)?;
        self.render_compiled(template, scope)
            .instrument(render_span(name))
            .await
    }

    /// Renders template source text, awaiting async custom tags.
    pub async fn render_string_async(&self, source: &str, scope: &Scope) -> StencilResult<String> {
        let template = self.compile_string(source)?;
        self.render_compiled(template, scope)
            .instrument(render_span(STRING_TEMPLATE_NAME))
            .await
    }

    async fn render_compiled(&self, template: Arc<Template>, scope: &Scope) -> StencilResult<String> {
        let renderer = Renderer::new(self);
        let mut scope = scope.clone();
        let result = renderer.render_template(template, &mut scope).await;
        match &result {
            Ok(output) => tracing::debug!(bytes = output.len(), "rendered template"),
            Err(err) => tracing::debug!(error = %err, "render failed"),
        }
        result
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(source: &str, data: serde_json::Value) -> StencilResult<String> {
        Engine::new().render_string(source, &Scope::from_json(data)?)
    }

    fn ok(source: &str, data: serde_json::Value) -> String {
        render(source, data).unwrap()
    }

    #[test]
    fn test_variable_interpolation() {
        assert_eq!(ok("<div>{{ test }}</div>", serde_json::json!({"test": "123"})), "<div>123</div>");
        assert_eq!(ok("{{ missing.prop }}", serde_json::json!({})), "");
    }

    #[test]
    fn test_autoescape_and_safe() {
        let data = serde_json::json!({"test": "a\nb<div>"});
        assert_eq!(ok("{{ test | safe | nl2br}}", data.clone()), "a<br/>b<div>");
        assert_eq!(ok("{{ test | escape | nl2br | safe }}", data.clone()), "a<br/>b&lt;div&gt;");
        assert_eq!(ok("{{ test }}", data), "a\nb&lt;div&gt;");
    }

    #[test]
    fn test_autoescape_off() {
        let engine = Engine::from_settings(EngineSettings {
            autoescape: false,
            ..EngineSettings::default()
        })
        .unwrap();
        let scope = Scope::new().with("html", "<i>");
        assert_eq!(engine.render_string("{{ html }}", &scope).unwrap(), "<i>");
    }

    #[test]
    fn test_ambiguous_delimiters_are_literal() {
        assert_eq!(ok("{{ {% asd {{ test }}", serde_json::json!({"test": "123"})), "{{ {% asd 123");
    }

    #[test]
    fn test_comments() {
        let data = serde_json::json!({"test": "1"});
        assert_eq!(ok("123{# {{ test }} #}", data.clone()), "123");
        assert_eq!(ok("123{# {{ test }}", data), "123");
    }

    #[test]
    fn test_malformed_expression_is_syntax_error() {
        let err = render("{{ abc abc }}", serde_json::json!({})).unwrap_err();
        assert!(err.is_syntax_error());
    }

    #[test]
    fn test_custom_delimiters() {
        let engine = Engine::from_settings(EngineSettings {
            block_start: "<%".into(),
            block_end: "%>".into(),
            variable_start: "<%=".into(),
            variable_end: "%>".into(),
            ..EngineSettings::default()
        })
        .unwrap();
        let scope = Scope::new().with("test", "123");
        assert_eq!(
            engine
                .render_string("<% if test %><%= test %><% endif %>", &scope)
                .unwrap(),
            "123"
        );

        let err = Engine::from_settings(EngineSettings {
            block_start: "<%".into(),
            variable_start: "<%".into(),
            ..EngineSettings::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, StencilError::ConfigurationError(_)));
    }

    #[test]
    fn test_if_chain() {
        let source = "{% if a %}a{% elseif b %}b{% elif c %}c{% else %}d{% endif %}";
        let cases = [
            (serde_json::json!({"a": true, "b": true}), "a"),
            (serde_json::json!({"b": true, "c": true}), "b"),
            (serde_json::json!({"c": 1}), "c"),
            (serde_json::json!({}), "d"),
        ];
        for (data, expected) in cases {
            assert_eq!(ok(source, data), expected);
        }
        assert_eq!(ok("{% if a %}a{% elseif b %}b{% endif %}", serde_json::json!({})), "");
    }

    #[test]
    fn test_ternary() {
        let source = r#"{{ test === "123" ? "321" : "123" }}"#;
        assert_eq!(ok(source, serde_json::json!({"test": "123"})), "321");
        assert_eq!(ok(source, serde_json::json!({"test": 123})), "123");
    }

    #[test]
    fn test_for_over_list_and_object() {
        let data = serde_json::json!({
            "list": ["123", "321"],
            "obj": {"a": 1, "b": 2},
        });
        assert_eq!(ok("{% for item in list %}{{ item }}{% endfor %}", data.clone()), "123321");
        assert_eq!(
            ok("{% for item, index in list %}{{ index }}{% endfor %}", data.clone()),
            "01"
        );
        assert_eq!(
            ok("{% for value, key in obj %}{{ key }}:{{ value }}{% endfor %}", data.clone()),
            "a:1b:2"
        );
        assert_eq!(
            ok(
                "{% for item in list %}{{ loop.index }}:{{ loop.index0 }}:{{ loop.length }}{% endfor %}",
                data
            ),
            "1:0:22:1:2"
        );
    }

    #[test]
    fn test_nested_for_with_fallback_source() {
        let data = serde_json::json!({
            "items": [
                {"name": "1", "list": ["list:1", "list:2"]},
                {"name": "2", "list2": ["list2:1", "list2:2"]},
            ]
        });
        let source = "{% for item in items %}{{ item.name }}-\
                      {% for sub in (item.list || item.list2) %}{{ sub }}{% endfor %}{% endfor %}";
        assert_eq!(ok(source, data), "1-list:1list:22-list2:1list2:2");
    }

    #[test]
    fn test_for_over_non_collection_is_empty() {
        assert_eq!(ok("{% for a in missing %}x{% endfor %}done", serde_json::json!({})), "done");
        assert_eq!(ok("{% for a in n %}x{% endfor %}", serde_json::json!({"n": 3})), "");
    }

    #[test]
    fn test_missing_endfor_still_renders() {
        assert_eq!(
            ok("{% for item in list %}{{ item }}", serde_json::json!({"list": [1, 2]})),
            "12"
        );
    }

    #[test]
    fn test_set_scoping() {
        assert_eq!(ok("{% set a = 1 + 2 %}{{ a }}", serde_json::json!({})), "3");
        assert_eq!(
            ok("{% if true %}{% set a = 'x' %}{% endif %}{{ a }}", serde_json::json!({})),
            "x"
        );
        assert_eq!(
            ok(
                "{% for item in list %}{% set sub = 123123 %}{{ sub }}{% endfor %}{{ sub }}",
                serde_json::json!({"list": [1]})
            ),
            "123123"
        );
        assert_eq!(
            ok(
                "{% for i in list %}{{ seen }}{% set seen = i %}{% endfor %}",
                serde_json::json!({"list": [1, 2, 3]})
            ),
            "12"
        );
    }

    #[test]
    fn test_raw() {
        assert_eq!(ok("{% raw %}{{ test }}{% endraw %}", serde_json::json!({"test": 1})), "{{ test }}");
    }

    #[test]
    fn test_macros() {
        let data = serde_json::json!({"list": ["1", "2"]});
        assert_eq!(ok("{% macro test(a) %}{{ a }}{% endmacro %}{{ test('123') }}", data.clone()), "123");
        assert_eq!(ok("{% macro test() %}x{% endmacro %}{{ test() }}", data.clone()), "x");
        let source = "{% macro pair(a, b = '321') %}({{ a }}{{ b }}{{ item }}){% endmacro %}\
                      {% for item in list %}{{ pair('123') }}{{ pair('321', '1') }}{% endfor %}";
        assert_eq!(ok(source, data), "(1233211)(32111)(1233212)(32112)");
    }

    #[test]
    fn test_macro_uses_caller_scope() {
        let source = "{% macro show(a) %}({{ a }}{{ item }}){% endmacro %}\
                      {% for item in list %}{{ show('123') }}{{ show('321') }}{% endfor %}";
        assert_eq!(
            ok(source, serde_json::json!({"list": [1, 2]})),
            "(1231)(3211)(1232)(3212)"
        );
    }

    #[test]
    fn test_macro_missing_args_are_empty_and_output_not_escaped() {
        let source = "{% macro tag(name, cls) %}<{{ name }} class=\"{{ cls }}\">{% endmacro %}{{ tag('b') }}";
        assert_eq!(ok(source, serde_json::json!({})), "<b class=\"\">");
    }

    #[test]
    fn test_filters() {
        assert_eq!(
            ok("{{ test | json | safe }}", serde_json::json!({"test": {"a": "1"}})),
            r#"{"a":"1"}"#
        );
        assert_eq!(ok("{{ test | nl2br | json }}", serde_json::json!({"test": null})), "{}");
        assert_eq!(ok("{% for i in [1, 2] | reverse %}{{ i }}{% endfor %}", serde_json::json!({})), "21");
        assert_eq!(
            ok(
                "{% set myItem = test | nl2br %}{{ myItem | safe }}",
                serde_json::json!({"test": "\n"})
            ),
            "<br/>"
        );
        assert_eq!(
            ok("{{ name | replace(r/o/g, '0') | upper }}", serde_json::json!({"name": "foo"})),
            "F00"
        );
    }

    #[test]
    fn test_custom_filters() {
        let mut engine = Engine::new();
        engine.register_filter("isNull", |value, _| Ok(Value::Bool(value.is_nullish())));
        engine.register_filter("aaa", |value, _| Ok(Value::from(format!("{value}aaa"))));
        let scope = Scope::new().with("x", 1);
        assert_eq!(
            engine
                .render_string("{% if missing | isNull %}null{% endif %}{{ x | aaa }}", &scope)
                .unwrap(),
            "null1aaa"
        );
    }

    #[test]
    fn test_unknown_filter_and_tag() {
        let err = render("{{ a | nope }}", serde_json::json!({})).unwrap_err();
        assert!(err.is_render_error());
        let err = render("{% say %}", serde_json::json!({})).unwrap_err();
        assert!(err.is_syntax_error());
    }

    #[test]
    fn test_filter_block() {
        assert_eq!(
            ok("{% filter upper %}a{{ b }}{% endfilter %}", serde_json::json!({"b": "c"})),
            "AC"
        );
    }

    #[test]
    fn test_string_templates_extend_and_include() {
        let engine = Engine::new();
        engine.add_string_template("base", "<{% block body %}base{% endblock %}|{% block foot %}f{% endblock %}>");
        engine.add_string_template("child", "{% extends 'base' %}{% block body %}child {{ x }}{% endblock %}");
        engine.add_string_template("card", "[{{ title }}/{{ x }}]");
        let scope = Scope::new().with("x", 1);
        assert_eq!(engine.render("child", &scope).unwrap(), "<child 1|f>");
        assert_eq!(
            engine
                .render_string("{% include 'card' title = 'T' %}", &scope)
                .unwrap(),
            "[T/1]"
        );
    }

    #[test]
    fn test_missing_template() {
        let err = Engine::new().render("definitely/missing", &Scope::new()).unwrap_err();
        assert!(matches!(err, StencilError::TemplateDoesNotExist(_)));
    }

    #[test]
    fn test_cache_reuses_compiled_strings() {
        let engine = Engine::new();
        let a = engine.compile_string("{{ a }}").unwrap();
        let b = engine.compile_string("{{ a }}").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let uncached = Engine::from_settings(EngineSettings {
            no_cache: true,
            ..EngineSettings::default()
        })
        .unwrap();
        let a = uncached.compile_string("{{ a }}").unwrap();
        let b = uncached.compile_string("{{ a }}").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_source_and_named_templates_do_not_alias() {
        let scope = Scope::new().with("name", "World");

        let engine = Engine::new();
        engine.add_string_template("hello", "Hello {{ name }}!");
        assert_eq!(engine.render_string("hello", &scope).unwrap(), "hello");
        assert_eq!(engine.render("hello", &scope).unwrap(), "Hello World!");

        let engine = Engine::new();
        engine.add_string_template("hello", "Hello {{ name }}!");
        assert_eq!(engine.render("hello", &scope).unwrap(), "Hello World!");
        assert_eq!(engine.render_string("hello", &scope).unwrap(), "hello");
        assert_eq!(engine.render("hello", &scope).unwrap(), "Hello World!");
    }

    #[test]
    fn test_trim_blocks_wins_over_lstrip_blocks() {
        let engine = Engine::from_settings(EngineSettings {
            trim_blocks: true,
            lstrip_blocks: true,
            ..EngineSettings::default()
        })
        .unwrap();
        let output = engine
            .render_string("a\n\n  {% if true %}b{% endif %}", &Scope::new())
            .unwrap();
        assert_eq!(output, "a\nb");
    }

    #[test]
    fn test_trim_blocks_around_variables_and_comments() {
        let engine = Engine::from_settings(EngineSettings {
            trim_blocks: true,
            ..EngineSettings::default()
        })
        .unwrap();
        let scope = Scope::new().with("x", "X");
        assert_eq!(engine.render_string("a\n{{ x }}\nb", &scope).unwrap(), "aXb");
        assert_eq!(engine.render_string("a\n{# note #}\nb", &scope).unwrap(), "ab");
    }

    #[test]
    fn test_lstrip_blocks_leaves_start_of_body() {
        let engine = Engine::from_settings(EngineSettings {
            lstrip_blocks: true,
            ..EngineSettings::default()
        })
        .unwrap();
        let scope = Scope::new().with("x", true).with("y", "Y");
        let output = engine
            .render_string("a \n\t{% if x %}\n\n b {{ y }}\n{% endif %}  c", &scope)
            .unwrap();
        assert_eq!(output, "a\n\n bYc");
    }

    #[test]
    fn test_recursive_include_hits_depth_limit() {
        let engine = Engine::new();
        engine.add_string_template("loop", "x{% include 'loop' %}");
        let err = engine.render("loop", &Scope::new()).unwrap_err();
        assert!(err.is_render_error());
    }

    #[test]
    fn test_render_string_async() {
        let engine = Engine::new();
        let scope = Scope::new().with("a", 2);
        let output = futures::executor::block_on(engine.render_string_async("{{ a * 2 }}", &scope));
        assert_eq!(output.unwrap(), "4");
    }
}
