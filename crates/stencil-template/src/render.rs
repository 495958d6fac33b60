//! The tree-walking renderer.
//!
//! A [`Renderer`] owns the state of one top-level render call: the store
//! shared by custom tags and the current nesting depth. Templates render
//! inside a [`Frame`], which pairs the template with its per-render import
//! overlay and with the frames of the templates extending it (most-derived
//! first), consulted when a `block` is reached.
//!
//! Rendering is async so custom tags may await; node output is still
//! produced strictly depth-first, left to right.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use stencil_core::error::{StencilError, StencilResult};
use stencil_core::logging::WARNING_TARGET;

use crate::context::{escape_html, Scope, Value};
use crate::engine::Engine;
use crate::eval::{self, apply_chain};
use crate::expr::{Expr, Expression, PropertyPath};
use crate::parser::{Macro, Node, Template};
use crate::tags::TagContext;

/// A macro together with the frame of the template defining it.
#[derive(Clone)]
struct MacroRef {
    frame: Frame,
    definition: Arc<Macro>,
}

type Imports = Arc<Mutex<IndexMap<String, MacroRef>>>;

/// A template being rendered.
#[derive(Clone)]
pub(crate) struct Frame {
    template: Arc<Template>,
    imports: Imports,
    /// Frames of templates extending this one, most-derived first.
    descendants: Arc<[Frame]>,
}

impl Frame {
    fn new(template: Arc<Template>) -> Self {
        Self {
            template,
            imports: Imports::default(),
            descendants: Arc::from(Vec::new()),
        }
    }

    pub(crate) const fn template(&self) -> &Arc<Template> {
        &self.template
    }

    fn imports(&self) -> MutexGuard<'_, IndexMap<String, MacroRef>> {
        self.imports.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements the render depth when dropped.
struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State and entry points for one top-level render call.
pub(crate) struct Renderer<'e> {
    engine: &'e Engine,
    store: Mutex<IndexMap<String, Value>>,
    depth: AtomicUsize,
}

impl<'e> Renderer<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            store: Mutex::new(IndexMap::new()),
            depth: AtomicUsize::new(0),
        }
    }

    pub(crate) fn store(&self) -> MutexGuard<'_, IndexMap<String, Value>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> StencilResult<DepthGuard<'_>> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = DepthGuard(&self.depth);
        let max_depth = self.engine.settings().max_depth;
        if depth > max_depth {
            return Err(StencilError::render(
                format!("maximum render depth of {max_depth} exceeded"),
                "",
            ));
        }
        Ok(guard)
    }

    /// Renders a template, following its `extends` chain.
    pub(crate) async fn render_template(
        &self,
        template: Arc<Template>,
        scope: &mut Scope,
    ) -> StencilResult<String> {
        let mut chain = vec![Frame::new(template)];
        while let Some(current) = chain.last().cloned() {
            let Some(extends) = current.template.extends() else {
                break;
            };
            self.run_preamble(&current, scope)?;
            let url = self.template_url(&current, extends, scope)?;
            let parent = self.engine.load_template(&url)?;
            if chain.iter().any(|f| f.template.name() == parent.name()) {
                return Err(current.template.locate(StencilError::render_at(
                    format!("`{url}` is extended circularly"),
                    &extends.raw,
                    extends.span,
                )));
            }
            if chain.len() >= self.engine.settings().max_depth {
                return Err(current.template.locate(StencilError::render_at(
                    "extends chain is too deep",
                    &extends.raw,
                    extends.span,
                )));
            }
            tracing::trace!(child = current.template.name(), parent = parent.name(), "extends");
            chain.push(Frame::new(parent));
        }

        let mut built: Vec<Frame> = Vec::with_capacity(chain.len());
        for frame in chain {
            let descendants = Arc::from(built.clone());
            built.push(Frame {
                descendants,
                ..frame
            });
        }
        let Some(root) = built.pop() else {
            return Ok(String::new());
        };
        self.render_nodes(&root, root.template.nodes(), scope).await
    }

    /// Runs the top-level `import` and `set` tags of an extending template.
    /// Its other top-level content is not rendered.
    fn run_preamble(&self, frame: &Frame, scope: &mut Scope) -> StencilResult<()> {
        for node in frame.template.nodes() {
            match node {
                Node::Import { url, alias } => self.import(frame, url, alias.as_deref(), scope)?,
                Node::Set { key, value } => {
                    let value = value
                        .evaluate(scope, self.engine.filters())
                        .map_err(|e| frame.template.locate(e))?;
                    scope.set(key.clone(), value);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Evaluates an `extends`/`import` target to a non-empty name.
    fn template_url(&self, frame: &Frame, expr: &Expression, scope: &Scope) -> StencilResult<String> {
        let url = expr
            .evaluate(scope, self.engine.filters())
            .map_err(|e| frame.template.locate(e))?
            .to_display_string();
        if url.is_empty() {
            return Err(frame.template.locate(StencilError::render_at(
                "template name evaluated to an empty string",
                &expr.raw,
                expr.span,
            )));
        }
        Ok(url)
    }

    /// Loads `url` and renders it against `scope`.
    pub(crate) async fn include(&self, url: &str, mut scope: Scope) -> StencilResult<String> {
        let _guard = self.enter()?;
        let template = self.engine.load_template(url)?;
        self.render_template(template, &mut scope).await
    }

    /// Makes the macros of the template named by `url` callable in `frame`.
    fn import(
        &self,
        frame: &Frame,
        url: &Expression,
        alias: Option<&str>,
        scope: &Scope,
    ) -> StencilResult<()> {
        let _guard = self.enter().map_err(|e| frame.template.locate(e.or_span(url.span)))?;
        let name = self.template_url(frame, url, scope)?;
        let template = self.engine.load_template(&name)?;
        if template.macros().is_empty() {
            tracing::warn!(
                target: WARNING_TARGET,
                template = frame.template.name(),
                imported = %name,
                "imported template defines no macros"
            );
        }

        let owner = Frame::new(Arc::clone(&template));
        for node in template.nodes() {
            if let Node::Import { url, alias } = node {
                self.import(&owner, url, alias.as_deref(), scope)?;
            }
        }

        let mut imports = frame.imports();
        for (macro_name, definition) in template.macros() {
            let key = alias.map_or_else(|| macro_name.clone(), |alias| format!("{alias}.{macro_name}"));
            imports.insert(
                key,
                MacroRef {
                    frame: owner.clone(),
                    definition: Arc::clone(definition),
                },
            );
        }
        Ok(())
    }

    /// Finds the macro a call expression refers to: imports first, then the
    /// template's own macros.
    fn find_macro(&self, frame: &Frame, callee: &PropertyPath) -> Option<MacroRef> {
        let name = callee.to_string();
        if let Some(found) = frame.imports().get(&name) {
            return Some(found.clone());
        }
        frame.template.macro_named(&name).map(|definition| MacroRef {
            frame: frame.clone(),
            definition: Arc::clone(definition),
        })
    }

    /// Calls a macro. Missing arguments take their default, evaluated in the
    /// caller's scope, or `Undefined`. The output is a safe string.
    async fn call_macro(&self, target: MacroRef, args: &[Expr], scope: &Scope) -> StencilResult<Value> {
        let _guard = self.enter()?;
        let filters = self.engine.filters();
        let values = args
            .iter()
            .map(|arg| eval::evaluate(arg, scope, filters))
            .collect::<StencilResult<Vec<_>>>()?;

        let mut macro_scope = scope.snapshot();
        macro_scope.push();
        for (i, param) in target.definition.params.iter().enumerate() {
            let value = match (values.get(i), &param.default) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) => eval::evaluate(default, scope, filters)?,
                (None, None) => Value::Undefined,
            };
            macro_scope.set(param.name.clone(), value);
        }
        tracing::trace!(name = %target.definition.name, "calling macro");
        let output = self
            .render_nodes(&target.frame, &target.definition.body, &mut macro_scope)
            .await?;
        Ok(Value::SafeString(output))
    }

    /// Converts an interpolated value to output text.
    fn output(&self, value: &Value, safe: bool) -> String {
        let text = value.to_display_string();
        if safe || value.is_safe() || !self.engine.settings().autoescape {
            text
        } else {
            escape_html(&text)
        }
    }

    /// Renders a node list.
    pub(crate) fn render_nodes<'a>(
        &'a self,
        frame: &'a Frame,
        nodes: &'a [Node],
        scope: &'a mut Scope,
    ) -> BoxFuture<'a, StencilResult<String>> {
        Box::pin(async move {
            let mut out = String::new();
            for node in nodes {
                self.render_node(frame, node, scope, &mut out).await?;
            }
            Ok(out)
        })
    }

    #[allow(clippy::too_many_lines)]
    async fn render_node(
        &self,
        frame: &Frame,
        node: &Node,
        scope: &mut Scope,
        out: &mut String,
    ) -> StencilResult<()> {
        let filters = self.engine.filters();
        let locate = |e: StencilError| frame.template.locate(e);
        match node {
            Node::Text(text) | Node::Raw(text) => out.push_str(text),

            Node::Variable(expr) => {
                let target = expr
                    .as_call()
                    .and_then(|(callee, args)| self.find_macro(frame, callee).map(|m| (m, args)));
                let value = match target {
                    Some((target, args)) => {
                        let output = self.call_macro(target, args, scope).await.map_err(locate)?;
                        expr.apply_filters(output, scope, filters)
                    }
                    None => expr.evaluate(scope, filters),
                }
                .map_err(locate)?;
                out.push_str(&self.output(&value, expr.safe));
            }

            Node::If {
                branches,
                else_body,
            } => {
                for (condition, body) in branches {
                    if condition.evaluate(scope, filters).map_err(locate)?.is_truthy() {
                        out.push_str(&self.render_nodes(frame, body, scope).await?);
                        return Ok(());
                    }
                }
                if let Some(body) = else_body {
                    out.push_str(&self.render_nodes(frame, body, scope).await?);
                }
            }

            Node::For {
                value,
                key,
                source,
                body,
            } => {
                let entries: Vec<(Value, Value)> = match source.evaluate(scope, filters).map_err(locate)? {
                    Value::List(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| (Value::from(i), item))
                        .collect(),
                    Value::Map(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
                    _ => Vec::new(),
                };
                let length = entries.len();
                scope.push();
                for (i, (entry_key, item)) in entries.into_iter().enumerate() {
                    scope.set(value.clone(), item);
                    if let Some(key) = key {
                        scope.set(key.clone(), entry_key);
                    }
                    scope.set("loop", loop_value(i, length));
                    out.push_str(&self.render_nodes(frame, body, scope).await?);
                }
                scope.pop();
            }

            Node::Set { key, value } => {
                let value = value.evaluate(scope, filters).map_err(locate)?;
                scope.set(key.clone(), value);
            }

            Node::Block { name, body } => {
                let (target, nodes) = frame
                    .descendants
                    .iter()
                    .find_map(|d| d.template.block(name).map(|b| (d, Arc::clone(b))))
                    .unwrap_or_else(|| (frame, Arc::clone(body)));
                out.push_str(&self.render_nodes(target, nodes.as_slice(), scope).await?);
            }

            Node::Include { attributes } => {
                let mut values = IndexMap::new();
                for (name, expr) in &attributes.entries {
                    values.insert(name.clone(), expr.evaluate(scope, filters).map_err(locate)?);
                }
                let url = values
                    .shift_remove("url")
                    .map(|v| v.to_display_string())
                    .unwrap_or_default();
                if url.is_empty() {
                    let (raw, span) = attributes
                        .get("url")
                        .map_or((String::new(), None), |e| (e.raw.clone(), Some(e.span)));
                    let err = StencilError::render("template name evaluated to an empty string", raw);
                    return Err(locate(match span {
                        Some(span) => err.or_span(span),
                        None => err,
                    }));
                }
                let mut child_scope = scope.snapshot();
                child_scope.push();
                for (name, value) in values {
                    child_scope.set(name, value);
                }
                out.push_str(&self.include(&url, child_scope).await.map_err(locate)?);
            }

            Node::Import { url, alias } => {
                self.import(frame, url, alias.as_deref(), scope)?;
            }

            Node::Filter { chain, body } => {
                let rendered = self.render_nodes(frame, body, scope).await?;
                let value = apply_chain(&chain.filters, Value::String(rendered), scope, filters)
                    .map_err(locate)?;
                out.push_str(&value.to_display_string());
            }

            Node::Custom {
                name,
                tag,
                attributes,
                body,
                span,
            } => {
                let mut attrs = IndexMap::new();
                if let Some(attributes) = attributes {
                    for (key, expr) in &attributes.entries {
                        attrs.insert(key.clone(), expr.evaluate(scope, filters).map_err(locate)?);
                    }
                }
                let cx = TagContext {
                    renderer: self,
                    frame,
                    children: body,
                };
                tracing::trace!(tag = %name, "rendering custom tag");
                let rendered = tag
                    .render(attrs, scope.snapshot(), &cx)
                    .await
                    .map_err(|e| locate(e.or_span(*span)))?;
                if let Some(rendered) = rendered {
                    out.push_str(&rendered);
                }
            }
        }
        Ok(())
    }
}

/// Builds the `loop` variable for iteration `index` of `length`.
fn loop_value(index: usize, length: usize) -> Value {
    let mut map = IndexMap::new();
    map.insert("index".to_string(), Value::from(index + 1));
    map.insert("index0".to_string(), Value::from(index));
    map.insert("length".to_string(), Value::from(length));
    map.insert("first".to_string(), Value::Bool(index == 0));
    map.insert("last".to_string(), Value::Bool(index + 1 == length));
    map.insert("revindex".to_string(), Value::from(length - index));
    map.insert("revindex0".to_string(), Value::from(length - index - 1));
    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_value() {
        let value = loop_value(1, 3);
        assert_eq!(value.get_member("index"), Value::from(2));
        assert_eq!(value.get_member("index0"), Value::from(1));
        assert_eq!(value.get_member("length"), Value::from(3));
        assert_eq!(value.get_member("first"), Value::Bool(false));
        assert_eq!(value.get_member("last"), Value::Bool(false));
        assert_eq!(value.get_member("revindex"), Value::from(2));
        assert_eq!(value.get_member("revindex0"), Value::from(1));
        assert_eq!(loop_value(2, 3).get_member("last"), Value::Bool(true));
    }

    #[test]
    fn test_depth_guard_limits_nesting() {
        let engine = Engine::from_settings(stencil_core::EngineSettings {
            max_depth: 2,
            ..Default::default()
        })
        .unwrap();
        let renderer = Renderer::new(&engine);
        let first = renderer.enter().unwrap();
        let second = renderer.enter().unwrap();
        assert!(renderer.enter().is_err());
        drop(second);
        let _again = renderer.enter().unwrap();
        drop(first);
        assert_eq!(renderer.depth.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_output_escaping() {
        let engine = Engine::new();
        let renderer = Renderer::new(&engine);
        assert_eq!(renderer.output(&Value::from("<b>"), false), "&lt;b&gt;");
        assert_eq!(renderer.output(&Value::from("<b>"), true), "<b>");
        assert_eq!(renderer.output(&Value::safe("<b>"), false), "<b>");
    }
}
