//! Built-in and custom template tags.
//!
//! Built-in tags are parsed directly by [`crate::parser`] and rendered as
//! [`Node`] variants:
//!
//! | Tag | Form | Effect |
//! |---|---|---|
//! | `if` / `elseif` / `elif` / `else` | block | first true branch renders |
//! | `for a[, b] in expr` | block | iterates lists and maps, sets `loop` |
//! | `set name = expr` | unary | assigns into the active scope layer |
//! | `raw` | block | contents are emitted verbatim |
//! | `macro name(params)` | block | defines a callable macro |
//! | `extends expr` | unary | renders the parent with this template's blocks |
//! | `block name` | block | overridable region |
//! | `include expr key=expr ...` | unary | renders another template inline |
//! | `import expr [as alias]` | unary | makes another template's macros callable |
//! | `filter name(args) \| ...` | block | pipes the rendered body through filters |
//!
//! Any other tag name must be registered as a [`CustomTag`] in a
//! [`TagRegistry`].

use std::collections::HashMap;
use std::sync::{Arc, MutexGuard};

use async_trait::async_trait;
use indexmap::IndexMap;
use stencil_core::error::{StencilError, StencilResult};

use crate::context::{Scope, Value};
use crate::lexer::tag_name;
use crate::parser::Node;
use crate::render::{Frame, Renderer};

/// Returns the names reserved by built-in tags, closing forms included.
pub fn builtin_tag_names() -> Vec<&'static str> {
    vec![
        "if",
        "elseif",
        "elif",
        "else",
        "endif",
        "for",
        "endfor",
        "set",
        "raw",
        "endraw",
        "macro",
        "endmacro",
        "extends",
        "block",
        "endblock",
        "include",
        "import",
        "filter",
        "endfilter",
    ]
}

/// A user-defined tag.
///
/// Attributes are parsed with the attribute-list grammar
/// (`key = expr ...`); a leading bare expression is stored under
/// [`CustomTag::attr_name`]. Non-unary tags capture their children up to
/// `end<name>`, available through [`TagContext::children`].
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use indexmap::IndexMap;
/// use stencil_core::StencilResult;
/// use stencil_template::context::{Scope, Value};
/// use stencil_template::tags::{CustomTag, TagContext};
///
/// struct Shout;
///
/// #[async_trait]
/// impl CustomTag for Shout {
///     fn unary(&self) -> bool {
///         true
///     }
///
///     async fn render(
///         &self,
///         attrs: IndexMap<String, Value>,
///         _scope: Scope,
///         _cx: &TagContext<'_>,
///     ) -> StencilResult<Option<String>> {
///         Ok(attrs.get("default").map(|v| v.to_display_string().to_uppercase()))
///     }
/// }
/// ```
#[async_trait]
pub trait CustomTag: Send + Sync {
    /// `true` if the tag has no body and no closing tag.
    fn unary(&self) -> bool {
        false
    }

    /// The key under which a bare leading attribute expression is stored.
    fn attr_name(&self) -> &str {
        "default"
    }

    /// `true` if the tag payload is ignored instead of parsed as attributes.
    fn no_attr(&self) -> bool {
        false
    }

    /// Renders the tag. `None` renders nothing.
    async fn render(
        &self,
        attrs: IndexMap<String, Value>,
        scope: Scope,
        cx: &TagContext<'_>,
    ) -> StencilResult<Option<String>>;
}

/// The collaborators available to a [`CustomTag`] while it renders.
pub struct TagContext<'a> {
    pub(crate) renderer: &'a Renderer<'a>,
    pub(crate) frame: &'a Frame,
    pub(crate) children: &'a [Node],
}

impl TagContext<'_> {
    /// The key-value store shared by every tag within one render call.
    pub fn store(&self) -> MutexGuard<'_, IndexMap<String, Value>> {
        self.renderer.store()
    }

    /// The identity of the template containing the tag.
    pub fn file(&self) -> &str {
        self.frame.template().name()
    }

    /// The tag's body, empty for unary tags.
    pub fn children(&self) -> &[Node] {
        self.children
    }

    /// Renders `nodes` against a copy of `scope`, in the tag's template.
    pub async fn compile(&self, nodes: &[Node], scope: &Scope) -> StencilResult<String> {
        let mut scope = scope.clone();
        self.renderer.render_nodes(self.frame, nodes, &mut scope).await
    }

    /// Renders the tag's own children against a copy of `scope`.
    pub async fn render_children(&self, scope: &Scope) -> StencilResult<String> {
        self.compile(self.children, scope).await
    }

    /// Loads and renders another template against a copy of `scope`.
    pub async fn include(&self, url: &str, scope: &Scope) -> StencilResult<String> {
        self.renderer.include(url, scope.clone()).await
    }
}

/// Custom tags by name.
#[derive(Clone, Default)]
pub struct TagRegistry {
    tags: HashMap<String, Arc<dyn CustomTag>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tag.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the name is not a valid tag name,
    /// collides with a built-in tag, or is already registered.
    pub fn register(&mut self, name: &str, tag: impl CustomTag + 'static) -> StencilResult<()> {
        self.register_arc(name, Arc::new(tag))
    }

    /// Registers a shared tag implementation.
    pub fn register_arc(&mut self, name: &str, tag: Arc<dyn CustomTag>) -> StencilResult<()> {
        if name.is_empty() || tag_name(name) != name {
            return Err(StencilError::ConfigurationError(format!(
                "invalid tag name `{name}`"
            )));
        }
        if builtin_tag_names().contains(&name) {
            return Err(StencilError::ConfigurationError(format!(
                "tag `{name}` is a built-in tag"
            )));
        }
        if self.tags.contains_key(name) {
            return Err(StencilError::ConfigurationError(format!(
                "tag `{name}` is already registered"
            )));
        }
        self.tags.insert(name.to_string(), tag);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CustomTag>> {
        self.tags.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl CustomTag for Noop {
        async fn render(
            &self,
            _attrs: IndexMap<String, Value>,
            _scope: Scope,
            _cx: &TagContext<'_>,
        ) -> StencilResult<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TagRegistry::new();
        registry.register("noop", Noop).unwrap();
        assert!(registry.contains("noop"));
        assert_eq!(registry.len(), 1);
        let tag = registry.get("noop").unwrap();
        assert!(!tag.unary());
        assert_eq!(tag.attr_name(), "default");
        assert!(!tag.no_attr());
    }

    #[test]
    fn test_register_rejects_builtin_names() {
        let mut registry = TagRegistry::new();
        for name in ["if", "endfor", "include", "elif"] {
            let err = registry.register(name, Noop).unwrap_err();
            assert!(matches!(err, StencilError::ConfigurationError(_)));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_rejects_duplicates_and_bad_names() {
        let mut registry = TagRegistry::new();
        registry.register("card", Noop).unwrap();
        assert!(registry.register("card", Noop).is_err());
        assert!(registry.register("", Noop).is_err());
        assert!(registry.register("two words", Noop).is_err());
    }
}
