//! Template parser.
//!
//! Converts the lexer's [`Token`] stream into a tree of [`Node`]s plus the
//! per-template macro and block tables. Open block tags live on an explicit
//! stack; a closing tag pops back to its opener, and tags left open are
//! closed with a warning.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use stencil_core::error::{SourceSpan, StencilError, StencilResult};
use stencil_core::logging::WARNING_TARGET;

use crate::expr::{
    compile_attributes, compile_expression, compile_filter_chain, compile_macro_signature,
    AttributeList, Expression, FilterChain, MacroParam,
};
use crate::lexer::{tag_name, Lexer, Syntax, TagToken, Token};
use crate::tags::{CustomTag, TagRegistry};

/// A node in the parsed template tree.
pub enum Node {
    /// A literal text segment.
    Text(String),
    /// A `{{ expression }}` interpolation.
    Variable(Expression),
    /// An `if` chain: `(condition, body)` per `if`/`elseif`, then `else`.
    If {
        branches: Vec<(Expression, Vec<Node>)>,
        else_body: Option<Vec<Node>>,
    },
    /// `{% for value[, key] in source %}`.
    For {
        value: String,
        key: Option<String>,
        source: Expression,
        body: Vec<Node>,
    },
    /// `{% set key = value %}`.
    Set { key: String, value: Expression },
    /// The verbatim contents of a `raw` region.
    Raw(String),
    /// `{% block name %}`. The body is shared with the block table.
    Block { name: String, body: Arc<Vec<Node>> },
    /// `{% include url key=expr ... %}`. The url is stored under `url`.
    Include { attributes: AttributeList },
    /// `{% import url [as alias] %}`.
    Import {
        url: Expression,
        alias: Option<String>,
    },
    /// `{% filter chain %}...{% endfilter %}`.
    Filter { chain: FilterChain, body: Vec<Node> },
    /// A registered custom tag.
    Custom {
        name: String,
        tag: Arc<dyn CustomTag>,
        attributes: Option<AttributeList>,
        body: Vec<Node>,
        span: SourceSpan,
    },
}

/// A macro definition.
pub struct Macro {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: Vec<Node>,
}

/// A compiled template.
pub struct Template {
    name: String,
    source: Arc<str>,
    nodes: Vec<Node>,
    macros: HashMap<String, Arc<Macro>>,
    blocks: HashMap<String, Arc<Vec<Node>>>,
    extends: Option<Expression>,
    warnings: Vec<String>,
}

impl Template {
    /// Compiles `source`. `name` is the identity used in diagnostics.
    pub fn compile(
        name: &str,
        source: &str,
        syntax: &Syntax,
        tags: &TagRegistry,
    ) -> StencilResult<Self> {
        TreeBuilder::new(name, tags)
            .build(source, syntax)
            .map_err(|e| e.locate(Some(name), source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub const fn macros(&self) -> &HashMap<String, Arc<Macro>> {
        &self.macros
    }

    pub fn macro_named(&self, name: &str) -> Option<&Arc<Macro>> {
        self.macros.get(name)
    }

    pub fn block(&self, name: &str) -> Option<&Arc<Vec<Node>>> {
        self.blocks.get(name)
    }

    pub const fn extends(&self) -> Option<&Expression> {
        self.extends.as_ref()
    }

    /// Non-fatal problems found while compiling.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Attaches this template's identity and snippet to an error.
    pub fn locate(&self, err: StencilError) -> StencilError {
        err.locate(Some(&self.name), &self.source)
    }
}

enum OpenKind {
    Root,
    If {
        branches: Vec<(Expression, Vec<Node>)>,
        condition: Option<Expression>,
        in_else: bool,
    },
    For {
        value: String,
        key: Option<String>,
        source: Expression,
    },
    Raw,
    Macro {
        name: String,
        params: Vec<MacroParam>,
    },
    Block {
        name: String,
    },
    Filter {
        chain: FilterChain,
    },
    Custom {
        name: String,
        tag: Arc<dyn CustomTag>,
        attributes: Option<AttributeList>,
        span: SourceSpan,
    },
}

/// The most recent entry of a node list, as seen by whitespace control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Last {
    Nothing,
    Text,
    Element,
}

/// An open tag collecting its children.
struct OpenTag {
    tag: String,
    kind: OpenKind,
    nodes: Vec<Node>,
    last: Last,
}

impl OpenTag {
    const fn new(tag: String, kind: OpenKind) -> Self {
        Self {
            tag,
            kind,
            nodes: Vec::new(),
            last: Last::Nothing,
        }
    }
}

/// Whitespace removed around elements (tags, variables and comments).
///
/// `trim_blocks` wins when both flags are set. Text following an element
/// in the same node list loses its head; text preceding one loses its tail.
#[derive(Debug, Clone, Copy, Default)]
struct Whitespace {
    trim_blocks: bool,
    lstrip_blocks: bool,
}

impl Whitespace {
    const fn from_syntax(syntax: &Syntax) -> Self {
        Self {
            trim_blocks: syntax.trim_blocks,
            lstrip_blocks: syntax.lstrip_blocks,
        }
    }

    /// Strips `^ *\r?\n` (`trim_blocks`) or all leading whitespace.
    fn trim_head<'t>(self, text: &'t str) -> &'t str {
        if self.trim_blocks {
            let rest = text.trim_start_matches(' ');
            rest.strip_prefix("\r\n")
                .or_else(|| rest.strip_prefix('\n'))
                .unwrap_or(text)
        } else if self.lstrip_blocks {
            text.trim_start()
        } else {
            text
        }
    }

    /// Strips `\r?\n *$` (`trim_blocks`) or all trailing whitespace.
    fn trim_tail(self, text: &mut String) {
        let keep = if self.trim_blocks {
            let rest = text.trim_end_matches(' ');
            match rest.strip_suffix('\n') {
                Some(rest) => rest.strip_suffix('\r').unwrap_or(rest).len(),
                None => return,
            }
        } else if self.lstrip_blocks {
            text.trim_end().len()
        } else {
            return;
        };
        text.truncate(keep);
    }
}

fn for_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\w+)(?:\s*,\s*(\w+))?\s+in\s+([\s\S]+)$").expect("valid regex")
    })
}

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([\s\S]+?)\s+as\s+(\w+)$").expect("valid regex"))
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && tag_name(s) == s && !s.starts_with(|c: char| c.is_ascii_digit())
}

struct TreeBuilder<'a> {
    name: &'a str,
    tags: &'a TagRegistry,
    stack: Vec<OpenTag>,
    macros: HashMap<String, Arc<Macro>>,
    blocks: HashMap<String, Arc<Vec<Node>>>,
    extends: Option<Expression>,
    warnings: Vec<String>,
    whitespace: Whitespace,
}

impl<'a> TreeBuilder<'a> {
    fn new(name: &'a str, tags: &'a TagRegistry) -> Self {
        Self {
            name,
            tags,
            stack: vec![OpenTag::new(String::new(), OpenKind::Root)],
            macros: HashMap::new(),
            blocks: HashMap::new(),
            extends: None,
            warnings: Vec::new(),
            whitespace: Whitespace::default(),
        }
    }

    fn build(mut self, source: &str, syntax: &Syntax) -> StencilResult<Template> {
        self.whitespace = Whitespace::from_syntax(syntax);
        for token in Lexer::new(source, syntax) {
            match token {
                Token::Text(text) => self.push_text(text),
                Token::Comment(_) => self.mark_element(),
                Token::Variable(tag) => {
                    let (content, offset) = tag.trimmed();
                    let expr = compile_expression(content, offset)?;
                    self.push_element(Node::Variable(expr));
                }
                Token::Block(tag) => self.handle_tag(&tag)?,
            }
        }

        while self.stack.len() > 1 {
            self.warn_unclosed();
            self.close_top();
        }
        let nodes = self.stack.pop().map(|root| root.nodes).unwrap_or_default();

        tracing::trace!(
            template = self.name,
            nodes = nodes.len(),
            macros = self.macros.len(),
            blocks = self.blocks.len(),
            "compiled template"
        );
        Ok(Template {
            name: self.name.to_string(),
            source: Arc::from(source),
            nodes,
            macros: self.macros,
            blocks: self.blocks,
            extends: self.extends,
            warnings: self.warnings,
        })
    }

    fn current(&mut self) -> &mut OpenTag {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn push_text(&mut self, text: String) {
        let whitespace = self.whitespace;
        let top = self.current();
        if top.last == Last::Text {
            if let Some(Node::Text(previous)) = top.nodes.last_mut() {
                previous.push_str(&text);
                return;
            }
        }
        let text = if top.last == Last::Element {
            whitespace.trim_head(&text).to_string()
        } else {
            text
        };
        top.nodes.push(Node::Text(text));
        top.last = Last::Text;
    }

    /// Records an element in the current node list, trimming the text
    /// right before it.
    fn mark_element(&mut self) {
        let whitespace = self.whitespace;
        let top = self.current();
        if top.last == Last::Text {
            if let Some(Node::Text(previous)) = top.nodes.last_mut() {
                whitespace.trim_tail(previous);
            }
        }
        top.last = Last::Element;
    }

    fn push_element(&mut self, node: Node) {
        self.mark_element();
        self.push_node(node);
    }

    /// Attaches a finished node without whitespace control.
    fn push_node(&mut self, node: Node) {
        self.current().nodes.push(node);
    }

    fn open(&mut self, tag: &str, kind: OpenKind) {
        self.mark_element();
        self.stack.push(OpenTag::new(tag.to_string(), kind));
    }

    fn warn_unclosed(&mut self) {
        let tag = self.stack.last().map(|open| open.tag.clone()).unwrap_or_default();
        let message = format!("`{tag}` was not closed");
        tracing::warn!(target: WARNING_TARGET, template = self.name, "{message}");
        self.warnings.push(message);
    }

    /// Pops the top open tag and attaches the finished node to its parent.
    fn close_top(&mut self) {
        let Some(open) = self.stack.pop() else { return };
        if matches!(open.kind, OpenKind::Root) {
            self.stack.push(open);
            return;
        }
        let node = match open.kind {
            OpenKind::Root => return,
            OpenKind::If {
                mut branches,
                condition,
                in_else,
            } => {
                let mut else_body = None;
                if in_else {
                    else_body = Some(open.nodes);
                } else if let Some(condition) = condition {
                    branches.push((condition, open.nodes));
                }
                Node::If {
                    branches,
                    else_body,
                }
            }
            OpenKind::For { value, key, source } => Node::For {
                value,
                key,
                source,
                body: open.nodes,
            },
            OpenKind::Raw => {
                let text = open
                    .nodes
                    .into_iter()
                    .filter_map(|node| match node {
                        Node::Text(text) => Some(text),
                        _ => None,
                    })
                    .collect();
                Node::Raw(text)
            }
            OpenKind::Macro { name, params } => {
                let definition = Macro {
                    name: name.clone(),
                    params,
                    body: open.nodes,
                };
                self.macros.insert(name, Arc::new(definition));
                return;
            }
            OpenKind::Block { name } => {
                let body = Arc::new(open.nodes);
                self.blocks.insert(name.clone(), Arc::clone(&body));
                Node::Block { name, body }
            }
            OpenKind::Filter { chain } => Node::Filter {
                chain,
                body: open.nodes,
            },
            OpenKind::Custom {
                name,
                tag,
                attributes,
                span,
            } => Node::Custom {
                name,
                tag,
                attributes,
                body: open.nodes,
                span,
            },
        };
        self.push_node(node);
    }

    fn handle_tag(&mut self, token: &TagToken) -> StencilResult<()> {
        let (content, offset) = token.trimmed();
        let name = tag_name(content);
        let rest = &content[name.len()..];
        let args = rest.trim_start();
        let args_offset = offset + name.len() + (rest.len() - args.len());
        let error = |message: String| StencilError::syntax_at(message, content, token.span);

        match name {
            "if" => {
                if args.is_empty() {
                    return Err(error("`if` requires a condition".into()));
                }
                let condition = compile_expression(args, args_offset)?;
                self.open(
                    "if",
                    OpenKind::If {
                        branches: Vec::new(),
                        condition: Some(condition),
                        in_else: false,
                    },
                );
            }
            "elseif" | "elif" => {
                if args.is_empty() {
                    return Err(error(format!("`{name}` requires a condition")));
                }
                let condition = compile_expression(args, args_offset)?;
                self.enter_if_chain(name, content, token.span)?;
                self.mark_element();
                self.next_branch(Some(condition), name, content, token.span)?;
            }
            "else" => {
                self.enter_if_chain(name, content, token.span)?;
                self.mark_element();
                self.next_branch(None, name, content, token.span)?;
            }
            "for" => {
                let captures = for_pattern()
                    .captures(args)
                    .ok_or_else(|| error("`for` expects `item[, key] in expression`".into()))?;
                let source = captures
                    .get(3)
                    .ok_or_else(|| error("`for` requires a source".into()))?;
                let value = captures.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
                let key = captures.get(2).map(|m| m.as_str().to_string());
                let source = compile_expression(source.as_str(), args_offset + source.start())?;
                self.open("for", OpenKind::For { value, key, source });
            }
            "set" => {
                let Some(eq) = args.find('=') else {
                    return Err(error("`set` expects `name = expression`".into()));
                };
                let key = args[..eq].trim();
                if !is_identifier(key) {
                    return Err(error(format!("invalid variable name `{key}`")));
                }
                let value_text = &args[eq + 1..];
                let value_trimmed = value_text.trim_start();
                let value_offset = args_offset + eq + 1 + (value_text.len() - value_trimmed.len());
                let value = compile_expression(value_trimmed, value_offset)?;
                self.push_element(Node::Set {
                    key: key.to_string(),
                    value,
                });
            }
            "raw" => self.open("raw", OpenKind::Raw),
            "macro" => {
                if args.is_empty() {
                    return Err(error("`macro` requires a name".into()));
                }
                let signature = compile_macro_signature(args, args_offset)?;
                self.open(
                    "macro",
                    OpenKind::Macro {
                        name: signature.name,
                        params: signature.params,
                    },
                );
            }
            "extends" => {
                if args.is_empty() {
                    return Err(error("`extends` requires a template".into()));
                }
                if self.extends.is_some() {
                    return Err(error("a template can only extend one parent".into()));
                }
                self.extends = Some(compile_expression(args, args_offset)?);
                self.mark_element();
            }
            "block" => {
                let block_name = tag_name(args);
                if block_name.is_empty() {
                    return Err(error("`block` requires a name".into()));
                }
                if block_name.len() != args.len() {
                    return Err(error(format!(
                        "unexpected `{}` after block name",
                        args[block_name.len()..].trim()
                    )));
                }
                self.open(
                    "block",
                    OpenKind::Block {
                        name: block_name.to_string(),
                    },
                );
            }
            "include" => {
                if args.is_empty() {
                    return Err(error("`include` requires a template".into()));
                }
                let attributes = compile_attributes(args, args_offset, "url")?;
                if attributes.get("url").is_none() {
                    return Err(error("`include` requires a template".into()));
                }
                self.push_element(Node::Include { attributes });
            }
            "import" => {
                if args.is_empty() {
                    return Err(error("`import` requires a template".into()));
                }
                let (url_text, alias) = match import_pattern().captures(args) {
                    Some(captures) => (
                        captures.get(1).map_or(args, |m| m.as_str()),
                        captures.get(2).map(|m| m.as_str().to_string()),
                    ),
                    None => (args, None),
                };
                let url = compile_expression(url_text, args_offset)?;
                self.push_element(Node::Import { url, alias });
            }
            "filter" => {
                if args.is_empty() {
                    return Err(error("`filter` requires a filter name".into()));
                }
                let chain = compile_filter_chain(args, args_offset)?;
                self.open("filter", OpenKind::Filter { chain });
            }
            _ => {
                if let Some(tag) = self.tags.get(name) {
                    let tag = Arc::clone(tag);
                    let attributes = if tag.no_attr() || args.is_empty() {
                        None
                    } else {
                        Some(compile_attributes(args, args_offset, tag.attr_name())?)
                    };
                    if tag.unary() {
                        self.push_element(Node::Custom {
                            name: name.to_string(),
                            tag,
                            attributes,
                            body: Vec::new(),
                            span: token.span,
                        });
                    } else {
                        self.open(
                            name,
                            OpenKind::Custom {
                                name: name.to_string(),
                                tag,
                                attributes,
                                span: token.span,
                            },
                        );
                    }
                } else if let Some(target) = name.strip_prefix("end").filter(|t| !t.is_empty()) {
                    self.close(target, content, token.span)?;
                } else if name.is_empty() {
                    return Err(error("tag name required".into()));
                } else {
                    return Err(error(format!("unknown tag `{name}`")));
                }
            }
        }
        Ok(())
    }

    /// Closes tags opened inside the nearest `if` so that a branch tag
    /// attaches to it.
    fn enter_if_chain(&mut self, name: &str, content: &str, span: SourceSpan) -> StencilResult<()> {
        let Some(index) = self
            .stack
            .iter()
            .rposition(|open| matches!(open.kind, OpenKind::If { .. }))
        else {
            return Err(StencilError::syntax_at(
                format!("`{name}` without `if`"),
                content,
                span,
            ));
        };
        while self.stack.len() - 1 > index {
            self.warn_unclosed();
            self.close_top();
        }
        Ok(())
    }

    /// Ends the current branch of the `if` on top of the stack and starts
    /// an `elseif` (with a condition) or the `else` branch.
    fn next_branch(
        &mut self,
        condition: Option<Expression>,
        name: &str,
        content: &str,
        span: SourceSpan,
    ) -> StencilResult<()> {
        let open = self.current();
        let OpenKind::If {
            branches,
            condition: current,
            in_else,
        } = &mut open.kind
        else {
            return Err(StencilError::syntax_at(
                format!("`{name}` without `if`"),
                content,
                span,
            ));
        };
        if *in_else {
            return Err(StencilError::syntax_at(
                format!("`{name}` after `else`"),
                content,
                span,
            ));
        }
        let body = std::mem::take(&mut open.nodes);
        open.last = Last::Nothing;
        if let Some(previous) = current.take() {
            branches.push((previous, body));
        }
        match condition {
            Some(condition) => *current = Some(condition),
            None => *in_else = true,
        }
        Ok(())
    }

    /// Handles `end<target>`: pops back to the nearest open `target`.
    fn close(&mut self, target: &str, content: &str, span: SourceSpan) -> StencilResult<()> {
        let Some(index) = self.stack.iter().rposition(|open| open.tag == target) else {
            return Err(StencilError::syntax_at(
                format!("unexpected `end{target}`"),
                content,
                span,
            ));
        };
        while self.stack.len() - 1 > index {
            self.warn_unclosed();
            self.close_top();
        }
        self.close_top();
        Ok(())
    }
}
