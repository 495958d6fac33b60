//! Expression compiler.
//!
//! Tag payloads and `{{ }}` interpolations are parsed once into an [`Expr`]
//! tree and classified into an [`Expression`]:
//!
//! - a literal (`"a"`, `1`, `true`, `null`) evaluates without touching the scope;
//! - a bare property path (`user.name`, `items[0]`) is resolved structurally;
//! - anything else is evaluated by the expression VM in [`crate::eval`].
//!
//! A trailing `| name(args)` chain is split off as the filter chain; `safe`
//! only sets the [`Expression::safe`] flag. Besides full expressions this
//! module parses the attribute lists of `include` and custom tags, filter
//! chains of `{% filter %}` blocks, and macro signatures.

use std::fmt;
use std::sync::Arc;

use stencil_core::error::{SourceSpan, StencilError, StencilResult};

use crate::context::{RegexValue, Value};

/// One step of a [`PropertyPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(i64),
}

impl PathSegment {
    /// Applies this step to an owned value.
    pub fn apply(&self, value: &Value) -> Value {
        match self {
            Self::Key(key) => value.get_member(key),
            Self::Index(index) => value.get_item(&Value::Integer(*index)),
        }
    }
}

/// A static lookup chain: `name(.name | [literal])*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    pub root: String,
    pub segments: Vec<PathSegment>,
}

impl PropertyPath {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            segments: Vec::new(),
        }
    }

    /// Resolves the path against a scope. Missing links yield `Undefined`.
    pub fn resolve(&self, scope: &crate::context::Scope) -> Value {
        let Some(mut current) = scope.resolve(&self.root) else {
            return Value::Undefined;
        };
        for (i, segment) in self.segments.iter().enumerate() {
            let next = match (current, segment) {
                (Value::Map(map), PathSegment::Key(key)) => map.get(key),
                (Value::List(items), PathSegment::Index(index)) => {
                    usize::try_from(*index).ok().and_then(|i| items.get(i))
                }
                _ => {
                    // Computed members (`length`, string indexing) leave the borrowed walk.
                    let mut value = segment.apply(current);
                    for segment in &self.segments[i + 1..] {
                        value = segment.apply(&value);
                    }
                    return value;
                }
            };
            match next {
                Some(value) => current = value,
                None => return Value::Undefined,
            }
        }
        current.clone()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    Le,
    Ge,
    In,
}

/// A filter application: `name(args)`.
#[derive(Debug, Clone)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub span: SourceSpan,
}

/// A piece of a backtick template literal.
#[derive(Debug, Clone)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

/// A parsed expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Path(PropertyPath),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: PropertyPath,
        args: Vec<Expr>,
        span: SourceSpan,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Template(Vec<TemplatePart>),
    /// A parenthesised expression with its own filter chain.
    Filtered {
        input: Box<Expr>,
        filters: Vec<FilterCall>,
    },
}

/// How an [`Expression`] is evaluated.
#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Literal(Value),
    Path(PropertyPath),
    Dynamic(Expr),
}

/// A compiled expression with its filter chain.
#[derive(Debug, Clone)]
pub struct Expression {
    /// The source text, filters included.
    pub raw: String,
    /// Position of `raw` in the template source.
    pub span: SourceSpan,
    pub kind: ExpressionKind,
    pub filters: Vec<FilterCall>,
    /// Set by the `safe` pseudo-filter: the result is not HTML-escaped.
    pub safe: bool,
}

impl Expression {
    fn new(raw: &str, span: SourceSpan, expr: Expr, filters: Vec<FilterCall>) -> Self {
        let safe = filters.iter().any(|f| f.name == "safe");
        let filters = filters.into_iter().filter(|f| f.name != "safe").collect();
        let kind = match expr {
            Expr::Literal(value) => ExpressionKind::Literal(value),
            Expr::Path(path) => ExpressionKind::Path(path),
            other => ExpressionKind::Dynamic(other),
        };
        Self {
            raw: raw.to_string(),
            span,
            kind,
            filters,
            safe,
        }
    }

    /// Returns the callee and arguments when the expression (filters aside)
    /// is a bare call such as `button("ok")` or `forms.input(name)`.
    pub fn as_call(&self) -> Option<(&PropertyPath, &[Expr])> {
        match &self.kind {
            ExpressionKind::Dynamic(Expr::Call { callee, args, .. }) => Some((callee, args)),
            _ => None,
        }
    }

    pub const fn is_literal(&self) -> bool {
        matches!(self.kind, ExpressionKind::Literal(_))
    }

    pub const fn is_path(&self) -> bool {
        matches!(self.kind, ExpressionKind::Path(_))
    }
}

/// The payload of a `{% filter %}` block: `name(args) | name2 ...`.
#[derive(Debug, Clone)]
pub struct FilterChain {
    pub raw: String,
    pub span: SourceSpan,
    pub filters: Vec<FilterCall>,
}

/// An ordered `key = expression` list. A leading bare expression is stored
/// under the default key.
#[derive(Debug, Clone)]
pub struct AttributeList {
    pub entries: Vec<(String, Expression)>,
}

impl AttributeList {
    pub fn get(&self, key: &str) -> Option<&Expression> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }
}

/// A macro parameter with its optional default.
#[derive(Debug, Clone)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Expr>,
}

/// A parsed `name(param, param = default, ...)` signature.
#[derive(Debug, Clone)]
pub struct MacroSignature {
    pub name: String,
    pub params: Vec<MacroParam>,
}

// ============================================================
// Tokenizer
// ============================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Str(String),
    Template(String),
    Int(i64),
    Float(f64),
    Ident(String),
    Regex(String, String),
    Punct(&'static str),
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    span: SourceSpan,
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "=",
    "(", ")", "[", "]", "{", "}", ",", ":", "?", ".", "|",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

struct Tokenizer<'a> {
    text: &'a str,
    base: usize,
    pos: usize,
    tokens: Vec<Spanned>,
}

impl<'a> Tokenizer<'a> {
    fn error(&self, message: impl Into<String>, start: usize, end: usize) -> StencilError {
        StencilError::syntax_at(
            message,
            self.text,
            SourceSpan::new(self.base + start, self.base + end),
        )
    }

    fn push(&mut self, tok: Tok, start: usize) {
        self.tokens.push(Spanned {
            tok,
            span: SourceSpan::new(self.base + start, self.base + self.pos),
        });
    }

    fn peek_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    /// `r/` starts a regex only where an operand is expected.
    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.tok) {
            None => true,
            Some(Tok::Punct(p)) => !matches!(*p, ")" | "]" | "}"),
            Some(_) => false,
        }
    }

    fn run(mut self) -> StencilResult<Vec<Spanned>> {
        while let Some(c) = self.peek_char() {
            let start = self.pos;
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if c == '\'' || c == '"' {
                let s = self.read_string(c)?;
                self.push(Tok::Str(s), start);
            } else if c == '`' {
                let s = self.read_template()?;
                self.push(Tok::Template(s), start);
            } else if c.is_ascii_digit() {
                let tok = self.read_number();
                self.push(tok, start);
            } else if c == 'r' && self.text[self.pos..].starts_with("r/") && self.regex_allowed() {
                let tok = self.read_regex()?;
                self.push(tok, start);
            } else if is_ident_start(c) {
                let rest = &self.text[self.pos..];
                let len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
                let word = &rest[..len];
                self.pos += len;
                let tok = match word {
                    "and" => Tok::Punct("&&"),
                    "or" => Tok::Punct("||"),
                    "not" => Tok::Punct("!"),
                    _ => Tok::Ident(word.to_string()),
                };
                self.push(tok, start);
            } else if let Some(p) = PUNCTUATION
                .iter()
                .find(|p| self.text[self.pos..].starts_with(**p))
            {
                self.pos += p.len();
                self.push(Tok::Punct(*p), start);
            } else {
                return Err(self.error(
                    format!("unexpected character `{c}`"),
                    start,
                    start + c.len_utf8(),
                ));
            }
        }
        Ok(self.tokens)
    }

    fn read_string(&mut self, quote: char) -> StencilResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.text[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else { break };
                    out.push(unescape(escaped));
                }
                c if c == quote => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                c => out.push(c),
            }
        }
        Err(self.error("unterminated string literal", start, self.text.len()))
    }

    /// Reads a backtick literal, returning its raw inner text.
    fn read_template(&mut self) -> StencilResult<String> {
        let start = self.pos;
        let inner_start = self.pos + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut chars = self.text[inner_start..].char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    chars.next();
                }
                _ if quote == Some(c) => quote = None,
                _ if quote.is_some() => {}
                '\'' | '"' if depth > 0 => quote = Some(c),
                '$' if depth == 0 && chars.peek().is_some_and(|&(_, n)| n == '{') => {
                    chars.next();
                    depth = 1;
                }
                '{' if depth > 0 => depth += 1,
                '}' if depth > 0 => depth -= 1,
                '`' if depth == 0 => {
                    let raw = self.text[inner_start..inner_start + i].to_string();
                    self.pos = inner_start + i + 1;
                    return Ok(raw);
                }
                _ => {}
            }
        }
        Err(self.error("unterminated template literal", start, self.text.len()))
    }

    fn read_number(&mut self) -> Tok {
        let rest = &self.text[self.pos..];
        let bytes = rest.as_bytes();
        let mut len = 0;
        let mut is_float = false;
        while len < bytes.len() && bytes[len].is_ascii_digit() {
            len += 1;
        }
        if len + 1 < bytes.len() && bytes[len] == b'.' && bytes[len + 1].is_ascii_digit() {
            is_float = true;
            len += 1;
            while len < bytes.len() && bytes[len].is_ascii_digit() {
                len += 1;
            }
        }
        if len < bytes.len() && (bytes[len] == b'e' || bytes[len] == b'E') {
            let mut exp = len + 1;
            if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
                exp += 1;
            }
            if exp < bytes.len() && bytes[exp].is_ascii_digit() {
                is_float = true;
                len = exp;
                while len < bytes.len() && bytes[len].is_ascii_digit() {
                    len += 1;
                }
            }
        }
        let literal = &rest[..len];
        self.pos += len;
        if !is_float {
            if let Ok(i) = literal.parse::<i64>() {
                return Tok::Int(i);
            }
        }
        Tok::Float(literal.parse().unwrap_or(f64::NAN))
    }

    fn read_regex(&mut self) -> StencilResult<Tok> {
        let start = self.pos;
        let body_start = self.pos + 2;
        let mut in_class = false;
        let mut chars = self.text[body_start..].char_indices();
        let mut body_end = None;
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    chars.next();
                }
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => {
                    body_end = Some(body_start + i);
                    break;
                }
                _ => {}
            }
        }
        let Some(body_end) = body_end else {
            return Err(self.error("unterminated regex literal", start, self.text.len()));
        };
        let pattern = self.text[body_start..body_end].to_string();
        let flags_start = body_end + 1;
        let flags_len = self.text[flags_start..]
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(self.text.len() - flags_start);
        let flags = self.text[flags_start..flags_start + flags_len].to_string();
        self.pos = flags_start + flags_len;
        Ok(Tok::Regex(pattern, flags))
    }
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

fn tokenize(text: &str, base: usize) -> StencilResult<Vec<Spanned>> {
    Tokenizer {
        text,
        base,
        pos: 0,
        tokens: Vec::new(),
    }
    .run()
}

fn compile_regex(pattern: &str, flags: &str, raw: &str, span: SourceSpan) -> StencilResult<Value> {
    let mut builder = regex::RegexBuilder::new(pattern);
    let mut global = false;
    for flag in flags.chars() {
        match flag {
            'g' => global = true,
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            other => {
                return Err(StencilError::syntax_at(
                    format!("unsupported regex flag `{other}`"),
                    raw,
                    span,
                ))
            }
        }
    }
    let regex = builder
        .build()
        .map_err(|e| StencilError::syntax_at(format!("invalid regex: {e}"), raw, span))?;
    Ok(Value::Regex(Arc::new(RegexValue {
        regex,
        global,
        source: pattern.to_string(),
        flags: flags.to_string(),
    })))
}

// ============================================================
// Parser
// ============================================================

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    /// The full expression text, reported as `raw` in errors.
    raw: &'a str,
    /// Byte offset of `raw` in the template source.
    base: usize,
}

type ParseResult<T> = StencilResult<T>;

impl<'a> Parser<'a> {
    const fn new(tokens: &'a [Spanned], raw: &'a str, base: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            raw,
            base,
        }
    }

    fn peek(&self) -> Option<&'a Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn current_span(&self) -> SourceSpan {
        self.tokens.get(self.pos).map_or_else(
            || {
                let end = self.base + self.raw.len();
                SourceSpan::new(end, end)
            },
            |t| t.span,
        )
    }

    fn previous_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(self.base, |t| t.span.end)
    }

    fn error(&self, message: impl Into<String>) -> StencilError {
        StencilError::syntax_at(message, self.raw, self.current_span())
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(q)) if *q == p)
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(w)) if w == word)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> ParseResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{p}`")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<String> {
        match self.peek() {
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                Ok(name.clone())
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn expect_end(&self) -> ParseResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected token"))
        }
    }

    /// `value [if condition [else alternative]]`
    fn parse_expression(&mut self) -> ParseResult<Expr> {
        let value = self.parse_ternary()?;
        if !self.is_ident("if") {
            return Ok(value);
        }
        self.pos += 1;
        let condition = self.parse_or()?;
        let otherwise = if self.is_ident("else") {
            self.pos += 1;
            self.parse_ternary()?
        } else {
            Expr::Literal(Value::from(""))
        };
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(value),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.parse_or()?;
        if !self.eat_punct("?") {
            return Ok(condition);
        }
        let then = self.parse_ternary()?;
        self.expect_punct(":")?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat_punct("&&") {
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary_op(&self, table: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
        match self.peek() {
            Some(Tok::Punct(p)) => table.iter().find(|(q, _)| q == p).map(|(_, op)| *op),
            Some(Tok::Ident(w)) => table.iter().find(|(q, _)| q == w).map(|(_, op)| *op),
            _ => None,
        }
    }

    fn parse_binary_level(
        &mut self,
        table: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        while let Some(op) = self.binary_op(table) {
            self.pos += 1;
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNotEq),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::NotEq),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
                ("in", BinaryOp::In),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else {
            return self.parse_postfix();
        };
        let operand = self.parse_unary()?;
        Ok(match (op, operand) {
            (UnaryOp::Neg, Expr::Literal(Value::Integer(i))) if i != i64::MIN => {
                Expr::Literal(Value::Integer(-i))
            }
            (UnaryOp::Neg, Expr::Literal(Value::Float(f))) => Expr::Literal(Value::Float(-f)),
            (op, operand) => Expr::Unary {
                op,
                operand: Box::new(operand),
            },
        })
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let segment = match self.peek() {
                    Some(Tok::Ident(name)) => PathSegment::Key(name.clone()),
                    Some(Tok::Int(i)) => PathSegment::Index(*i),
                    _ => return Err(self.error("expected property name after `.`")),
                };
                self.pos += 1;
                expr = match (expr, segment) {
                    (Expr::Path(mut path), segment) => {
                        path.segments.push(segment);
                        Expr::Path(path)
                    }
                    (object, PathSegment::Key(property)) => Expr::Member {
                        object: Box::new(object),
                        property,
                    },
                    (object, PathSegment::Index(i)) => Expr::Index {
                        object: Box::new(object),
                        index: Box::new(Expr::Literal(Value::Integer(i))),
                    },
                };
            } else if self.eat_punct("[") {
                let index = self.parse_expression()?;
                self.expect_punct("]")?;
                expr = match (expr, index) {
                    (Expr::Path(mut path), Expr::Literal(Value::String(key))) => {
                        path.segments.push(PathSegment::Key(key));
                        Expr::Path(path)
                    }
                    (Expr::Path(mut path), Expr::Literal(Value::Integer(i))) => {
                        path.segments.push(PathSegment::Index(i));
                        Expr::Path(path)
                    }
                    (object, index) => Expr::Index {
                        object: Box::new(object),
                        index: Box::new(index),
                    },
                };
            } else if self.is_punct("(") {
                let start = self.current_span().start;
                self.pos += 1;
                let args = self.parse_list(")")?;
                let span = SourceSpan::new(start, self.previous_end());
                expr = match expr {
                    Expr::Path(callee) => Expr::Call { callee, args, span },
                    _ => {
                        return Err(StencilError::syntax_at(
                            "only named functions can be called",
                            self.raw,
                            span,
                        ))
                    }
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Parses comma-separated expressions up to `close`, which is consumed.
    fn parse_list(&mut self, close: &str) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat_punct(close) {
            if self.at_end() {
                return Err(self.error(format!("expected `{close}`")));
            }
            items.push(self.parse_expression()?);
            if !self.eat_punct(",") && !self.is_punct(close) {
                return Err(self.error(format!("expected `,` or `{close}`")));
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let Some(token) = self.tokens.get(self.pos) else {
            return Err(self.error("unexpected end of expression"));
        };
        self.pos += 1;
        match &token.tok {
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
            Tok::Int(i) => Ok(Expr::Literal(Value::Integer(*i))),
            Tok::Float(f) => Ok(Expr::Literal(Value::Float(*f))),
            Tok::Regex(pattern, flags) => {
                compile_regex(pattern, flags, self.raw, token.span).map(Expr::Literal)
            }
            Tok::Template(raw) => self.parse_template(raw, token.span),
            Tok::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                "undefined" => Expr::Literal(Value::Undefined),
                "NaN" => Expr::Literal(Value::Float(f64::NAN)),
                _ => Expr::Path(PropertyPath::new(name.clone())),
            }),
            Tok::Punct("(") => {
                let inner = self.parse_expression()?;
                let filters = self.parse_filters()?;
                self.expect_punct(")")?;
                if filters.is_empty() {
                    Ok(inner)
                } else {
                    Ok(Expr::Filtered {
                        input: Box::new(inner),
                        filters,
                    })
                }
            }
            Tok::Punct("[") => self.parse_list("]").map(Expr::List),
            Tok::Punct("{") => self.parse_object(),
            _ => {
                self.pos -= 1;
                Err(self.error("unexpected token"))
            }
        }
    }

    fn parse_object(&mut self) -> ParseResult<Expr> {
        let mut entries = Vec::new();
        while !self.eat_punct("}") {
            let key = match self.peek() {
                Some(Tok::Ident(k) | Tok::Str(k)) => k.clone(),
                Some(Tok::Int(i)) => i.to_string(),
                _ => return Err(self.error("expected object key")),
            };
            self.pos += 1;
            self.expect_punct(":")?;
            entries.push((key, self.parse_expression()?));
            if !self.eat_punct(",") && !self.is_punct("}") {
                return Err(self.error("expected `,` or `}`"));
            }
        }
        Ok(Expr::Map(entries))
    }

    /// Splits a backtick literal into text and `${expr}` parts.
    fn parse_template(&self, raw: &str, span: SourceSpan) -> ParseResult<Expr> {
        let inner_base = span.start + 1;
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut chars = raw.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        text.push(unescape(escaped));
                    }
                }
                '$' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                    chars.next();
                    let expr_start = i + 2;
                    let mut depth = 1usize;
                    let mut expr_end = raw.len();
                    let mut quote: Option<char> = None;
                    while let Some((j, c)) = chars.next() {
                        if let Some(q) = quote {
                            if c == '\\' {
                                chars.next();
                            } else if c == q {
                                quote = None;
                            }
                            continue;
                        }
                        match c {
                            '\'' | '"' => quote = Some(c),
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    expr_end = j;
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    if !text.is_empty() {
                        parts.push(TemplatePart::Text(std::mem::take(&mut text)));
                    }
                    let source = &raw[expr_start..expr_end];
                    let tokens = tokenize(source, inner_base + expr_start)?;
                    let mut parser = Parser::new(&tokens, self.raw, inner_base + expr_start);
                    let expr = parser.parse_expression()?;
                    let filters = parser.parse_filters()?;
                    parser.expect_end()?;
                    parts.push(TemplatePart::Expr(if filters.is_empty() {
                        expr
                    } else {
                        Expr::Filtered {
                            input: Box::new(expr),
                            filters,
                        }
                    }));
                }
                c => text.push(c),
            }
        }
        if !text.is_empty() || parts.is_empty() {
            parts.push(TemplatePart::Text(text));
        }
        Ok(Expr::Template(parts))
    }

    /// Parses `| name(args)` segments.
    fn parse_filters(&mut self) -> ParseResult<Vec<FilterCall>> {
        let mut filters = Vec::new();
        while self.eat_punct("|") {
            filters.push(self.parse_filter_call()?);
        }
        Ok(filters)
    }

    fn parse_filter_call(&mut self) -> ParseResult<FilterCall> {
        let start = self.current_span().start;
        let name = self.expect_ident("filter name")?;
        let args = if self.eat_punct("(") {
            self.parse_list(")")?
        } else {
            Vec::new()
        };
        Ok(FilterCall {
            name,
            args,
            span: SourceSpan::new(start, self.previous_end()),
        })
    }

    /// Parses a complete expression with its filters, up to the end of the tokens.
    fn parse_full(&mut self) -> ParseResult<(Expr, Vec<FilterCall>)> {
        if self.at_end() {
            return Err(self.error("expression required"));
        }
        let expr = self.parse_expression()?;
        let filters = self.parse_filters()?;
        self.expect_end()?;
        Ok((expr, filters))
    }
}

// ============================================================
// Entry points
// ============================================================

/// Compiles an expression. `base` is the byte offset of `text` in the
/// template source, used for error spans.
pub fn compile_expression(text: &str, base: usize) -> StencilResult<Expression> {
    let tokens = tokenize(text, base)?;
    let mut parser = Parser::new(&tokens, text, base);
    let (expr, filters) = parser.parse_full()?;
    Ok(Expression::new(
        text,
        SourceSpan::new(base, base + text.len()),
        expr,
        filters,
    ))
}

/// Compiles the payload of a `{% filter %}` block.
pub fn compile_filter_chain(text: &str, base: usize) -> StencilResult<FilterChain> {
    let tokens = tokenize(text, base)?;
    let mut parser = Parser::new(&tokens, text, base);
    if parser.at_end() {
        return Err(parser.error("filter name required"));
    }
    let mut filters = vec![parser.parse_filter_call()?];
    filters.extend(parser.parse_filters()?);
    parser.expect_end()?;
    Ok(FilterChain {
        raw: text.to_string(),
        span: SourceSpan::new(base, base + text.len()),
        filters,
    })
}

/// Compiles `key = expr key2 = expr2 ...`, or a single bare expression
/// stored under `default_key`. A bare expression may also precede the
/// first `key =` pair.
pub fn compile_attributes(text: &str, base: usize, default_key: &str) -> StencilResult<AttributeList> {
    let tokens = tokenize(text, base)?;
    if tokens.is_empty() {
        return Err(StencilError::syntax_at(
            "attributes required",
            text,
            SourceSpan::new(base, base + text.len()),
        ));
    }

    let mut assignments = Vec::new();
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token.tok {
            Tok::Punct("(" | "[" | "{") => depth += 1,
            Tok::Punct(")" | "]" | "}") => depth = depth.saturating_sub(1),
            Tok::Punct("=") if depth == 0 => assignments.push(i),
            _ => {}
        }
    }

    let segment = |range: std::ops::Range<usize>| -> StencilResult<Expression> {
        let slice = &tokens[range];
        let (Some(first), Some(last)) = (slice.first(), slice.last()) else {
            return Err(StencilError::syntax_at(
                "attribute value required",
                text,
                SourceSpan::new(base, base + text.len()),
            ));
        };
        let raw = &text[first.span.start - base..last.span.end - base];
        let mut parser = Parser::new(slice, raw, first.span.start);
        let (expr, filters) = parser.parse_full()?;
        Ok(Expression::new(raw, SourceSpan::new(first.span.start, last.span.end), expr, filters))
    };

    let mut entries = Vec::new();
    let Some(&first_eq) = assignments.first() else {
        entries.push((default_key.to_string(), segment(0..tokens.len())?));
        return Ok(AttributeList { entries });
    };

    let key_at = |eq: usize| -> StencilResult<String> {
        match eq.checked_sub(1).map(|i| &tokens[i]) {
            Some(Spanned { tok: Tok::Ident(key), .. }) => Ok(key.clone()),
            _ => Err(StencilError::syntax_at(
                "expected attribute name before `=`",
                text,
                tokens[eq].span,
            )),
        }
    };

    if first_eq > 1 {
        entries.push((default_key.to_string(), segment(0..first_eq - 1)?));
    }
    for (n, &eq) in assignments.iter().enumerate() {
        let key = key_at(eq)?;
        let end = assignments.get(n + 1).map_or(tokens.len(), |next| next - 1);
        if end <= eq + 1 {
            return Err(StencilError::syntax_at(
                format!("missing value for attribute `{key}`"),
                text,
                tokens[eq].span,
            ));
        }
        entries.push((key, segment(eq + 1..end)?));
    }
    Ok(AttributeList { entries })
}

/// Compiles a macro signature: `name`, `name()` or `name(a, b = expr, ...)`.
pub fn compile_macro_signature(text: &str, base: usize) -> StencilResult<MacroSignature> {
    let tokens = tokenize(text, base)?;
    let mut parser = Parser::new(&tokens, text, base);
    let name = parser.expect_ident("macro name")?;
    let mut params = Vec::new();
    if parser.eat_punct("(") {
        while !parser.eat_punct(")") {
            let param = parser.expect_ident("parameter name")?;
            let default = if parser.eat_punct("=") {
                Some(parser.parse_expression()?)
            } else {
                None
            };
            params.push(MacroParam {
                name: param,
                default,
            });
            if !parser.eat_punct(",") && !parser.is_punct(")") {
                return Err(parser.error("expected `,` or `)`"));
            }
        }
    }
    parser.expect_end()?;
    Ok(MacroSignature { name, params })
}
