//! Template lexer (scanner).
//!
//! Converts raw template source text into a stream of [`Token`]s representing
//! text literals, variable interpolations (`{{ }}`), block tags (`{% %}`), and
//! comments (`{# #}`). Block and variable delimiters are configurable; the
//! comment delimiters are fixed.
//!
//! The lexer never fails. Malformed input degrades to literal text:
//!
//! - an unterminated comment swallows the rest of the input;
//! - a tag or variable opener with no closing delimiter, or whose content
//!   contains its own opener again, is emitted as literal text and scanning
//!   resumes right after the opener;
//! - inside `{% raw %}` everything is literal until an exact `endraw` tag.

use stencil_core::error::{SourceSpan, StencilResult};
use stencil_core::settings::{EngineSettings, COMMENT_END, COMMENT_START};

/// Delimiters used by the lexer, and the whitespace-control flags applied
/// when the token stream is built into a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    pub block_start: String,
    pub block_end: String,
    pub variable_start: String,
    pub variable_end: String,
    /// Remove the first newline after a block tag, and the trailing
    /// newline-plus-indentation before one.
    pub trim_blocks: bool,
    /// Strip all whitespace before a block tag and after its close.
    pub lstrip_blocks: bool,
}

impl Default for Syntax {
    fn default() -> Self {
        Self {
            block_start: "{%".to_string(),
            block_end: "%}".to_string(),
            variable_start: "{{".to_string(),
            variable_end: "}}".to_string(),
            trim_blocks: false,
            lstrip_blocks: false,
        }
    }
}

impl Syntax {
    /// Builds the lexer configuration from engine settings, validating the
    /// delimiters first.
    pub fn from_settings(settings: &EngineSettings) -> StencilResult<Self> {
        settings.validate()?;
        Ok(Self {
            block_start: settings.block_start.clone(),
            block_end: settings.block_end.clone(),
            variable_start: settings.variable_start.clone(),
            variable_end: settings.variable_end.clone(),
            trim_blocks: settings.trim_blocks,
            lstrip_blocks: settings.lstrip_blocks,
        })
    }
}

/// The content of a variable or block tag, with its position in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagToken {
    /// Everything between the delimiters, untrimmed.
    pub content: String,
    /// The whole tag, delimiters included.
    pub span: SourceSpan,
    /// Byte offset of `content` in the source.
    pub content_start: usize,
}

impl TagToken {
    /// Returns the trimmed content and its byte offset in the source.
    pub fn trimmed(&self) -> (&str, usize) {
        let leading = self.content.len() - self.content.trim_start().len();
        (self.content.trim(), self.content_start + leading)
    }

    /// Returns the tag name: the leading run of word characters.
    pub fn name(&self) -> &str {
        tag_name(&self.content)
    }
}

/// A token produced by the template lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A literal text segment.
    Text(String),
    /// A variable interpolation: `{{ expression }}`.
    Variable(TagToken),
    /// A block tag: `{% name payload %}`.
    Block(TagToken),
    /// A comment: `{# comment text #}`.
    Comment(String),
}

/// Returns the leading run of `[A-Za-z0-9_]` characters of trimmed tag content.
pub fn tag_name(content: &str) -> &str {
    let content = content.trim_start();
    let end = content
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(content.len());
    &content[..end]
}

/// Tokenizes a template source into a sequence of [`Token`]s.
pub fn tokenize(source: &str, syntax: &Syntax) -> Vec<Token> {
    Lexer::new(source, syntax).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagType {
    Variable,
    Block,
    Comment,
}

enum Scanned {
    Token(Token, usize),
    Literal,
}

/// A pull-based lexer over a template source.
///
/// Consecutive literal text (including openers demoted to text) is merged
/// into a single [`Token::Text`].
pub struct Lexer<'a> {
    source: &'a str,
    syntax: &'a Syntax,
    pos: usize,
    raw: bool,
    text: String,
    pending: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, syntax: &'a Syntax) -> Self {
        Self {
            source,
            syntax,
            pos: 0,
            raw: false,
            text: String::new(),
            pending: None,
        }
    }

    /// Returns `true` while the lexer is inside a `raw` region.
    pub const fn in_raw(&self) -> bool {
        self.raw
    }

    /// Finds the leftmost opener after the cursor. At equal positions the
    /// longer opener wins, so `<%=` is not shadowed by `<%`.
    fn find_next_open(&self) -> Option<(usize, TagType)> {
        let rest = &self.source[self.pos..];
        let all = [
            (self.syntax.block_start.as_str(), TagType::Block),
            (self.syntax.variable_start.as_str(), TagType::Variable),
            (COMMENT_START, TagType::Comment),
        ];
        let candidates = if self.raw { &all[..1] } else { &all[..] };

        let mut best: Option<(usize, usize, TagType)> = None;
        for &(opener, tag_type) in candidates {
            if let Some(at) = rest.find(opener) {
                let better = match best {
                    None => true,
                    Some((best_at, best_len, _)) => {
                        at < best_at || (at == best_at && opener.len() > best_len)
                    }
                };
                if better {
                    best = Some((at, opener.len(), tag_type));
                }
            }
        }
        best.map(|(at, _, tag_type)| (self.pos + at, tag_type))
    }

    fn scan_tag(&self, at: usize, tag_type: TagType) -> Scanned {
        let (open, close) = match tag_type {
            TagType::Comment => (COMMENT_START, COMMENT_END),
            TagType::Block => (self.syntax.block_start.as_str(), self.syntax.block_end.as_str()),
            TagType::Variable => (
                self.syntax.variable_start.as_str(),
                self.syntax.variable_end.as_str(),
            ),
        };
        let content_start = at + open.len();
        let rest = &self.source[content_start..];

        if tag_type == TagType::Comment {
            return match rest.find(close) {
                Some(end) => Scanned::Token(
                    Token::Comment(rest[..end].trim().to_string()),
                    content_start + end + close.len(),
                ),
                None => Scanned::Token(Token::Comment(rest.trim().to_string()), self.source.len()),
            };
        }

        let Some(end) = rest.find(close) else {
            return Scanned::Literal;
        };
        let content = &rest[..end];
        if content.contains(open) {
            return Scanned::Literal;
        }
        let next = content_start + end + close.len();
        let tag = TagToken {
            content: content.to_string(),
            span: SourceSpan::new(at, next),
            content_start,
        };

        if self.raw {
            // Only an exact `endraw` leaves raw mode.
            return if content.trim() == "endraw" {
                Scanned::Token(Token::Block(tag), next)
            } else {
                Scanned::Literal
            };
        }

        match tag_type {
            TagType::Variable => Scanned::Token(Token::Variable(tag), next),
            _ => Scanned::Token(Token::Block(tag), next),
        }
    }

    fn push_text(&mut self, chunk_end: usize) {
        self.text.push_str(&self.source[self.pos..chunk_end]);
    }

    fn emit(&mut self, token: Token) -> Token {
        if self.text.is_empty() {
            token
        } else {
            self.pending = Some(token);
            Token::Text(std::mem::take(&mut self.text))
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.pending.take() {
            return Some(token);
        }

        loop {
            if self.pos >= self.source.len() {
                if self.text.is_empty() {
                    return None;
                }
                return Some(Token::Text(std::mem::take(&mut self.text)));
            }

            let Some((at, tag_type)) = self.find_next_open() else {
                self.push_text(self.source.len());
                self.pos = self.source.len();
                continue;
            };

            self.push_text(at);
            match self.scan_tag(at, tag_type) {
                Scanned::Literal => {
                    let open_len = match tag_type {
                        TagType::Block => self.syntax.block_start.len(),
                        TagType::Variable => self.syntax.variable_start.len(),
                        TagType::Comment => COMMENT_START.len(),
                    };
                    self.text.push_str(&self.source[at..at + open_len]);
                    self.pos = at + open_len;
                }
                Scanned::Token(token, next) => {
                    self.pos = next;
                    if let Token::Block(tag) = &token {
                        match tag.name() {
                            "raw" => self.raw = true,
                            "endraw" => self.raw = false,
                            _ => {}
                        }
                    }
                    return Some(self.emit(token));
                }
            }
        }
    }
}
