use crate::Result;
use crate::error::TemplateError;
use std::fmt;

pub const VAR_OPEN: &str = "{{";
pub const VAR_CLOSE: &str = "}}";
pub const TAG_OPEN: &str = "{%";
pub const TAG_CLOSE: &str = "%}";
pub const COMMENT_OPEN: &str = "{#";
pub const COMMENT_CLOSE: &str = "#}";

/// Approximate source position of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset into the template source.
    pub offset: usize,
    /// 1-based line.
    pub line: usize,
    /// 1-based column, counted in chars.
    pub column: usize,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Raw text between delimiters.
    Text(String),
    /// Trimmed content of `{{ ... }}`.
    Variable(String),
    /// Trimmed content of `{% ... %}`.
    Directive(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    /// Name of a directive token: the leading identifier of its content.
    pub fn directive_name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Directive(content) => {
                let end = content
                    .find(|c: char| !is_ident_char(c))
                    .unwrap_or(content.len());
                Some(&content[..end])
            }
            _ => None,
        }
    }
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Scanner over template source producing [`Token`]s.
struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    fn span(&self) -> Span {
        Span {
            offset: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    /// Move the cursor forward by `len` bytes, keeping line/column in sync.
    fn advance(&mut self, len: usize) {
        for c in self.source[self.pos..self.pos + len].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos += len;
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        while self.pos < self.source.len() {
            let remaining = &self.source[self.pos..];

            if remaining.starts_with(VAR_OPEN) {
                self.delimited(VAR_OPEN, VAR_CLOSE, TokenKind::Variable)?;
                continue;
            }
            if remaining.starts_with(TAG_OPEN) {
                self.delimited(TAG_OPEN, TAG_CLOSE, TokenKind::Directive)?;
                continue;
            }
            if remaining.starts_with(COMMENT_OPEN) {
                let span = self.span();
                let end = remaining.find(COMMENT_CLOSE).ok_or_else(|| {
                    TemplateError::syntax(COMMENT_OPEN, "unclosed comment", span)
                })?;
                self.advance(end + COMMENT_CLOSE.len());
                continue;
            }

            self.text();
        }
        Ok(self.tokens)
    }

    /// Consume text until the next opening delimiter.
    fn text(&mut self) {
        let span = self.span();
        let remaining = &self.source[self.pos..];
        // Search from 1 so a lone '{' always makes progress.
        let next_stop = remaining
            .char_indices()
            .skip(1)
            .map(|(i, _)| i)
            .find(|&i| {
                let rest = &remaining[i..];
                rest.starts_with(VAR_OPEN)
                    || rest.starts_with(TAG_OPEN)
                    || rest.starts_with(COMMENT_OPEN)
            })
            .unwrap_or(remaining.len());

        let text = &remaining[..next_stop];
        // Merge with the previous text run (comments split text runs).
        match self.tokens.last_mut() {
            Some(Token {
                kind: TokenKind::Text(last),
                ..
            }) => last.push_str(text),
            _ => self.tokens.push(Token {
                kind: TokenKind::Text(text.to_string()),
                span,
            }),
        }
        self.advance(next_stop);
    }

    fn delimited(
        &mut self,
        open: &str,
        close: &str,
        make: fn(String) -> TokenKind,
    ) -> Result<()> {
        let span = self.span();
        let body = &self.source[self.pos + open.len()..];
        let end = find_close(body, close).ok_or_else(|| {
            TemplateError::syntax(open, format!("missing closing '{}'", close), span)
        })?;
        let content = body[..end].trim();
        if content.is_empty() {
            return Err(TemplateError::syntax(open, "empty delimiter", span));
        }
        self.tokens.push(Token {
            kind: make(content.to_string()),
            span,
        });
        self.advance(open.len() + end + close.len());
        Ok(())
    }
}

/// Find `close` in `s`, ignoring occurrences inside quoted strings.
fn find_close(s: &str, close: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                } else if s[i..].starts_with(close) {
                    return Some(i);
                }
            }
        }
    }
    None
}

/// Split template source into tokens. Comments are dropped.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).tokenize()
}

/// Peekable, rewindable cursor over a token sequence.
///
/// The parser receives it as `&mut TokenStream`; nested block parsing advances
/// the same cursor, so the enclosing parse resumes right after the end marker.
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn from_source(source: &str) -> Result<Self> {
        Ok(Self::new(tokenize(source)?))
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Un-consume the most recently consumed token.
    pub fn push_back(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    /// Consume tokens until `pred` matches; the matching token is left unconsumed.
    pub fn consume_until<F>(&mut self, mut pred: F) -> Vec<Token>
    where
        F: FnMut(&Token) -> bool,
    {
        let mut out = Vec::new();
        while let Some(token) = self.peek() {
            if pred(token) {
                break;
            }
            out.push(token.clone());
            self.pos += 1;
        }
        out
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.tokens.len());
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

impl Iterator for TokenStream {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}
