//! Tokenizer for the configuration language.
//!
//! Input is split into maximal runs of non-whitespace characters, so a
//! run is always classified as a whole (`SETTINGS` is a word, never `SET`
//! followed by `TINGS`). Each run is matched case-sensitively against the
//! keyword spellings first, then case-insensitively, and falls back to a
//! generic word.

use crate::error::CompileError;

/// Token classes of the configuration language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A run of spaces, tabs, carriage returns or newlines.
    Whitespace,
    /// `SET`
    Set,
    /// `PASSWORD`
    Password,
    /// `SERVICE`
    Service,
    /// `ON` or `OFF`
    State,
    /// Anything else: names, keys and device-specific values.
    Word,
    /// End of input (also produced by an embedded NUL).
    Eof,
}

impl TokenKind {
    pub fn is_keyword(self) -> bool {
        matches!(self, TokenKind::Set | TokenKind::Password | TokenKind::Service)
    }
}

/// A token with its source text and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column (in characters).
    pub column: usize,
}

/// Streaming lexer over a configuration text.
#[derive(Debug)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    done: bool,
}

const KEYWORDS: [(&str, &str, TokenKind); 5] = [
    ("SET", "set", TokenKind::Set),
    ("PASSWORD", "password", TokenKind::Password),
    ("SERVICE", "service", TokenKind::Service),
    ("ON", "on", TokenKind::State),
    ("OFF", "off", TokenKind::State),
];

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        // An embedded NUL ends the input.
        let src = match memchr::memchr(0, src.as_bytes()) {
            Some(nul) => &src[..nul],
            None => src,
        };
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
            done: false,
        }
    }

    /// Produce the next token, including whitespace tokens.
    pub fn next_token(&mut self) -> Result<Token<'a>, CompileError> {
        let src = self.src;
        let rest = &src[self.pos..];
        let (line, column) = (self.line, self.column);

        let Some(first) = rest.chars().next() else {
            self.done = true;
            return Ok(Token {
                kind: TokenKind::Eof,
                text: "",
                line,
                column,
            });
        };

        let kind = if is_space(first) {
            TokenKind::Whitespace
        } else {
            TokenKind::Word
        };

        let len = rest
            .char_indices()
            .find(|&(_, c)| is_space(c) != (kind == TokenKind::Whitespace))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let text = &rest[..len];

        if kind == TokenKind::Word {
            if let Some((offset, bad)) = text.char_indices().find(|&(_, c)| c.is_control()) {
                return Err(CompileError::Lexical {
                    character: bad,
                    fragment: text.to_string(),
                    line,
                    column: column + text[..offset].chars().count(),
                });
            }
        }

        self.advance(text);
        let kind = if kind == TokenKind::Word {
            classify(text)
        } else {
            kind
        };

        Ok(Token {
            kind,
            text,
            line,
            column,
        })
    }

    fn advance(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos += text.len();
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, CompileError>;

    /// Yields significant tokens only; whitespace is skipped and the
    /// trailing `Eof` is not yielded.
    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.next_token() {
                Ok(tok) if tok.kind == TokenKind::Whitespace => continue,
                Ok(tok) if tok.kind == TokenKind::Eof => return None,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
                other => return Some(other),
            }
        }
        None
    }
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn classify(word: &str) -> TokenKind {
    for (upper, lower, kind) in KEYWORDS {
        if word == upper || word == lower {
            return kind;
        }
    }
    for (upper, _, kind) in KEYWORDS {
        if word.eq_ignore_ascii_case(upper) {
            return kind;
        }
    }
    TokenKind::Word
}
