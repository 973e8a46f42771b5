//! Statement grammar.
//!
//! ```text
//! statement := SET      word value
//!            | PASSWORD word value
//!            | SERVICE  word STATE
//!            | SERVICE  word word value
//! value     := word | STATE
//! ```

use std::iter::Peekable;

use super::Operation;
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::CompileError;

/// Parse a whole batch; any error discards every statement.
pub(super) fn parse(src: &str) -> Result<Vec<Operation>, CompileError> {
    let mut parser = Parser {
        tokens: Lexer::new(src).peekable(),
    };
    let mut ops = Vec::new();
    while let Some(op) = parser.statement()? {
        ops.push(op);
    }
    Ok(ops)
}

struct Parser<'a> {
    tokens: Peekable<Lexer<'a>>,
}

impl<'a> Parser<'a> {
    fn statement(&mut self) -> Result<Option<Operation>, CompileError> {
        let Some(head) = self.bump()? else {
            return Ok(None);
        };

        let op = match head.kind {
            TokenKind::Set => {
                let key = self.word(&head, "variable name")?;
                let value = self.value(&head, "variable value")?;
                Operation::Variable { key, value }
            }
            TokenKind::Password => {
                let username = self.word(&head, "user name")?;
                let password = self.value(&head, "password")?;
                Operation::Password { username, password }
            }
            TokenKind::Service => {
                let name = self.word(&head, "service name")?;
                match self.peek_kind()? {
                    Some(TokenKind::State) => {
                        let state = self.value(&head, "service state")?;
                        Operation::Service { name, state }
                    }
                    _ => {
                        let key = self.word(&head, "ON, OFF or an option name")?;
                        let value = self.value(&head, "option value")?;
                        Operation::ServiceOption {
                            service: name,
                            key,
                            value,
                        }
                    }
                }
            }
            _ => {
                return Err(unexpected(&head, "SET, PASSWORD or SERVICE"));
            }
        };

        Ok(Some(op))
    }

    fn bump(&mut self) -> Result<Option<Token<'a>>, CompileError> {
        self.tokens.next().transpose()
    }

    fn peek_kind(&mut self) -> Result<Option<TokenKind>, CompileError> {
        match self.tokens.peek() {
            Some(Ok(tok)) => Ok(Some(tok.kind)),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(None),
        }
    }

    /// A generic word; keywords and states are rejected.
    fn word(&mut self, head: &Token<'_>, expected: &'static str) -> Result<String, CompileError> {
        match self.bump()? {
            Some(tok) if tok.kind == TokenKind::Word => Ok(tok.text.to_string()),
            Some(tok) => Err(unexpected(&tok, expected)),
            None => Err(incomplete(head, expected)),
        }
    }

    /// A generic word or a state word.
    fn value(&mut self, head: &Token<'_>, expected: &'static str) -> Result<String, CompileError> {
        match self.bump()? {
            Some(tok) if matches!(tok.kind, TokenKind::Word | TokenKind::State) => {
                Ok(tok.text.to_string())
            }
            Some(tok) => Err(unexpected(&tok, expected)),
            None => Err(incomplete(head, expected)),
        }
    }
}

fn unexpected(tok: &Token<'_>, expected: &'static str) -> CompileError {
    CompileError::Unexpected {
        fragment: tok.text.to_string(),
        expected,
        line: tok.line,
        column: tok.column,
    }
}

fn incomplete(head: &Token<'_>, expected: &'static str) -> CompileError {
    CompileError::Incomplete {
        fragment: head.text.to_string(),
        expected,
    }
}
