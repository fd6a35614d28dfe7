//! Lexer for the class language
//!
//! Wraps the `logos`-generated scanner and appends a trailing `Eof` token so
//! the parser never runs off the end of the stream.

mod tokens;

pub use tokens::{Token, TokenKind};

use crate::common::Span;
use crate::diagnostics::{CompileError, SourceFile};
use logos::Logos;

/// Tokenize `source`
pub fn lex(source: &str) -> miette::Result<Vec<Token>> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(range.start, range.end);
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                span,
                text: lexer.slice().to_string(),
            }),
            Err(()) => {
                let src = SourceFile::new("<input>", source);
                return Err(CompileError::InvalidToken {
                    text: lexer.slice().to_string(),
                    span: span.into(),
                    src: src.to_named_source(),
                }
                .into());
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(source.len(), source.len()),
        text: String::new(),
    });

    tracing::trace!("lexed {} tokens", tokens.len());
    Ok(tokens)
}
