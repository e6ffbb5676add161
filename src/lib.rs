pub mod ast;
pub mod config;
pub mod lexer;
pub mod parser;
pub mod runtime;

use thiserror::Error;

use ast::Program;
use lexer::{Lexer, LexerError};
use parser::{ParseError, Parser};
use runtime::RuntimeError;

/// Anything that can go wrong between source text and a finished run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("lexer error: {0}")]
    Lex(#[from] LexerError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub fn parse_source(source: &str, filename: &str) -> Result<Program, Error> {
    let tokens = Lexer::new(source, filename).tokenize()?;
    Ok(Parser::new(tokens, filename).parse()?)
}
