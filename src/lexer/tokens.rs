use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenType {
    Eof,

    // Literals
    Number,
    CharLit,
    StringLit,
    Null,

    // Identifiers & punctuation
    Identifier,
    Dot,
    Comma,
    Colon,
    Semicolon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Operators
    Assign,
    Equals,
    NotEquals,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    PlusPlus,
    MinusMinus,
    AndAnd,
    OrOr,
    Bang,
    Ampersand,

    // Keywords
    Proc,
    Struct,
    If,
    Elif,
    Else,
    While,
    For,
    Return,
    Break,
    Import,
    Global,
    New,
}

/// Look up a keyword string and return its TokenType, or None if it's a plain identifier.
pub fn keyword_type(word: &str) -> Option<TokenType> {
    match word {
        "proc" => Some(TokenType::Proc),
        "struct" => Some(TokenType::Struct),
        "if" => Some(TokenType::If),
        "elif" => Some(TokenType::Elif),
        "else" => Some(TokenType::Else),
        "while" => Some(TokenType::While),
        "for" => Some(TokenType::For),
        "return" => Some(TokenType::Return),
        "break" => Some(TokenType::Break),
        "import" => Some(TokenType::Import),
        "global" => Some(TokenType::Global),
        "new" => Some(TokenType::New),
        "null" => Some(TokenType::Null),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Token {
    pub token_type: TokenType,
    pub value: String,
    pub line: usize,
    pub column: usize,
    pub file: String,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token_type {
            TokenType::Eof => write!(f, "Token({:?}, {}:{})", self.token_type, self.line, self.column),
            _ => write!(
                f,
                "Token({:?}, {:?}, {}:{})",
                self.token_type, self.value, self.line, self.column
            ),
        }
    }
}
