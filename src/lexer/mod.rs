pub mod tokens;

use std::fmt;

use tokens::{keyword_type, Token, TokenType};

#[derive(Debug, Clone, PartialEq)]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub file: String,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}: {}", self.file, self.line, self.column, self.message)
    }
}

impl std::error::Error for LexerError {}

pub struct Lexer {
    source: Vec<char>,
    filename: String,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str, filename: &str) -> Self {
        Self {
            source: source.chars().collect(),
            filename: filename.to_string(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexerError> {
        loop {
            self.skip_trivia();
            if self.at_end() {
                break;
            }
            self.scan_token()?;
        }
        self.tokens.push(self.make_token(TokenType::Eof, ""));
        Ok(self.tokens)
    }

    fn skip_trivia(&mut self) {
        while !self.at_end() {
            let ch = self.peek();
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '/' && self.peek_ahead(1) == Some('/') {
                while !self.at_end() && self.peek() != '\n' {
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn scan_token(&mut self) -> Result<(), LexerError> {
        let ch = self.peek();

        if ch == '"' {
            return self.scan_string();
        }
        if ch == '\'' {
            return self.scan_char();
        }
        if ch.is_ascii_digit() {
            return self.scan_number();
        }
        if ch.is_alphabetic() || ch == '_' {
            return self.scan_identifier();
        }

        let next = self.peek_ahead(1);
        let double = match (ch, next) {
            ('=', Some('=')) => Some(TokenType::Equals),
            ('!', Some('=')) => Some(TokenType::NotEquals),
            ('<', Some('=')) => Some(TokenType::LessEqual),
            ('>', Some('=')) => Some(TokenType::GreaterEqual),
            ('+', Some('+')) => Some(TokenType::PlusPlus),
            ('-', Some('-')) => Some(TokenType::MinusMinus),
            ('&', Some('&')) => Some(TokenType::AndAnd),
            ('|', Some('|')) => Some(TokenType::OrOr),
            _ => None,
        };
        if let Some(tt) = double {
            let text: String = [ch, next.unwrap_or_default()].iter().collect();
            self.tokens.push(self.make_token(tt, &text));
            self.advance();
            self.advance();
            return Ok(());
        }

        let single = match ch {
            '(' => Some(TokenType::LParen),
            ')' => Some(TokenType::RParen),
            '[' => Some(TokenType::LBracket),
            ']' => Some(TokenType::RBracket),
            '{' => Some(TokenType::LBrace),
            '}' => Some(TokenType::RBrace),
            ',' => Some(TokenType::Comma),
            ':' => Some(TokenType::Colon),
            ';' => Some(TokenType::Semicolon),
            '.' => Some(TokenType::Dot),
            '+' => Some(TokenType::Plus),
            '-' => Some(TokenType::Minus),
            '*' => Some(TokenType::Star),
            '/' => Some(TokenType::Slash),
            '%' => Some(TokenType::Percent),
            '^' => Some(TokenType::Caret),
            '<' => Some(TokenType::LessThan),
            '>' => Some(TokenType::GreaterThan),
            '=' => Some(TokenType::Assign),
            '!' => Some(TokenType::Bang),
            '&' => Some(TokenType::Ampersand),
            _ => None,
        };

        if let Some(tt) = single {
            let s = ch.to_string();
            self.tokens.push(self.make_token(tt, &s));
            self.advance();
            return Ok(());
        }

        Err(self.error(format!("Unrecognized character: {:?}", ch)))
    }

    fn scan_string(&mut self) -> Result<(), LexerError> {
        let start_line = self.line;
        let start_col = self.column;
        self.advance(); // opening quote
        let mut text = String::new();

        loop {
            if self.at_end() || self.peek() == '\n' {
                return Err(LexerError {
                    message: "Unterminated string literal".to_string(),
                    line: start_line,
                    column: start_col,
                    file: self.filename.clone(),
                });
            }
            match self.peek() {
                '"' => break,
                '\\' => text.push(self.scan_escape()?),
                other => {
                    text.push(other);
                    self.advance();
                }
            }
        }

        self.advance(); // closing quote
        self.tokens.push(Token {
            token_type: TokenType::StringLit,
            value: text,
            line: start_line,
            column: start_col,
            file: self.filename.clone(),
        });
        Ok(())
    }

    fn scan_char(&mut self) -> Result<(), LexerError> {
        let start_line = self.line;
        let start_col = self.column;
        self.advance(); // opening quote
        if self.at_end() || self.peek() == '\'' || self.peek() == '\n' {
            return Err(self.error("Empty character literal".to_string()));
        }
        let ch = if self.peek() == '\\' {
            self.scan_escape()?
        } else {
            self.advance()
        };
        if self.at_end() || self.peek() != '\'' {
            return Err(LexerError {
                message: "Unterminated character literal".to_string(),
                line: start_line,
                column: start_col,
                file: self.filename.clone(),
            });
        }
        self.advance(); // closing quote
        self.tokens.push(Token {
            token_type: TokenType::CharLit,
            value: ch.to_string(),
            line: start_line,
            column: start_col,
            file: self.filename.clone(),
        });
        Ok(())
    }

    /// Consume a backslash escape and return the character it stands for.
    fn scan_escape(&mut self) -> Result<char, LexerError> {
        self.advance(); // backslash
        if self.at_end() {
            return Err(self.error("Unexpected end of input in escape sequence".to_string()));
        }
        let escaped = match self.peek() {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            other => {
                return Err(self.error(format!("Unrecognized escape sequence: \\{}", other)));
            }
        };
        self.advance();
        Ok(escaped)
    }

    fn scan_number(&mut self) -> Result<(), LexerError> {
        let start_col = self.column;
        let mut digits = String::new();

        while !self.at_end() && self.peek().is_ascii_digit() {
            digits.push(self.advance());
        }
        // Only a dot followed by a digit belongs to the number.
        if !self.at_end()
            && self.peek() == '.'
            && self.peek_ahead(1).map_or(false, |c| c.is_ascii_digit())
        {
            digits.push(self.advance());
            while !self.at_end() && self.peek().is_ascii_digit() {
                digits.push(self.advance());
            }
        }

        self.tokens.push(Token {
            token_type: TokenType::Number,
            value: digits,
            line: self.line,
            column: start_col,
            file: self.filename.clone(),
        });
        Ok(())
    }

    fn scan_identifier(&mut self) -> Result<(), LexerError> {
        let start_col = self.column;
        let mut word = String::new();

        while !self.at_end() && (self.peek().is_alphanumeric() || self.peek() == '_') {
            word.push(self.advance());
        }

        let tt = keyword_type(&word).unwrap_or(TokenType::Identifier);
        self.tokens.push(Token {
            token_type: tt,
            value: word,
            line: self.line,
            column: start_col,
            file: self.filename.clone(),
        });
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn peek(&self) -> char {
        self.source[self.pos]
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> char {
        let ch = self.source[self.pos];
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn make_token(&self, token_type: TokenType, value: &str) -> Token {
        Token {
            token_type,
            value: value.to_string(),
            line: self.line,
            column: self.column,
            file: self.filename.clone(),
        }
    }

    fn error(&self, message: String) -> LexerError {
        LexerError {
            message,
            line: self.line,
            column: self.column,
            file: self.filename.clone(),
        }
    }
}
