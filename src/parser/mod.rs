use std::fmt;

use crate::ast::*;
use crate::lexer::tokens::{Token, TokenType};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub file: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}: {}", self.file, self.line, self.column, self.message)
    }
}

impl std::error::Error for ParseError {}

const MAX_PARSER_DEPTH: usize = 256;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    filename: String,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, filename: &str) -> Self {
        Self {
            tokens,
            pos: 0,
            filename: filename.to_string(),
            depth: 0,
        }
    }

    fn enter_depth(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_PARSER_DEPTH {
            Err(self.error_here(format!(
                "Maximum nesting depth ({}) exceeded",
                MAX_PARSER_DEPTH
            )))
        } else {
            Ok(())
        }
    }

    fn exit_depth(&mut self) {
        self.depth -= 1;
    }

    // ── Public API ──────────────────────────────────────────────────────

    pub fn parse(&mut self) -> Result<Program, ParseError> {
        let loc = SourceLocation::new(&self.filename, 1, 1);
        let mut statements = Vec::new();
        while !self.at_end() {
            if self.check(TokenType::Semicolon) {
                self.advance();
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements, loc })
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.enter_depth()?;
        self.expect(TokenType::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(TokenType::RBrace) {
            if self.at_end() {
                let tok = self.current();
                return Err(ParseError {
                    message: "Unexpected end of input, expected '}'".to_string(),
                    line: tok.line,
                    column: tok.column,
                    file: tok.file.clone(),
                });
            }
            if self.check(TokenType::Semicolon) {
                self.advance();
                continue;
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenType::RBrace)?;
        self.exit_depth();
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.current().token_type {
            TokenType::Proc => self.parse_proc_decl(),
            TokenType::Struct => self.parse_struct_decl(),
            TokenType::If => self.parse_if_stmt(),
            TokenType::While => self.parse_while_stmt(),
            TokenType::For => self.parse_for_stmt(),
            TokenType::Return => self.parse_return_stmt(),
            TokenType::Break => {
                let loc = self.loc();
                self.advance();
                self.expect_terminator()?;
                Ok(Stmt::Break { loc })
            }
            TokenType::Import => {
                let loc = self.loc();
                self.advance();
                let path = self.expect(TokenType::StringLit)?.value.clone();
                self.expect_terminator()?;
                Ok(Stmt::Import { loc, path })
            }
            TokenType::Global => {
                let loc = self.loc();
                self.advance();
                let target = self.parse_lvalue()?;
                self.expect(TokenType::Assign)?;
                let value = self.parse_expression()?;
                self.expect_terminator()?;
                Ok(Stmt::Assign {
                    loc,
                    target,
                    value,
                    global: true,
                })
            }
            _ => self.parse_simple_statement(),
        }
    }

    /// Assignment or bare expression.
    fn parse_simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        let expr = self.parse_expression()?;

        if self.check(TokenType::Assign) {
            self.advance();
            let target = match expr {
                Expr::Identifier { target, .. } => target,
                other => {
                    let at = other.loc();
                    return Err(ParseError {
                        message: "Invalid assignment target".to_string(),
                        line: at.line,
                        column: at.column,
                        file: at.file.clone(),
                    });
                }
            };
            let value = self.parse_expression()?;
            self.expect_terminator()?;
            return Ok(Stmt::Assign {
                loc,
                target,
                value,
                global: false,
            });
        }

        self.expect_terminator()?;
        Ok(Stmt::Expr { loc, expr })
    }

    fn parse_proc_decl(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.expect(TokenType::Proc)?;
        let name = self.expect(TokenType::Identifier)?.value.clone();
        let params = self.parse_name_list(TokenType::LParen, TokenType::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::FunctionDecl {
            loc,
            name,
            params,
            body,
        })
    }

    fn parse_struct_decl(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.expect(TokenType::Struct)?;
        let name = self.expect(TokenType::Identifier)?.value.clone();
        let properties = self.parse_name_list(TokenType::LBrace, TokenType::RBrace)?;
        if self.check(TokenType::Semicolon) {
            self.advance();
        }
        Ok(Stmt::StructDecl {
            loc,
            name,
            properties,
        })
    }

    fn parse_if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.expect(TokenType::If)?;
        let mut branches = vec![self.parse_branch()?];
        while self.check(TokenType::Elif) {
            self.advance();
            branches.push(self.parse_branch()?);
        }
        let else_body = if self.check(TokenType::Else) {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Stmt::If {
            loc,
            branches,
            else_body,
        })
    }

    fn parse_branch(&mut self) -> Result<Branch, ParseError> {
        let loc = self.loc();
        let condition = self.parse_condition()?;
        let body = self.parse_block()?;
        Ok(Branch {
            condition,
            body,
            loc,
        })
    }

    fn parse_while_stmt(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.expect(TokenType::While)?;
        let condition = self.parse_condition()?;
        let body = self.parse_block()?;
        Ok(Stmt::While {
            loc,
            condition,
            body,
        })
    }

    fn parse_for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.expect(TokenType::For)?;
        self.expect(TokenType::LParen)?;
        let var = self.expect(TokenType::Identifier)?.value.clone();
        self.expect(TokenType::Colon)?;
        let iterable = self.parse_expression()?;
        self.expect(TokenType::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            loc,
            var,
            iterable,
            body,
        })
    }

    fn parse_return_stmt(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.expect(TokenType::Return)?;
        let value = if self.at_terminator() {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_terminator()?;
        Ok(Stmt::Return { loc, value })
    }

    fn parse_condition(&mut self) -> Result<Expr, ParseError> {
        self.expect(TokenType::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenType::RParen)?;
        Ok(condition)
    }

    // ── Expressions (precedence climbing) ───────────────────────────────

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.enter_depth()?;
        let result = self.parse_or_expr();
        self.exit_depth();
        result
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and_expr()?;
        while self.check(TokenType::OrOr) {
            self.advance();
            let right = self.parse_and_expr()?;
            left = Self::binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check(TokenType::AndAnd) {
            self.advance();
            let right = self.parse_equality()?;
            left = Self::binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.current().token_type {
                TokenType::Equals => BinaryOp::Equal,
                TokenType::NotEquals => BinaryOp::NotEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Self::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current().token_type {
                TokenType::LessThan => BinaryOp::Less,
                TokenType::GreaterThan => BinaryOp::Greater,
                TokenType::LessEqual => BinaryOp::LessEqual,
                TokenType::GreaterEqual => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Self::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current().token_type {
                TokenType::Plus => BinaryOp::Add,
                TokenType::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.current().token_type {
                TokenType::Star => BinaryOp::Multiply,
                TokenType::Slash => BinaryOp::Divide,
                TokenType::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_power()?;
            left = Self::binary(left, op, right);
        }
        Ok(left)
    }

    /// `^` is right-associative.
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_unary()?;
        if self.check(TokenType::Caret) {
            self.advance();
            self.enter_depth()?;
            let exponent = self.parse_power();
            self.exit_depth();
            return Ok(Self::binary(base, BinaryOp::Power, exponent?));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        let op = match self.current().token_type {
            TokenType::Minus => UnaryOp::Negate,
            TokenType::Bang => UnaryOp::Not,
            TokenType::PlusPlus => UnaryOp::Increment,
            TokenType::MinusMinus => UnaryOp::Decrement,
            TokenType::Ampersand => {
                self.advance();
                let target = self.parse_lvalue()?;
                return Ok(Expr::ReferenceOf { loc, target });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();

        let operand = if matches!(op, UnaryOp::Increment | UnaryOp::Decrement) {
            let target = self.parse_lvalue()?;
            Expr::Identifier {
                loc: target.loc.clone(),
                target,
            }
        } else {
            self.enter_depth()?;
            let operand = self.parse_unary();
            self.exit_depth();
            operand?
        };
        Ok(Expr::Unary {
            loc,
            op,
            operand: Box::new(operand),
            postfix: false,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_primary()?;
        let op = match self.current().token_type {
            TokenType::PlusPlus => UnaryOp::Increment,
            TokenType::MinusMinus => UnaryOp::Decrement,
            _ => return Ok(expr),
        };
        if !matches!(expr, Expr::Identifier { .. }) {
            return Err(self.error_here(format!("'{}' needs a variable operand", op.symbol())));
        }
        self.advance();
        Ok(Expr::Unary {
            loc: expr.loc().clone(),
            op,
            operand: Box::new(expr),
            postfix: true,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        let tok = self.current().clone();

        match tok.token_type {
            TokenType::Number => {
                self.advance();
                let value: f64 = tok.value.parse().map_err(|_| ParseError {
                    message: format!("Invalid number literal: {}", tok.value),
                    line: tok.line,
                    column: tok.column,
                    file: tok.file.clone(),
                })?;
                Ok(Expr::Literal {
                    loc,
                    value: Literal::Number(value),
                })
            }
            TokenType::CharLit => {
                self.advance();
                let value = tok.value.chars().next().unwrap_or('\0');
                Ok(Expr::Literal {
                    loc,
                    value: Literal::Char(value),
                })
            }
            TokenType::StringLit => {
                self.advance();
                Ok(Expr::Literal {
                    loc,
                    value: Literal::Text(tok.value),
                })
            }
            TokenType::Null => {
                self.advance();
                Ok(Expr::Literal {
                    loc,
                    value: Literal::Null,
                })
            }
            TokenType::New => {
                self.advance();
                let name = self.expect(TokenType::Identifier)?.value.clone();
                Ok(Expr::NewStruct { loc, name })
            }
            TokenType::LBracket => {
                self.advance();
                let elements = self.parse_expression_list(TokenType::RBracket)?;
                Ok(Expr::NewArray { loc, elements })
            }
            TokenType::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenType::RParen)?;
                Ok(expr)
            }
            TokenType::Identifier => {
                if self.peek_type(1) == Some(TokenType::LParen) {
                    self.advance();
                    self.advance();
                    let args = self.parse_expression_list(TokenType::RParen)?;
                    return Ok(Expr::Call {
                        loc,
                        name: tok.value,
                        args,
                    });
                }
                let target = self.parse_lvalue()?;
                Ok(Expr::Identifier { loc, target })
            }
            TokenType::Eof => Err(self.error_here("Unexpected end of input".to_string())),
            _ => Err(self.error_here(format!(
                "Expected expression, got {:?} ({:?})",
                tok.token_type, tok.value
            ))),
        }
    }

    fn parse_lvalue(&mut self) -> Result<LValue, ParseError> {
        let loc = self.loc();
        let name = self.expect(TokenType::Identifier)?.value.clone();
        let mut accessors = Vec::new();
        loop {
            let at = self.loc();
            if self.check(TokenType::Dot) {
                self.advance();
                let prop = self.expect(TokenType::Identifier)?.value.clone();
                accessors.push(Accessor::Property { name: prop, loc: at });
            } else if self.check(TokenType::LBracket) {
                self.advance();
                let index = self.parse_expression()?;
                self.expect(TokenType::RBracket)?;
                accessors.push(Accessor::Index {
                    index: Box::new(index),
                    loc: at,
                });
            } else {
                break;
            }
        }
        Ok(LValue {
            name,
            accessors,
            loc,
        })
    }

    /// Comma-separated expressions up to and including `close`.
    fn parse_expression_list(&mut self, close: TokenType) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if !self.check(close) {
            items.push(self.parse_expression()?);
            while self.check(TokenType::Comma) {
                self.advance();
                items.push(self.parse_expression()?);
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_name_list(&mut self, open: TokenType, close: TokenType) -> Result<Vec<String>, ParseError> {
        self.expect(open)?;
        let mut names = Vec::new();
        if !self.check(close) {
            names.push(self.expect(TokenType::Identifier)?.value.clone());
            while self.check(TokenType::Comma) {
                self.advance();
                names.push(self.expect(TokenType::Identifier)?.value.clone());
            }
        }
        self.expect(close)?;
        Ok(names)
    }

    fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            loc: left.loc().clone(),
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    // ── Token stream helpers ────────────────────────────────────────────

    fn current(&self) -> &Token {
        if self.pos >= self.tokens.len() {
            &self.tokens[self.tokens.len() - 1] // EOF
        } else {
            &self.tokens[self.pos]
        }
    }

    fn advance(&mut self) -> &Token {
        let pos = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[pos]
    }

    fn check(&self, token_type: TokenType) -> bool {
        self.current().token_type == token_type
    }

    fn expect(&mut self, token_type: TokenType) -> Result<&Token, ParseError> {
        let tok = self.current();
        if tok.token_type != token_type {
            return Err(ParseError {
                message: format!(
                    "Expected {:?}, got {:?} ({:?})",
                    token_type, tok.token_type, tok.value
                ),
                line: tok.line,
                column: tok.column,
                file: tok.file.clone(),
            });
        }
        Ok(self.advance())
    }

    fn at_terminator(&self) -> bool {
        matches!(
            self.current().token_type,
            TokenType::Semicolon | TokenType::RBrace | TokenType::Eof
        )
    }

    /// A `;`, or nothing when the block or input ends right here.
    fn expect_terminator(&mut self) -> Result<(), ParseError> {
        match self.current().token_type {
            TokenType::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenType::RBrace | TokenType::Eof => Ok(()),
            _ => {
                let tok = self.current();
                Err(ParseError {
                    message: format!("Expected ';', got {:?} ({:?})", tok.token_type, tok.value),
                    line: tok.line,
                    column: tok.column,
                    file: tok.file.clone(),
                })
            }
        }
    }

    fn peek_type(&self, offset: usize) -> Option<TokenType> {
        self.tokens.get(self.pos + offset).map(|t| t.token_type)
    }

    fn at_end(&self) -> bool {
        self.current().token_type == TokenType::Eof
    }

    fn loc(&self) -> SourceLocation {
        let tok = self.current();
        SourceLocation::new(&tok.file, tok.line, tok.column)
    }

    fn error_here(&self, message: String) -> ParseError {
        let tok = self.current();
        ParseError {
            message,
            line: tok.line,
            column: tok.column,
            file: tok.file.clone(),
        }
    }
}
