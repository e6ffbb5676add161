use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: &str, line: usize, column: usize) -> Self {
        Self {
            file: file.to_string(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

// ── Operators ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Negate,
    Not,
    Increment,
    Decrement,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
            UnaryOp::Increment => "++",
            UnaryOp::Decrement => "--",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "^",
        }
    }
}

// ── Lvalues ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub enum Accessor {
    Property { name: String, loc: SourceLocation },
    Index { index: Box<Expr>, loc: SourceLocation },
}

/// A name followed by any number of `.prop` / `[index]` accessors.
#[derive(Debug, Clone, Serialize)]
pub struct LValue {
    pub name: String,
    pub accessors: Vec<Accessor>,
    pub loc: SourceLocation,
}

impl LValue {
    pub fn is_plain(&self) -> bool {
        self.accessors.is_empty()
    }
}

// ── Expressions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Null,
    Number(f64),
    Char(char),
    Text(String),
}

#[derive(Debug, Clone, Serialize)]
pub enum Expr {
    Literal {
        value: Literal,
        loc: SourceLocation,
    },
    Identifier {
        target: LValue,
        loc: SourceLocation,
    },
    ReferenceOf {
        target: LValue,
        loc: SourceLocation,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        postfix: bool,
        loc: SourceLocation,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        loc: SourceLocation,
    },
    NewStruct {
        name: String,
        loc: SourceLocation,
    },
    NewArray {
        elements: Vec<Expr>,
        loc: SourceLocation,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        loc: SourceLocation,
    },
}

impl Expr {
    pub fn loc(&self) -> &SourceLocation {
        match self {
            Expr::Literal { loc, .. } => loc,
            Expr::Identifier { loc, .. } => loc,
            Expr::ReferenceOf { loc, .. } => loc,
            Expr::Unary { loc, .. } => loc,
            Expr::Binary { loc, .. } => loc,
            Expr::NewStruct { loc, .. } => loc,
            Expr::NewArray { loc, .. } => loc,
            Expr::Call { loc, .. } => loc,
        }
    }
}

// ── Statements ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Stmt>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, Serialize)]
pub enum Stmt {
    Assign {
        target: LValue,
        value: Expr,
        global: bool,
        loc: SourceLocation,
    },
    Return {
        value: Option<Expr>,
        loc: SourceLocation,
    },
    Break {
        loc: SourceLocation,
    },
    /// `if` followed by any `elif` branches, in order.
    If {
        branches: Vec<Branch>,
        else_body: Option<Vec<Stmt>>,
        loc: SourceLocation,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
        loc: SourceLocation,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
        loc: SourceLocation,
    },
    FunctionDecl {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        loc: SourceLocation,
    },
    StructDecl {
        name: String,
        properties: Vec<String>,
        loc: SourceLocation,
    },
    Import {
        path: String,
        loc: SourceLocation,
    },
    Expr {
        expr: Expr,
        loc: SourceLocation,
    },
}

impl Stmt {
    pub fn loc(&self) -> &SourceLocation {
        match self {
            Stmt::Assign { loc, .. } => loc,
            Stmt::Return { loc, .. } => loc,
            Stmt::Break { loc } => loc,
            Stmt::If { loc, .. } => loc,
            Stmt::While { loc, .. } => loc,
            Stmt::For { loc, .. } => loc,
            Stmt::FunctionDecl { loc, .. } => loc,
            Stmt::StructDecl { loc, .. } => loc,
            Stmt::Import { loc, .. } => loc,
            Stmt::Expr { loc, .. } => loc,
        }
    }
}

// ── Program ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub loc: SourceLocation,
}
