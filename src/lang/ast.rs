//! Syntax tree produced by the parser and consumed once by the compiler.
//!
//! Every node carries the inclusive range of token indices it was parsed from,
//! so compiled instructions can be mapped back to exact source text.

use serde::Serialize;

/// Inclusive range of token indices (`start..=end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenRange {
    pub start: usize,
    pub end: usize,
}

impl TokenRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest range covering both.
    pub fn join(self, other: TokenRange) -> TokenRange {
        TokenRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub range: TokenRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `expr;`, the value is discarded.
    Expression(Expr),

    /// `var name = init;` (`let` and `const` share these semantics).
    Var { name: String, init: Option<Expr> },

    Block(Vec<Stmt>),

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    While {
        condition: Expr,
        body: Box<Stmt>,
    },

    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },

    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),

    Try {
        body: Vec<Stmt>,
        catch: Option<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },

    Function(FunctionDecl),
    Class(ClassDecl),
    Debugger,

    /// A lone `;`.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// `catch (e)` binds the thrown value; `catch` without a name discards it.
    pub binding: Option<String>,
    pub body: Vec<Stmt>,
    pub range: TokenRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// `None` for anonymous function expressions.
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub range: TokenRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub methods: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: TokenRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Undefined,

    Variable(String),
    This,

    /// `target = value`. The parser accepts any target; the compiler rejects
    /// targets that are not variables, members or index expressions.
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Short-circuiting `&&` / `||`.
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },

    Member {
        object: Box<Expr>,
        property: String,
    },

    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },

    New {
        class: String,
        args: Vec<Expr>,
    },

    Function(FunctionDecl),

    Array(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl Expr {
    pub fn new(kind: ExprKind, range: TokenRange) -> Self {
        Self { kind, range }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, range: TokenRange) -> Self {
        Self { kind, range }
    }
}
