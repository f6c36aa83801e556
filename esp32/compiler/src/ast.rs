//! Syntax tree handed over by the external grammar.
//!
//! The JSON shape is the one the grammar emits: statements are objects
//! tagged by `"type"`, identifiers are bare strings, integers bare numbers,
//! and only unary/binary expressions are objects.

use serde::{Deserialize, Serialize};

use crate::{CompileError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stmt {
    VarDecl {
        name: String,
        value: i64,
    },
    Assignment {
        name: String,
        op: AssignOp,
        value: Expr,
    },
    If {
        left: String,
        op: CompareOp,
        right: i64,
        #[serde(default)]
        body: Vec<Stmt>,
    },
    /// Only `while (1)` exists in the language, so there is no condition.
    While {
        #[serde(default)]
        body: Vec<Stmt>,
    },
    ScreenPixel {
        x: Expr,
        y: Expr,
    },
    ScreenPrint {
        value: String,
    },
    ScreenClear,
    ScreenMove {
        x: Expr,
        y: i64,
    },
    Delay {
        cycles: i64,
    },
}

impl Stmt {
    pub fn kind(&self) -> &'static str {
        match self {
            Stmt::VarDecl { .. } => "VarDecl",
            Stmt::Assignment { .. } => "Assignment",
            Stmt::If { .. } => "If",
            Stmt::While { .. } => "While",
            Stmt::ScreenPixel { .. } => "ScreenPixel",
            Stmt::ScreenPrint { .. } => "ScreenPrint",
            Stmt::ScreenClear => "ScreenClear",
            Stmt::ScreenMove { .. } => "ScreenMove",
            Stmt::Delay { .. } => "Delay",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    #[serde(rename = "=")]
    Set,
    #[serde(rename = "+=")]
    AddAssign,
    #[serde(rename = "-=")]
    SubAssign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "-")]
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ExprRepr", into = "ExprRepr")]
pub enum Expr {
    Identifier(String),
    Integer(i64),
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// The grammar only allows `identifier ± integer`.
    Binary { left: String, op: BinaryOp, right: i64 },
}

impl Expr {
    pub fn ident(name: &str) -> Self {
        Expr::Identifier(name.to_string())
    }

    pub fn describe(&self) -> String {
        match self {
            Expr::Identifier(name) => name.clone(),
            Expr::Integer(value) => value.to_string(),
            Expr::Unary { expr, .. } => format!("-{}", expr.describe()),
            Expr::Binary { left, op, right } => {
                let sign = match op {
                    BinaryOp::Add => '+',
                    BinaryOp::Sub => '-',
                };
                format!("{left}{sign}{right}")
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ExprRepr {
    Identifier(String),
    Integer(i64),
    Node(ExprNode),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum ExprNode {
    UnaryExpr {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    BinaryExpr {
        left: String,
        op: BinaryOp,
        right: i64,
    },
}

impl From<ExprRepr> for Expr {
    fn from(repr: ExprRepr) -> Self {
        match repr {
            ExprRepr::Identifier(name) => Expr::Identifier(name),
            ExprRepr::Integer(value) => Expr::Integer(value),
            ExprRepr::Node(ExprNode::UnaryExpr { op, expr }) => Expr::Unary { op, expr },
            ExprRepr::Node(ExprNode::BinaryExpr { left, op, right }) => {
                Expr::Binary { left, op, right }
            }
        }
    }
}

impl From<Expr> for ExprRepr {
    fn from(expr: Expr) -> Self {
        match expr {
            Expr::Identifier(name) => ExprRepr::Identifier(name),
            Expr::Integer(value) => ExprRepr::Integer(value),
            Expr::Unary { op, expr } => ExprRepr::Node(ExprNode::UnaryExpr { op, expr }),
            Expr::Binary { left, op, right } => {
                ExprRepr::Node(ExprNode::BinaryExpr { left, op, right })
            }
        }
    }
}

/// Decode the grammar's JSON output. Anything that is not a program becomes
/// [`CompileError::ParseFailure`]; no partial tree is returned.
pub fn parse_program(json: &str) -> Result<Program> {
    serde_json::from_str(json).map_err(|err| CompileError::ParseFailure(err.to_string()))
}
