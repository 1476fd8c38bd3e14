//! The expression tree produced by the parser.

use std::time::Duration;
use trawl_core::node::Selector;
use trawl_core::tokens::Token;

/// One parsed expression. The compiler lowers this tree into a node graph.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Int(i32),
    Str(String),
    Bool(bool),
    /// A variable reference.
    Var(String),
    If {
        pred: Box<Expr>,
        conseq: Box<Expr>,
        alt: Box<Expr>,
    },
    For {
        name: String,
        collection: Box<Expr>,
        body: Box<Expr>,
    },
    Collect(Box<Expr>),
    /// A sequence of expressions in a child scope; evaluates to the last.
    Block(Vec<Expr>),
    /// Name bindings added to the current scope; evaluates to null.
    Bind(Vec<(String, Expr)>),
    Goto(Box<Expr>),
    /// Named CSS extractions against the page in scope.
    Selector(Vec<Selector>),
    /// Rate-limit configuration; evaluates to null.
    RateLimit {
        url: String,
        max_times: i32,
        duration: Duration,
    },
    BinOp {
        op: Token,
        a: Box<Expr>,
        b: Box<Expr>,
    },
    MultOp {
        op: Token,
        exprs: Vec<Expr>,
    },
    UnOp {
        op: Token,
        expr: Box<Expr>,
    },
}
