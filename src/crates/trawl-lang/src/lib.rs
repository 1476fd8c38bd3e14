//! # trawl-lang — the trawl surface language
//!
//! The s-expression frontend for trawl programs: a cursor parser producing
//! an [`Expr`] tree and a recursive compiler lowering it to a
//! `trawl-core` node graph.
//!
//! ```rust
//! use trawl_core::{driver, Globals, Node, Outcome, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let globals = Globals::new();
//! let result = trawl_lang::compile_source(&globals, "(+ 2 3)").unwrap();
//! globals.set_result_id(result.id());
//!
//! let outcome = driver::execute(&globals).await.unwrap();
//! assert_eq!(outcome, Outcome::Value(Value::Int(5)));
//! # }
//! ```

pub mod compiler;
pub mod expr;
pub mod parser;

pub use compiler::{compile, compile_expr, CompileError, Scope};
pub use expr::Expr;
pub use parser::{parse, ParseError, Parser};

use std::sync::Arc;
use thiserror::Error;
use trawl_core::{Globals, Node};

/// A frontend failure: either the source did not parse or it did not
/// compile.
#[derive(Debug, Error)]
pub enum LangError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Parses and compiles a program, returning its result node.
pub fn compile_source(globals: &Arc<Globals>, source: &str) -> Result<Arc<dyn Node>, LangError> {
    let expr = parse(source)?;
    tracing::debug!(?expr, "parsed program");
    Ok(compile(globals, &expr)?)
}
