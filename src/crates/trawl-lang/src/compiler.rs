//! Lowering from the expression tree to the node graph.
//!
//! A straightforward recursive walk. The lexical [`Scope`] carries
//! variable-to-node bindings and the "current page" node that selectors
//! attach to; `for`, `if` branches and `block` open child scopes.

use crate::expr::Expr;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use trawl_core::node::{
    BinOpNode, CollectNode, ForNode, GotoNode, IfNode, MultOpNode, Node, SelectorNode, UnOpNode,
    ValueNode, VarNode,
};
use trawl_core::{Globals, Value};

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("variable '{0}' is not in scope")]
    UndefinedVariable(String),

    #[error("selector used before any page was loaded")]
    SelectorBeforePage,

    #[error("empty block has no value")]
    EmptyBlock,
}

/// A lexical scope: bindings, the page loaded by the most recent `goto`,
/// and the enclosing scope.
pub struct Scope<'p> {
    env: HashMap<String, Arc<dyn Node>>,
    page: Option<Arc<dyn Node>>,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    pub fn root() -> Scope<'static> {
        Scope {
            env: HashMap::new(),
            page: None,
            parent: None,
        }
    }

    fn child(&self) -> Scope<'_> {
        Scope {
            env: HashMap::new(),
            page: None,
            parent: Some(self),
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Node>> {
        match self.env.get(name) {
            Some(node) => Some(node.clone()),
            None => self.parent.and_then(|p| p.lookup(name)),
        }
    }

    fn set(&mut self, name: impl Into<String>, node: Arc<dyn Node>) {
        self.env.insert(name.into(), node);
    }

    /// The page in this scope or the nearest enclosing one.
    fn page(&self) -> Option<Arc<dyn Node>> {
        match &self.page {
            Some(page) => Some(page.clone()),
            None => self.parent.and_then(|p| p.page()),
        }
    }
}

/// Compiles a program to its result node.
pub fn compile(globals: &Arc<Globals>, expr: &Expr) -> Result<Arc<dyn Node>, CompileError> {
    let mut scope = Scope::root();
    compile_expr(globals, expr, &mut scope)
}

pub fn compile_expr(
    globals: &Arc<Globals>,
    expr: &Expr,
    scope: &mut Scope<'_>,
) -> Result<Arc<dyn Node>, CompileError> {
    match expr {
        Expr::Int(i) => Ok(ValueNode::new(globals, globals.generate_id(), Value::Int(*i)) as _),
        Expr::Str(s) => Ok(ValueNode::new(
            globals,
            globals.generate_id(),
            Value::Str(s.clone()),
        ) as _),
        Expr::Bool(b) => Ok(ValueNode::new(globals, globals.generate_id(), Value::Bool(*b)) as _),
        Expr::Var(name) => scope
            .lookup(name)
            .ok_or_else(|| CompileError::UndefinedVariable(name.clone())),
        Expr::Selector(selectors) => {
            let page = scope.page().ok_or(CompileError::SelectorBeforePage)?;
            Ok(SelectorNode::new(
                globals,
                globals.generate_id(),
                page,
                selectors.clone(),
            ) as _)
        }
        Expr::For {
            name,
            collection,
            body,
        } => {
            let collection = compile_expr(globals, collection, scope)?;
            let mut inner = scope.child();
            inner.set(
                name.clone(),
                VarNode::new(globals, globals.generate_id(), name.clone()) as _,
            );
            let body = compile_expr(globals, body, &mut inner)?;
            Ok(ForNode::new(globals, globals.generate_id(), name.clone(), collection, body) as _)
        }
        Expr::If { pred, conseq, alt } => {
            let pred = compile_expr(globals, pred, scope)?;
            let conseq = {
                let mut branch = scope.child();
                compile_expr(globals, conseq, &mut branch)?
            };
            let alt = {
                let mut branch = scope.child();
                compile_expr(globals, alt, &mut branch)?
            };
            Ok(IfNode::new(globals, globals.generate_id(), pred, conseq, alt) as _)
        }
        Expr::Goto(url) => {
            let url = compile_expr(globals, url, scope)?;
            let goto = GotoNode::new(globals, globals.generate_id(), url);
            scope.page = Some(goto.clone() as _);
            Ok(goto as _)
        }
        Expr::Block(exprs) => {
            let mut inner = scope.child();
            let mut last = None;
            for expr in exprs {
                last = Some(compile_expr(globals, expr, &mut inner)?);
            }
            last.ok_or(CompileError::EmptyBlock)
        }
        Expr::Bind(bindings) => {
            for (name, expr) in bindings {
                let node = compile_expr(globals, expr, scope)?;
                scope.set(name.clone(), node);
            }
            Ok(ValueNode::new(globals, globals.generate_id(), Value::Null) as _)
        }
        Expr::RateLimit {
            url,
            max_times,
            duration,
        } => {
            // Limiters are keyed by host, matching the key Goto consults.
            let host = url::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| url.clone());
            globals.set_rate_limit(&host, *max_times, *duration);
            Ok(ValueNode::new(globals, globals.generate_id(), Value::Null) as _)
        }
        Expr::MultOp { op, exprs } => {
            let mut nodes = Vec::with_capacity(exprs.len());
            for expr in exprs {
                nodes.push(compile_expr(globals, expr, scope)?);
            }
            Ok(MultOpNode::new(globals, globals.generate_id(), *op, nodes) as _)
        }
        Expr::BinOp { op, a, b } => {
            let a = compile_expr(globals, a, scope)?;
            let b = compile_expr(globals, b, scope)?;
            Ok(BinOpNode::new(globals, globals.generate_id(), *op, a, b) as _)
        }
        Expr::UnOp { op, expr } => {
            let node = compile_expr(globals, expr, scope)?;
            Ok(UnOpNode::new(globals, globals.generate_id(), *op, node) as _)
        }
        Expr::Collect(expr) => {
            let node = compile_expr(globals, expr, scope)?;
            Ok(CollectNode::new(globals, globals.generate_id(), node) as _)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use trawl_core::node::{same_structure, Selector};
    use trawl_core::tokens::Token;

    /// Compiles `source` and checks the node tree against `expected`
    /// (built through a second registry; ids are ignored).
    fn assert_compiles_to(source: &str, expected: Arc<dyn Node>) {
        let globals = Globals::new();
        let expr = parse(source).unwrap();
        let node = compile(&globals, &expr).unwrap();
        assert!(
            same_structure(&node, &expected),
            "graph for {source:?} did not match"
        );
    }

    #[test]
    fn literals_compile_to_value_nodes() {
        let g = Globals::new();
        assert_compiles_to("2", ValueNode::new(&g, g.generate_id(), Value::Int(2)) as _);
        assert_compiles_to(
            "\"hello\"",
            ValueNode::new(&g, g.generate_id(), Value::Str("hello".into())) as _,
        );
    }

    #[test]
    fn if_compiles_three_branches() {
        let g = Globals::new();
        let expected = IfNode::new(
            &g,
            g.generate_id(),
            ValueNode::new(&g, g.generate_id(), Value::Bool(true)) as _,
            ValueNode::new(&g, g.generate_id(), Value::Int(1)) as _,
            ValueNode::new(&g, g.generate_id(), Value::Int(0)) as _,
        );
        assert_compiles_to("(if true 1 0)", expected as _);
    }

    #[test]
    fn bindings_resolve_to_the_bound_node() {
        let g = Globals::new();
        let expected = ValueNode::new(&g, g.generate_id(), Value::Str("http://www.google.com".into()));
        assert_compiles_to(
            "(block (set url \"http://www.google.com\") url)",
            expected as _,
        );
    }

    #[test]
    fn selector_attaches_to_the_page_in_scope() {
        let g = Globals::new();
        let goto = GotoNode::new(
            &g,
            g.generate_id(),
            ValueNode::new(&g, g.generate_id(), Value::Str("http://www.google.com".into())) as _,
        );
        let expected = SelectorNode::new(
            &g,
            g.generate_id(),
            goto as _,
            vec![Selector::new("a", "b"), Selector::new("c", "d")],
        );
        assert_compiles_to(
            "(block (goto \"http://www.google.com\") (sel a \"b\" c \"d\"))",
            expected as _,
        );
    }

    #[test]
    fn selector_sees_pages_from_enclosing_blocks() {
        let globals = Globals::new();
        let expr = parse("(block (goto \"http://x\") (block (sel t \"h1\")))").unwrap();
        assert!(compile(&globals, &expr).is_ok());
    }

    #[test]
    fn selector_without_page_fails() {
        let globals = Globals::new();
        let expr = parse("(sel t \"h1\")").unwrap();
        assert_eq!(
            compile(&globals, &expr).unwrap_err(),
            CompileError::SelectorBeforePage
        );
    }

    #[test]
    fn undefined_variable_fails() {
        let globals = Globals::new();
        let expr = parse("(+ x 1)").unwrap();
        assert_eq!(
            compile(&globals, &expr).unwrap_err(),
            CompileError::UndefinedVariable("x".into())
        );
    }

    #[test]
    fn loop_variables_are_scoped_to_the_body() {
        let g = Globals::new();
        let expected = CollectNode::new(
            &g,
            g.generate_id(),
            ForNode::new(
                &g,
                g.generate_id(),
                "i",
                BinOpNode::new(
                    &g,
                    g.generate_id(),
                    Token::Range,
                    ValueNode::new(&g, g.generate_id(), Value::Int(1)) as _,
                    ValueNode::new(&g, g.generate_id(), Value::Int(3)) as _,
                ) as _,
                VarNode::new(&g, g.generate_id(), "i") as _,
            ) as _,
        );
        assert_compiles_to("(collect (for i (.. 1 3) i))", expected as _);

        // Outside the loop the variable is gone.
        let globals = Globals::new();
        let expr = parse("(block (for i (.. 1 3) i) i)").unwrap();
        assert_eq!(
            compile(&globals, &expr).unwrap_err(),
            CompileError::UndefinedVariable("i".into())
        );
    }

    #[test]
    fn ratelimit_records_host_config() {
        let globals = Globals::new();
        let expr = parse("(block (ratelimit \"http://example.com/path\" 2 8) 1)").unwrap();
        compile(&globals, &expr).unwrap();
        let limits = globals.rate_limits();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].0, "example.com");
        assert_eq!(limits[0].1.max_times, 2);
        assert_eq!(limits[0].1.period, std::time::Duration::from_secs(8));
    }
}
