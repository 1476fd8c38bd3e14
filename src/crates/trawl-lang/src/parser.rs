//! The s-expression surface parser.
//!
//! A hand-rolled cursor over the source bytes. Forms:
//!
//! ```text
//! -?[0-9]+                      integer literal
//! "..."                         string literal (\" and \\ escapes)
//! true | false                  boolean literal
//! ident                         variable reference
//! (if pred conseq alt)
//! (for name coll body)
//! (collect expr)
//! (block expr ...)
//! (set name expr ...)
//! (goto urlExpr)
//! (sel name "css" ...)
//! (ratelimit "url" maxTimes durationSeconds)
//! (op args ...)                 binary / n-ary / unary operators
//! ```

use crate::expr::Expr;
use std::time::Duration;
use thiserror::Error;
use trawl_core::node::Selector;
use trawl_core::tokens::Token;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    #[error("unexpected character '{ch}' at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("identifiers cannot start with a digit (byte {0})")]
    NumFirstIdent(usize),

    #[error("unknown form '{form}' at byte {pos}")]
    UnknownForm { form: String, pos: usize },

    #[error("integer literal out of range at byte {0}")]
    IntOutOfRange(usize),

    #[error("expected {what} at byte {pos}")]
    Expected { what: &'static str, pos: usize },

    #[error("trailing input at byte {0}")]
    TrailingInput(usize),
}

pub struct Parser<'a> {
    text: &'a [u8],
    pos: usize,
}

/// Parses a complete program: one expression plus optional trailing
/// whitespace.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(source);
    let expr = parser.parse_expr()?;
    parser.skip_whitespace();
    if parser.pos < parser.text.len() {
        return Err(ParseError::TrailingInput(parser.pos));
    }
    Ok(expr)
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Parser<'a> {
        Parser {
            text: source.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, ch: u8, what: &'static str) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == ch => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(ParseError::Expected {
                what,
                pos: self.pos,
            }),
            None => Err(ParseError::UnexpectedEof(self.pos)),
        }
    }

    /// An identifier: letter or underscore first, then letters, digits and
    /// underscores.
    fn parse_ident(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        match self.peek() {
            None => return Err(ParseError::UnexpectedEof(self.pos)),
            Some(c) if c.is_ascii_digit() => return Err(ParseError::NumFirstIdent(self.pos)),
            Some(c) if !is_ident_start(c) => {
                return Err(ParseError::UnexpectedChar {
                    ch: c as char,
                    pos: self.pos,
                })
            }
            Some(_) => {}
        }
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.pos += 1;
        }
        Ok(String::from_utf8_lossy(&self.text[start..self.pos]).into_owned())
    }

    /// The head of a form: a run of non-delimiter characters, e.g. `for`,
    /// `+`, `..`.
    fn parse_head(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if !is_delimiter(c)) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::Expected {
                what: "a form head",
                pos: self.pos,
            });
        }
        Ok(String::from_utf8_lossy(&self.text[start..self.pos]).into_owned())
    }

    fn parse_int(&mut self) -> Result<i32, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.text[start..self.pos]).expect("ascii digits");
        text.parse::<i32>()
            .map_err(|_| ParseError::IntOutOfRange(start))
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        self.expect(b'"', "an opening quote")?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::UnexpectedEof(self.pos)),
                Some(b'"') => return Ok(out),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(other) => {
                        return Err(ParseError::UnexpectedChar {
                            ch: other as char,
                            pos: self.pos - 1,
                        })
                    }
                    None => return Err(ParseError::UnexpectedEof(self.pos)),
                },
                Some(other) => out.push(other as char),
            }
        }
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(ParseError::UnexpectedEof(self.pos)),
            Some(b'(') => self.parse_form(),
            Some(b'"') => Ok(Expr::Str(self.parse_string()?)),
            Some(c) if c.is_ascii_digit() => Ok(Expr::Int(self.parse_int()?)),
            Some(b'-') if matches!(self.text.get(self.pos + 1), Some(d) if d.is_ascii_digit()) => {
                Ok(Expr::Int(self.parse_int()?))
            }
            Some(c) if is_ident_start(c) => {
                let ident = self.parse_ident()?;
                Ok(match ident.as_str() {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    _ => Expr::Var(ident),
                })
            }
            Some(c) => Err(ParseError::UnexpectedChar {
                ch: c as char,
                pos: self.pos,
            }),
        }
    }

    fn parse_form(&mut self) -> Result<Expr, ParseError> {
        self.expect(b'(', "an opening paren")?;
        self.skip_whitespace();
        let head_pos = self.pos;
        let head = self.parse_head()?;

        let expr = match head.as_str() {
            "if" => {
                let pred = self.parse_expr()?;
                let conseq = self.parse_expr()?;
                let alt = self.parse_expr()?;
                Expr::If {
                    pred: Box::new(pred),
                    conseq: Box::new(conseq),
                    alt: Box::new(alt),
                }
            }
            "for" => {
                self.skip_whitespace();
                let name = self.parse_ident()?;
                let collection = self.parse_expr()?;
                let body = self.parse_expr()?;
                Expr::For {
                    name,
                    collection: Box::new(collection),
                    body: Box::new(body),
                }
            }
            "collect" => Expr::Collect(Box::new(self.parse_expr()?)),
            "block" => {
                let mut exprs = Vec::new();
                loop {
                    self.skip_whitespace();
                    if self.peek() == Some(b')') {
                        break;
                    }
                    exprs.push(self.parse_expr()?);
                }
                Expr::Block(exprs)
            }
            "set" => {
                let mut bindings = Vec::new();
                loop {
                    self.skip_whitespace();
                    if self.peek() == Some(b')') {
                        break;
                    }
                    let name = self.parse_ident()?;
                    let value = self.parse_expr()?;
                    bindings.push((name, value));
                }
                Expr::Bind(bindings)
            }
            "goto" => Expr::Goto(Box::new(self.parse_expr()?)),
            "sel" => {
                let mut selectors = Vec::new();
                loop {
                    self.skip_whitespace();
                    if self.peek() == Some(b')') {
                        break;
                    }
                    let name = self.parse_ident()?;
                    self.skip_whitespace();
                    let css = self.parse_string()?;
                    selectors.push(Selector::new(name, css));
                }
                Expr::Selector(selectors)
            }
            "ratelimit" => {
                self.skip_whitespace();
                let url = self.parse_string()?;
                self.skip_whitespace();
                let max_times = self.parse_int()?;
                self.skip_whitespace();
                let seconds = self.parse_int()?;
                Expr::RateLimit {
                    url,
                    max_times,
                    duration: Duration::from_secs(seconds.max(0) as u64),
                }
            }
            op => {
                if let Some(op) = Token::bin_op(op) {
                    let a = self.parse_expr()?;
                    let b = self.parse_expr()?;
                    Expr::BinOp {
                        op,
                        a: Box::new(a),
                        b: Box::new(b),
                    }
                } else if let Some(op) = Token::un_op(op) {
                    Expr::UnOp {
                        op,
                        expr: Box::new(self.parse_expr()?),
                    }
                } else if let Some(op) = Token::mult_op(op) {
                    let mut exprs = Vec::new();
                    loop {
                        self.skip_whitespace();
                        if self.peek() == Some(b')') {
                            break;
                        }
                        exprs.push(self.parse_expr()?);
                    }
                    Expr::MultOp { op, exprs }
                } else {
                    return Err(ParseError::UnknownForm {
                        form: head,
                        pos: head_pos,
                    });
                }
            }
        };

        self.skip_whitespace();
        self.expect(b')', "a closing paren")?;
        Ok(expr)
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | b'(' | b')' | b'"')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(parse("42"), Ok(Expr::Int(42)));
        assert_eq!(parse("-7"), Ok(Expr::Int(-7)));
        assert_eq!(parse("\"hi\\\"there\""), Ok(Expr::Str("hi\"there".into())));
        assert_eq!(parse("true"), Ok(Expr::Bool(true)));
        assert_eq!(parse("false"), Ok(Expr::Bool(false)));
        assert_eq!(parse("count_1"), Ok(Expr::Var("count_1".into())));
    }

    #[test]
    fn idents_cannot_start_with_digits() {
        assert_eq!(parse("1hello"), Err(ParseError::TrailingInput(1)));
    }

    #[test]
    fn operator_forms() {
        assert_eq!(
            parse("(+ 2 3 4)"),
            Ok(Expr::MultOp {
                op: Token::Add,
                exprs: vec![Expr::Int(2), Expr::Int(3), Expr::Int(4)],
            })
        );
        assert_eq!(
            parse("(.. 1 4)"),
            Ok(Expr::BinOp {
                op: Token::Range,
                a: Box::new(Expr::Int(1)),
                b: Box::new(Expr::Int(4)),
            })
        );
        assert_eq!(
            parse("(not true)"),
            Ok(Expr::UnOp {
                op: Token::Not,
                expr: Box::new(Expr::Bool(true)),
            })
        );
        assert_eq!(
            parse("(= 2 2)"),
            Ok(Expr::BinOp {
                op: Token::Equals,
                a: Box::new(Expr::Int(2)),
                b: Box::new(Expr::Int(2)),
            })
        );
    }

    #[test]
    fn keyword_forms() {
        assert_eq!(
            parse("(if (= 2 2) \"yes\" \"no\")"),
            Ok(Expr::If {
                pred: Box::new(Expr::BinOp {
                    op: Token::Equals,
                    a: Box::new(Expr::Int(2)),
                    b: Box::new(Expr::Int(2)),
                }),
                conseq: Box::new(Expr::Str("yes".into())),
                alt: Box::new(Expr::Str("no".into())),
            })
        );
        assert_eq!(
            parse("(collect (for i (.. 1 4) (+ i 1)))"),
            Ok(Expr::Collect(Box::new(Expr::For {
                name: "i".into(),
                collection: Box::new(Expr::BinOp {
                    op: Token::Range,
                    a: Box::new(Expr::Int(1)),
                    b: Box::new(Expr::Int(4)),
                }),
                body: Box::new(Expr::MultOp {
                    op: Token::Add,
                    exprs: vec![Expr::Var("i".into()), Expr::Int(1)],
                }),
            })))
        );
    }

    #[test]
    fn block_set_and_sel() {
        assert_eq!(
            parse("(block (set url \"http://x\") (goto url))"),
            Ok(Expr::Block(vec![
                Expr::Bind(vec![("url".into(), Expr::Str("http://x".into()))]),
                Expr::Goto(Box::new(Expr::Var("url".into()))),
            ]))
        );
        assert_eq!(
            parse("(sel title \"h1\" body \"#b p\")"),
            Ok(Expr::Selector(vec![
                Selector::new("title", "h1"),
                Selector::new("body", "#b p"),
            ]))
        );
    }

    #[test]
    fn ratelimit_form() {
        assert_eq!(
            parse("(ratelimit \"http://example.com\" 5 10)"),
            Ok(Expr::RateLimit {
                url: "http://example.com".into(),
                max_times: 5,
                duration: Duration::from_secs(10),
            })
        );
    }

    #[test]
    fn unknown_form_is_rejected() {
        assert_eq!(
            parse("(frobnicate 1)"),
            Err(ParseError::UnknownForm {
                form: "frobnicate".into(),
                pos: 1
            })
        );
    }

    #[test]
    fn whitespace_is_insignificant() {
        assert_eq!(
            parse("  (+\n\t1   2 )  "),
            Ok(Expr::MultOp {
                op: Token::Add,
                exprs: vec![Expr::Int(1), Expr::Int(2)],
            })
        );
    }
}
