//! Recursive-descent parser producing the expression AST.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or_expr    := and_expr (("or" | "||") and_expr)*
//! and_expr   := not_expr (("and" | "&&") not_expr)*
//! not_expr   := ("not" | "!") not_expr | comparison
//! comparison := additive (comp_op additive)*
//! comp_op    := "==" | "!=" | "<" | "<=" | ">" | ">=" | "in" | "not" "in" | "is" | "is" "not"
//! additive   := term (("+" | "-") term)*
//! term       := unary (("*" | "/" | "%") unary)*
//! unary      := "-" unary | postfix
//! postfix    := primary ("." name | "." int | "[" or_expr "]" | "(" args ")")*
//! primary    := number | string | literal | name | "(" or_expr ")" | "[" args "]"
//! ```

use serde_json::Value;

use super::lexer::{Spanned, Token};
use super::ExpressionError;

/// Nesting limit; keeps hostile input from exhausting the stack.
const MAX_DEPTH: usize = 64;

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Comparison and membership operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
    Is,
    IsNot,
}

/// Expression syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Attribute(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call { function: String, args: Vec<Expr> },
    MethodCall { receiver: Box<Expr>, method: String, args: Vec<Expr> },
    Negate(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare { first: Box<Expr>, rest: Vec<(CompareOp, Expr)> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Parse a token stream into a single expression.
pub fn parse(tokens: &[Spanned], source_len: usize) -> Result<Expr, ExpressionError> {
    let mut parser = Parser { tokens, pos: 0, depth: 0, source_len };
    if tokens.is_empty() {
        return Err(ExpressionError::Parse {
            offset: 0,
            message: "empty expression".to_string(),
        });
    }
    let expr = parser.or_expr()?;
    if let Some(extra) = parser.peek_spanned() {
        return Err(ExpressionError::Parse {
            offset: extra.offset,
            message: format!("unexpected trailing token {:?}", extra.token),
        });
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
    source_len: usize,
}

impl<'a> Parser<'a> {
    fn peek_spanned(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&'a Token> {
        self.peek_spanned().map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek_spanned().map_or(self.source_len, |s| s.offset)
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn is_keyword_at(&self, ahead: usize, keyword: &str) -> bool {
        matches!(self.peek_at(ahead), Some(Token::Ident(name)) if name == keyword)
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ExpressionError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<T, ExpressionError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn or_expr(&mut self) -> Result<Expr, ExpressionError> {
        self.nested(Self::or_chain)
    }

    fn or_chain(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and_expr()?;
        while self.is_keyword("or") || self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.not_expr()?;
        while self.is_keyword("and") || self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ExpressionError> {
        if self.is_keyword("not") || self.peek() == Some(&Token::Bang) {
            self.pos += 1;
            let inner = self.nested(Self::not_expr)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek()? {
            Token::Eq => CompareOp::Eq,
            Token::NotEq => CompareOp::NotEq,
            Token::Lt => CompareOp::Lt,
            Token::LtEq => CompareOp::LtEq,
            Token::Gt => CompareOp::Gt,
            Token::GtEq => CompareOp::GtEq,
            Token::Ident(name) if name == "in" => CompareOp::In,
            Token::Ident(name) if name == "not" && self.is_keyword_at(1, "in") => {
                self.pos += 2;
                return Some(CompareOp::NotIn);
            }
            Token::Ident(name) if name == "is" => {
                if self.is_keyword_at(1, "not") {
                    self.pos += 2;
                    return Some(CompareOp::IsNot);
                }
                CompareOp::Is
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let first = self.additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.compare_op() {
            rest.push((op, self.additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare { first: Box::new(first), rest })
        }
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            let inner = self.nested(Self::unary)?;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = match self.advance() {
                        Some(Token::Ident(name)) => name.clone(),
                        Some(Token::Int(i)) => i.to_string(),
                        _ => return Err(self.error("expected attribute name after '.'")),
                    };
                    if self.peek() == Some(&Token::LParen) {
                        self.pos += 1;
                        let args = self.arguments(&Token::RParen)?;
                        expr = Expr::MethodCall { receiver: Box::new(expr), method: name, args };
                    } else {
                        expr = Expr::Attribute(Box::new(expr), name);
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.or_expr()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some(Token::LParen) => {
                    let Expr::Name(function) = expr else {
                        return Err(self.error("only named functions can be called"));
                    };
                    self.pos += 1;
                    let args = self.arguments(&Token::RParen)?;
                    expr = Expr::Call { function, args };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn arguments(&mut self, close: &Token) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.or_expr()?);
            match self.advance() {
                Some(Token::Comma) if self.peek() == Some(close) => {
                    self.pos += 1;
                    return Ok(args);
                }
                Some(Token::Comma) => {}
                Some(token) if token == close => return Ok(args),
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let offset = self.offset();
        let Some(token) = self.advance() else {
            return Err(self.error("unexpected end of expression"));
        };
        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::from(*i))),
            Token::Float(f) => Ok(Expr::Literal(Value::from(*f))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s.clone()))),
            Token::Ident(name) => Ok(match name.as_str() {
                "True" | "true" => Expr::Literal(Value::Bool(true)),
                "False" | "false" => Expr::Literal(Value::Bool(false)),
                "None" | "null" => Expr::Literal(Value::Null),
                "and" | "or" | "not" | "in" | "is" => {
                    return Err(ExpressionError::Parse {
                        offset,
                        message: format!("unexpected keyword '{name}'"),
                    })
                }
                _ => Expr::Name(name.clone()),
            }),
            Token::LParen => {
                let inner = self.or_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(self.arguments(&Token::RBracket)?)),
            other => Err(ExpressionError::Parse {
                offset,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }
}
