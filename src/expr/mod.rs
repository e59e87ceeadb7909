//! Expression evaluator (§4.4), grounded in call sites across
//! `original_source/sources/report_expr.cpp` and `alerts.cpp` (the evaluator itself,
//! `framework/expr.h`/`expr.cpp`, is not in the retrieved source set — its surface is
//! inferred from those call sites: `S(...)`, `F(...)`, infix comparisons, string literals,
//! `$VAR` globals).

pub mod fields;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CoreError;
use crate::stockdb::StockDb;
use crate::symbol::Symbol;

/// A runtime value produced by evaluating an expression (§4.4).
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Number(f64),
    Bool(bool),
    Text(Arc<str>),
    List(Vec<ExprValue>),
    Pair(Box<ExprValue>, Box<ExprValue>),
}

impl ExprValue {
    /// Truthiness rule used by the alerts engine (§4.5, §8 scenario 6): a number is truthy
    /// unless it is zero or NaN; a bool is itself; anything else is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            ExprValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ExprValue::Bool(b) => *b,
            ExprValue::Text(s) => !s.is_empty(),
            ExprValue::List(items) => !items.is_empty(),
            ExprValue::Pair(_, _) => true,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> f64 {
        match self {
            ExprValue::Number(n) => *n,
            ExprValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            _ => f64::NAN,
        }
    }
}

/// Evaluation context: what `S`, `F`, `R`, `FIELDS` and `TABLE` can see (§4.4).
pub struct ExprContext {
    pub stocks: Arc<StockDb>,
    pub reports: HashMap<String, fields::Report>,
    pub globals: HashMap<String, ExprValue>,
}

impl ExprContext {
    #[must_use]
    pub fn new(stocks: Arc<StockDb>) -> Self {
        Self {
            stocks,
            reports: HashMap::new(),
            globals: HashMap::new(),
        }
    }

    /// Sets a `$VAR`-style global, e.g. `$TITLE`/`$DESCRIPTION` during alert evaluation
    /// (§4.5).
    pub fn set_global(&mut self, name: &str, value: ExprValue) {
        self.globals.insert(name.to_string(), value);
    }
}

/// Parses and evaluates `source` against `ctx` (§4.4).
///
/// # Errors
/// Returns [`CoreError::InvalidArgument`] for a malformed expression, unknown field, or
/// argument-count mismatch, and [`CoreError::EvaluationTimeout`] if a builtin spin-wait (§5)
/// exhausts its budget.
pub async fn eval(source: &str, ctx: &ExprContext) -> Result<ExprValue, CoreError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(CoreError::InvalidArgument(format!(
            "trailing tokens after expression: {source}"
        )));
    }
    evaluate(&ast, ctx).await
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Global(String),
    LParen,
    RParen,
    Comma,
    Op(String),
}

fn tokenize(source: &str) -> Result<Vec<Token>, CoreError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
        } else if c == '"' {
            let mut s = String::new();
            i += 1;
            while i < chars.len() && chars[i] != '"' {
                s.push(chars[i]);
                i += 1;
            }
            if i >= chars.len() {
                return Err(CoreError::InvalidArgument(format!(
                    "unterminated string literal in: {source}"
                )));
            }
            i += 1;
            tokens.push(Token::Text(s));
        } else if c == '$' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Global(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n: f64 = text
                .parse()
                .map_err(|_| CoreError::InvalidArgument(format!("bad number literal: {text}")))?;
            tokens.push(Token::Number(n));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/!<>=&|".contains(c) {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            if ["==", "!=", ">=", "<=", "&&", "||"].contains(&two.as_str()) {
                tokens.push(Token::Op(two));
                i += 2;
            } else {
                tokens.push(Token::Op(c.to_string()));
                i += 1;
            }
        } else {
            return Err(CoreError::InvalidArgument(format!(
                "unexpected character '{c}' in expression: {source}"
            )));
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Ast {
    Number(f64),
    Text(String),
    Global(String),
    /// A parenless identifier, e.g. the `close` in `S("U.US", close)`: a bareword field
    /// name, not a function call. Evaluates the same as a string literal (§4.4 — `S`/`F`
    /// take their field argument unquoted).
    Ident(String),
    Call(String, Vec<Ast>),
    Binary(String, Box<Ast>, Box<Ast>),
    Unary(String, Box<Ast>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Ast, CoreError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Ast, CoreError> {
        let mut lhs = self.parse_and()?;
        while let Some(Token::Op(op)) = self.peek() {
            if op == "||" {
                let op = op.clone();
                self.advance();
                let rhs = self.parse_and()?;
                lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Ast, CoreError> {
        let mut lhs = self.parse_comparison()?;
        while let Some(Token::Op(op)) = self.peek() {
            if op == "&&" {
                let op = op.clone();
                self.advance();
                let rhs = self.parse_comparison()?;
                lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Ast, CoreError> {
        let lhs = self.parse_additive()?;
        if let Some(Token::Op(op)) = self.peek() {
            if ["==", "!=", ">=", "<=", ">", "<"].contains(&op.as_str()) {
                let op = op.clone();
                self.advance();
                let rhs = self.parse_additive()?;
                return Ok(Ast::Binary(op, Box::new(lhs), Box::new(rhs)));
            }
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Ast, CoreError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            match self.peek() {
                Some(Token::Op(op)) if op == "+" || op == "-" => {
                    let op = op.clone();
                    self.advance();
                    let rhs = self.parse_multiplicative()?;
                    lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, CoreError> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Op(op)) if op == "*" || op == "/" => {
                    let op = op.clone();
                    self.advance();
                    let rhs = self.parse_unary()?;
                    lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Ast, CoreError> {
        if let Some(Token::Op(op)) = self.peek() {
            if op == "-" || op == "!" {
                let op = op.clone();
                self.advance();
                let rhs = self.parse_unary()?;
                return Ok(Ast::Unary(op, Box::new(rhs)));
            }
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Ast, CoreError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Ast::Number(n)),
            Some(Token::Text(s)) => Ok(Ast::Text(s)),
            Some(Token::Global(g)) => Ok(Ast::Global(g)),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        args.push(self.parse_expr()?);
                        while matches!(self.peek(), Some(Token::Comma)) {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    match self.advance() {
                        Some(Token::RParen) => {}
                        _ => return Err(CoreError::InvalidArgument(format!("expected ')' after {name}("))),
                    }
                    Ok(Ast::Call(name, args))
                } else {
                    Ok(Ast::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(CoreError::InvalidArgument("expected ')'".to_string())),
                }
            }
            other => Err(CoreError::InvalidArgument(format!("unexpected token: {other:?}"))),
        }
    }
}

fn evaluate<'a>(
    ast: &'a Ast,
    ctx: &'a ExprContext,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ExprValue, CoreError>> + Send + 'a>> {
    Box::pin(async move {
        match ast {
            Ast::Number(n) => Ok(ExprValue::Number(*n)),
            Ast::Text(s) | Ast::Ident(s) => Ok(ExprValue::Text(Arc::from(s.as_str()))),
            Ast::Global(name) => ctx
                .globals
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::InvalidArgument(format!("unknown global {name}"))),
            Ast::Unary(op, inner) => {
                let v = evaluate(inner, ctx).await?;
                match op.as_str() {
                    "-" => Ok(ExprValue::Number(-v.as_number())),
                    "!" => Ok(ExprValue::Bool(!v.is_truthy())),
                    _ => Err(CoreError::InvalidArgument(format!("unknown unary operator {op}"))),
                }
            }
            Ast::Binary(op, lhs, rhs) => {
                let l = evaluate(lhs, ctx).await?;
                let r = evaluate(rhs, ctx).await?;
                apply_binary(op, &l, &r)
            }
            Ast::Call(name, args) => call_builtin(name, args, ctx).await,
        }
    })
}

fn apply_binary(op: &str, l: &ExprValue, r: &ExprValue) -> Result<ExprValue, CoreError> {
    match op {
        "&&" => Ok(ExprValue::Bool(l.is_truthy() && r.is_truthy())),
        "||" => Ok(ExprValue::Bool(l.is_truthy() || r.is_truthy())),
        "+" => Ok(ExprValue::Number(l.as_number() + r.as_number())),
        "-" => Ok(ExprValue::Number(l.as_number() - r.as_number())),
        "*" => Ok(ExprValue::Number(l.as_number() * r.as_number())),
        "/" => Ok(ExprValue::Number(l.as_number() / r.as_number())),
        "==" => Ok(ExprValue::Bool((l.as_number() - r.as_number()).abs() < f64::EPSILON)),
        "!=" => Ok(ExprValue::Bool((l.as_number() - r.as_number()).abs() >= f64::EPSILON)),
        ">=" => Ok(ExprValue::Bool(l.as_number() >= r.as_number())),
        "<=" => Ok(ExprValue::Bool(l.as_number() <= r.as_number())),
        ">" => Ok(ExprValue::Bool(l.as_number() > r.as_number())),
        "<" => Ok(ExprValue::Bool(l.as_number() < r.as_number())),
        _ => Err(CoreError::InvalidArgument(format!("unknown binary operator {op}"))),
    }
}

async fn call_builtin(name: &str, args: &[Ast], ctx: &ExprContext) -> Result<ExprValue, CoreError> {
    match name {
        "S" => fields::eval_s(args, ctx).await,
        "F" => fields::eval_f(args, ctx).await,
        "R" => fields::eval_r(args, ctx),
        "FIELDS" => fields::eval_fields(args),
        "TABLE" => fields::eval_table(args, ctx).await,
        _ => Err(CoreError::InvalidArgument(format!("unknown function {name}"))),
    }
}

/// Resolves a literal string/global argument AST node to text, the shape `S`/`F`/`R` expect
/// for their first argument.
pub(crate) async fn text_arg(ast: &Ast, ctx: &ExprContext) -> Result<String, CoreError> {
    match evaluate(ast, ctx).await? {
        ExprValue::Text(s) => Ok(s.to_string()),
        other => Err(CoreError::InvalidArgument(format!(
            "expected a string argument, got {other:?}"
        ))),
    }
}

pub(crate) async fn eval_arg(ast: &Ast, ctx: &ExprContext) -> Result<ExprValue, CoreError> {
    evaluate(ast, ctx).await
}

pub(crate) fn symbol_from_text(text: &str) -> Symbol {
    Symbol::new(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpClient;
    use crate::intern::StringTable;

    fn ctx() -> ExprContext {
        let http = Arc::new(HttpClient::builder().disable_disk_cache().build().unwrap());
        let stocks = Arc::new(StockDb::new(Arc::new(StringTable::new()), http));
        ExprContext::new(stocks)
    }

    #[tokio::test]
    async fn arithmetic_and_precedence() {
        let c = ctx();
        let v = eval("1 + 2 * 3", &c).await.unwrap();
        assert_eq!(v.as_number(), 7.0);
    }

    #[tokio::test]
    async fn comparisons_and_boolean_ops() {
        let c = ctx();
        let v = eval("2 >= 1 && 3 < 4", &c).await.unwrap();
        assert!(v.is_truthy());
    }

    #[tokio::test]
    async fn global_variable_lookup() {
        let mut c = ctx();
        c.set_global("$TITLE", ExprValue::Text(Arc::from("U.US")));
        let v = eval("$TITLE", &c).await.unwrap();
        assert_eq!(v, ExprValue::Text(Arc::from("U.US")));
    }

    #[tokio::test]
    async fn unknown_function_is_invalid_argument() {
        let c = ctx();
        let err = eval("NOPE(1)", &c).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }
}
