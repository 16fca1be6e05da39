//! Rule Expressions
//!
//! Validation rules are small boolean formulas over parameter names:
//! arithmetic, comparisons, `and`/`or`/`not` and parentheses. Nothing else is
//! accepted, so a schema can never smuggle code into the evaluator.
//!
//! Parameter names are hyphenated (`inner-diameter`), so a `-` directly between
//! two identifier characters belongs to the name. Subtraction needs a space or
//! a non-letter operand: `outer-diameter - inner-diameter`, `height-2`.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::params::{canonical_key, Params};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("{message} at column {column}")]
    Syntax { message: String, column: usize },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Parameter {0} is not numeric")]
    NotNumeric(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Division by zero")]
    DivisionByZero,
}

impl ExprError {
    fn at(message: impl Into<String>, column: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Param(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        lhs: Box<Expr>,
        op: BinaryOp,
        rhs: Box<Expr>,
    },
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Number(f64),
    Bool(bool),
}

impl Scalar {
    fn as_number(self, context: &str) -> Result<f64, ExprError> {
        match self {
            Scalar::Number(n) => Ok(n),
            Scalar::Bool(_) => Err(ExprError::TypeMismatch(format!(
                "expected number for {}",
                context
            ))),
        }
    }

    fn as_bool(self, context: &str) -> Result<bool, ExprError> {
        match self {
            Scalar::Bool(b) => Ok(b),
            Scalar::Number(_) => Err(ExprError::TypeMismatch(format!(
                "expected boolean for {}",
                context
            ))),
        }
    }
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser { tokens, index: 0, depth: 0 };
        let expr = parser.parse_or()?;
        let trailing = parser.peek();
        if trailing.kind != TokenKind::Eof {
            return Err(ExprError::at("unexpected trailing input", trailing.column));
        }
        Ok(expr)
    }

    /// Every parameter name the expression reads, sorted and deduplicated.
    pub fn identifiers(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        self.collect_identifiers(&mut names);
        names.into_iter().collect()
    }

    fn collect_identifiers(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Param(name) => {
                names.insert(name.clone());
            }
            Expr::Unary { expr, .. } => expr.collect_identifiers(names),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(names);
                rhs.collect_identifiers(names);
            }
            Expr::Number(_) | Expr::Bool(_) => {}
        }
    }

    pub fn evaluate(&self, params: &Params) -> Result<Scalar, ExprError> {
        match self {
            Expr::Number(n) => Ok(Scalar::Number(*n)),
            Expr::Bool(b) => Ok(Scalar::Bool(*b)),
            Expr::Param(name) => {
                let value = params
                    .get(name)
                    .ok_or_else(|| ExprError::UnknownParameter(name.clone()))?;
                if let Some(b) = value.as_bool() {
                    return Ok(Scalar::Bool(b));
                }
                value
                    .as_f64()
                    .map(Scalar::Number)
                    .ok_or_else(|| ExprError::NotNumeric(name.clone()))
            }
            Expr::Unary { op, expr } => {
                let value = expr.evaluate(params)?;
                match op {
                    UnaryOp::Neg => Ok(Scalar::Number(-value.as_number("'-'")?)),
                    UnaryOp::Not => Ok(Scalar::Bool(!value.as_bool("'not'")?)),
                }
            }
            Expr::Binary { lhs, op, rhs } => {
                let context = format!("'{}'", op.symbol());
                match op {
                    // short-circuit so `a > 0 and b / a > 1` is safe
                    BinaryOp::And => {
                        if !lhs.evaluate(params)?.as_bool(&context)? {
                            return Ok(Scalar::Bool(false));
                        }
                        Ok(Scalar::Bool(rhs.evaluate(params)?.as_bool(&context)?))
                    }
                    BinaryOp::Or => {
                        if lhs.evaluate(params)?.as_bool(&context)? {
                            return Ok(Scalar::Bool(true));
                        }
                        Ok(Scalar::Bool(rhs.evaluate(params)?.as_bool(&context)?))
                    }
                    _ => {
                        let a = lhs.evaluate(params)?.as_number(&context)?;
                        let b = rhs.evaluate(params)?.as_number(&context)?;
                        apply_numeric(*op, a, b)
                    }
                }
            }
        }
    }

    /// Evaluate and require a boolean outcome.
    pub fn holds(&self, params: &Params) -> Result<bool, ExprError> {
        self.evaluate(params)?.as_bool("rule result")
    }
}

fn apply_numeric(op: BinaryOp, a: f64, b: f64) -> Result<Scalar, ExprError> {
    let value = match op {
        BinaryOp::Add => Scalar::Number(a + b),
        BinaryOp::Sub => Scalar::Number(a - b),
        BinaryOp::Mul => Scalar::Number(a * b),
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(ExprError::DivisionByZero),
        BinaryOp::Div => Scalar::Number(a / b),
        BinaryOp::Rem => Scalar::Number(a % b),
        BinaryOp::Lt => Scalar::Bool(a < b),
        BinaryOp::Le => Scalar::Bool(a <= b),
        BinaryOp::Gt => Scalar::Bool(a > b),
        BinaryOp::Ge => Scalar::Bool(a >= b),
        BinaryOp::Eq => Scalar::Bool((a - b).abs() < f64::EPSILON),
        BinaryOp::Ne => Scalar::Bool((a - b).abs() >= f64::EPSILON),
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators are short-circuited"),
    };
    Ok(value)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", crate::params::format_number(*n)),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Param(name) => f.write_str(name),
            Expr::Unary { op: UnaryOp::Neg, expr } => write!(f, "-({})", expr),
            Expr::Unary { op: UnaryOp::Not, expr } => write!(f, "not ({})", expr),
            Expr::Binary { lhs, op, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Number(f64),
    LParen,
    RParen,
    Op(BinaryOp),
    Minus,
    Not,
    True,
    False,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    column: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();

        while let Some(&(index, ch)) = self.chars.peek() {
            let column = index + 1;
            if ch.is_whitespace() {
                self.chars.next();
                continue;
            }

            let kind = match ch {
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '+' => self.single(TokenKind::Op(BinaryOp::Add)),
                '-' => self.single(TokenKind::Minus),
                '*' => self.single(TokenKind::Op(BinaryOp::Mul)),
                '/' => self.single(TokenKind::Op(BinaryOp::Div)),
                '%' => self.single(TokenKind::Op(BinaryOp::Rem)),
                '<' => self.with_eq(BinaryOp::Lt, BinaryOp::Le),
                '>' => self.with_eq(BinaryOp::Gt, BinaryOp::Ge),
                '=' => {
                    self.chars.next();
                    if !self.eat('=') {
                        return Err(ExprError::at("expected '=='", column));
                    }
                    TokenKind::Op(BinaryOp::Eq)
                }
                '!' => {
                    self.chars.next();
                    if self.eat('=') {
                        TokenKind::Op(BinaryOp::Ne)
                    } else {
                        TokenKind::Not
                    }
                }
                '&' | '|' => {
                    self.chars.next();
                    if !self.eat(ch) {
                        return Err(ExprError::at(format!("expected '{}{}'", ch, ch), column));
                    }
                    if ch == '&' {
                        TokenKind::Op(BinaryOp::And)
                    } else {
                        TokenKind::Op(BinaryOp::Or)
                    }
                }
                c if c.is_ascii_digit() || c == '.' => self.number(column)?,
                c if c.is_alphabetic() || c == '_' => self.word(),
                other => {
                    return Err(ExprError::at(format!("unexpected character '{}'", other), column))
                }
            };
            tokens.push(Token { kind, column });
        }

        let column = tokens.last().map(|t| t.column + 1).unwrap_or(1);
        tokens.push(Token {
            kind: TokenKind::Eof,
            column,
        });
        Ok(tokens)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.chars.next();
        kind
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn with_eq(&mut self, plain: BinaryOp, with_eq: BinaryOp) -> TokenKind {
        self.chars.next();
        if self.eat('=') {
            TokenKind::Op(with_eq)
        } else {
            TokenKind::Op(plain)
        }
    }

    fn number(&mut self, column: usize) -> Result<TokenKind, ExprError> {
        let mut text = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ExprError::at(format!("invalid number '{}'", text), column))
    }

    fn word(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.chars.next();
                continue;
            }
            // a hyphen glued to a following letter continues the name
            if c == '-' && text.chars().last().map_or(false, |l| l.is_alphanumeric()) {
                let mut lookahead = self.chars.clone();
                lookahead.next();
                if matches!(lookahead.peek(), Some(&(_, n)) if n.is_alphabetic()) {
                    text.push(c);
                    self.chars.next();
                    continue;
                }
            }
            break;
        }

        match text.to_ascii_lowercase().as_str() {
            "and" => TokenKind::Op(BinaryOp::And),
            "or" => TokenKind::Op(BinaryOp::Or),
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Ident(canonical_key(&text)),
        }
    }
}

/// Deepest nesting of parentheses and prefix operators a rule may use.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn match_op(&mut self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        match &self.peek().kind {
            TokenKind::Op(op) if ops.contains(op) => {
                let op = *op;
                self.advance();
                Some(op)
            }
            TokenKind::Minus if ops.contains(&BinaryOp::Sub) => {
                self.advance();
                Some(BinaryOp::Sub)
            }
            _ => None,
        }
    }

    fn binary_level(
        &mut self,
        ops: &[BinaryOp],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let mut expr = next(self)?;
        while let Some(op) = self.match_op(ops) {
            let rhs = next(self)?;
            expr = Expr::Binary {
                lhs: Box::new(expr),
                op,
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[BinaryOp::Or], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[BinaryOp::And], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_add_sub()?;
        let ops = [
            BinaryOp::Lt,
            BinaryOp::Le,
            BinaryOp::Gt,
            BinaryOp::Ge,
            BinaryOp::Eq,
            BinaryOp::Ne,
        ];
        match self.match_op(&ops) {
            Some(op) => {
                let rhs = self.parse_add_sub()?;
                Ok(Expr::Binary {
                    lhs: Box::new(lhs),
                    op,
                    rhs: Box::new(rhs),
                })
            }
            None => Ok(lhs),
        }
    }

    fn parse_add_sub(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[BinaryOp::Add, BinaryOp::Sub], Self::parse_mul_div)
    }

    fn parse_mul_div(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[BinaryOp::Mul, BinaryOp::Div, BinaryOp::Rem], Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.depth >= MAX_NESTING {
            return Err(ExprError::at("expression nested too deeply", self.peek().column));
        }
        self.depth += 1;
        let expr = self.parse_prefixed();
        self.depth -= 1;
        expr
    }

    fn parse_prefixed(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Not => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::True => Ok(Expr::Bool(true)),
            TokenKind::False => Ok(Expr::Bool(false)),
            TokenKind::Ident(name) => Ok(Expr::Param(name)),
            TokenKind::LParen => {
                let expr = self.parse_or()?;
                let close = self.advance();
                if close.kind != TokenKind::RParen {
                    return Err(ExprError::at("expected ')'", close.column));
                }
                Ok(expr)
            }
            TokenKind::Eof => Err(ExprError::at("unexpected end of expression", token.column)),
            _ => Err(ExprError::at("expected a value", token.column)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Params {
        let mut p = Params::new();
        p.insert("outer-diameter".into(), json!(10.0));
        p.insert("inner-diameter".into(), json!(6.0));
        p.insert("thickness".into(), json!(2.0));
        p
    }

    #[test]
    fn test_hyphenated_names() {
        let expr = Expr::parse("inner-diameter < outer-diameter").unwrap();
        assert_eq!(expr.identifiers(), vec!["inner-diameter", "outer-diameter"]);
        assert_eq!(expr.holds(&params()), Ok(true));
    }

    #[test]
    fn test_spaced_minus_is_subtraction() {
        let expr = Expr::parse("(outer-diameter - inner-diameter) / 2 >= thickness").unwrap();
        assert_eq!(expr.holds(&params()), Ok(true));
    }

    #[test]
    fn test_underscored_names_are_canonicalized() {
        let expr = Expr::parse("inner_diameter > 0").unwrap();
        assert_eq!(expr.identifiers(), vec!["inner-diameter"]);
    }

    #[test]
    fn test_precedence_and_logic() {
        let expr = Expr::parse("thickness + 2 * 3 == 8 and not (thickness > 5) || false").unwrap();
        assert_eq!(expr.holds(&params()), Ok(true));
    }

    #[test]
    fn test_short_circuit_avoids_division_by_zero() {
        let expr = Expr::parse("0 > 1 && thickness / 0 > 1").unwrap();
        assert_eq!(expr.holds(&params()), Ok(false));
        let expr = Expr::parse("thickness / 0 > 1").unwrap();
        assert_eq!(expr.holds(&params()), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn test_rejects_non_expression_input() {
        assert!(Expr::parse("import os").is_err());
        assert!(Expr::parse("thickness = 2").is_err());
        assert!(Expr::parse("(thickness > 2").is_err());
        assert!(Expr::parse("thickness; 1").is_err());
    }

    #[test]
    fn test_missing_parameter_reported() {
        let expr = Expr::parse("height > 0").unwrap();
        assert_eq!(
            expr.holds(&params()),
            Err(ExprError::UnknownParameter("height".into()))
        );
    }

    #[test]
    fn test_numeric_result_is_not_a_rule() {
        let expr = Expr::parse("thickness * 2").unwrap();
        assert!(matches!(expr.holds(&params()), Err(ExprError::TypeMismatch(_))));
    }

    #[test]
    fn test_nesting_is_bounded() {
        let parens = format!("{}thickness{}", "(".repeat(5000), ")".repeat(5000));
        let err = Expr::parse(&parens).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));
        assert!(Expr::parse(&format!("{}1 > 0", "-".repeat(5000))).is_err());
        assert!(Expr::parse(&format!("{}not false", "not ".repeat(5000))).is_err());

        let shallow = format!("{}thickness{} > 1", "(".repeat(10), ")".repeat(10));
        assert_eq!(Expr::parse(&shallow).unwrap().holds(&params()), Ok(true));
    }
}
