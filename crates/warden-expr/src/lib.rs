//! Warden Expr - Tokenizer, parser, and evaluator for policy expressions.
//!
//! Policies use a small expression language to resolve approvers and to
//! drive conditional step logic: comparisons, boolean logic, membership
//! (`in`, `contains`), ternary selection, and dotted field access on
//! `$`-prefixed variables (e.g. `$appeal.resource.details.owner`).
//!
//! Compilation statically discovers which `$` variables an expression
//! requires; evaluation fails fast with [`ExprError::ParameterNotFound`]
//! before execution when the caller's variable map is missing one, so an
//! unresolved reference is always attributable to a specific key.
//!
//! Evaluation is side-effect free and safe to call concurrently.

#![deny(unsafe_code)]

use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("expected {expected}, found {found}")]
    ExpectedToken {
        expected: &'static str,
        found: String,
    },
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("parameter not found: {0}")]
    ParameterNotFound(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

pub type ExprResult<T> = Result<T, ExprError>;

/// Tagged evaluation result with explicit conversion rules.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    fn from_json(json: &serde_json::Value, origin: &str) -> ExprResult<Self> {
        match json {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => Ok(Self::Number(n.as_f64().unwrap_or(0.0))),
            serde_json::Value::String(s) => Ok(Self::String(s.clone())),
            serde_json::Value::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    list.push(Self::from_json(item, origin)?);
                }
                Ok(Self::List(list))
            }
            serde_json::Value::Object(_) => Err(ExprError::TypeMismatch(format!(
                "cannot use object value of {origin}"
            ))),
        }
    }

    /// Null, false, zero, and empty strings/lists are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a single string or a list of strings into a string list.
    ///
    /// This preserves the "single email or list of emails" contract used
    /// by approver resolution; any other shape is a type mismatch.
    pub fn into_string_list(self) -> ExprResult<Vec<String>> {
        match self {
            Self::String(s) => Ok(vec![s]),
            Self::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Self::String(s) => out.push(s),
                        other => {
                            return Err(ExprError::TypeMismatch(format!(
                                "expected a string list element, found {other:?}"
                            )))
                        }
                    }
                }
                Ok(out)
            }
            other => Err(ExprError::TypeMismatch(format!(
                "expected a string or a list of strings, found {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Var(String),
    Str(String),
    Number(f64),
    Sym(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(v) => v.clone(),
            Self::Var(v) => format!("${v}"),
            Self::Str(v) => format!("{v:?}"),
            Self::Number(v) => v.to_string(),
            Self::Sym(v) => (*v).to_string(),
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn tokenize(input: &str) -> ExprResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.peek().copied() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch == '$' {
            chars.next();
            let mut name = String::new();
            while let Some(c) = chars.peek().copied() {
                if is_ident_char(c) {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                return Err(ExprError::UnexpectedToken("$".to_string()));
            }
            tokens.push(Token::Var(name));
            continue;
        }

        if ch == '\'' || ch == '"' {
            let quote = ch;
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c == quote {
                    closed = true;
                    break;
                }
                if c == '\\' {
                    match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => return Err(ExprError::UnexpectedEof),
                    }
                    continue;
                }
                value.push(c);
            }
            if !closed {
                return Err(ExprError::UnexpectedEof);
            }
            tokens.push(Token::Str(value));
            continue;
        }

        if ch.is_ascii_digit() {
            let mut value = String::new();
            while let Some(c) = chars.peek().copied() {
                if c.is_ascii_digit() || c == '.' {
                    value.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let number = value
                .parse::<f64>()
                .map_err(|_| ExprError::InvalidNumber(value.clone()))?;
            tokens.push(Token::Number(number));
            continue;
        }

        if is_ident_start(ch) {
            let mut value = String::new();
            while let Some(c) = chars.peek().copied() {
                if is_ident_char(c) {
                    value.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(value));
            continue;
        }

        chars.next();
        let sym = match ch {
            '=' => match chars.peek().copied() {
                Some('=') => {
                    chars.next();
                    "=="
                }
                _ => return Err(ExprError::UnexpectedToken("=".to_string())),
            },
            '!' => match chars.peek().copied() {
                Some('=') => {
                    chars.next();
                    "!="
                }
                _ => "!",
            },
            '<' => match chars.peek().copied() {
                Some('=') => {
                    chars.next();
                    "<="
                }
                _ => "<",
            },
            '>' => match chars.peek().copied() {
                Some('=') => {
                    chars.next();
                    ">="
                }
                _ => ">",
            },
            '&' => match chars.peek().copied() {
                Some('&') => {
                    chars.next();
                    "&&"
                }
                _ => return Err(ExprError::UnexpectedToken("&".to_string())),
            },
            '|' => match chars.peek().copied() {
                Some('|') => {
                    chars.next();
                    "||"
                }
                _ => return Err(ExprError::UnexpectedToken("|".to_string())),
            },
            '(' => "(",
            ')' => ")",
            '[' => "[",
            ']' => "]",
            ',' => ",",
            '?' => "?",
            ':' => ":",
            '.' => ".",
            other => return Err(ExprError::UnexpectedToken(other.to_string())),
        };
        tokens.push(Token::Sym(sym));
    }

    Ok(tokens)
}

#[derive(Clone, Debug)]
enum Ast {
    Literal(Value),
    Var { root: String, path: Vec<String> },
    List(Vec<Ast>),
    Not(Box<Ast>),
    Binary {
        op: BinaryOp,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    Ternary {
        cond: Box<Ast>,
        then: Box<Ast>,
        otherwise: Box<Ast>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
    Contains,
}

/// A compiled expression together with the `$` variables it requires.
#[derive(Clone, Debug)]
pub struct Program {
    ast: Ast,
    references: BTreeSet<String>,
}

impl Program {
    /// Root names of every `$` variable the expression references.
    pub fn references(&self) -> &BTreeSet<String> {
        &self.references
    }

    /// Evaluate against the given variable map. Missing references fail
    /// before any part of the expression runs.
    pub fn evaluate(&self, vars: &HashMap<String, serde_json::Value>) -> ExprResult<Value> {
        for reference in &self.references {
            if !vars.contains_key(reference) {
                return Err(ExprError::ParameterNotFound(reference.clone()));
            }
        }
        eval(&self.ast, vars)
    }
}

/// An expression source string, compiled on demand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression(String);

impl Expression {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn compile(&self) -> ExprResult<Program> {
        let tokens = tokenize(&self.0)?;
        let mut parser = Parser::new(tokens);
        let ast = parser.parse_expression()?;
        parser.expect_eof()?;
        Ok(Program {
            ast,
            references: parser.references,
        })
    }

    pub fn evaluate(&self, vars: &HashMap<String, serde_json::Value>) -> ExprResult<Value> {
        self.compile()?.evaluate(vars)
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Expression {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for Expression {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    references: BTreeSet<String>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            references: BTreeSet::new(),
        }
    }

    fn parse_expression(&mut self) -> ExprResult<Ast> {
        let cond = self.parse_or()?;
        if self.consume_sym("?") {
            let then = self.parse_expression()?;
            self.expect_sym(":")?;
            let otherwise = self.parse_expression()?;
            return Ok(Ast::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> ExprResult<Ast> {
        let mut lhs = self.parse_and()?;
        while self.consume_sym("||") || self.consume_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Ast::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ExprResult<Ast> {
        let mut lhs = self.parse_not()?;
        while self.consume_sym("&&") || self.consume_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Ast::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> ExprResult<Ast> {
        if self.consume_sym("!") || self.consume_keyword("not") {
            let inner = self.parse_not()?;
            return Ok(Ast::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ExprResult<Ast> {
        let lhs = self.parse_primary()?;
        let op = if self.consume_sym("==") {
            BinaryOp::Eq
        } else if self.consume_sym("!=") {
            BinaryOp::Ne
        } else if self.consume_sym("<=") {
            BinaryOp::Le
        } else if self.consume_sym(">=") {
            BinaryOp::Ge
        } else if self.consume_sym("<") {
            BinaryOp::Lt
        } else if self.consume_sym(">") {
            BinaryOp::Gt
        } else if self.consume_keyword("in") {
            BinaryOp::In
        } else if self.consume_keyword("contains") {
            BinaryOp::Contains
        } else {
            return Ok(lhs);
        };
        let rhs = self.parse_primary()?;
        Ok(Ast::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_primary(&mut self) -> ExprResult<Ast> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Ast::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Ast::Literal(Value::String(s))),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Ast::Literal(Value::Bool(true))),
                "false" => Ok(Ast::Literal(Value::Bool(false))),
                "null" | "nil" => Ok(Ast::Literal(Value::Null)),
                other => Err(ExprError::UnexpectedToken(other.to_string())),
            },
            Some(Token::Var(root)) => {
                self.references.insert(root.clone());
                let mut path = Vec::new();
                while self.consume_sym(".") {
                    path.push(self.expect_ident()?);
                }
                Ok(Ast::Var { root, path })
            }
            Some(Token::Sym("(")) => {
                let inner = self.parse_expression()?;
                self.expect_sym(")")?;
                Ok(inner)
            }
            Some(Token::Sym("[")) => {
                let mut items = Vec::new();
                if !self.consume_sym("]") {
                    loop {
                        items.push(self.parse_expression()?);
                        if self.consume_sym(",") {
                            continue;
                        }
                        self.expect_sym("]")?;
                        break;
                    }
                }
                Ok(Ast::List(items))
            }
            Some(token) => Err(ExprError::UnexpectedToken(token.describe())),
            None => Err(ExprError::UnexpectedEof),
        }
    }

    fn expect_eof(&self) -> ExprResult<()> {
        match self.tokens.get(self.pos) {
            None => Ok(()),
            Some(token) => Err(ExprError::UnexpectedToken(token.describe())),
        }
    }

    fn expect_ident(&mut self) -> ExprResult<String> {
        match self.next() {
            Some(Token::Ident(value)) => Ok(value),
            Some(token) => Err(ExprError::ExpectedToken {
                expected: "field name",
                found: token.describe(),
            }),
            None => Err(ExprError::UnexpectedEof),
        }
    }

    fn expect_sym(&mut self, sym: &'static str) -> ExprResult<()> {
        if self.consume_sym(sym) {
            Ok(())
        } else {
            Err(ExprError::ExpectedToken {
                expected: sym,
                found: self
                    .tokens
                    .get(self.pos)
                    .map(Token::describe)
                    .unwrap_or_else(|| "end of expression".to_string()),
            })
        }
    }

    fn consume_sym(&mut self, sym: &str) -> bool {
        if matches!(self.tokens.get(self.pos), Some(Token::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.tokens.get(self.pos), Some(Token::Ident(v)) if v == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}

fn eval(ast: &Ast, vars: &HashMap<String, serde_json::Value>) -> ExprResult<Value> {
    match ast {
        Ast::Literal(value) => Ok(value.clone()),
        Ast::Var { root, path } => {
            // Presence of the root is checked before evaluation starts.
            let mut current = vars
                .get(root)
                .ok_or_else(|| ExprError::ParameterNotFound(root.clone()))?;
            for segment in path {
                match current.get(segment) {
                    Some(next) => current = next,
                    None => return Ok(Value::Null),
                }
            }
            let origin = if path.is_empty() {
                format!("${root}")
            } else {
                format!("${root}.{}", path.join("."))
            };
            Value::from_json(current, &origin)
        }
        Ast::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, vars)?);
            }
            Ok(Value::List(values))
        }
        Ast::Not(inner) => Ok(Value::Bool(!eval(inner, vars)?.is_truthy())),
        Ast::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => {
                let left = eval(lhs, vars)?;
                if !left.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(eval(rhs, vars)?.is_truthy()))
            }
            BinaryOp::Or => {
                let left = eval(lhs, vars)?;
                if left.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(eval(rhs, vars)?.is_truthy()))
            }
            _ => {
                let left = eval(lhs, vars)?;
                let right = eval(rhs, vars)?;
                eval_binary(*op, left, right)
            }
        },
        Ast::Ternary {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, vars)?.is_truthy() {
                eval(then, vars)
            } else {
                eval(otherwise, vars)
            }
        }
    }
}

fn eval_binary(op: BinaryOp, left: Value, right: Value) -> ExprResult<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return Err(ExprError::TypeMismatch(format!(
                    "cannot order {left:?} against {right:?}"
                )));
            };
            let result = match op {
                BinaryOp::Lt => ordering == std::cmp::Ordering::Less,
                BinaryOp::Le => ordering != std::cmp::Ordering::Greater,
                BinaryOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinaryOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In => match (&left, &right) {
            (_, Value::List(items)) => Ok(Value::Bool(items.contains(&left))),
            (Value::String(needle), Value::String(haystack)) => {
                Ok(Value::Bool(haystack.contains(needle.as_str())))
            }
            _ => Err(ExprError::TypeMismatch(format!(
                "cannot test membership of {left:?} in {right:?}"
            ))),
        },
        BinaryOp::Contains => match (&left, &right) {
            (Value::List(items), _) => Ok(Value::Bool(items.contains(&right))),
            (Value::String(haystack), Value::String(needle)) => {
                Ok(Value::Bool(haystack.contains(needle.as_str())))
            }
            _ => Err(ExprError::TypeMismatch(format!(
                "{left:?} cannot contain {right:?}"
            ))),
        },
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited by eval"),
    }
}
