//! # Template Expressions
//!
//! AST and hand-written precedence-climbing parser for the expressions that
//! appear inside mustache tags and block arguments.
//!
//! Grammar summary:
//! - literals: numbers (decimal, exponent, hex), quoted strings, `true`,
//!   `false`, `null`, `undefined`
//! - `this` or a lone `.` for the current frame, `.name` for a property of the
//!   current frame, `../name` for a property of the parent frame
//! - member access (`a.b`, `a[b]`), calls (`f(x, y)`), unary `+ - ~ !`
//! - binary operators by ascending precedence: `||`, `&&`, `|`, `^`, `&`,
//!   equality, relational, shift, additive, multiplicative
//! - several expressions separated by commas or whitespace form a compound
//!   whose value is the first one

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Undefined,
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Number(n) => Value::Number(*n),
            Literal::String(s) => Value::string(s),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
            Literal::Undefined => Value::Undefined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
    #[serde(rename = "~")]
    BitNot,
    #[serde(rename = "!")]
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "===")]
    StrictEq,
    #[serde(rename = "!==")]
    StrictNe,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
    #[serde(rename = "^")]
    BitXor,
    #[serde(rename = "&")]
    BitAnd,
    #[serde(rename = "|")]
    BitOr,
    #[serde(rename = "<<")]
    Shl,
    #[serde(rename = ">>")]
    Shr,
    #[serde(rename = ">>>")]
    UShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Expr {
    Literal {
        value: Literal,
    },
    Identifier {
        name: String,
    },
    Member {
        object: Box<Expr>,
        property: Box<Expr>,
        computed: bool,
    },
    Unary {
        operator: UnaryOp,
        argument: Box<Expr>,
    },
    Binary {
        operator: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        operator: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    This,
    CurrentLevel {
        name: String,
    },
    ParentLevel {
        name: String,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    Compound {
        body: Vec<Expr>,
    },
}

impl Expr {
    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at offset {offset}")]
pub struct ExpressionError {
    pub message: String,
    pub offset: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

impl Operator {
    fn precedence(self) -> u8 {
        match self {
            Operator::Logical(LogicalOp::Or) => 1,
            Operator::Logical(LogicalOp::And) => 2,
            Operator::Binary(op) => match op {
                BinaryOp::BitOr => 3,
                BinaryOp::BitXor => 4,
                BinaryOp::BitAnd => 5,
                BinaryOp::StrictEq | BinaryOp::StrictNe | BinaryOp::Eq | BinaryOp::Ne => 6,
                BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => 7,
                BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => 8,
                BinaryOp::Add | BinaryOp::Sub => 9,
                BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 10,
            },
        }
    }

    fn combine(self, left: Expr, right: Expr) -> Expr {
        let (left, right) = (Box::new(left), Box::new(right));
        match self {
            Operator::Binary(operator) => Expr::Binary {
                operator,
                left,
                right,
            },
            Operator::Logical(operator) => Expr::Logical {
                operator,
                left,
                right,
            },
        }
    }
}

/// Longest symbols first so `>>>` wins over `>>` and `>`.
const OPERATORS: &[(&str, Operator)] = &[
    (">>>", Operator::Binary(BinaryOp::UShr)),
    ("===", Operator::Binary(BinaryOp::StrictEq)),
    ("!==", Operator::Binary(BinaryOp::StrictNe)),
    ("==", Operator::Binary(BinaryOp::Eq)),
    ("!=", Operator::Binary(BinaryOp::Ne)),
    (">=", Operator::Binary(BinaryOp::Ge)),
    ("<=", Operator::Binary(BinaryOp::Le)),
    ("<<", Operator::Binary(BinaryOp::Shl)),
    (">>", Operator::Binary(BinaryOp::Shr)),
    ("&&", Operator::Logical(LogicalOp::And)),
    ("||", Operator::Logical(LogicalOp::Or)),
    (">", Operator::Binary(BinaryOp::Gt)),
    ("<", Operator::Binary(BinaryOp::Lt)),
    ("+", Operator::Binary(BinaryOp::Add)),
    ("-", Operator::Binary(BinaryOp::Sub)),
    ("*", Operator::Binary(BinaryOp::Mul)),
    ("/", Operator::Binary(BinaryOp::Div)),
    ("%", Operator::Binary(BinaryOp::Rem)),
    ("^", Operator::Binary(BinaryOp::BitXor)),
    ("&", Operator::Binary(BinaryOp::BitAnd)),
    ("|", Operator::Binary(BinaryOp::BitOr)),
];

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parse_expression(source: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser {
        chars: source.chars().collect(),
        pos: 0,
    };
    parser.parse_compound()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with(&self, symbol: &str) -> bool {
        symbol
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError {
            message: message.into(),
            offset: self.pos,
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ExpressionError> {
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}'", c)))
        }
    }

    fn parse_compound(&mut self) -> Result<Expr, ExpressionError> {
        let mut body = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(',') | Some(';') => self.pos += 1,
                Some(_) => body.push(self.parse_binary(1)?),
            }
        }
        match body.len() {
            0 => Err(self.error("Empty expression")),
            1 => Ok(body.remove(0)),
            _ => Ok(Expr::Compound { body }),
        }
    }

    fn peek_operator(&self) -> Option<(Operator, usize)> {
        OPERATORS
            .iter()
            .find(|(symbol, _)| self.starts_with(symbol))
            .map(|(symbol, op)| (*op, symbol.len()))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let Some((operator, width)) = self.peek_operator() else {
                break;
            };
            if operator.precedence() < min_precedence {
                break;
            }
            self.pos += width;
            let right = self.parse_binary(operator.precedence() + 1)?;
            left = operator.combine(left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_whitespace();
        let operator = match self.peek() {
            Some('+') => UnaryOp::Plus,
            Some('-') => UnaryOp::Minus,
            Some('~') => UnaryOp::BitNot,
            Some('!') => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        let argument = self.parse_unary()?;
        Ok(Expr::Unary {
            operator,
            argument: Box::new(argument),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some('.') if self.peek_at(1).map_or(false, is_identifier_start) => {
                    self.pos += 1;
                    let name = self.parse_identifier_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(Expr::Identifier { name }),
                        computed: false,
                    };
                }
                Some('[') => {
                    self.pos += 1;
                    let property = self.parse_binary(1)?;
                    self.expect(']')?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(property),
                        computed: true,
                    };
                }
                Some('(') => {
                    self.pos += 1;
                    let arguments = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        arguments,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut arguments = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(')') => {
                    self.pos += 1;
                    return Ok(arguments);
                }
                Some(',') if !arguments.is_empty() => self.pos += 1,
                None => return Err(self.error("Unclosed argument list")),
                Some(_) => arguments.push(self.parse_binary(1)?),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_whitespace();
        let Some(c) = self.peek() else {
            return Err(self.error("Unexpected end of expression"));
        };
        match c {
            '0'..='9' => self.parse_number(),
            '.' if self.peek_at(1).map_or(false, |d| d.is_ascii_digit()) => self.parse_number(),
            '"' | '\'' => self.parse_string(c),
            '(' => {
                self.pos += 1;
                let inner = self.parse_binary(1)?;
                self.expect(')')?;
                Ok(inner)
            }
            '.' => self.parse_relative(),
            c if is_identifier_start(c) => {
                let name = self.parse_identifier_name()?;
                Ok(match name.as_str() {
                    "true" => Expr::Literal {
                        value: Literal::Bool(true),
                    },
                    "false" => Expr::Literal {
                        value: Literal::Bool(false),
                    },
                    "null" => Expr::Literal {
                        value: Literal::Null,
                    },
                    "undefined" => Expr::Literal {
                        value: Literal::Undefined,
                    },
                    "this" => Expr::This,
                    _ => Expr::Identifier { name },
                })
            }
            other => Err(self.error(format!("Unexpected '{}'", other))),
        }
    }

    /// `.`, `.name` and `../name`.
    fn parse_relative(&mut self) -> Result<Expr, ExpressionError> {
        if self.starts_with("../") {
            self.pos += 3;
            let name = self.parse_identifier_name()?;
            return Ok(Expr::ParentLevel { name });
        }
        self.pos += 1;
        if self.peek().map_or(false, is_identifier_start) {
            let name = self.parse_identifier_name()?;
            Ok(Expr::CurrentLevel { name })
        } else {
            Ok(Expr::This)
        }
    }

    fn parse_identifier_name(&mut self) -> Result<String, ExpressionError> {
        if !self.peek().map_or(false, is_identifier_start) {
            return Err(self.error("Expected identifier"));
        }
        let start = self.pos;
        while self.peek().map_or(false, is_identifier_part) {
            self.pos += 1;
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_number(&mut self) -> Result<Expr, ExpressionError> {
        let start = self.pos;
        if self.starts_with("0x") || self.starts_with("0X") {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().map_or(false, |c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            let value = u64::from_str_radix(&digits, 16)
                .map_err(|_| self.error("Invalid hexadecimal literal"))?;
            return Ok(Expr::Literal {
                value: Literal::Number(value as f64),
            });
        }

        let digits = |parser: &mut Parser| {
            while parser.peek().map_or(false, |c| c.is_ascii_digit()) {
                parser.pos += 1;
            }
        };
        digits(self);
        if self.peek() == Some('.') && self.peek_at(1).map_or(true, |c| !is_identifier_start(c)) {
            self.pos += 1;
            digits(self);
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+') | Some('-')));
            if self.peek_at(1 + sign).map_or(false, |c| c.is_ascii_digit()) {
                self.pos += 1 + sign;
                digits(self);
            } else {
                return Err(self.error("Expected exponent"));
            }
        }
        if self.peek().map_or(false, is_identifier_start) {
            return Err(self.error("Identifier directly after number"));
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("Invalid number '{}'", text)))?;
        Ok(Expr::Literal {
            value: Literal::Number(value),
        })
    }

    fn parse_string(&mut self, quote: char) -> Result<Expr, ExpressionError> {
        self.pos += 1;
        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error(format!("Unclosed quote after \"{}\"", value)));
            };
            self.pos += 1;
            if c == quote {
                break;
            }
            if c != '\\' {
                value.push(c);
                continue;
            }
            let Some(escaped) = self.peek() else {
                return Err(self.error("Unterminated escape"));
            };
            self.pos += 1;
            match escaped {
                'n' => value.push('\n'),
                'r' => value.push('\r'),
                't' => value.push('\t'),
                'b' => value.push('\u{8}'),
                'f' => value.push('\u{c}'),
                'v' => value.push('\u{b}'),
                'u' => {
                    let hex: String = self.chars.iter().skip(self.pos).take(4).collect();
                    let decoded = u32::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 4)
                        .and_then(char::from_u32)
                        .ok_or_else(|| self.error("Invalid unicode escape"))?;
                    self.pos += 4;
                    value.push(decoded);
                }
                other => value.push(other),
            }
        }
        Ok(Expr::Literal {
            value: Literal::String(value),
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value } => match value {
                Literal::String(s) => write!(f, "{:?}", s),
                other => write!(f, "{}", other.to_value().to_js_string()),
            },
            Expr::Identifier { name } => write!(f, "{}", name),
            Expr::Member {
                object,
                property,
                computed: false,
            } => write!(f, "{}.{}", object, property),
            Expr::Member {
                object, property, ..
            } => write!(f, "{}[{}]", object, property),
            Expr::Unary { operator, argument } => {
                let symbol = match operator {
                    UnaryOp::Plus => "+",
                    UnaryOp::Minus => "-",
                    UnaryOp::BitNot => "~",
                    UnaryOp::Not => "!",
                };
                write!(f, "{}{}", symbol, argument)
            }
            Expr::Binary {
                operator,
                left,
                right,
            } => {
                let symbol = OPERATORS
                    .iter()
                    .find(|(_, op)| matches!(op, Operator::Binary(b) if b == operator))
                    .map_or("?", |(symbol, _)| *symbol);
                write!(f, "({} {} {})", left, symbol, right)
            }
            Expr::Logical {
                operator,
                left,
                right,
            } => {
                let symbol = match operator {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                };
                write!(f, "({} {} {})", left, symbol, right)
            }
            Expr::This => write!(f, "this"),
            Expr::CurrentLevel { name } => write!(f, ".{}", name),
            Expr::ParentLevel { name } => write!(f, "../{}", name),
            Expr::Call { callee, arguments } => {
                write!(f, "{}(", callee)?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", argument)?;
                }
                write!(f, ")")
            }
            Expr::Compound { body } => {
                let parts: Vec<String> = body.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}
