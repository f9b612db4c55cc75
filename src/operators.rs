//! Binary and unary operators
//!
//! Operators are applied per matched [`Union`] and dispatched on the runtime
//! kinds of both operands:
//!
//! | left \ right | Scalar | Number | Series     |
//! |--------------|--------|--------|------------|
//! | Scalar       | Scalar | Number | Series     |
//! | Number       | Number | Number | Series     |
//! | Series       | Series | Series | unsupported|

use crate::error::{Error, Result};
use crate::union::Union;
use crate::value::{Series, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators, lowest precedence last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    /// Operator token
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Ge => ">=",
            BinaryOp::Le => "<=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Binding strength, higher binds tighter
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Gt
            | BinaryOp::Lt
            | BinaryOp::Ge
            | BinaryOp::Le => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div => 5,
        }
    }

    /// Look up an operator by token
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            ">" => BinaryOp::Gt,
            "<" => BinaryOp::Lt,
            ">=" => BinaryOp::Ge,
            "<=" => BinaryOp::Le,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            _ => return None,
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Neg,
}

impl UnaryOp {
    /// Operator token
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Apply a binary operator to two numbers
///
/// `||` and `&&` short-circuit before the NaN check: `||` yields 1 when
/// either operand is non-zero (NaN is non-zero), `&&` yields 0 when the left
/// operand is zero. Any other NaN operand yields NaN.
pub fn operate(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Or => return truth(a != 0.0 || b != 0.0),
        BinaryOp::And if a == 0.0 => return 0.0,
        _ => {}
    }
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Eq => truth(a == b),
        BinaryOp::Ne => truth(a != b),
        BinaryOp::Gt => truth(a > b),
        BinaryOp::Lt => truth(a < b),
        BinaryOp::Ge => truth(a >= b),
        BinaryOp::Le => truth(a <= b),
        BinaryOp::And => truth(a != 0.0 && b != 0.0),
        BinaryOp::Or => truth(a != 0.0 || b != 0.0),
    }
}

/// Apply a unary operator to a number
pub fn uoperate(op: UnaryOp, a: f64) -> f64 {
    match op {
        UnaryOp::Not => truth(a == 0.0),
        UnaryOp::Neg => -a,
    }
}

fn map_series(series: &Series, f: impl Fn(f64) -> f64) -> Series {
    series.iter().map(|(t, v)| (*t, f(*v))).collect()
}

/// Apply a binary operator to a matched pair
///
/// Series⊗Series is rejected with `UnknownOperator`.
pub fn apply_binary(op: BinaryOp, union: &Union) -> Result<Value> {
    let value = match (&union.a, &union.b) {
        (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(operate(op, *a, *b)),
        (Value::Scalar(a) | Value::Number(a), Value::Scalar(b) | Value::Number(b)) => {
            Value::Number(operate(op, *a, *b))
        }
        (Value::Scalar(a) | Value::Number(a), Value::Series(s)) => {
            Value::Series(map_series(s, |v| operate(op, *a, v)))
        }
        (Value::Series(s), Value::Scalar(b) | Value::Number(b)) => {
            Value::Series(map_series(s, |v| operate(op, v, *b)))
        }
        (Value::Series(_), Value::Series(_)) => {
            return Err(Error::UnknownOperator {
                op: op.to_string(),
                left: union.a.value_type(),
                right: union.b.value_type(),
            })
        }
    };
    Ok(value)
}

/// Apply a unary operator to a value
///
/// A NaN Scalar stays NaN.
pub fn apply_unary(op: UnaryOp, value: Value) -> Value {
    match value {
        Value::Scalar(a) if a.is_nan() => Value::Scalar(f64::NAN),
        Value::Scalar(a) => Value::Scalar(uoperate(op, a)),
        Value::Number(a) => Value::Number(uoperate(op, a)),
        Value::Series(s) => Value::Series(map_series(&s, |v| uoperate(op, v))),
    }
}
