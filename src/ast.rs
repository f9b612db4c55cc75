//! Expression Abstract Syntax Tree (AST)
//!
//! # Node Types
//!
//! - **Literal**: number or string constant
//! - **Binary**: `left op right`
//! - **Unary**: `op operand`
//! - **Func**: call of a registered function, carrying its [`FuncSpec`]
//!
//! Nodes know their static return kind and can infer the tag keys their
//! results will carry without evaluating anything. The parser runs
//! [`Node::check`] on every tree it builds, so type and tag mistakes surface
//! before any backend is queried.

use crate::error::{Error, Result};
use crate::functions::FuncSpec;
use crate::operators::{BinaryOp, UnaryOp};
use crate::types::TagKeys;
use crate::value::ValueType;
use std::fmt;
use std::sync::Arc;

/// Literal constant
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Numeric constant
    Number(f64),
    /// String constant (function arguments only)
    String(String),
}

/// Function call node
#[derive(Debug, Clone)]
pub struct FuncCall {
    /// Function name as written
    pub name: String,
    /// Argument expressions
    pub args: Vec<Node>,
    /// Resolved function descriptor
    pub spec: Arc<FuncSpec>,
}

/// Expression tree node
#[derive(Debug, Clone)]
pub enum Node {
    /// Constant
    Literal(Literal),
    /// Binary operator
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Node>,
        /// Right operand
        right: Box<Node>,
    },
    /// Unary operator
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Node>,
    },
    /// Function call
    Func(FuncCall),
}

impl Node {
    /// Numeric literal
    pub fn number(v: f64) -> Self {
        Node::Literal(Literal::Number(v))
    }

    /// String literal
    pub fn string(s: impl Into<String>) -> Self {
        Node::Literal(Literal::String(s.into()))
    }

    /// Binary node
    pub fn binary(op: BinaryOp, left: Node, right: Node) -> Self {
        Node::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Unary node
    pub fn unary(op: UnaryOp, operand: Node) -> Self {
        Node::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// Static return kind
    pub fn return_type(&self) -> ValueType {
        match self {
            Node::Literal(Literal::Number(_)) => ValueType::Scalar,
            Node::Literal(Literal::String(_)) => ValueType::String,
            Node::Binary { left, right, .. } => {
                let (l, r) = (left.return_type(), right.return_type());
                if l == ValueType::SeriesSet || r == ValueType::SeriesSet {
                    ValueType::SeriesSet
                } else if l == ValueType::NumberSet || r == ValueType::NumberSet {
                    ValueType::NumberSet
                } else {
                    ValueType::Scalar
                }
            }
            Node::Unary { operand, .. } => operand.return_type(),
            Node::Func(call) => call.spec.ret,
        }
    }

    /// Tag keys the results of this node will carry
    ///
    /// `None` means the node produces ungrouped values or its keys cannot be
    /// known statically. For binary nodes the more specific side wins; sides
    /// that can never join are an error.
    pub fn tags(&self) -> Result<Option<TagKeys>> {
        match self {
            Node::Literal(_) => Ok(None),
            Node::Unary { operand, .. } => operand.tags(),
            Node::Binary { left, right, .. } => {
                let (l, r) = match (left.tags()?, right.tags()?) {
                    (None, other) | (other, None) => return Ok(other),
                    (Some(l), Some(r)) => (l, r),
                };
                if l.is_empty() {
                    Ok(Some(r))
                } else if r.is_empty() {
                    Ok(Some(l))
                } else if r.is_subset(&l) {
                    Ok(Some(r))
                } else if l.is_subset(&r) {
                    Ok(Some(l))
                } else {
                    Err(Error::Parse(format!(
                        "incompatible tags {:?} and {:?} in {}",
                        l, r, self
                    )))
                }
            }
            Node::Func(call) => match call.spec.tags {
                Some(hook) => hook(&call.args).map(Some),
                None => Ok(None),
            },
        }
    }

    /// Validate kinds and tags of the whole tree
    pub fn check(&self) -> Result<()> {
        match self {
            Node::Literal(_) => Ok(()),
            Node::Unary { operand, .. } => {
                operand.check()?;
                if !operand.return_type().is_numeric() {
                    return Err(Error::Parse(format!(
                        "type error in {}: operand is a string",
                        self
                    )));
                }
                Ok(())
            }
            Node::Binary { left, right, .. } => {
                left.check()?;
                right.check()?;
                let (l, r) = (left.return_type(), right.return_type());
                if !l.is_numeric() || !r.is_numeric() {
                    return Err(Error::Parse(format!(
                        "type error in {}: operand is a string",
                        self
                    )));
                }
                if l == ValueType::SeriesSet && r == ValueType::SeriesSet {
                    return Err(Error::Parse(format!(
                        "type error in {}: at least one side must be a number",
                        self
                    )));
                }
                self.tags().map(|_| ())
            }
            Node::Func(call) => {
                call.check()?;
                self.tags().map(|_| ())
            }
        }
    }
}

impl FuncCall {
    fn check(&self) -> Result<()> {
        let expected = &self.spec.args;
        if expected.len() != self.args.len() {
            return Err(Error::Parse(format!(
                "{}: expected {} arguments, got {}",
                self.name,
                expected.len(),
                self.args.len()
            )));
        }
        for (i, (want, arg)) in expected.iter().zip(&self.args).enumerate() {
            arg.check()?;
            let got = arg.return_type();
            let ok = match want {
                ValueType::String => matches!(arg, Node::Literal(Literal::String(_))),
                ValueType::Scalar => got == ValueType::Scalar,
                ValueType::NumberSet => matches!(got, ValueType::Scalar | ValueType::NumberSet),
                ValueType::SeriesSet => got == ValueType::SeriesSet,
            };
            if !ok {
                return Err(Error::Parse(format!(
                    "{}: argument {} must be {}, got {}",
                    self.name,
                    i + 1,
                    want,
                    got
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(v) => write!(f, "{}", v),
            Literal::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

impl Node {
    /// Write `self` as an operand, parenthesized when it binds looser than `min`
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        match self {
            Node::Binary { op, .. } if op.precedence() < min => write!(f, "({})", self),
            _ => write!(f, "{}", self),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Literal(lit) => write!(f, "{}", lit),
            Node::Binary { op, left, right } => {
                // binary operators associate left
                left.fmt_operand(f, op.precedence())?;
                write!(f, " {} ", op)?;
                right.fmt_operand(f, op.precedence() + 1)
            }
            Node::Unary { op, operand } => {
                write!(f, "{}", op)?;
                operand.fmt_operand(f, u8::MAX)
            }
            Node::Func(call) => {
                write!(f, "{}(", call.name)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;

    fn call(registry: &FunctionRegistry, name: &str, args: Vec<Node>) -> Node {
        Node::Func(FuncCall {
            name: name.to_string(),
            args,
            spec: registry.get(name).unwrap(),
        })
    }

    #[test]
    fn test_display() {
        let node = Node::binary(
            BinaryOp::Gt,
            Node::unary(UnaryOp::Neg, Node::number(1.0)),
            Node::number(0.5),
        );
        assert_eq!(node.to_string(), "-1 > 0.5");

        let registry = FunctionRegistry::builtin();
        let q = call(
            &registry,
            "q",
            vec![Node::string("cpu{host=*}"), Node::string("1h"), Node::string("")],
        );
        assert_eq!(q.to_string(), "q(\"cpu{host=*}\", \"1h\", \"\")");
    }

    #[test]
    fn test_return_type() {
        let registry = FunctionRegistry::builtin();
        let q = call(
            &registry,
            "q",
            vec![Node::string("cpu{host=*}"), Node::string("1h"), Node::string("")],
        );
        let avg = call(&registry, "avg", vec![q.clone()]);
        assert_eq!(Node::number(1.0).return_type(), ValueType::Scalar);
        assert_eq!(q.return_type(), ValueType::SeriesSet);
        assert_eq!(avg.return_type(), ValueType::NumberSet);
        assert_eq!(
            Node::binary(BinaryOp::Add, avg, Node::number(1.0)).return_type(),
            ValueType::NumberSet
        );
    }

    #[test]
    fn test_tag_inference() {
        let registry = FunctionRegistry::builtin();
        let by_host = call(
            &registry,
            "q",
            vec![Node::string("cpu{host=*}"), Node::string("1h"), Node::string("")],
        );
        let by_host_disk = call(
            &registry,
            "q",
            vec![Node::string("disk{host=*,disk=*}"), Node::string("1h"), Node::string("")],
        );
        let by_dc = call(
            &registry,
            "q",
            vec![Node::string("net{dc=*}"), Node::string("1h"), Node::string("")],
        );

        let keys = by_host.tags().unwrap().unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["host".to_string()]);

        let mixed = Node::binary(
            BinaryOp::Add,
            call(&registry, "avg", vec![by_host_disk]),
            call(&registry, "avg", vec![by_host.clone()]),
        );
        let keys = mixed.tags().unwrap().unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["host".to_string()]);

        let bad = Node::binary(
            BinaryOp::Add,
            call(&registry, "avg", vec![by_host]),
            call(&registry, "avg", vec![by_dc]),
        );
        assert!(bad.tags().is_err());
        assert!(bad.check().is_err());

        assert!(Node::number(1.0).tags().unwrap().is_none());
    }

    #[test]
    fn test_check_argument_kinds() {
        let registry = FunctionRegistry::builtin();
        let wrong_count = call(&registry, "avg", vec![]);
        assert!(wrong_count.check().is_err());

        let wrong_kind = call(&registry, "avg", vec![Node::number(1.0)]);
        assert!(wrong_kind.check().is_err());

        let series = call(
            &registry,
            "q",
            vec![Node::string("cpu{host=*}"), Node::string("1h"), Node::string("")],
        );
        let series_series = Node::binary(BinaryOp::Add, series.clone(), series);
        assert!(series_series.check().is_err());
    }
}
