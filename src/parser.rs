//! Expression Parser
//!
//! Parses expression text into an AST whose function calls are resolved
//! against a [`FunctionRegistry`].
//!
//! # Supported Syntax
//!
//! ```text
//! # Literals
//! 42    1.5    .5    1e3    "cpu{host=*}"
//!
//! # Function calls
//! avg(q("cpu{host=*}", "1h", ""))
//!
//! # Operators, loosest binding first
//! ||
//! &&
//! == != > < >= <=
//! + -
//! * /
//! ! - (unary)
//! ```
//!
//! Binary operators associate to the left. Parsing runs in two phases: the
//! grammar produces a syntax tree of names, then names are resolved and the
//! tree is type and tag checked with [`Node::check`].

use crate::ast::{FuncCall, Node};
use crate::error::{Error, Result};
use crate::functions::FunctionRegistry;
use crate::operators::{BinaryOp, UnaryOp};
use crate::value::ValueType;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, multispace0, none_of, one_of},
    combinator::{map, map_res, not, recognize, value},
    multi::{fold_many0, many0_count, separated_list0},
    number::complete::recognize_float,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};

// ============================================================================
// Syntax Tree
// ============================================================================

/// Unresolved syntax tree
#[derive(Debug, Clone, PartialEq)]
enum Syntax {
    Number(f64),
    Str(String),
    Binary(BinaryOp, Box<Syntax>, Box<Syntax>),
    Unary(UnaryOp, Box<Syntax>),
    Call(String, Vec<Syntax>),
}

impl Syntax {
    fn binary(op: BinaryOp, left: Syntax, right: Syntax) -> Syntax {
        Syntax::Binary(op, Box::new(left), Box::new(right))
    }

    fn resolve(self, registry: &FunctionRegistry) -> Result<Node> {
        Ok(match self {
            Syntax::Number(v) => Node::number(v),
            Syntax::Str(s) => Node::string(s),
            Syntax::Binary(op, l, r) => {
                Node::binary(op, l.resolve(registry)?, r.resolve(registry)?)
            }
            Syntax::Unary(op, x) => Node::unary(op, x.resolve(registry)?),
            Syntax::Call(name, args) => {
                let spec = registry
                    .get(&name)
                    .ok_or_else(|| Error::UnknownFunction(name.clone()))?;
                let args = args
                    .into_iter()
                    .map(|a| a.resolve(registry))
                    .collect::<Result<Vec<_>>>()?;
                Node::Func(FuncCall { name, args, spec })
            }
        })
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Parse and check an expression
pub fn parse(text: &str, registry: &FunctionRegistry) -> Result<Node> {
    let syntax = parse_syntax(text)?;
    let node = syntax.resolve(registry)?;
    node.check()?;
    if node.return_type() == ValueType::String {
        return Err(Error::Parse(format!(
            "expression {} evaluates to a string",
            node
        )));
    }
    Ok(node)
}

fn parse_syntax(text: &str) -> Result<Syntax> {
    match parse_or(text) {
        Ok((remaining, syntax)) => {
            if remaining.trim().is_empty() {
                Ok(syntax)
            } else {
                Err(Error::Parse(format!(
                    "unexpected '{}' at offset {}",
                    remaining.trim(),
                    text.len() - remaining.trim_start().len()
                )))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(Error::Parse(format!(
            "syntax error at offset {} in '{}'",
            text.len() - e.input.len(),
            text
        ))),
        Err(nom::Err::Incomplete(_)) => {
            Err(Error::Parse(format!("incomplete expression '{}'", text)))
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Skip whitespace around `inner`
fn ws<'a, O, P>(inner: P) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    P: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

fn parse_or(input: &str) -> IResult<&str, Syntax> {
    let (input, first) = parse_and(input)?;
    fold_many0(
        pair(ws(value(BinaryOp::Or, tag("||"))), parse_and),
        move || first.clone(),
        |acc, (op, rhs)| Syntax::binary(op, acc, rhs),
    )
    .parse(input)
}

fn parse_and(input: &str) -> IResult<&str, Syntax> {
    let (input, first) = parse_comparison(input)?;
    fold_many0(
        pair(ws(value(BinaryOp::And, tag("&&"))), parse_comparison),
        move || first.clone(),
        |acc, (op, rhs)| Syntax::binary(op, acc, rhs),
    )
    .parse(input)
}

fn parse_comparison(input: &str) -> IResult<&str, Syntax> {
    let (input, first) = parse_additive(input)?;
    // two-character tokens first
    fold_many0(
        pair(
            ws(alt((
                value(BinaryOp::Eq, tag("==")),
                value(BinaryOp::Ne, tag("!=")),
                value(BinaryOp::Ge, tag(">=")),
                value(BinaryOp::Le, tag("<=")),
                value(BinaryOp::Gt, tag(">")),
                value(BinaryOp::Lt, tag("<")),
            ))),
            parse_additive,
        ),
        move || first.clone(),
        |acc, (op, rhs)| Syntax::binary(op, acc, rhs),
    )
    .parse(input)
}

fn parse_additive(input: &str) -> IResult<&str, Syntax> {
    let (input, first) = parse_multiplicative(input)?;
    fold_many0(
        pair(
            ws(alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-'))))),
            parse_multiplicative,
        ),
        move || first.clone(),
        |acc, (op, rhs)| Syntax::binary(op, acc, rhs),
    )
    .parse(input)
}

fn parse_multiplicative(input: &str) -> IResult<&str, Syntax> {
    let (input, first) = parse_unary(input)?;
    fold_many0(
        pair(
            ws(alt((value(BinaryOp::Mul, char('*')), value(BinaryOp::Div, char('/'))))),
            parse_unary,
        ),
        move || first.clone(),
        |acc, (op, rhs)| Syntax::binary(op, acc, rhs),
    )
    .parse(input)
}

fn parse_unary(input: &str) -> IResult<&str, Syntax> {
    alt((
        map(preceded(ws(char('!')), parse_unary), |x| {
            Syntax::Unary(UnaryOp::Not, Box::new(x))
        }),
        map(preceded(ws(char('-')), parse_unary), |x| {
            Syntax::Unary(UnaryOp::Neg, Box::new(x))
        }),
        parse_primary,
    ))
    .parse(input)
}

// ============================================================================
// Operands
// ============================================================================

fn parse_primary(input: &str) -> IResult<&str, Syntax> {
    ws(alt((
        map(parse_number, Syntax::Number),
        map(parse_string, Syntax::Str),
        parse_call,
        delimited(char('('), parse_or, char(')')),
    )))
    .parse(input)
}

/// Parse number: `1`, `1.5`, `.5`, `1e3`, `2.5E-2`
///
/// Signs are left to the unary operators.
fn parse_number(input: &str) -> IResult<&str, f64> {
    map_res(preceded(not(one_of("+-")), recognize_float), str::parse::<f64>).parse(input)
}

/// Parse string: `"..."` with `\"` and `\\` escapes
fn parse_string(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        fold_many0(
            alt((preceded(char('\\'), one_of("\\\"")), none_of("\\\""))),
            String::new,
            |mut s, c| {
                s.push(c);
                s
            },
        ),
        char('"'),
    )
    .parse(input)
}

/// Parse identifier: letter or underscore, then letters, digits, underscores
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

/// Parse function call: `name(arg, ...)`
fn parse_call(input: &str) -> IResult<&str, Syntax> {
    map(
        pair(
            parse_identifier,
            delimited(
                ws(char('(')),
                separated_list0(ws(char(',')), parse_or),
                ws(char(')')),
            ),
        ),
        |(name, args)| Syntax::Call(name.to_string(), args),
    )
    .parse(input)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::builtin()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_number("42").unwrap().1, 42.0);
        assert_eq!(parse_number("1.5").unwrap().1, 1.5);
        assert_eq!(parse_number(".5").unwrap().1, 0.5);
        assert_eq!(parse_number("1e3").unwrap().1, 1000.0);
        assert_eq!(parse_number("2.5E-2").unwrap().1, 0.025);
        assert_eq!(parse_number("3.").unwrap().1, 3.0);
        assert_eq!(parse_number("0.25"), Ok(("", 0.25)));
        assert!(parse_number("abc").is_err());
        assert!(parse_number("-1").is_err());
    }

    #[test]
    fn test_strings() {
        assert_eq!(parse_string("\"\"").unwrap().1, "");
        assert_eq!(parse_string("\"cpu{host=*}\"").unwrap().1, "cpu{host=*}");
        assert_eq!(parse_string(r#""say \"hi\" \\ ok""#).unwrap().1, r#"say "hi" \ ok"#);
        assert!(parse_string("\"open").is_err());
    }

    #[test]
    fn test_precedence() {
        let node = parse("1 + 2 * 3 > 4 && 1 || 0", &registry()).unwrap();
        assert_eq!(node.to_string(), "1 + 2 * 3 > 4 && 1 || 0");
        match node {
            Node::Binary { op: BinaryOp::Or, left, .. } => match *left {
                Node::Binary { op: BinaryOp::And, left, .. } => match *left {
                    Node::Binary { op: BinaryOp::Gt, left, .. } => {
                        assert!(matches!(*left, Node::Binary { op: BinaryOp::Add, .. }))
                    }
                    other => panic!("expected >, got {}", other),
                },
                other => panic!("expected &&, got {}", other),
            },
            other => panic!("expected ||, got {}", other),
        }
    }

    #[test]
    fn test_left_associative() {
        let syntax = parse_syntax("8 - 4 - 2").unwrap();
        let expected = Syntax::Binary(
            BinaryOp::Sub,
            Box::new(Syntax::Binary(
                BinaryOp::Sub,
                Box::new(Syntax::Number(8.0)),
                Box::new(Syntax::Number(4.0)),
            )),
            Box::new(Syntax::Number(2.0)),
        );
        assert_eq!(syntax, expected);
    }

    #[test]
    fn test_decimal_at_end_of_input() {
        assert_eq!(parse_syntax("0.5").unwrap(), Syntax::Number(0.5));
        assert_eq!(parse("2 > 1.5", &registry()).unwrap().to_string(), "2 > 1.5");
        assert_eq!(parse("1 + 1.5", &registry()).unwrap().to_string(), "1 + 1.5");
        assert_eq!(parse("1 - -.25", &registry()).unwrap().to_string(), "1 - -0.25");
    }

    #[test]
    fn test_unary_and_parens() {
        let node = parse("-(1 + 2)", &registry()).unwrap();
        assert!(matches!(node, Node::Unary { op: UnaryOp::Neg, .. }));
        assert_eq!(node.to_string(), "-(1 + 2)");
        let node = parse("(1 + 2) * (3 - (4 - 5))", &registry()).unwrap();
        assert_eq!(node.to_string(), "(1 + 2) * (3 - (4 - 5))");
        let node = parse("!!1", &registry()).unwrap();
        assert_eq!(node.to_string(), "!!1");
        let node = parse("1 - -1", &registry()).unwrap();
        assert!(matches!(node, Node::Binary { op: BinaryOp::Sub, .. }));
        let node = parse("1 != 2", &registry()).unwrap();
        assert!(matches!(node, Node::Binary { op: BinaryOp::Ne, .. }));
    }

    #[test]
    fn test_function_calls() {
        let node = parse(r#"avg(q("cpu{host=*}", "1h", "")) > 80"#, &registry()).unwrap();
        assert_eq!(node.return_type(), ValueType::NumberSet);
        match &node {
            Node::Binary { left, .. } => match left.as_ref() {
                Node::Func(call) => {
                    assert_eq!(call.name, "avg");
                    match &call.args[0] {
                        Node::Func(inner) => {
                            assert_eq!(inner.name, "q");
                            assert!(matches!(
                                &inner.args[0],
                                Node::Literal(Literal::String(text)) if text == "cpu{host=*}"
                            ));
                        }
                        other => panic!("expected q call, got {}", other),
                    }
                }
                other => panic!("expected avg call, got {}", other),
            },
            other => panic!("expected comparison, got {}", other),
        }
        assert!(parse("epoch()", &registry()).is_ok());
    }

    #[test]
    fn test_parse_errors() {
        let reg = registry();
        assert!(matches!(parse("", &reg), Err(Error::Parse(_))));
        assert!(matches!(parse("1 +", &reg), Err(Error::Parse(_))));
        assert!(matches!(parse("(1", &reg), Err(Error::Parse(_))));
        assert!(matches!(parse("1 % 2", &reg), Err(Error::Parse(_))));
        assert!(matches!(parse("nosuch(1)", &reg), Err(Error::UnknownFunction(_))));
        assert!(matches!(parse("\"text\"", &reg), Err(Error::Parse(_))));
        assert!(matches!(parse("avg(1)", &reg), Err(Error::Parse(_))));
        assert!(matches!(parse("\"a\" + 1", &reg), Err(Error::Parse(_))));
    }

    #[test]
    fn test_tag_check_at_parse_time() {
        let reg = registry();
        let ok = r#"avg(q("cpu{host=*,disk=*}", "1h", "")) / avg(q("cpu{host=*}", "1h", ""))"#;
        assert!(parse(ok, &reg).is_ok());
        let bad = r#"avg(q("cpu{host=*}", "1h", "")) + avg(q("net{dc=*}", "1h", ""))"#;
        assert!(matches!(parse(bad, &reg), Err(Error::Parse(_))));
    }
}
