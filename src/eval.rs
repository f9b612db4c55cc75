//! Expression Evaluator
//!
//! Walks a checked AST depth first. Literals become single ungrouped
//! Scalars, binary nodes join their operands with [`union`] and apply the
//! operator to every pair, unary nodes map their operand, and function calls
//! marshal their arguments and dispatch through the [`FuncSpec`] found at
//! parse time.
//!
//! # Example
//!
//! ```rust
//! use kuba_expr::backend::Backends;
//! use kuba_expr::eval::Expr;
//! use kuba_expr::functions::FunctionRegistry;
//! use kuba_expr::state::ExecuteContext;
//!
//! let registry = FunctionRegistry::builtin();
//! let expr = Expr::new("1 == 1", &registry).unwrap();
//! let execution = expr.execute(&ExecuteContext::new(Backends::new())).unwrap();
//! assert_eq!(execution.results.as_single_scalar(), Some(1.0));
//! ```

use crate::ast::{FuncCall, Literal, Node};
use crate::backend::IssuedQuery;
use crate::error::{Error, Result};
use crate::functions::{Args, Argument, FuncSpec, FunctionRegistry};
use crate::operators::{apply_binary, apply_unary, BinaryOp, UnaryOp};
use crate::parser;
use crate::results::{Results, TaggedValue};
use crate::state::{ExecuteContext, State};
use crate::types::TagKeys;
use crate::union::{union, JoinOptions};
use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, debug_span, error, trace};

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Final result set
    pub results: Results,
    /// Backend queries issued, in order
    pub queries: Vec<IssuedQuery>,
}

/// A parsed and checked expression
#[derive(Debug, Clone)]
pub struct Expr {
    text: String,
    root: Node,
}

impl Expr {
    /// Parse `text`, resolving functions in `registry`
    pub fn new(text: &str, registry: &FunctionRegistry) -> Result<Self> {
        let root = parser::parse(text, registry)?;
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    /// Wrap an already built tree, checking it first
    pub fn from_node(root: Node) -> Result<Self> {
        root.check()?;
        if root.return_type() == ValueType::String {
            return Err(Error::Parse(format!("expression {} evaluates to a string", root)));
        }
        Ok(Self {
            text: root.to_string(),
            root,
        })
    }

    /// Source text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Root node
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Static return kind
    pub fn return_type(&self) -> ValueType {
        self.root.return_type()
    }

    /// Tag keys the results will carry, if known statically
    pub fn tags(&self) -> Result<Option<TagKeys>> {
        self.root.tags()
    }

    /// Evaluate once
    ///
    /// # Panics
    ///
    /// Panics on `Error::Internal`, which only a broken function table or
    /// evaluator can produce. Every other error is returned.
    pub fn execute(&self, ctx: &ExecuteContext) -> Result<Execution> {
        let span = debug_span!("execute", expr = %self.text);
        let _enter = span.enter();

        let mut state = State::new(ctx);
        match walk(&mut state, &self.root) {
            Ok(results) => {
                debug!(results = results.len(), queries = state.queries().len(), "evaluated");
                Ok(Execution {
                    results,
                    queries: state.into_queries(),
                })
            }
            Err(e) if e.is_internal() => {
                error!(error = %e, expr = %self.text, "evaluator invariant violated");
                panic!("{}", e);
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Evaluate `node`
pub fn walk(state: &mut State<'_>, node: &Node) -> Result<Results> {
    match node {
        Node::Literal(Literal::Number(v)) => Ok(Results::scalar(*v)),
        Node::Literal(Literal::String(s)) => Err(Error::Internal(format!(
            "string literal \"{}\" evaluated outside a function argument",
            s
        ))),
        Node::Binary { op, left, right } => walk_binary(state, node, *op, left, right),
        Node::Unary { op, operand } => walk_unary(state, node, *op, operand),
        Node::Func(call) => walk_func(state, call),
    }
}

fn walk_binary(
    state: &mut State<'_>,
    node: &Node,
    op: BinaryOp,
    left: &Node,
    right: &Node,
) -> Result<Results> {
    let a = walk(state, left)?;
    let b = walk(state, right)?;
    let text = node.to_string();
    let options = JoinOptions {
        unjoined_ok: state.unjoined_ok(),
        record_computations: state.enable_computations(),
    };

    let mut out = Results::new();
    out.ignore_unjoined = a.ignore_unjoined || b.ignore_unjoined;
    out.ignore_other_unjoined = a.ignore_other_unjoined || b.ignore_other_unjoined;
    for u in union(&a, &b, &text, options) {
        let value = apply_binary(op, &u)?;
        let mut result = TaggedValue {
            value,
            group: u.group,
            computations: u.computations,
        };
        if let Some(v) = result.value.as_f64() {
            state.add_computation(&mut result, text.as_str(), v);
        }
        out.push(result);
    }
    Ok(out)
}

fn walk_unary(state: &mut State<'_>, node: &Node, op: UnaryOp, operand: &Node) -> Result<Results> {
    let input = walk(state, operand)?;
    let text = node.to_string();
    let template = input.with_results(Vec::new());
    let mut out = Vec::with_capacity(input.len());
    for r in input {
        let mut result = TaggedValue {
            value: apply_unary(op, r.value),
            group: r.group,
            computations: r.computations,
        };
        if let Some(v) = result.value.as_f64() {
            state.add_computation(&mut result, text.as_str(), v);
        }
        out.push(result);
    }
    Ok(template.with_results(out))
}

/// Number argument, promoted to a one-entry set for NumberSet parameters
fn number_argument(kind: ValueType, v: f64) -> Argument {
    if kind == ValueType::NumberSet {
        Argument::Results(Results::number(v))
    } else {
        Argument::Number(v)
    }
}

fn marshal(state: &mut State<'_>, spec: &FuncSpec, call: &FuncCall) -> Result<Vec<Argument>> {
    if spec.args.len() != call.args.len() {
        return Err(Error::Internal(format!(
            "{} called with {} arguments, declared {}",
            call.name,
            call.args.len(),
            spec.args.len()
        )));
    }
    let mut args = Vec::with_capacity(call.args.len());
    for (kind, node) in spec.args.iter().zip(&call.args) {
        let arg = match node {
            Node::Literal(Literal::String(s)) => Argument::String(s.clone()),
            Node::Literal(Literal::Number(v)) => number_argument(*kind, *v),
            other => {
                let results = walk(state, other)?;
                match results.as_single_scalar() {
                    Some(v) => number_argument(*kind, v),
                    None => Argument::Results(results),
                }
            }
        };
        args.push(arg);
    }
    Ok(args)
}

fn walk_func(state: &mut State<'_>, call: &FuncCall) -> Result<Results> {
    let span = debug_span!("func", name = %call.name);
    let _enter = span.enter();

    let spec = call.spec.as_ref();
    let args = marshal(state, spec, call)?;
    let mut out = spec.call(state, Args::new(call.name.as_str(), args))?;

    if spec.ret == ValueType::NumberSet && state.enable_computations() {
        let text = Node::Func(call.clone()).to_string();
        for r in out.results.iter_mut() {
            if let Some(v) = r.value.as_f64() {
                state.add_computation(r, text.as_str(), v);
            }
        }
    }
    trace!(results = out.len(), "function returned");
    Ok(out)
}
