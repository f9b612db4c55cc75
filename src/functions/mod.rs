//! Function dispatch
//!
//! Every function declares its argument kinds, its return kind, an optional
//! hook that infers output tag keys from the unevaluated argument nodes, and
//! an implementation. The evaluator marshals arguments into a tagged
//! [`Argument`] list and invokes the implementation through the
//! [`Function`] trait; the parser validates calls against the declared kinds
//! before anything is evaluated.
//!
//! # Registering a function
//!
//! ```rust
//! use kuba_expr::functions::{Args, FuncSpec, FunctionRegistry};
//! use kuba_expr::results::Results;
//! use kuba_expr::state::State;
//! use kuba_expr::value::ValueType;
//! use kuba_expr::Result;
//!
//! fn double(_: &mut State<'_>, mut args: Args) -> Result<Results> {
//!     Ok(Results::scalar(args.number()? * 2.0))
//! }
//!
//! let mut registry = FunctionRegistry::builtin();
//! registry
//!     .register("double", FuncSpec::new(vec![ValueType::Scalar], ValueType::Scalar, double))
//!     .unwrap();
//! assert!(registry.get("double").is_some());
//! ```

pub mod builtin;
pub mod query;
pub mod reduce;

use crate::ast::Node;
use crate::error::{Error, Result};
use crate::results::Results;
use crate::state::State;
use crate::types::TagKeys;
use crate::value::ValueType;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Infers output tag keys from argument nodes without evaluating them
pub type TagsFn = fn(&[Node]) -> Result<TagKeys>;

/// A marshaled function argument
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// Number literal or auto-unwrapped single Scalar
    Number(f64),
    /// String literal
    String(String),
    /// Evaluated result set
    Results(Results),
}

impl Argument {
    fn kind(&self) -> &'static str {
        match self {
            Argument::Number(_) => "number",
            Argument::String(_) => "string",
            Argument::Results(_) => "result set",
        }
    }
}

/// Positional argument reader handed to implementations
#[derive(Debug)]
pub struct Args {
    func: String,
    position: usize,
    args: std::vec::IntoIter<Argument>,
}

impl Args {
    /// Wrap marshaled arguments for function `func`
    pub fn new(func: impl Into<String>, args: Vec<Argument>) -> Self {
        Self {
            func: func.into(),
            position: 0,
            args: args.into_iter(),
        }
    }

    /// Name of the called function
    pub fn func(&self) -> &str {
        &self.func
    }

    fn next(&mut self) -> Result<Argument> {
        self.position += 1;
        self.args.next().ok_or_else(|| {
            Error::argument(&self.func, format!("missing argument {}", self.position))
        })
    }

    fn mismatch(&self, want: &str, got: &Argument) -> Error {
        Error::argument(
            &self.func,
            format!("argument {} must be a {}, got a {}", self.position, want, got.kind()),
        )
    }

    /// Next argument as a number
    pub fn number(&mut self) -> Result<f64> {
        match self.next()? {
            Argument::Number(v) => Ok(v),
            other => Err(self.mismatch("number", &other)),
        }
    }

    /// Next argument as a string
    pub fn string(&mut self) -> Result<String> {
        match self.next()? {
            Argument::String(s) => Ok(s),
            other => Err(self.mismatch("string", &other)),
        }
    }

    /// Next argument as a result set
    pub fn results(&mut self) -> Result<Results> {
        match self.next()? {
            Argument::Results(r) => Ok(r),
            other => Err(self.mismatch("result set", &other)),
        }
    }
}

/// Function implementation
pub trait Function: Send + Sync {
    /// Invoke with the evaluation state and marshaled arguments
    fn call(&self, state: &mut State<'_>, args: Args) -> Result<Results>;
}

impl<F> Function for F
where
    F: Fn(&mut State<'_>, Args) -> Result<Results> + Send + Sync,
{
    fn call(&self, state: &mut State<'_>, args: Args) -> Result<Results> {
        self(state, args)
    }
}

/// Function descriptor
pub struct FuncSpec {
    /// Declared argument kinds
    pub args: Vec<ValueType>,
    /// Declared return kind
    pub ret: ValueType,
    /// Static tag inference hook
    pub tags: Option<TagsFn>,
    imp: Arc<dyn Function>,
}

impl FuncSpec {
    /// Describe a function implemented by a closure or fn item
    pub fn new<F>(args: Vec<ValueType>, ret: ValueType, imp: F) -> Self
    where
        F: Fn(&mut State<'_>, Args) -> Result<Results> + Send + Sync + 'static,
    {
        Self::with_function(args, ret, Arc::new(imp))
    }

    /// Describe a function implemented by a [`Function`] object
    pub fn with_function(args: Vec<ValueType>, ret: ValueType, imp: Arc<dyn Function>) -> Self {
        Self {
            args,
            ret,
            tags: None,
            imp,
        }
    }

    /// Attach a tag inference hook
    pub fn with_tags(mut self, hook: TagsFn) -> Self {
        self.tags = Some(hook);
        self
    }

    /// Invoke the implementation
    pub fn call(&self, state: &mut State<'_>, args: Args) -> Result<Results> {
        self.imp.call(state, args)
    }
}

impl fmt::Debug for FuncSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncSpec")
            .field("args", &self.args)
            .field("ret", &self.ret)
            .field("tags", &self.tags.is_some())
            .finish()
    }
}

/// Function table consulted by the parser
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<FuncSpec>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in function library
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        reduce::register(&mut registry);
        builtin::register(&mut registry);
        query::register(&mut registry);
        registry
    }

    /// Register a function, validating its schema
    ///
    /// Names must be identifiers and unique; functions cannot return strings.
    pub fn register(&mut self, name: &str, spec: FuncSpec) -> Result<()> {
        let valid_name = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(Error::Configuration(format!("invalid function name '{}'", name)));
        }
        if self.functions.contains_key(name) {
            return Err(Error::Configuration(format!("function '{}' already registered", name)));
        }
        if spec.ret == ValueType::String {
            return Err(Error::Configuration(format!(
                "function '{}' cannot return a string",
                name
            )));
        }
        self.functions.insert(name.to_string(), Arc::new(spec));
        Ok(())
    }

    /// Built-in registration; names and kinds are known valid
    pub(crate) fn insert(&mut self, name: &str, spec: FuncSpec) {
        debug_assert!(spec.ret != ValueType::String);
        self.functions.insert(name.to_string(), Arc::new(spec));
    }

    /// Look up a function
    pub fn get(&self, name: &str) -> Option<Arc<FuncSpec>> {
        self.functions.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Tag hook: keys of the first argument
pub(crate) fn tags_of_first(args: &[Node]) -> Result<TagKeys> {
    match args.first() {
        Some(node) => Ok(node.tags()?.unwrap_or_default()),
        None => Ok(TagKeys::new()),
    }
}
