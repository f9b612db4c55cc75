//! Kuba Expr - Expression language for tagged time-series data
//!
//! This library parses and evaluates alerting expressions such as
//! `avg(q("cpu{host=*}", "5m", "")) > 80` over data grouped by tag sets:
//! - Scalars, per-group numbers and per-group series as first-class values
//! - Group joins that pair operands by tag-set subset relation
//! - A pluggable function library with parse-time type and tag checking
//! - Pluggable query backends behind a single-flight query cache
//! - An optional audit trail of every intermediate computation
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use kuba_expr::backend::{Backends, InMemoryBackend};
//! use kuba_expr::{ExecuteContext, Expr, FunctionRegistry, Series, TagSet};
//! use std::sync::Arc;
//!
//! let now = Utc.timestamp_opt(600, 0).unwrap();
//! let backend = InMemoryBackend::new().with_series(
//!     "cpu",
//!     TagSet::parse("host=web-01").unwrap(),
//!     Series::from([(now, 91.0)]),
//! );
//! let ctx = ExecuteContext::new(Backends::new().with("mem", Arc::new(backend))).at(now);
//!
//! let registry = FunctionRegistry::builtin();
//! let expr = Expr::new(r#"avg(q("cpu{host=*}", "5m", "")) > 80"#, &registry).unwrap();
//! let execution = expr.execute(&ctx).unwrap();
//! assert_eq!(execution.results.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alert_key;
pub mod ast;
pub mod backend;
pub mod duration;
pub mod error;
pub mod operators;
pub mod parser;
pub mod results;
pub mod types;
pub mod union;
pub mod value;

/// Single-flight LRU cache for backend responses
pub mod cache;

/// Configuration management with TOML support
pub mod config;

/// Tree-walking evaluator
pub mod eval;

/// Function dispatch contract and the built-in library
pub mod functions;

/// Per-evaluation context: clock, backends, squelch and alert history
pub mod state;

// Re-export main types
pub use alert_key::{AlertKey, AlertKeys};
pub use config::EvalConfig;
pub use error::{BackendError, Error, Result};
pub use eval::{Execution, Expr};
pub use functions::{FuncSpec, FunctionRegistry};
pub use results::{Computation, Results, TaggedValue};
pub use state::ExecuteContext;
pub use types::{TagKeys, TagSet};
pub use value::{Series, Value, ValueType};
