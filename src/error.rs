//! Error types for expression parsing and evaluation

use crate::value::ValueType;
use thiserror::Error;

/// Main error type for expression parsing and evaluation
#[derive(Error, Debug)]
pub enum Error {
    /// Expression text could not be parsed or failed pre-flight checks
    #[error("Parse error: {0}")]
    Parse(String),

    /// Alert key is not of the form `name{tags}`
    #[error("Invalid alert key: {0}")]
    InvalidAlertKey(String),

    /// Tag string is not of the form `k=v,k2=v2`
    #[error("Invalid tags: {0}")]
    InvalidTags(String),

    /// Duration such as `1h` or `30m` is malformed or reaches outside the time range
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Function name is not registered
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Function received an argument it cannot use
    #[error("Invalid argument to {func}: {message}")]
    Argument {
        /// Function name
        func: String,
        /// What was wrong with the argument
        message: String,
    },

    /// Operator applied to operand kinds it does not support
    #[error("Unknown operator: {left} {op} {right}")]
    UnknownOperator {
        /// Operator token
        op: String,
        /// Kind of the left operand
        left: ValueType,
        /// Kind of the right operand
        right: ValueType,
    },

    /// A reducer that needs data received an empty series
    #[error("Empty series in {expr} for group {group}")]
    EmptySeries {
        /// Expression being evaluated
        expr: String,
        /// Offending group
        group: String,
    },

    /// An operation required results but got none
    #[error("No results: {0}")]
    NoResults(String),

    /// Backend query failed
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Evaluator invariant violated (a bug, not a user error)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an argument error
    pub fn argument(func: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Argument {
            func: func.into(),
            message: message.into(),
        }
    }

    /// True if this error indicates a bug in the evaluator or function table
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}

/// Backend errors
///
/// Cloneable so that callers waiting on a shared cache computation can all
/// receive the failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// No backend registered under the requested name
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Backend could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Query text was rejected
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    /// Query ran but the backend reported a failure
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownOperator {
            op: "+".to_string(),
            left: ValueType::SeriesSet,
            right: ValueType::SeriesSet,
        };
        let display = err.to_string();
        assert!(display.contains("Unknown operator"));
        assert!(display.contains("seriesSet + seriesSet"));
    }

    #[test]
    fn test_backend_error_conversion() {
        let err: Error = BackendError::Unavailable("tsdb-1".to_string()).into();
        assert!(matches!(err, Error::Backend(BackendError::Unavailable(_))));
        assert!(!err.is_internal());
        assert!(Error::Internal("bad".to_string()).is_internal());
    }
}
