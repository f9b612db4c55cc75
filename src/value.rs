//! Runtime value model
//!
//! Three kinds of values flow through the evaluator:
//!
//! - **Scalar**: a literal or constant, not tied to any queried group
//! - **Number**: a per-group reduced measurement
//! - **Series**: a mapping from instant to value
//!
//! Scalar and Number are numerically identical. The distinction drives
//! operator dispatch and which side of a join can be replaced by a NaN
//! placeholder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Time series values ordered by instant
pub type Series = BTreeMap<DateTime<Utc>, f64>;

/// Kind of a value, function argument, or function return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    /// Single ungrouped constant
    Scalar,
    /// Set of per-group numbers
    NumberSet,
    /// Set of per-group series
    SeriesSet,
    /// String literal (function arguments only)
    String,
}

impl ValueType {
    /// True for kinds that evaluate to a `Results`
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ValueType::String)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Scalar => write!(f, "scalar"),
            ValueType::NumberSet => write!(f, "numberSet"),
            ValueType::SeriesSet => write!(f, "seriesSet"),
            ValueType::String => write!(f, "string"),
        }
    }
}

/// A runtime value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    /// Constant value
    Scalar(f64),
    /// Per-group reduced value
    Number(f64),
    /// Instant to value mapping
    Series(Series),
}

impl Value {
    /// Runtime kind of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Scalar(_) => ValueType::Scalar,
            Value::Number(_) => ValueType::NumberSet,
            Value::Series(_) => ValueType::SeriesSet,
        }
    }

    /// Numeric payload of a Scalar or Number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) | Value::Number(v) => Some(*v),
            Value::Series(_) => None,
        }
    }

    /// Borrow the series payload
    pub fn as_series(&self) -> Option<&Series> {
        match self {
            Value::Series(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) | Value::Number(v) => write!(f, "{}", v),
            Value::Series(s) => write!(f, "series({} points)", s.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_value_type() {
        assert_eq!(Value::Scalar(1.0).value_type(), ValueType::Scalar);
        assert_eq!(Value::Number(1.0).value_type(), ValueType::NumberSet);
        assert_eq!(Value::Series(Series::new()).value_type(), ValueType::SeriesSet);
        assert!(!ValueType::String.is_numeric());
    }

    #[test]
    fn test_payloads() {
        assert_eq!(Value::Number(2.5).as_f64(), Some(2.5));
        let mut s = Series::new();
        s.insert(Utc.timestamp_opt(0, 0).unwrap(), 1.0);
        let v = Value::Series(s);
        assert!(v.as_f64().is_none());
        assert_eq!(v.as_series().map(|s| s.len()), Some(1));
    }
}
