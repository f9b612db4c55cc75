//! Tagged results and result collections
//!
//! A [`TaggedValue`] is one value together with the group (tag set) it
//! belongs to and an optional audit trail of intermediate computations.
//! [`Results`] is the ordered collection every expression node produces.

use crate::types::TagSet;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One recorded intermediate computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    /// Expression text
    pub text: String,
    /// Value the expression produced
    pub value: f64,
}

/// A value with its group and audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedValue {
    /// The value
    pub value: Value,
    /// Group this value belongs to (assigned once)
    pub group: TagSet,
    /// Audit trail, only filled when computations are enabled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computations: Vec<Computation>,
}

impl TaggedValue {
    /// Create a tagged value with an empty audit trail
    pub fn new(value: Value, group: TagSet) -> Self {
        Self {
            value,
            group,
            computations: Vec::new(),
        }
    }
}

/// Ordered collection of tagged values
///
/// `ignore_unjoined` and `ignore_other_unjoined` tell the join engine not to
/// synthesize NaN placeholders for this side's unjoined groups, or for the
/// other side's, respectively. `nan_value` replaces NaN in placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Results {
    /// Entries in production order
    pub results: Vec<TaggedValue>,
    /// Suppress placeholders for this side's unjoined groups
    #[serde(default)]
    pub ignore_unjoined: bool,
    /// Suppress placeholders for the other side's unjoined groups
    #[serde(default)]
    pub ignore_other_unjoined: bool,
    /// Substitute used instead of NaN for unjoined placeholders
    #[serde(default)]
    pub nan_value: Option<f64>,
}

impl Results {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Collection holding one ungrouped Scalar
    pub fn scalar(v: f64) -> Self {
        Self::from_values(vec![TaggedValue::new(Value::Scalar(v), TagSet::new())])
    }

    /// Collection holding one ungrouped Number
    pub fn number(v: f64) -> Self {
        Self::from_values(vec![TaggedValue::new(Value::Number(v), TagSet::new())])
    }

    /// Collection over the given entries with default flags
    pub fn from_values(results: Vec<TaggedValue>) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    /// Placeholder value for unjoined groups of the other side
    pub fn nan(&self) -> f64 {
        self.nan_value.unwrap_or(f64::NAN)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Append an entry
    pub fn push(&mut self, value: TaggedValue) {
        self.results.push(value);
    }

    /// Iterate over entries
    pub fn iter(&self) -> std::slice::Iter<'_, TaggedValue> {
        self.results.iter()
    }

    /// The numeric value if this is exactly one ungrouped Scalar
    pub fn as_single_scalar(&self) -> Option<f64> {
        match self.results.as_slice() {
            [only] if only.group.is_empty() => match only.value {
                Value::Scalar(v) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    /// Same flags and NaN substitute, different entries
    pub fn with_results(&self, results: Vec<TaggedValue>) -> Self {
        Self {
            results,
            ignore_unjoined: self.ignore_unjoined,
            ignore_other_unjoined: self.ignore_other_unjoined,
            nan_value: self.nan_value,
        }
    }
}

impl IntoIterator for Results {
    type Item = TaggedValue;
    type IntoIter = std::vec::IntoIter<TaggedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
