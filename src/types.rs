//! Tag sets identifying time series
//!
//! # Key Types
//!
//! - **`TagSet`**: Key-value dimensions of a series or result group (e.g., host=server1)
//! - **`TagKeys`**: Sorted set of tag keys, produced by static tag inference
//!
//! # Example
//!
//! ```rust
//! use kuba_expr::types::TagSet;
//!
//! let tags = TagSet::parse("host=web-01,dc=us-east").unwrap();
//! assert_eq!(tags.to_string(), "{dc=us-east,host=web-01}");
//!
//! let host = TagSet::parse("host=web-01").unwrap();
//! assert!(host.subset(&tags));
//! assert!(TagSet::new().subset(&host));
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Sorted set of tag keys
pub type TagKeys = BTreeSet<String>;

/// Tag set for a series or result group
///
/// Backed by a `BTreeMap` so that iteration, `Display` and hashing are in
/// canonical (key-sorted) order regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Create a new empty tag set
    pub fn new() -> Self {
        Self {
            tags: BTreeMap::new(),
        }
    }

    /// Parse a tag string of the form `k1=v1,k2=v2`
    ///
    /// An empty string yields an empty set. Elements must contain `=` with a
    /// non-empty key; duplicate keys are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let mut set = TagSet::new();
        if s.trim().is_empty() {
            return Ok(set);
        }
        for element in s.split(',') {
            let (key, value) = element
                .split_once('=')
                .ok_or_else(|| Error::InvalidTags(format!("missing '=' in '{}'", element)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::InvalidTags(format!("empty key in '{}'", element)));
            }
            if set.tags.contains_key(key) {
                return Err(Error::InvalidTags(format!("duplicate key '{}' in '{}'", key, s)));
            }
            set.tags.insert(key.to_string(), value.trim().to_string());
        }
        Ok(set)
    }

    /// Add a tag, replacing any previous value for the key
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`TagSet::add`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, value);
        self
    }

    /// Get a tag value
    pub fn get(&self, key: &str) -> Option<&String> {
        self.tags.get(key)
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True if the set has no tags (an ungrouped result)
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate over pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.tags.iter()
    }

    /// Every pair of `self` also appears in `other`
    ///
    /// The empty set is a subset of every set, including itself.
    pub fn subset(&self, other: &TagSet) -> bool {
        self.tags.iter().all(|(k, v)| other.tags.get(k) == Some(v))
    }

    /// Every pair of `filter` is present in `self`
    pub fn compatible(&self, filter: &TagSet) -> bool {
        filter.subset(self)
    }

    /// Tags whose keys are in `keys`
    pub fn project(&self, keys: &TagKeys) -> TagSet {
        TagSet {
            tags: self
                .tags
                .iter()
                .filter(|(k, _)| keys.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Copy of `self` with the pairs of `other` added (other wins on conflict)
    pub fn merge(&self, other: &TagSet) -> TagSet {
        let mut merged = self.clone();
        for (k, v) in &other.tags {
            merged.tags.insert(k.clone(), v.clone());
        }
        merged
    }

    /// The set of keys
    pub fn keys(&self) -> TagKeys {
        self.tags.keys().cloned().collect()
    }

    /// Canonical `k1=v1,k2=v2` form without braces
    pub fn tags(&self) -> String {
        self.tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.tags())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TagSet {
            tags: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
