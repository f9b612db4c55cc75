//! Time-series backends
//!
//! A [`Backend`] answers series queries of the form
//! `metric{key=filter,...}` over a time range. Backends are registered in a
//! [`Backends`] registry that the caller builds and hands to the evaluator;
//! there is no process-wide client.
//!
//! # Query syntax
//!
//! - `cpu{host=*}`: every `cpu` series that has a `host` tag, grouped by host
//! - `cpu{host=web01|web02}`: alternatives
//! - `cpu{host=web01,dc=*}`: exact match on host, grouped by host and dc
//! - `cpu{}` or `cpu`: everything, averaged into one ungrouped series
//!
//! The group of each returned series is the projection of its tags onto the
//! keys named in the query.

pub mod memory;

pub use memory::InMemoryBackend;

use crate::error::BackendError;
use crate::types::{TagKeys, TagSet};
use crate::value::Series;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A query sent to a backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendQuery {
    /// Query text, `metric{key=filter,...}`
    pub text: String,
    /// Inclusive range start
    pub start: DateTime<Utc>,
    /// Inclusive range end
    pub end: DateTime<Utc>,
}

impl BackendQuery {
    /// Cache key for this query on `backend`
    pub fn cache_key(&self, backend: &str) -> String {
        format!(
            "{}|{}|{}|{}",
            backend,
            self.text,
            self.start.timestamp_millis(),
            self.end.timestamp_millis()
        )
    }
}

/// One series returned by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    /// Group of the series
    pub group: TagSet,
    /// Data points
    pub series: Series,
}

/// Record of a query issued during an evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedQuery {
    /// Backend name
    pub backend: String,
    /// Query text
    pub text: String,
    /// Range start
    pub start: DateTime<Utc>,
    /// Range end
    pub end: DateTime<Utc>,
}

/// A time-series data source
pub trait Backend: Send + Sync {
    /// Run a query
    fn query(&self, query: &BackendQuery) -> Result<Vec<RawSeries>, BackendError>;
}

/// Named backends, the first registered one is the default
#[derive(Clone, Default)]
pub struct Backends {
    backends: Vec<(String, Arc<dyn Backend>)>,
}

impl Backends {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, backend: Arc<dyn Backend>) {
        let name = name.into();
        match self.backends.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = backend,
            None => self.backends.push((name, backend)),
        }
    }

    /// Builder form of [`Backends::register`]
    pub fn with(mut self, name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        self.register(name, backend);
        self
    }

    /// Look up a backend by name
    pub fn get(&self, name: &str) -> Result<(&str, &Arc<dyn Backend>), BackendError> {
        self.backends
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, b)| (n.as_str(), b))
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))
    }

    /// The default backend
    pub fn default_backend(&self) -> Result<(&str, &Arc<dyn Backend>), BackendError> {
        self.backends
            .first()
            .map(|(n, b)| (n.as_str(), b))
            .ok_or_else(|| BackendError::UnknownBackend("no backend configured".to_string()))
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// True if no backend is registered
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("backends", &self.names())
            .finish()
    }
}

/// Filter on one tag key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    /// `*`: any value, key must be present
    Any,
    /// `a|b|c`: one of the listed values
    OneOf(Vec<String>),
}

impl TagFilter {
    fn parse(s: &str) -> Self {
        if s == "*" {
            TagFilter::Any
        } else {
            TagFilter::OneOf(s.split('|').map(str::to_string).collect())
        }
    }

    /// True if `value` passes this filter
    pub fn matches(&self, value: &str) -> bool {
        match self {
            TagFilter::Any => true,
            TagFilter::OneOf(values) => values.iter().any(|v| v == value),
        }
    }
}

/// Parsed `metric{key=filter,...}` query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    /// Metric name
    pub metric: String,
    /// Filters by tag key
    pub filters: BTreeMap<String, TagFilter>,
}

impl SeriesQuery {
    /// Parse query text
    pub fn parse(text: &str) -> Result<Self, BackendError> {
        let text = text.trim();
        let malformed = |why: &str| BackendError::MalformedQuery(format!("{}: {}", why, text));

        let (metric, body) = match text.find('{') {
            Some(open) => {
                let body = text[open + 1..]
                    .strip_suffix('}')
                    .ok_or_else(|| malformed("missing closing brace"))?;
                (&text[..open], body)
            }
            None => (text, ""),
        };
        if metric.is_empty() {
            return Err(malformed("missing metric name"));
        }
        if metric.contains(['}', '=', ',']) {
            return Err(malformed("invalid metric name"));
        }

        let mut filters = BTreeMap::new();
        for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, filter) = pair
                .split_once('=')
                .ok_or_else(|| malformed("tag filter without '='"))?;
            let (key, filter) = (key.trim(), filter.trim());
            if key.is_empty() || filter.is_empty() {
                return Err(malformed("empty tag key or filter"));
            }
            if filters
                .insert(key.to_string(), TagFilter::parse(filter))
                .is_some()
            {
                return Err(malformed("duplicate tag key"));
            }
        }

        Ok(Self {
            metric: metric.to_string(),
            filters,
        })
    }

    /// Keys the result groups will carry
    pub fn keys(&self) -> TagKeys {
        self.filters.keys().cloned().collect()
    }

    /// True if a series with `tags` is selected
    pub fn matches(&self, tags: &TagSet) -> bool {
        self.filters.iter().all(|(key, filter)| match tags.get(key) {
            Some(value) => filter.matches(value),
            None => false,
        })
    }
}
