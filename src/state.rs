//! Evaluation state and execution context
//!
//! An [`ExecuteContext`] is built once by the caller and describes the
//! environment of an evaluation: backends, cache, the current time and the
//! evaluation options. Each call to `Expr::execute` creates a fresh
//! [`State`] that borrows the context and records the backend queries the
//! evaluation issued.

use crate::alert_key::AlertKeys;
use crate::backend::{BackendQuery, Backends, IssuedQuery, RawSeries};
use crate::cache::{CacheConfig, QueryCache};
use crate::config::EvalConfig;
use crate::error::{Error, Result};
use crate::results::{Computation, TaggedValue};
use crate::types::TagSet;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    static ref TAG_KEY: Regex = Regex::new(r"^[A-Za-z0-9_./\-]+$").unwrap();
}

// ============================================================================
// Squelch
// ============================================================================

/// Predicate deciding whether a group is suppressed from query results
pub trait Squelch: Send + Sync {
    /// True if results for `tags` must be dropped
    fn squelched(&self, tags: &TagSet) -> bool;
}

impl<F> Squelch for F
where
    F: Fn(&TagSet) -> bool + Send + Sync,
{
    fn squelched(&self, tags: &TagSet) -> bool {
        self(tags)
    }
}

/// Regex squelch rules
///
/// Each rule is `key=regex,key2=regex`. A rule matches a tag set when every
/// key is present and its value fully matches the pattern. A group is
/// squelched when any rule matches.
#[derive(Debug, Clone, Default)]
pub struct Squelches {
    rules: Vec<Vec<(String, Regex)>>,
}

impl Squelches {
    /// Create an empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a list of rules
    pub fn parse<I, S>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut squelches = Self::new();
        for rule in rules {
            squelches.add(rule.as_ref())?;
        }
        Ok(squelches)
    }

    /// Compile and add one rule
    pub fn add(&mut self, rule: &str) -> Result<()> {
        let invalid =
            |why: String| Error::Configuration(format!("squelch rule '{}': {}", rule, why));
        let mut parsed = Vec::new();
        for pair in rule.split(',') {
            let (key, pattern) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("'{}' is not key=regex", pair)))?;
            let key = key.trim();
            if !TAG_KEY.is_match(key) {
                return Err(invalid(format!("invalid tag key '{}'", key)));
            }
            let regex = Regex::new(&format!("^(?:{})$", pattern.trim()))
                .map_err(|e| invalid(e.to_string()))?;
            parsed.push((key.to_string(), regex));
        }
        self.rules.push(parsed);
        Ok(())
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if there are no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Squelch for Squelches {
    fn squelched(&self, tags: &TagSet) -> bool {
        self.rules.iter().any(|rule| {
            rule.iter()
                .all(|(key, regex)| tags.get(key).is_some_and(|v| regex.is_match(v)))
        })
    }
}

// ============================================================================
// Alert history
// ============================================================================

/// Source of alert instance states for the `unknown` and `unevaluated` functions
pub trait AlertHistory: Send + Sync {
    /// Keys of `alert` currently unknown, and currently unevaluated
    fn unknown_and_unevaluated(&self, alert: &str) -> (AlertKeys, AlertKeys);
}

/// Fixed alert states, keyed by alert name
#[derive(Debug, Clone, Default)]
pub struct StaticHistory {
    alerts: HashMap<String, (AlertKeys, AlertKeys)>,
}

impl StaticHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the states of one alert
    pub fn with_alert(mut self, alert: &str, unknown: AlertKeys, unevaluated: AlertKeys) -> Self {
        self.alerts.insert(alert.to_string(), (unknown, unevaluated));
        self
    }
}

impl AlertHistory for StaticHistory {
    fn unknown_and_unevaluated(&self, alert: &str) -> (AlertKeys, AlertKeys) {
        self.alerts.get(alert).cloned().unwrap_or_default()
    }
}

// ============================================================================
// Execute context
// ============================================================================

/// Environment of an evaluation
#[derive(Clone)]
pub struct ExecuteContext {
    /// Backend registry
    pub backends: Backends,
    /// Shared query cache
    pub cache: Option<Arc<QueryCache>>,
    /// Reference time for relative ranges
    pub now: DateTime<Utc>,
    /// Target number of points per queried series, 0 disables downsampling
    pub autods: usize,
    /// Never synthesize placeholders for unjoined groups
    pub unjoined_ok: bool,
    /// Record the audit trail
    pub enable_computations: bool,
    /// Group suppression predicate
    pub squelch: Option<Arc<dyn Squelch>>,
    /// Alert state source
    pub history: Option<Arc<dyn AlertHistory>>,
}

impl ExecuteContext {
    /// Context over `backends` evaluated at the current time
    pub fn new(backends: Backends) -> Self {
        Self {
            backends,
            cache: None,
            now: Utc::now(),
            autods: 0,
            unjoined_ok: false,
            enable_computations: false,
            squelch: None,
            history: None,
        }
    }

    /// Apply evaluation, cache and squelch settings from `config`
    pub fn with_config(mut self, config: &EvalConfig) -> Result<Self> {
        self.autods = config.evaluation.autods;
        self.unjoined_ok = config.evaluation.unjoined_ok;
        self.enable_computations = config.evaluation.enable_computations;
        if config.cache.enabled {
            self.cache = Some(Arc::new(QueryCache::new(
                CacheConfig::default().with_max_entries(config.cache.max_entries),
            )));
        }
        if !config.squelch.rules.is_empty() {
            self.squelch = Some(Arc::new(Squelches::parse(&config.squelch.rules)?));
        }
        Ok(self)
    }

    /// Evaluate at `now`
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Share `cache` between evaluations
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Downsample queried series to about `points` points
    pub fn with_autods(mut self, points: usize) -> Self {
        self.autods = points;
        self
    }

    /// Allow unjoined groups without placeholders
    pub fn with_unjoined_ok(mut self, unjoined_ok: bool) -> Self {
        self.unjoined_ok = unjoined_ok;
        self
    }

    /// Record the audit trail
    pub fn with_computations(mut self, enabled: bool) -> Self {
        self.enable_computations = enabled;
        self
    }

    /// Suppress groups matched by `squelch`
    pub fn with_squelch(mut self, squelch: Arc<dyn Squelch>) -> Self {
        self.squelch = Some(squelch);
        self
    }

    /// Alert state source
    pub fn with_history(mut self, history: Arc<dyn AlertHistory>) -> Self {
        self.history = Some(history);
        self
    }
}

impl fmt::Debug for ExecuteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteContext")
            .field("backends", &self.backends)
            .field("cache", &self.cache.is_some())
            .field("now", &self.now)
            .field("autods", &self.autods)
            .field("unjoined_ok", &self.unjoined_ok)
            .field("enable_computations", &self.enable_computations)
            .field("squelch", &self.squelch.is_some())
            .field("history", &self.history.is_some())
            .finish()
    }
}

// ============================================================================
// State
// ============================================================================

/// Per-evaluation state handed to functions
pub struct State<'a> {
    ctx: &'a ExecuteContext,
    queries: Vec<IssuedQuery>,
}

impl<'a> State<'a> {
    /// Fresh state over `ctx`
    pub fn new(ctx: &'a ExecuteContext) -> Self {
        Self {
            ctx,
            queries: Vec::new(),
        }
    }

    /// Reference time
    pub fn now(&self) -> DateTime<Utc> {
        self.ctx.now
    }

    /// Downsampling target, 0 when disabled
    pub fn autods(&self) -> usize {
        self.ctx.autods
    }

    /// True if unjoined groups get no placeholders
    pub fn unjoined_ok(&self) -> bool {
        self.ctx.unjoined_ok
    }

    /// True if the audit trail is recorded
    pub fn enable_computations(&self) -> bool {
        self.ctx.enable_computations
    }

    /// Alert state source
    pub fn history(&self) -> Option<&dyn AlertHistory> {
        self.ctx.history.as_deref()
    }

    /// True if `tags` is suppressed
    pub fn squelched(&self, tags: &TagSet) -> bool {
        let squelched = self
            .ctx
            .squelch
            .as_ref()
            .is_some_and(|s| s.squelched(tags));
        if squelched {
            debug!(group = %tags, "squelched");
        }
        squelched
    }

    /// Append an audit entry when the audit trail is enabled
    pub fn add_computation(&self, value: &mut TaggedValue, text: impl Into<String>, v: f64) {
        if self.ctx.enable_computations {
            value.computations.push(Computation {
                text: text.into(),
                value: v,
            });
        }
    }

    /// Run `query` on a backend, through the cache when one is configured
    ///
    /// `backend` selects a named backend, `None` the default one. The
    /// returned series are owned copies.
    pub fn fetch(&mut self, backend: Option<&str>, query: &BackendQuery) -> Result<Vec<RawSeries>> {
        let ctx = self.ctx;
        let (name, client) = match backend {
            Some(name) => ctx.backends.get(name)?,
            None => ctx.backends.default_backend()?,
        };
        self.queries.push(IssuedQuery {
            backend: name.to_string(),
            text: query.text.clone(),
            start: query.start,
            end: query.end,
        });
        debug!(
            backend = name,
            query = %query.text,
            start = %query.start,
            end = %query.end,
            "backend query"
        );

        let series = match &ctx.cache {
            Some(cache) => {
                let shared = cache.get(&query.cache_key(name), || client.query(query))?;
                shared.as_ref().clone()
            }
            None => client.query(query)?,
        };
        Ok(series)
    }

    /// Queries issued so far
    pub fn queries(&self) -> &[IssuedQuery] {
        &self.queries
    }

    /// Consume the state, keeping the issued queries
    pub fn into_queries(self) -> Vec<IssuedQuery> {
        self.queries
    }
}
