//! In-memory backend
//!
//! Holds tagged series per metric and answers [`SeriesQuery`] text. Series
//! that fall into the same result group are averaged per instant.

use super::{Backend, BackendQuery, RawSeries, SeriesQuery};
use crate::error::BackendError;
use crate::types::TagSet;
use crate::value::Series;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Series store for tests, benches and the CLI
#[derive(Default)]
pub struct InMemoryBackend {
    /// metric -> stored series
    data: RwLock<HashMap<String, Vec<(TagSet, Series)>>>,
    /// Error returned by every query when set
    failure: RwLock<Option<BackendError>>,
    queries: AtomicU64,
}

impl InMemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a series; points are merged into an existing series with the same tags
    pub fn add_series(&self, metric: &str, tags: TagSet, series: Series) {
        let mut data = self.data.write();
        let stored = data.entry(metric.to_string()).or_default();
        match stored.iter_mut().find(|(t, _)| *t == tags) {
            Some((_, existing)) => existing.extend(series),
            None => stored.push((tags, series)),
        }
    }

    /// Builder form of [`InMemoryBackend::add_series`]
    pub fn with_series(self, metric: &str, tags: TagSet, series: Series) -> Self {
        self.add_series(metric, tags, series);
        self
    }

    /// Make every subsequent query fail with `error`, or succeed again with `None`
    pub fn set_failure(&self, error: Option<BackendError>) {
        *self.failure.write() = error;
    }

    /// Number of queries answered so far
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

impl Backend for InMemoryBackend {
    fn query(&self, query: &BackendQuery) -> Result<Vec<RawSeries>, BackendError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.failure.read().clone() {
            return Err(err);
        }

        if query.start > query.end {
            return Err(BackendError::MalformedQuery(format!(
                "start {} is after end {}",
                query.start, query.end
            )));
        }
        let parsed = SeriesQuery::parse(&query.text)?;
        let keys = parsed.keys();

        // group -> instant -> (sum, count)
        let mut groups: BTreeMap<TagSet, BTreeMap<_, (f64, u32)>> = BTreeMap::new();
        let data = self.data.read();
        for (tags, series) in data.get(&parsed.metric).into_iter().flatten() {
            if !parsed.matches(tags) {
                continue;
            }
            let acc = groups.entry(tags.project(&keys)).or_default();
            for (t, v) in series.range(query.start..=query.end) {
                let slot = acc.entry(*t).or_insert((0.0, 0));
                slot.0 += v;
                slot.1 += 1;
            }
        }

        let results: Vec<RawSeries> = groups
            .into_iter()
            .filter(|(_, points)| !points.is_empty())
            .map(|(group, points)| RawSeries {
                group,
                series: points
                    .into_iter()
                    .map(|(t, (sum, n))| (t, sum / f64::from(n)))
                    .collect(),
            })
            .collect();

        debug!(query = %query.text, series = results.len(), "in-memory query");
        Ok(results)
    }
}
