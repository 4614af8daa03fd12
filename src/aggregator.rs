// 📊 Aggregator
// Counts transactions in a trailing window, grouped by (api, status).
// Pure function of repository contents and the injected clock.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error};

use crate::repository::{RepositoryError, TransactionRepository};

/// Default trailing window: one day
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

pub fn default_window() -> Duration {
    Duration::hours(DEFAULT_WINDOW_HOURS)
}

/// Composite grouping key, ordered api-first so rendered output is stable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleKey {
    pub api: String,
    pub status: String,
}

impl SampleKey {
    pub fn new(api: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            status: status.into(),
        }
    }

    /// Label values in label-name order: `[api, status]`
    pub fn label_values(&self) -> [&str; 2] {
        [self.api.as_str(), self.status.as_str()]
    }
}

/// Per-key transaction counts. Keys with no transactions are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregates {
    counts: HashMap<SampleKey, u64>,
}

impl Aggregates {
    pub fn get(&self, api: &str, status: &str) -> Option<u64> {
        self.counts.get(&SampleKey::new(api, status)).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SampleKey, &u64)> {
        self.counts.iter()
    }

    /// Entries sorted by key
    pub fn sorted(&self) -> Vec<(&SampleKey, u64)> {
        let mut entries: Vec<_> = self.counts.iter().map(|(k, v)| (k, *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    fn increment(&mut self, key: SampleKey) {
        *self.counts.entry(key).or_insert(0) += 1;
    }
}

impl FromIterator<(SampleKey, u64)> for Aggregates {
    fn from_iter<I: IntoIterator<Item = (SampleKey, u64)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().filter(|(_, count)| *count > 0).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("window must be a positive duration, got {0}")]
    InvalidWindow(Duration),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Count transactions modified at or after `now - window`, keyed by
/// (api name, status name).
///
/// A dangling API or status reference fails the whole computation; no partial
/// snapshot is returned.
pub fn compute<R>(repo: &R, now: DateTime<Utc>, window: Duration) -> Result<Aggregates, AggregateError>
where
    R: TransactionRepository + ?Sized,
{
    if window <= Duration::zero() {
        return Err(AggregateError::InvalidWindow(window));
    }
    let since = now
        .checked_sub_signed(window)
        .ok_or(AggregateError::InvalidWindow(window))?;

    let records = repo.list_transactions_modified_since(since).map_err(|e| {
        error!(error = %e, since = %since, "failed to read transactions");
        e
    })?;

    let mut aggregates = Aggregates::default();
    for record in records {
        aggregates.increment(SampleKey::new(record.api_name, record.status_name));
    }

    debug!(
        since = %since,
        transactions = aggregates.total(),
        series = aggregates.len(),
        "aggregated transaction window"
    );

    Ok(aggregates)
}

/// [`compute`] against the wall clock
pub fn compute_now<R>(repo: &R, window: Duration) -> Result<Aggregates, AggregateError>
where
    R: TransactionRepository + ?Sized,
{
    compute(repo, Utc::now(), window)
}
