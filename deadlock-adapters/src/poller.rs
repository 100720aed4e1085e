//! High-water-mark polling with deduplication.
//!
//! The poller asks a [`DeadlockSource`] for events newer than a given
//! instant and cleans up whatever comes back: rows at or before the bound
//! are dropped, the rest are sorted oldest first, and only the first row per
//! distinct timestamp survives. The caller owns the high-water mark; the
//! poller never changes it.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use deadlock_types::DeadlockEvent;
use tracing::debug;

use crate::{DeadlockSource, SourceError};

/// Row cap per poll when none is configured.
pub const DEFAULT_MAX_ROWS: usize = 100;

/// Query timeout when none is configured.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Polls a deadlock source for events above a high-water mark.
#[derive(Debug)]
pub struct Poller {
    source: Box<dyn DeadlockSource>,
    max_rows: usize,
    query_timeout: Duration,
}

impl Poller {
    /// Create a poller with the default row cap and timeout.
    pub fn new(source: impl DeadlockSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            max_rows: DEFAULT_MAX_ROWS,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Set the row cap per poll (default: 100).
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    /// Set the query timeout (default: 10 seconds).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Description of the underlying source.
    pub fn description(&self) -> &str {
        self.source.description()
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Fetch events strictly newer than `since`, oldest first, one per
    /// timestamp.
    ///
    /// # Errors
    ///
    /// [`SourceError::Timeout`] if the source does not answer within the
    /// query timeout; otherwise whatever the source reports.
    pub async fn poll(&self, since: DateTime<Utc>) -> Result<Vec<DeadlockEvent>, SourceError> {
        let started = Instant::now();

        let fetched = tokio::time::timeout(
            self.query_timeout,
            self.source.fetch_since(since, self.max_rows),
        )
        .await
        .map_err(|_| SourceError::Timeout(self.query_timeout))??;

        let returned = fetched.len();
        let events = dedup_since(fetched, since);

        debug!(
            source = self.source.description(),
            since = %since,
            returned,
            kept = events.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Polled deadlock source"
        );

        Ok(events)
    }
}

/// Drop rows at or before `since`, sort ascending and keep the first row per
/// timestamp.
pub fn dedup_since(mut events: Vec<DeadlockEvent>, since: DateTime<Utc>) -> Vec<DeadlockEvent> {
    events.retain(|e| e.event_timestamp > since);
    // Stable, so the first row per timestamp stays first.
    events.sort_by_key(|e| e.event_timestamp);
    events.dedup_by_key(|e| e.event_timestamp);
    events
}

/// The lower bound to poll with: the high-water mark, but never further back
/// than `max_lookback` from `now`.
pub fn effective_since(
    high_water_mark: DateTime<Utc>,
    now: DateTime<Utc>,
    max_lookback: chrono::Duration,
) -> DateTime<Utc> {
    high_water_mark.max(now - max_lookback)
}
