//! The data-source abstraction the poller reads from.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadlock_types::DeadlockEvent;

use crate::SourceError;

/// Something that can hand back recent deadlock events.
///
/// Implementations return events newer than `since`, oldest first, and at
/// most `limit` of them. The poller re-checks all three, so a source that
/// is sloppy about ordering or the lower bound is still safe to use.
#[async_trait]
pub trait DeadlockSource: Send + Sync + Debug {
    /// Fetch events recorded after `since`.
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeadlockEvent>, SourceError>;

    /// Returns a human-readable description of the source.
    fn description(&self) -> &str;
}

#[async_trait]
impl<S: DeadlockSource + ?Sized> DeadlockSource for Arc<S> {
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeadlockEvent>, SourceError> {
        (**self).fetch_since(since, limit).await
    }

    fn description(&self) -> &str {
        (**self).description()
    }
}

#[async_trait]
impl<S: DeadlockSource + ?Sized> DeadlockSource for Box<S> {
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeadlockEvent>, SourceError> {
        (**self).fetch_since(since, limit).await
    }

    fn description(&self) -> &str {
        (**self).description()
    }
}
