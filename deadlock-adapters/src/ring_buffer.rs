//! Extended-events ring-buffer source.
//!
//! SQL Server keeps recent `xml_deadlock_report` events in the ring-buffer
//! target of an extended-events session. This source builds the query that
//! reads them back and hands it to a [`QueryExecutor`], which owns the actual
//! database connection.
//!
//! ## Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use chrono::{DateTime, Utc};
//! use deadlock_adapters::ring_buffer::{QueryExecutor, QueryRow, RingBufferSource};
//! use deadlock_adapters::{DeadlockSource, SourceError};
//!
//! #[derive(Debug)]
//! struct MyDriver;
//!
//! #[async_trait]
//! impl QueryExecutor for MyDriver {
//!     async fn query_deadlocks(
//!         &self,
//!         sql: &str,
//!         since: DateTime<Utc>,
//!         limit: usize,
//!     ) -> Result<Vec<QueryRow>, SourceError> {
//!         // run `sql` with @since and @limit bound
//!         Ok(Vec::new())
//!     }
//! }
//!
//! # async fn run() -> Result<(), SourceError> {
//! let source = RingBufferSource::builder(MyDriver)
//!     .session_name("deadlocks")
//!     .build()?;
//!
//! let events = source.fetch_since(Utc::now(), 100).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadlock_types::DeadlockEvent;
use tracing::debug;

use crate::{DeadlockSource, SourceError};

/// Extended-events session polled when none is configured.
pub const DEFAULT_SESSION_NAME: &str = "datadog";

/// One row returned by the ring-buffer query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRow {
    /// Event timestamp, already converted to UTC by the driver.
    pub timestamp: DateTime<Utc>,
    /// The event document.
    pub xml: String,
}

impl From<QueryRow> for DeadlockEvent {
    fn from(row: QueryRow) -> Self {
        DeadlockEvent::new(row.timestamp, row.xml)
    }
}

/// The database driver seam.
///
/// The query text uses two named parameters: `@since` (a `datetime2`) and
/// `@limit` (an `int`). Rows must come back oldest first.
#[async_trait]
pub trait QueryExecutor: Send + Sync + std::fmt::Debug {
    async fn query_deadlocks(
        &self,
        sql: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueryRow>, SourceError>;
}

/// Reads deadlock reports from an extended-events ring buffer.
#[derive(Debug)]
pub struct RingBufferSource<E> {
    executor: E,
    session_name: String,
    sql: String,
    description: String,
}

impl<E: QueryExecutor> RingBufferSource<E> {
    /// Create a new builder around a query executor.
    pub fn builder(executor: E) -> RingBufferSourceBuilder<E> {
        RingBufferSourceBuilder {
            executor,
            session_name: None,
        }
    }

    /// The extended-events session being read.
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// The query text passed to the executor.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[async_trait]
impl<E: QueryExecutor> DeadlockSource for RingBufferSource<E> {
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeadlockEvent>, SourceError> {
        let rows = self.executor.query_deadlocks(&self.sql, since, limit).await?;
        debug!(
            session = %self.session_name,
            rows = rows.len(),
            since = %since,
            "Ring buffer query returned"
        );
        Ok(rows.into_iter().map(DeadlockEvent::from).collect())
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Builder for [`RingBufferSource`].
#[derive(Debug)]
pub struct RingBufferSourceBuilder<E> {
    executor: E,
    session_name: Option<String>,
}

impl<E: QueryExecutor> RingBufferSourceBuilder<E> {
    /// Set the extended-events session name (default: `datadog`).
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = Some(name.into());
        self
    }

    /// Build the source.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Query`] if the session name contains anything
    /// other than letters, digits, `_` or `-`; it is embedded in the query.
    pub fn build(self) -> Result<RingBufferSource<E>, SourceError> {
        let session_name = self
            .session_name
            .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string());
        let sql = session_query(&session_name)?;

        Ok(RingBufferSource {
            executor: self.executor,
            sql,
            description: format!("ring buffer: {session_name}"),
            session_name,
        })
    }
}

/// The ring buffer query for an extended-events session.
///
/// # Errors
///
/// [`SourceError::Query`] if the name is not a plain identifier.
pub fn session_query(session_name: &str) -> Result<String, SourceError> {
    if !is_valid_session_name(session_name) {
        return Err(SourceError::Query(format!(
            "invalid extended-events session name {session_name:?}"
        )));
    }
    Ok(ring_buffer_query(session_name))
}

fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn ring_buffer_query(session_name: &str) -> String {
    format!(
        r#"SELECT TOP (@limit)
    xdr.value('@timestamp', 'datetime2') AS event_timestamp,
    CAST(xdr.query('.') AS nvarchar(max)) AS event_xml
FROM (
    SELECT CAST(xt.target_data AS XML) AS target_data
    FROM sys.dm_xe_session_targets AS xt
    INNER JOIN sys.dm_xe_sessions AS xs ON xs.address = xt.event_session_address
    WHERE xs.name = N'{session_name}'
      AND xt.target_name = N'ring_buffer'
) AS ring
CROSS APPLY ring.target_data.nodes('RingBufferTarget/event[@name="xml_deadlock_report"]') AS events(xdr)
WHERE xdr.value('@timestamp', 'datetime2') > @since
ORDER BY event_timestamp ASC;"#
    )
}
