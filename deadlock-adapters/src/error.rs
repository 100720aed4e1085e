//! Error types for deadlock sources.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when fetching deadlock events.
///
/// Any of these aborts the current collection cycle; nothing is emitted and
/// the high-water mark stays where it was.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not reach the database.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The query did not finish in time.
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// The database rejected or failed the query.
    #[error("Query failed: {0}")]
    Query(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Reading a local source failed.
    #[error("Read error: {0}")]
    Io(#[from] std::io::Error),

    /// A row could not be decoded into an event.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl SourceError {
    /// Whether the error means the source could not be reached at all, as
    /// opposed to answering badly.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SourceError::Connection(_) | SourceError::Timeout(_))
    }
}

#[cfg(feature = "replay")]
impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(SourceError::Connection("refused".into()).is_connectivity());
        assert!(SourceError::Timeout(Duration::from_secs(10)).is_connectivity());
        assert!(!SourceError::Query("syntax".into()).is_connectivity());
        assert!(!SourceError::Decode("bad".into()).is_connectivity());
    }

    #[test]
    fn test_display() {
        let err = SourceError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "Query timed out after 10s");
    }
}
