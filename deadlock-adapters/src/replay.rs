//! File-backed replay source.
//!
//! Reads a JSON array of captured events from disk on every poll:
//!
//! ```json
//! [
//!   {"timestamp": "2024-03-01T12:00:05.123Z", "xml": "<event name=\"xml_deadlock_report\">...</event>"},
//!   {"timestamp": "2024-03-01T12:00:09.000Z", "xml": "..."}
//! ]
//! ```
//!
//! Useful for demos and for replaying a capture through the full pipeline
//! without a database. Appending to the file between polls behaves like new
//! deadlocks arriving.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadlock_types::DeadlockEvent;

use crate::{DeadlockSource, SourceError};

/// A source that replays events from a JSON file.
#[derive(Debug)]
pub struct ReplaySource {
    path: PathBuf,
    description: String,
}

impl ReplaySource {
    /// Create a new replay source for the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("replay: {}", path.display());
        Self { path, description }
    }

    /// Returns the path being replayed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Vec<DeadlockEvent>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let events = serde_json::from_str(&content)?;
        Ok(events)
    }
}

#[async_trait]
impl DeadlockSource for ReplaySource {
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeadlockEvent>, SourceError> {
        let mut events = self.read_file().await?;
        events.retain(|e| e.event_timestamp > since);
        events.sort_by_key(|e| e.event_timestamp);
        events.truncate(limit);
        Ok(events)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_json() -> &'static str {
        r#"[
            {"timestamp": "2024-03-01T12:00:09Z", "xml": "<deadlock>c</deadlock>"},
            {"timestamp": "2024-03-01T12:00:01Z", "xml": "<deadlock>a</deadlock>"},
            {"timestamp": "2024-03-01T12:00:05Z", "xml": "<deadlock>b</deadlock>"}
        ]"#
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, secs).unwrap()
    }

    #[test]
    fn test_replay_source_new() {
        let source = ReplaySource::new("/tmp/events.json");
        assert_eq!(source.path(), Path::new("/tmp/events.json"));
        assert_eq!(source.description(), "replay: /tmp/events.json");
    }

    #[tokio::test]
    async fn test_replay_filters_sorts_and_limits() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", sample_json()).unwrap();
        let source = ReplaySource::new(file.path());

        let events = source.fetch_since(at(0), 100).await.unwrap();
        let xml: Vec<_> = events.iter().map(|e| e.raw_xml.as_str()).collect();
        assert_eq!(
            xml,
            vec!["<deadlock>a</deadlock>", "<deadlock>b</deadlock>", "<deadlock>c</deadlock>"]
        );

        let events = source.fetch_since(at(1), 1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_timestamp, at(5));
    }

    #[tokio::test]
    async fn test_replay_missing_file() {
        let source = ReplaySource::new("/nonexistent/path/events.json");
        let err = source.fetch_since(at(0), 10).await.unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
        assert!(err.to_string().contains("Read error"));
    }

    #[tokio::test]
    async fn test_replay_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();
        let source = ReplaySource::new(file.path());

        let err = source.fetch_since(at(0), 10).await.unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }
}
