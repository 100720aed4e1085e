//! Raw deadlock events as polled from the source.

use chrono::{DateTime, Utc};

/// One deadlock report captured by the database engine.
///
/// Events are created by the poller, one per row returned from the source,
/// and live for a single collection cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeadlockEvent {
    /// When the engine recorded the deadlock.
    #[cfg_attr(feature = "serde", serde(rename = "timestamp"))]
    pub event_timestamp: DateTime<Utc>,

    /// The full deadlock-graph document, exactly as captured.
    #[cfg_attr(feature = "serde", serde(rename = "xml"))]
    pub raw_xml: String,
}

impl DeadlockEvent {
    /// Create a new event.
    pub fn new(event_timestamp: DateTime<Utc>, raw_xml: impl Into<String>) -> Self {
        Self {
            event_timestamp,
            raw_xml: raw_xml.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_source_row_shape() {
        let json = r#"{"timestamp":"2024-03-01T12:00:05.123Z","xml":"<deadlock/>"}"#;
        let event: DeadlockEvent = serde_json::from_str(json).unwrap();

        assert_eq!(
            event.event_timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap()
                + chrono::Duration::milliseconds(123)
        );
        assert_eq!(event.raw_xml, "<deadlock/>");
    }

    #[test]
    fn new_accepts_borrowed_xml() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let event = DeadlockEvent::new(ts, "<deadlock/>");
        assert_eq!(event.raw_xml, "<deadlock/>");
    }
}
