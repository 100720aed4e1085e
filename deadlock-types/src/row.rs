//! Output rows and the batch envelope handed to telemetry sinks.

use chrono::{DateTime, Utc};

use crate::QuerySignature;

/// Prefix of the `xml` field on rows whose document failed to parse.
pub const ERROR_PREFIX: &str = "{ERROR: ";

/// One deadlock, ready to be emitted.
///
/// Serialized as:
///
/// ```json
/// {"timestamp": "2024-03-01T12:00:05.123Z", "xml": "<event ...>", "query_signatures": [...]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputRow {
    /// Timestamp of the source event.
    pub timestamp: DateTime<Utc>,

    /// The (redacted) deadlock document, or an `{ERROR: ...}` marker.
    pub xml: String,

    /// One signature per distinct session, in process order.
    pub query_signatures: Vec<QuerySignature>,

    /// Why the document could not be parsed, if it could not.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub error: Option<String>,
}

impl OutputRow {
    /// A successfully parsed row.
    pub fn parsed(
        timestamp: DateTime<Utc>,
        xml: impl Into<String>,
        query_signatures: Vec<QuerySignature>,
    ) -> Self {
        Self {
            timestamp,
            xml: xml.into(),
            query_signatures,
            error: None,
        }
    }

    /// A row flagged as failed. The original document is not carried, only
    /// the reason, so unredacted text never leaves the host.
    pub fn failed(timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            timestamp,
            xml: format!("{ERROR_PREFIX}{reason}}}"),
            query_signatures: Vec::new(),
            error: Some(reason),
        }
    }

    /// Whether this row carries an error marker instead of parsed content.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The batch envelope handed to a telemetry sink once per cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeadlockPayload {
    /// Host the collector runs against.
    pub host: String,

    /// Payload kind; always `deadlocks`.
    pub dbm_type: String,

    /// Collection interval in seconds.
    pub collection_interval: f64,

    /// Unix timestamp in milliseconds when the batch was assembled.
    pub timestamp: u64,

    /// Tags attached by the host agent.
    #[cfg_attr(feature = "serde", serde(default, rename = "ddtags"))]
    pub tags: Vec<String>,

    /// The rows of this batch.
    pub sqlserver_deadlocks: Vec<OutputRow>,
}

impl DeadlockPayload {
    /// The payload kind emitted by deadlock collection.
    pub const DBM_TYPE: &'static str = "deadlocks";

    /// Wrap a batch of rows.
    pub fn new(host: impl Into<String>, collection_interval: f64, rows: Vec<OutputRow>) -> Self {
        Self {
            host: host.into(),
            dbm_type: Self::DBM_TYPE.to_string(),
            collection_interval,
            timestamp: Utc::now().timestamp_millis().max(0) as u64,
            tags: Vec::new(),
            sqlserver_deadlocks: rows,
        }
    }

    /// Attach tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.sqlserver_deadlocks.len()
    }

    /// Whether the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.sqlserver_deadlocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap()
    }

    #[test]
    fn failed_row_carries_marker_not_document() {
        let row = OutputRow::failed(ts(), "unexpected end of stream");
        assert!(row.is_error());
        assert_eq!(row.xml, "{ERROR: unexpected end of stream}");
        assert!(row.query_signatures.is_empty());
    }

    #[test]
    fn payload_defaults() {
        let payload = DeadlockPayload::new("db-1", 10.0, vec![OutputRow::parsed(ts(), "<x/>", vec![])]);
        assert_eq!(payload.dbm_type, "deadlocks");
        assert_eq!(payload.len(), 1);
        assert!(payload.tags.is_empty());
        assert!(payload.timestamp > 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn row_wire_shape() {
        let row = OutputRow::parsed(ts(), "<deadlock/>", vec![]);
        let value = serde_json::to_value(&row).unwrap();

        assert_eq!(value["timestamp"], "2024-03-01T12:00:05Z");
        assert_eq!(value["xml"], "<deadlock/>");
        assert!(value["query_signatures"].as_array().unwrap().is_empty());
        assert!(value.get("error").is_none());
    }
}
