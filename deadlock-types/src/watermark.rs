//! High-water mark tracking for incremental polling.

use chrono::{DateTime, Utc};

/// The timestamp of the newest event already emitted by a collector.
///
/// Each collector instance owns exactly one high-water mark, keyed by the
/// instance name. It only ever moves forward: [`advance`](Self::advance)
/// ignores values that are not newer than the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HighWaterMark {
    instance: String,
    value: DateTime<Utc>,
}

impl HighWaterMark {
    /// Create a mark for an instance, starting at `initial`.
    pub fn new(instance: impl Into<String>, initial: DateTime<Utc>) -> Self {
        Self {
            instance: instance.into(),
            value: initial,
        }
    }

    /// The instance this mark belongs to.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// The current mark.
    pub fn value(&self) -> DateTime<Utc> {
        self.value
    }

    /// Move the mark forward to `candidate`.
    ///
    /// Returns `true` if the mark moved. Values at or below the current mark
    /// leave it unchanged.
    pub fn advance(&mut self, candidate: DateTime<Utc>) -> bool {
        if candidate > self.value {
            self.value = candidate;
            true
        } else {
            false
        }
    }
}
