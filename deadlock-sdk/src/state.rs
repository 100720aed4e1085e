//! Collector status shared between the collection task and its handles.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// What the collector is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorState {
    Idle,
    Collecting,
}

/// Summary of one finished cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// Lower bound the source was polled with.
    pub since: DateTime<Utc>,
    /// Events returned by the poller after deduplication.
    pub polled: usize,
    /// Rows handed to the sinks.
    pub emitted: usize,
    /// Events left for the next cycle because the payload was full.
    pub deferred: usize,
    /// Emitted rows that carry a parse error.
    pub parse_errors: usize,
    /// Serialized size of the emitted rows.
    pub bytes: usize,
    /// The mark after the cycle.
    pub high_water_mark: DateTime<Utc>,
    /// The collector is disabled and did nothing.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// Health of a collector, readable from any thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorStatus {
    pub instance: String,
    pub state: CollectorState,
    pub high_water_mark: DateTime<Utc>,
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<String>,
}

impl CollectorStatus {
    /// Whether the last cycle succeeded (or none has run yet).
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

/// The shared cell behind [`CollectorStatus`].
#[derive(Debug, Clone)]
pub(crate) struct SharedStatus(Arc<RwLock<CollectorStatus>>);

impl SharedStatus {
    pub fn new(instance: &str, high_water_mark: DateTime<Utc>) -> Self {
        Self(Arc::new(RwLock::new(CollectorStatus {
            instance: instance.to_string(),
            state: CollectorState::Idle,
            high_water_mark,
            cycles: 0,
            consecutive_failures: 0,
            last_report: None,
            last_error: None,
        })))
    }

    pub fn snapshot(&self) -> CollectorStatus {
        self.0.read().clone()
    }

    pub fn begin_cycle(&self) {
        self.0.write().state = CollectorState::Collecting;
    }

    pub fn cycle_succeeded(&self, report: CycleReport) {
        let mut status = self.0.write();
        status.state = CollectorState::Idle;
        status.high_water_mark = report.high_water_mark;
        status.cycles += 1;
        status.consecutive_failures = 0;
        status.last_error = None;
        status.last_report = Some(report);
    }

    pub fn cycle_failed(&self, error: &str, high_water_mark: DateTime<Utc>) {
        let mut status = self.0.write();
        status.state = CollectorState::Idle;
        status.high_water_mark = high_water_mark;
        status.cycles += 1;
        status.consecutive_failures += 1;
        status.last_error = Some(error.to_string());
    }

    /// A cycle was cancelled part way through.
    pub fn cycle_abandoned(&self, high_water_mark: DateTime<Utc>) {
        let mut status = self.0.write();
        status.state = CollectorState::Idle;
        status.high_water_mark = high_water_mark;
    }
}
