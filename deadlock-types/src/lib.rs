//! # deadlock-types
//!
//! Core types for deadlock telemetry. This crate defines the shapes that flow
//! through the collection pipeline: raw events polled from the database,
//! the structured graph parsed out of each event, the redacted query
//! signatures derived from captured SQL, and the output rows handed to a
//! telemetry sink.
//!
//! ## Features
//!
//! - `serde`: JSON serialization for every type (also enables chrono's serde support)
//!
//! ## Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use deadlock_types::{DeadlockEvent, HighWaterMark};
//!
//! let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
//! let mut hwm = HighWaterMark::new("primary", start);
//!
//! let event = DeadlockEvent::new(
//!     start + chrono::Duration::seconds(5),
//!     "<deadlock><process-list/><resource-list/></deadlock>",
//! );
//!
//! assert!(hwm.advance(event.event_timestamp));
//! assert_eq!(hwm.value(), event.event_timestamp);
//! ```

mod event;
mod graph;
mod row;
mod signature;
mod watermark;

pub use event::*;
pub use graph::*;
pub use row::*;
pub use signature::*;
pub use watermark::*;
