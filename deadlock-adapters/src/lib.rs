//! # deadlock-adapters
//!
//! The data-source side of deadlock collection: where events come from, and
//! how they are polled above a high-water mark.
//!
//! ## Sources
//!
//! - [`RingBufferSource`](ring_buffer::RingBufferSource) reads
//!   `xml_deadlock_report` events from an extended-events ring buffer through
//!   a [`QueryExecutor`](ring_buffer::QueryExecutor) you provide
//! - [`ReplaySource`](replay::ReplaySource) (`replay` feature, on by default)
//!   replays a JSON capture from disk
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use deadlock_adapters::replay::ReplaySource;
//! use deadlock_adapters::Poller;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let poller = Poller::new(ReplaySource::new("events.json"))
//!         .with_max_rows(100)
//!         .with_timeout(Duration::from_secs(10));
//!
//!     let since = Utc::now() - chrono::Duration::minutes(10);
//!     let events = poller.poll(since).await?;
//!
//!     println!("Polled {} deadlocks", events.len());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod poller;
pub mod ring_buffer;
pub mod source;

#[cfg(feature = "replay")]
pub mod replay;

pub use error::SourceError;
pub use poller::{dedup_since, effective_since, Poller};
pub use source::DeadlockSource;

// Re-export types for convenience
pub use deadlock_types::DeadlockEvent;
