//! # deadlock-sdk
//!
//! Collection orchestrator for SQL Server deadlock telemetry.
//!
//! A [`Collector`] ties the pieces together for one database instance: it
//! polls a deadlock source above its high-water mark, parses and obfuscates
//! each deadlock graph, bounds the payload size, emits the payload to one or
//! more outputs, and persists the mark so a restart picks up where it left
//! off.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deadlock_adapters::replay::ReplaySource;
//! use deadlock_adapters::Poller;
//! use deadlock_sdk::{Collector, FileCheckpoint, Output};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let poller = Poller::new(ReplaySource::new("captured.json"));
//!
//!     let collector = Collector::builder("primary", poller)
//!         .output(Output::file("deadlocks.jsonl"))
//!         .checkpoint(FileCheckpoint::new("checkpoints.json"))
//!         .interval(Duration::from_secs(10))
//!         .build()
//!         .await?;
//!
//!     // Start background collection (non-blocking)
//!     let handle = collector.start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery
//!
//! The mark moves only after every output accepted the payload and only up
//! to the newest row that fit. Rows deferred by the size bound, and whole
//! cycles that failed, are polled again next time.

mod checkpoint;
mod collector;
mod error;
mod output;
mod state;

pub use checkpoint::{CheckpointStore, FileCheckpoint, MemoryCheckpoint};
pub use collector::{
    Collector, CollectorBuilder, CollectorHandle, DEFAULT_INTERVAL, DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use error::{CheckpointError, CollectError, SinkError};
pub use output::{Output, TelemetrySink};
pub use state::{CollectorState, CollectorStatus, CycleReport};

// Re-export types for convenience
pub use deadlock_types::{DeadlockPayload, HighWaterMark, OutputRow};
