//! # deadwatch
//!
//! Command-line host for the deadlock collection pipeline.
//!
//! The pipeline itself lives in the workspace crates:
//!
//! ```text
//! deadlock-adapters ──▶ deadlock-graph ──▶ deadlock-sdk ──▶ output
//!  (poll above the       (parse, obfuscate,   (emit, advance
//!   high-water mark)      bound the payload)   and persist the mark)
//! ```
//!
//! This crate adds configuration loading ([`config`]) and the human-readable
//! durations used in it ([`duration`]).
//!
//! ## Usage
//!
//! ```bash
//! # Replay a capture once, printing the payload
//! deadwatch --replay captured.json --once
//!
//! # Collect continuously with a config file, appending to a file
//! deadwatch --config deadwatch.toml --replay captured.json --output deadlocks.jsonl
//!
//! # Show the ring buffer query for the configured session
//! deadwatch --config deadwatch.toml --print-query
//! ```

pub mod config;
pub mod duration;

pub use config::{DeadwatchConfig, OutputConfig};
pub use duration::parse_duration;
