//! Collector configuration.
//!
//! Settings come from an optional TOML file, then `DEADWATCH_` environment
//! variables (nested keys use `__`, e.g. `DEADWATCH_OBFUSCATION__REPLACE_DIGITS`).
//!
//! ```toml
//! instance = "primary"
//! host = "db-1.internal"
//! collection_interval = "10s"
//! max_lookback = "10m"
//! tags = ["env:prod"]
//!
//! [obfuscation]
//! replace_digits = true
//!
//! [output]
//! file = "deadlocks.jsonl"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use deadlock_adapters::poller::{DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT};
use deadlock_adapters::ring_buffer::DEFAULT_SESSION_NAME;
use deadlock_graph::ObfuscationOptions;
use deadlock_sdk::DEFAULT_MAX_PAYLOAD_BYTES;
use serde::Deserialize;

use crate::duration::parse_duration;

/// Where payloads go. With neither set, payloads are printed to stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Append payloads to this file as JSON lines.
    pub file: Option<PathBuf>,
    /// Send payloads to this `host:port` as newline-delimited JSON.
    pub tcp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeadwatchConfig {
    /// Name of the monitored instance; keys the checkpoint.
    pub instance: String,
    /// Host reported in payloads (default: the instance name).
    pub host: Option<String>,
    pub enabled: bool,
    pub collection_interval: String,
    pub max_payload_bytes: usize,
    pub max_rows: usize,
    pub query_timeout: String,
    /// How far back a poll may reach; `"0s"` disables the bound.
    pub max_lookback: String,
    /// Replace SQL text inside emitted documents with its redacted form.
    pub redact_xml: bool,
    /// Extended-events session holding the deadlock ring buffer.
    pub session_name: String,
    pub tags: Vec<String>,
    pub obfuscation: ObfuscationOptions,
    /// Persist the high-water mark here across restarts.
    pub checkpoint_path: Option<PathBuf>,
    pub output: OutputConfig,
}

impl Default for DeadwatchConfig {
    fn default() -> Self {
        Self {
            instance: "default".to_string(),
            host: None,
            enabled: true,
            collection_interval: "10s".to_string(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_rows: DEFAULT_MAX_ROWS,
            query_timeout: format!("{}s", DEFAULT_QUERY_TIMEOUT.as_secs()),
            max_lookback: "10m".to_string(),
            redact_xml: true,
            session_name: DEFAULT_SESSION_NAME.to_string(),
            tags: Vec::new(),
            obfuscation: ObfuscationOptions::default(),
            checkpoint_path: None,
            output: OutputConfig::default(),
        }
    }
}

impl DeadwatchConfig {
    /// Load from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("DEADWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check the duration strings and limits.
    pub fn validate(&self) -> Result<()> {
        if self.instance.trim().is_empty() {
            bail!("instance must not be empty");
        }
        if self.collection_interval()?.is_zero() {
            bail!("collection_interval must be greater than zero");
        }
        if self.query_timeout()?.is_zero() {
            bail!("query_timeout must be greater than zero");
        }
        self.max_lookback()?;
        if self.max_payload_bytes == 0 {
            bail!("max_payload_bytes must be greater than zero");
        }
        if self.max_rows == 0 {
            bail!("max_rows must be greater than zero");
        }
        if self.output.file.is_some() && self.output.tcp.is_some() {
            bail!("output.file and output.tcp are mutually exclusive");
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(&self.instance)
    }

    pub fn collection_interval(&self) -> Result<Duration> {
        parse_duration(&self.collection_interval).context("Invalid collection_interval")
    }

    pub fn query_timeout(&self) -> Result<Duration> {
        parse_duration(&self.query_timeout).context("Invalid query_timeout")
    }

    /// The lookback bound, or `None` when disabled.
    pub fn max_lookback(&self) -> Result<Option<chrono::Duration>> {
        let lookback = parse_duration(&self.max_lookback).context("Invalid max_lookback")?;
        if lookback.is_zero() {
            return Ok(None);
        }
        Ok(Some(
            chrono::Duration::from_std(lookback).context("max_lookback is out of range")?,
        ))
    }
}
