//! The collection orchestrator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use deadlock_adapters::{effective_since, Poller};
use deadlock_graph::Assembler;
use deadlock_types::{DeadlockPayload, HighWaterMark};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointStore, MemoryCheckpoint};
use crate::output::TelemetrySink;
use crate::state::{CollectorState, CollectorStatus, CycleReport, SharedStatus};
use crate::{CollectError, Output};

/// Payload bound when none is configured.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 19_000_000;

/// Collection interval when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Polls one database instance for deadlocks and emits them.
///
/// Each cycle polls the source above the high-water mark, assembles a
/// size-bounded payload, hands it to every sink, and only then moves the
/// mark to the newest row emitted. A cycle that fails at any of those steps
/// leaves the mark where it was, so nothing is lost and nothing emitted is
/// sent twice by a successful cycle.
///
/// # Example
///
/// ```rust,no_run
/// use deadlock_adapters::replay::ReplaySource;
/// use deadlock_adapters::Poller;
/// use deadlock_sdk::{Collector, Output};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let collector = Collector::builder("primary", Poller::new(ReplaySource::new("events.json")))
///         .host("db-1.internal")
///         .output(Output::file("deadlocks.jsonl"))
///         .interval(Duration::from_secs(10))
///         .build()
///         .await?;
///
///     // Start background collection
///     let handle = collector.start();
///
///     tokio::time::sleep(Duration::from_secs(60)).await;
///     handle.stop();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Collector {
    host: String,
    tags: Vec<String>,
    enabled: bool,
    interval: Duration,
    max_payload_bytes: usize,
    max_lookback: Option<chrono::Duration>,
    poller: Poller,
    assembler: Assembler,
    sinks: Vec<Box<dyn TelemetrySink>>,
    checkpoint: Arc<dyn CheckpointStore>,
    hwm: HighWaterMark,
    status: SharedStatus,
}

impl Collector {
    /// Create a builder for configuring the collector.
    pub fn builder(instance: impl Into<String>, poller: Poller) -> CollectorBuilder {
        CollectorBuilder::new(instance.into(), poller)
    }

    /// The instance this collector polls.
    pub fn instance(&self) -> &str {
        self.hwm.instance()
    }

    pub fn high_water_mark(&self) -> &HighWaterMark {
        &self.hwm
    }

    pub fn status(&self) -> CollectorStatus {
        self.status.snapshot()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one collection cycle.
    ///
    /// # Errors
    ///
    /// Source, sink and checkpoint failures abort the cycle. Documents that
    /// fail to parse do not; they are emitted as error rows.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CollectError> {
        if !self.enabled {
            debug!(instance = self.instance(), "Collector disabled, skipping cycle");
            let now = Utc::now();
            return Ok(CycleReport {
                started_at: now,
                since: self.hwm.value(),
                polled: 0,
                emitted: 0,
                deferred: 0,
                parse_errors: 0,
                bytes: 0,
                high_water_mark: self.hwm.value(),
                skipped: true,
            });
        }

        self.status.begin_cycle();
        let result = self.collect().await;

        match &result {
            Ok(report) => self.status.cycle_succeeded(report.clone()),
            Err(err) => {
                error!(
                    instance = self.instance(),
                    error = %err,
                    high_water_mark = %self.hwm.value(),
                    "Deadlock collection cycle failed"
                );
                self.status.cycle_failed(&err.to_string(), self.hwm.value());
            }
        }
        result
    }

    async fn collect(&mut self) -> Result<CycleReport, CollectError> {
        let started_at = Utc::now();
        let since = match self.max_lookback {
            Some(lookback) => effective_since(self.hwm.value(), started_at, lookback),
            None => self.hwm.value(),
        };

        let events = self.poller.poll(since).await?;
        let mut report = CycleReport {
            started_at,
            since,
            polled: events.len(),
            emitted: 0,
            deferred: 0,
            parse_errors: 0,
            bytes: 0,
            high_water_mark: self.hwm.value(),
            skipped: false,
        };
        if events.is_empty() {
            return Ok(report);
        }

        let assembly = self.assembler.assemble(&events, self.max_payload_bytes);
        let last_emitted = assembly.last_timestamp();
        report.emitted = assembly.rows.len();
        report.deferred = assembly.deferred;
        report.parse_errors = assembly.parse_errors;
        report.bytes = assembly.total_bytes;

        let payload = DeadlockPayload::new(
            self.host.clone(),
            self.interval.as_secs_f64(),
            assembly.rows,
        )
        .with_tags(self.tags.clone());

        for sink in &self.sinks {
            sink.emit(&payload).await?;
        }

        if let Some(ts) = last_emitted {
            if self.hwm.advance(ts) {
                self.checkpoint.save(&self.hwm).await?;
            }
        }
        report.high_water_mark = self.hwm.value();

        info!(
            instance = self.instance(),
            emitted = report.emitted,
            deferred = report.deferred,
            parse_errors = report.parse_errors,
            bytes = report.bytes,
            high_water_mark = %report.high_water_mark,
            "Emitted deadlock batch"
        );
        if report.deferred > 0 {
            warn!(
                instance = self.instance(),
                deferred = report.deferred,
                "Deadlocks deferred to next cycle"
            );
        }

        Ok(report)
    }

    /// Start background collection.
    ///
    /// This spawns a tokio task that runs a cycle every interval. Stopping
    /// the returned handle (or dropping it) ends the task; a cycle still in
    /// flight is abandoned and its rows are polled again by the next run.
    pub fn start(self) -> CollectorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let status = self.status.clone();
        let interval = self.interval;
        let mut collector = self;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                instance = collector.instance(),
                source = collector.poller.description(),
                interval_ms = interval.as_millis() as u64,
                "Deadlock collector started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stopped = tokio::select! {
                            _ = collector.run_cycle() => false,
                            _ = stop_rx.changed() => true,
                        };
                        if stopped {
                            collector.status.cycle_abandoned(collector.hwm.value());
                            break;
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(instance = collector.instance(), "Deadlock collector stopped");
            collector
        });

        CollectorHandle {
            stop_tx,
            status,
            task,
        }
    }
}

/// Builder for configuring a [`Collector`].
#[derive(Debug)]
pub struct CollectorBuilder {
    instance: String,
    poller: Poller,
    host: Option<String>,
    tags: Vec<String>,
    enabled: bool,
    interval: Option<Duration>,
    max_payload_bytes: Option<usize>,
    max_lookback: Option<chrono::Duration>,
    assembler: Option<Assembler>,
    sinks: Vec<Box<dyn TelemetrySink>>,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    start_at: Option<DateTime<Utc>>,
}

impl CollectorBuilder {
    fn new(instance: String, poller: Poller) -> Self {
        Self {
            instance,
            poller,
            host: None,
            tags: Vec::new(),
            enabled: true,
            interval: None,
            max_payload_bytes: None,
            max_lookback: None,
            assembler: None,
            sinks: Vec::new(),
            checkpoint: None,
            start_at: None,
        }
    }

    /// Host name reported in payloads (default: the instance name).
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Tags attached to every payload.
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Disabled collectors skip every cycle.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the collection interval.
    ///
    /// Defaults to 10 seconds if not specified.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Upper bound on the serialized rows of one payload (default: 19 000 000).
    pub fn max_payload_bytes(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = Some(bytes);
        self
    }

    /// Never poll further back than this from the current time.
    pub fn max_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.max_lookback = Some(lookback);
        self
    }

    /// Use a configured assembler (obfuscation options, redaction).
    pub fn assembler(mut self, assembler: Assembler) -> Self {
        self.assembler = Some(assembler);
        self
    }

    /// Add an output destination.
    ///
    /// Multiple outputs can be added; payloads will be emitted to all of them.
    pub fn output(self, output: Output) -> Self {
        self.sink(output)
    }

    /// Add any telemetry sink.
    pub fn sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Where to load and save the high-water mark (default: in memory).
    pub fn checkpoint(mut self, store: impl CheckpointStore + 'static) -> Self {
        self.checkpoint = Some(Arc::new(store));
        self
    }

    /// Share a checkpoint store with other collectors.
    pub fn shared_checkpoint(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(store);
        self
    }

    /// Initial mark when the checkpoint store has none (default: now).
    pub fn start_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.start_at = Some(start_at);
        self
    }

    /// Build the collector, loading its mark from the checkpoint store.
    ///
    /// # Errors
    ///
    /// [`CollectError::Checkpoint`] if the store cannot be read.
    pub async fn build(self) -> Result<Collector, CollectError> {
        let checkpoint = self
            .checkpoint
            .unwrap_or_else(|| Arc::new(MemoryCheckpoint::new()));

        let initial = match checkpoint.load(&self.instance).await? {
            Some(saved) => {
                debug!(instance = %self.instance, high_water_mark = %saved, "Restored checkpoint");
                saved
            }
            None => self.start_at.unwrap_or_else(Utc::now),
        };

        Ok(Collector {
            host: self.host.unwrap_or_else(|| self.instance.clone()),
            tags: self.tags,
            enabled: self.enabled,
            interval: self.interval.unwrap_or(DEFAULT_INTERVAL),
            max_payload_bytes: self.max_payload_bytes.unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
            max_lookback: self.max_lookback,
            poller: self.poller,
            assembler: self.assembler.unwrap_or_default(),
            sinks: self.sinks,
            checkpoint,
            status: SharedStatus::new(&self.instance, initial),
            hwm: HighWaterMark::new(self.instance, initial),
        })
    }
}

/// Handle for controlling background collection.
///
/// Drop this handle to stop collection, or call `stop()` explicitly.
#[derive(Debug)]
pub struct CollectorHandle {
    stop_tx: watch::Sender<bool>,
    status: SharedStatus,
    task: JoinHandle<Collector>,
}

impl CollectorHandle {
    /// Current status of the collector.
    pub fn status(&self) -> CollectorStatus {
        self.status.snapshot()
    }

    /// Whether a cycle is running right now.
    pub fn is_collecting(&self) -> bool {
        self.status.snapshot().state == CollectorState::Collecting
    }

    /// Stop background collection.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the task to finish, getting the collector back.
    pub async fn shutdown(self) -> Option<Collector> {
        let _ = self.stop_tx.send(true);
        self.task.await.ok()
    }
}
