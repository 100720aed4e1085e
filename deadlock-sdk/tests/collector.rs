//! End-to-end collection cycles against a scripted source.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use deadlock_adapters::{DeadlockSource, Poller, SourceError};
use deadlock_sdk::{
    CollectError, Collector, CollectorState, FileCheckpoint, MemoryCheckpoint, Output, SinkError,
};
use deadlock_types::DeadlockEvent;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn deadlock_xml(a: u32, b: u32) -> String {
    format!(
        r#"<event name="xml_deadlock_report"><data name="xml_report"><value><deadlock>
<victim-list><victimProcess id="process2"/></victim-list>
<process-list>
<process id="process1" spid="52" waittime="3000" lockMode="U"><inputbuf>UPDATE t SET b=b+10 WHERE a={a};</inputbuf></process>
<process id="process2" spid="53" waittime="2500" lockMode="U"><inputbuf>UPDATE t SET b=b+10 WHERE a={b};</inputbuf></process>
</process-list>
<resource-list>
<keylock objectname="db.dbo.t" indexname="PK_t" mode="X">
<owner-list><owner id="process2"/></owner-list><waiter-list><waiter id="process1"/></waiter-list>
</keylock>
</resource-list>
</deadlock></value></data></event>"#
    )
}

fn event(at: DateTime<Utc>) -> DeadlockEvent {
    DeadlockEvent::new(at, deadlock_xml(1, 2))
}

/// Serves whatever is in `events`, honoring `since` and `limit` like the
/// ring buffer query does.
#[derive(Debug, Default)]
struct ScriptedSource {
    events: Mutex<Vec<DeadlockEvent>>,
    down: AtomicBool,
    calls: AtomicUsize,
    polled_since: Mutex<Vec<DateTime<Utc>>>,
}

impl ScriptedSource {
    fn with_events(events: Vec<DeadlockEvent>) -> Arc<Self> {
        let source = Self::default();
        *source.events.lock().unwrap() = events;
        Arc::new(source)
    }

    fn push(&self, event: DeadlockEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeadlockSource for ScriptedSource {
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DeadlockEvent>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.polled_since.lock().unwrap().push(since);
        if self.down.load(Ordering::SeqCst) {
            return Err(SourceError::Connection("connection refused".into()));
        }

        let mut rows: Vec<_> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_timestamp > since)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.event_timestamp);
        rows.truncate(limit);
        Ok(rows)
    }

    fn description(&self) -> &str {
        "scripted"
    }
}

#[tokio::test]
async fn emitted_rows_are_never_emitted_again() {
    let source = ScriptedSource::with_events(vec![event(t(1)), event(t(2))]);
    let (output, mut rx) = Output::channel(16);
    let mut collector = Collector::builder("primary", Poller::new(source.clone()))
        .host("db-1")
        .tags(vec!["env:test".into()])
        .output(output)
        .start_at(t(0))
        .build()
        .await
        .unwrap();

    let report = collector.run_cycle().await.unwrap();
    assert_eq!(report.emitted, 2);
    assert_eq!(report.high_water_mark, t(2));

    let payload = rx.try_recv().unwrap();
    assert_eq!(payload.host, "db-1");
    assert_eq!(payload.tags, vec!["env:test"]);
    assert_eq!(payload.dbm_type, "deadlocks");
    assert_eq!(payload.collection_interval, 10.0);
    assert_eq!(payload.len(), 2);
    assert_eq!(payload.sqlserver_deadlocks[0].timestamp, t(1));

    // Nothing new: no payload at all
    let report = collector.run_cycle().await.unwrap();
    assert_eq!(report.polled, 0);
    assert!(rx.try_recv().is_err());

    source.push(event(t(3)));
    let report = collector.run_cycle().await.unwrap();
    assert_eq!(report.emitted, 1);
    let payload = rx.try_recv().unwrap();
    assert_eq!(payload.sqlserver_deadlocks[0].timestamp, t(3));
    assert_eq!(collector.high_water_mark().value(), t(3));
}

#[tokio::test]
async fn source_failure_keeps_mark_and_counts_failures() {
    let source = ScriptedSource::with_events(vec![event(t(1))]);
    source.set_down(true);
    let (output, mut rx) = Output::channel(16);
    let mut collector = Collector::builder("primary", Poller::new(source.clone()))
        .output(output)
        .start_at(t(0))
        .build()
        .await
        .unwrap();

    for _ in 0..2 {
        let err = collector.run_cycle().await.unwrap_err();
        assert!(matches!(err, CollectError::Source(ref e) if e.is_connectivity()));
    }
    assert_eq!(collector.high_water_mark().value(), t(0));

    let status = collector.status();
    assert_eq!(status.consecutive_failures, 2);
    assert_eq!(status.state, CollectorState::Idle);
    assert!(status.last_error.unwrap().contains("connection refused"));
    assert!(rx.try_recv().is_err());

    source.set_down(false);
    let report = collector.run_cycle().await.unwrap();
    assert_eq!(report.emitted, 1);
    assert!(collector.status().is_healthy());
    assert_eq!(rx.try_recv().unwrap().len(), 1);
}

#[tokio::test]
async fn deferred_rows_are_polled_again() {
    let source = ScriptedSource::with_events(vec![event(t(1)), event(t(2)), event(t(3))]);
    let (output, mut rx) = Output::channel(16);
    let mut collector = Collector::builder("primary", Poller::new(source.clone()))
        .output(output)
        .max_payload_bytes(1)
        .start_at(t(0))
        .build()
        .await
        .unwrap();

    let mut seen = Vec::new();
    for expected_deferred in [2, 1, 0] {
        let report = collector.run_cycle().await.unwrap();
        assert_eq!(report.emitted, 1);
        assert_eq!(report.deferred, expected_deferred);
        seen.push(rx.try_recv().unwrap().sqlserver_deadlocks[0].timestamp);
    }
    assert_eq!(seen, vec![t(1), t(2), t(3)]);

    let report = collector.run_cycle().await.unwrap();
    assert_eq!(report.polled, 0);
}

#[tokio::test]
async fn parse_errors_do_not_abort_the_cycle() {
    let source = ScriptedSource::with_events(vec![
        event(t(1)),
        DeadlockEvent::new(t(2), "<event><deadlock><process-list>"),
        event(t(3)),
    ]);
    let (output, mut rx) = Output::channel(16);
    let mut collector = Collector::builder("primary", Poller::new(source))
        .output(output)
        .start_at(t(0))
        .build()
        .await
        .unwrap();

    let report = collector.run_cycle().await.unwrap();
    assert_eq!(report.emitted, 3);
    assert_eq!(report.parse_errors, 1);
    assert_eq!(report.high_water_mark, t(3));

    let rows = rx.try_recv().unwrap().sqlserver_deadlocks;
    assert!(!rows[0].is_error());
    assert!(rows[1].is_error());
    assert!(rows[1].xml.starts_with("{ERROR: "));
    assert!(!rows[2].is_error());
}

#[tokio::test]
async fn restart_resumes_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.json");
    let source = ScriptedSource::with_events(vec![event(t(1)), event(t(2))]);

    let mut first = Collector::builder("primary", Poller::new(source.clone()))
        .checkpoint(FileCheckpoint::new(&path))
        .start_at(t(0))
        .build()
        .await
        .unwrap();
    first.run_cycle().await.unwrap();
    drop(first);

    let (output, mut rx) = Output::channel(16);
    let mut second = Collector::builder("primary", Poller::new(source.clone()))
        .output(output)
        .checkpoint(FileCheckpoint::new(&path))
        .start_at(t(-3600))
        .build()
        .await
        .unwrap();
    assert_eq!(second.high_water_mark().value(), t(2));

    let report = second.run_cycle().await.unwrap();
    assert_eq!(report.polled, 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn disabled_collector_skips_cycles() {
    let source = ScriptedSource::with_events(vec![event(t(1))]);
    let mut collector = Collector::builder("primary", Poller::new(source.clone()))
        .enabled(false)
        .start_at(t(0))
        .build()
        .await
        .unwrap();

    let report = collector.run_cycle().await.unwrap();
    assert!(report.skipped);
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert_eq!(collector.high_water_mark().value(), t(0));
}

#[tokio::test]
async fn lookback_bounds_the_poll() {
    let now = Utc::now();
    let source = ScriptedSource::with_events(vec![
        event(now - chrono::Duration::hours(2)),
        event(now - chrono::Duration::minutes(1)),
    ]);
    let (output, mut rx) = Output::channel(16);
    let mut collector = Collector::builder("primary", Poller::new(source.clone()))
        .output(output)
        .max_lookback(chrono::Duration::minutes(10))
        .start_at(Utc.timestamp_opt(0, 0).unwrap())
        .build()
        .await
        .unwrap();

    let report = collector.run_cycle().await.unwrap();
    assert_eq!(report.emitted, 1);
    assert!(report.since >= now - chrono::Duration::minutes(10));
    assert!(source.polled_since.lock().unwrap()[0] >= now - chrono::Duration::minutes(10));
    assert_eq!(rx.try_recv().unwrap().len(), 1);
}

#[tokio::test]
async fn sink_failure_keeps_mark_and_checkpoint() {
    let source = ScriptedSource::with_events(vec![event(t(1))]);
    let store = Arc::new(MemoryCheckpoint::new());
    let (output, rx) = Output::channel(16);
    drop(rx);

    let mut collector = Collector::builder("primary", Poller::new(source))
        .output(output)
        .shared_checkpoint(store.clone())
        .start_at(t(0))
        .build()
        .await
        .unwrap();

    let err = collector.run_cycle().await.unwrap_err();
    assert!(matches!(err, CollectError::Sink(SinkError::ChannelClosed)));
    assert_eq!(collector.high_water_mark().value(), t(0));
    assert_eq!(store.get("primary"), None);
}

#[tokio::test(start_paused = true)]
async fn background_collection_starts_and_stops() {
    let source = ScriptedSource::with_events(vec![event(t(1))]);
    let (output, mut rx) = Output::channel(16);
    let collector = Collector::builder("primary", Poller::new(source.clone()))
        .output(output)
        .interval(Duration::from_secs(10))
        .start_at(t(0))
        .build()
        .await
        .unwrap();

    let handle = collector.start();

    let payload = rx.recv().await.unwrap();
    assert_eq!(payload.len(), 1);

    source.push(event(t(2)));
    tokio::time::sleep(Duration::from_secs(11)).await;
    let payload = rx.recv().await.unwrap();
    assert_eq!(payload.sqlserver_deadlocks[0].timestamp, t(2));

    let collector = handle.shutdown().await.unwrap();
    assert_eq!(collector.high_water_mark().value(), t(2));
    assert!(collector.status().cycles >= 2);
    assert_eq!(collector.status().consecutive_failures, 0);
}

/// Takes `delay` to answer every poll.
#[derive(Debug)]
struct SlowSource {
    delay: Duration,
    events: Vec<DeadlockEvent>,
}

#[async_trait]
impl DeadlockSource for SlowSource {
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<DeadlockEvent>, SourceError> {
        tokio::time::sleep(self.delay).await;
        Ok(self
            .events
            .iter()
            .filter(|e| e.event_timestamp > since)
            .cloned()
            .collect())
    }

    fn description(&self) -> &str {
        "slow"
    }
}

#[tokio::test(start_paused = true)]
async fn stopping_mid_cycle_discards_it() {
    let source = SlowSource {
        delay: Duration::from_secs(5),
        events: vec![event(t(1))],
    };
    let store = Arc::new(MemoryCheckpoint::new());
    let (output, mut rx) = Output::channel(16);
    let poller = Poller::new(source).with_timeout(Duration::from_secs(30));
    let collector = Collector::builder("primary", poller)
        .output(output)
        .shared_checkpoint(store.clone())
        .start_at(t(0))
        .build()
        .await
        .unwrap();

    let handle = collector.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(handle.is_collecting());

    let collector = handle.shutdown().await.unwrap();
    assert_eq!(collector.high_water_mark().value(), t(0));

    let status = collector.status();
    assert_eq!(status.state, CollectorState::Idle);
    assert_eq!(status.cycles, 0);
    assert_eq!(status.high_water_mark, t(0));

    assert!(rx.try_recv().is_err());
    assert_eq!(store.get("primary"), None);
}
