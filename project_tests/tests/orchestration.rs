//! # Orchestrator Recovery Tests
//!
//! Drives the generic orchestrators with misbehaving jobs and checks that the
//! cycle keeps going: stalls hit the watchdog, panics are contained, and
//! per-server rounds stay complete.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_simrail::core::{FetchJob, FetchOrchestrator, PerServerOrchestrator, ServerListFn};
use lib_simrail::loggers::{MetricsSink, RefreshStats};
use project_tests::init_logging;
use tokio::time::timeout;

const WATCHDOG: Duration = Duration::from_millis(100);
const PATIENCE: Duration = Duration::from_secs(5);

/// Call 0 never answers, call 1 panics, later calls return their number.
struct Misbehaving {
    calls: AtomicU32,
}

impl FetchJob for Misbehaving {
    type Request = ();
    type Output = u32;

    async fn run(&self, _request: ()) -> u32 {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match call {
            0 => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                call
            }
            1 => panic!("simulated upstream parser fault"),
            _ => call,
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<(String, RefreshStats)>>,
}

impl MetricsSink for RecordingSink {
    fn record(&self, kind: &str, stats: &RefreshStats) {
        self.records.lock().unwrap().push((kind.to_string(), *stats));
    }
}

#[tokio::test]
async fn stalled_and_panicking_workers_do_not_stop_the_cycle() {
    init_logging();
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = FetchOrchestrator::new(
        "it_misbehaving",
        Duration::from_millis(10),
        Misbehaving {
            calls: AtomicU32::new(0),
        },
    )
    .with_watchdog(WATCHDOG)
    .with_metrics(sink.clone());

    let mut snapshots = orchestrator.subscribe();
    let handle = orchestrator.start().unwrap();

    timeout(PATIENCE, snapshots.changed())
        .await
        .expect("a snapshot after two failed cycles")
        .unwrap();
    assert_eq!(orchestrator.snapshot().as_deref(), Some(&2));

    let stats = orchestrator.stats();
    assert_eq!(stats.failures, 2);
    assert!(stats.refresh_count >= 2);
    // The stalled cycle was cut at the watchdog, not at the job's own sleep.
    assert!(stats.avg_latency < Duration::from_secs(5));

    assert!(!handle.is_finished());
    handle.abort();

    let records = sink.records.lock().unwrap();
    assert!(records.iter().all(|(kind, _)| kind == "it_misbehaving"));
    assert_eq!(records[0].1.failures, 1);
}

/// Answers immediately except for `pl2`, which never answers.
struct OneServerStalls;

impl FetchJob for OneServerStalls {
    type Request = String;
    type Output = String;

    async fn run(&self, server_code: String) -> String {
        if server_code == "pl2" {
            std::future::pending::<()>().await;
        }
        format!("trains of {server_code}")
    }
}

#[tokio::test]
async fn a_stalled_server_does_not_block_the_others() {
    init_logging();
    let servers: ServerListFn = Arc::new(|| vec!["en1".into(), "pl2".into(), "de1".into()]);
    let orchestrator =
        PerServerOrchestrator::new("it_trains", Duration::from_secs(60), OneServerStalls, servers)
            .with_watchdog(WATCHDOG);

    let mut events = orchestrator.subscribe_events();
    let mut rounds = orchestrator.subscribe();
    let handle = orchestrator.start().unwrap();

    let first = timeout(PATIENCE, events.recv()).await.unwrap().unwrap();
    let second = timeout(PATIENCE, events.recv()).await.unwrap().unwrap();
    assert_eq!(first.server_code, "en1");
    assert_eq!(second.server_code, "de1");

    timeout(PATIENCE, rounds.changed()).await.unwrap().unwrap();
    let round = orchestrator.snapshot().unwrap();
    // Statistics are folded in right after the round is published.
    timeout(PATIENCE, async {
        while orchestrator.stats().refresh_count == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    handle.abort();

    let mut codes: Vec<_> = round.keys().cloned().collect();
    codes.sort();
    assert_eq!(codes, vec!["de1".to_string(), "en1".to_string()]);
    assert_eq!(orchestrator.stats().failures, 1);
    assert_eq!(
        orchestrator.get("de1").as_deref().map(String::as_str),
        Some("trains of de1")
    );
}
