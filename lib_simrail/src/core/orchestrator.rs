//! # Fetch Orchestrator
//!
//! Owns the recurring fetch cycle of one data kind. A cycle sends a single
//! "run" request to the kind's [`WorkerUnit`] and waits for the reply or the
//! watchdog, publishes the result, then sleeps for whatever is left of the
//! refresh interval. Slow cycles therefore never compound: a cycle that took
//! longer than the interval is followed immediately by the next one.
//!
//! Only one cycle is in flight per orchestrator. The loop is
//! reply-then-reschedule, never a free-running timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::configs::refresh_interval;
use crate::core::worker::{FetchJob, WorkerUnit};
use crate::loggers::metrics::{LogMetricsSink, MetricsSink, RefreshStats};

/// Longest a worker may take to answer one request.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(300);

/// Delay before the next cycle: `max(0, interval - elapsed)`.
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Latest snapshot published by an orchestrator. `None` until the first success.
pub type Snapshot<T> = Option<Arc<T>>;

/// Settings shared by both orchestrator flavours.
#[derive(Clone)]
pub(crate) struct CycleSettings {
    pub(crate) kind: String,
    pub(crate) interval: Duration,
    pub(crate) watchdog: Duration,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) stats: Arc<Mutex<RefreshStats>>,
}

impl CycleSettings {
    pub(crate) fn new(kind: &str, default_interval: Duration) -> Self {
        Self {
            kind: kind.to_string(),
            interval: refresh_interval(kind, default_interval),
            watchdog: WATCHDOG_TIMEOUT,
            metrics: Arc::new(LogMetricsSink),
            stats: Arc::new(Mutex::new(RefreshStats::default())),
        }
    }

    /// Folds a finished cycle into the statistics and returns the sleep before the next one.
    pub(crate) fn finish_cycle(&self, started: Instant, failed: bool) -> Duration {
        let elapsed = started.elapsed();
        let stats = {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.record(elapsed, failed);
            *stats
        };
        self.metrics.record(&self.kind, &stats);
        next_delay(self.interval, elapsed)
    }

    pub(crate) fn stats(&self) -> RefreshStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// # Fetch Orchestrator
///
/// Recurring fetch of one global data kind (for example the server list).
///
/// Consumers either read the last snapshot with [`FetchOrchestrator::snapshot`]
/// or wait for new ones through [`FetchOrchestrator::subscribe`].
pub struct FetchOrchestrator<J>
where
    J: FetchJob<Request = ()>,
{
    settings: CycleSettings,
    job: Arc<J>,
    snapshot_tx: Arc<watch::Sender<Snapshot<J::Output>>>,
    started: AtomicBool,
}

impl<J> FetchOrchestrator<J>
where
    J: FetchJob<Request = ()>,
{
    /// Creates an orchestrator for `kind`. The interval can be overridden with
    /// `SIMRAIL_<KIND>_REFRESH_INTERVAL`.
    pub fn new(kind: &str, default_interval: Duration, job: J) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            settings: CycleSettings::new(kind, default_interval),
            job: Arc::new(job),
            snapshot_tx: Arc::new(snapshot_tx),
            started: AtomicBool::new(false),
        }
    }

    /// Replaces the watchdog window (5 minutes by default).
    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.settings.watchdog = watchdog;
        self
    }

    /// Routes refresh statistics to `sink` instead of the log.
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.settings.metrics = sink;
        self
    }

    /// Data kind identifier.
    pub fn kind(&self) -> &str {
        &self.settings.kind
    }

    /// Effective refresh interval.
    pub fn interval(&self) -> Duration {
        self.settings.interval
    }

    /// The last published snapshot.
    pub fn snapshot(&self) -> Snapshot<J::Output> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<J::Output>> {
        self.snapshot_tx.subscribe()
    }

    /// Refresh count and latency so far.
    pub fn stats(&self) -> RefreshStats {
        self.settings.stats()
    }

    /// Starts the recurring cycle. Returns `None` if it is already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            log::warn!("{} orchestrator already started", self.settings.kind);
            return None;
        }

        let settings = self.settings.clone();
        let job = Arc::clone(&self.job);
        let snapshot_tx = Arc::clone(&self.snapshot_tx);

        Some(tokio::spawn(async move {
            log::info!(
                "{} orchestrator started (interval {}s)",
                settings.kind,
                settings.interval.as_secs_f32()
            );
            let mut worker = WorkerUnit::spawn(settings.kind.clone(), job);

            loop {
                // --- Phase 1: Capture cycle start ---
                let started = Instant::now();

                // --- Phase 2: Run the worker under the watchdog ---
                let failed = match worker.dispatch((), settings.watchdog).await {
                    Ok(output) => {
                        snapshot_tx.send_replace(Some(Arc::new(output)));
                        false
                    }
                    Err(e) => {
                        log::error!("{} cycle failed: {}", settings.kind, e);
                        true
                    }
                };

                // --- Phase 3: Self-correcting reschedule ---
                let delay = settings.finish_cycle(started, failed);
                worker.supervise_for(delay).await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn next_delay_subtracts_elapsed_and_floors_at_zero() {
        let interval = Duration::from_secs(5);
        assert_eq!(next_delay(interval, Duration::from_secs(2)), Duration::from_secs(3));
        assert_eq!(next_delay(interval, Duration::from_secs(5)), Duration::ZERO);
        assert_eq!(next_delay(interval, Duration::from_secs(9)), Duration::ZERO);
    }

    struct Counter(AtomicU32);

    impl FetchJob for Counter {
        type Request = ();
        type Output = u32;

        async fn run(&self, _request: ()) -> u32 {
            self.0.fetch_add(1, Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn publishes_snapshots_and_counts_refreshes() {
        let orchestrator = FetchOrchestrator::new(
            "unit_counter",
            Duration::from_millis(10),
            Counter(AtomicU32::new(0)),
        );
        let mut rx = orchestrator.subscribe();
        let handle = orchestrator.start().unwrap();
        assert!(orchestrator.start().is_none());

        // The third publish happens after two cycles were fully accounted.
        for _ in 0..3 {
            rx.changed().await.unwrap();
        }
        handle.abort();

        assert!(orchestrator.snapshot().is_some());
        assert!(orchestrator.stats().refresh_count >= 2);
    }
}
