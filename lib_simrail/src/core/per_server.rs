//! # Per-Server Fetch Orchestrator
//!
//! Specialisation of the fetch cycle for data partitioned by game server.
//! Every cycle walks the current list of active servers **one at a time**,
//! dispatching the worker with each server code under the same watchdog as
//! the global orchestrator. The upstream service never sees more than one
//! request per data kind at once.
//!
//! Two outputs come out of a cycle:
//! 1. a [`ServerEvent`] per server, broadcast as soon as that server is done;
//! 2. the full map `server code -> data`, published once the pass is complete,
//!    so the snapshot always reflects one coherent pass through all servers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::orchestrator::{CycleSettings, Snapshot};
use crate::core::worker::{FetchJob, WorkerUnit};
use crate::loggers::metrics::{MetricsSink, RefreshStats};

const EVENT_BUFFER: usize = 256;

/// Supplies the server codes to visit on the next cycle.
pub type ServerListFn = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Full-round snapshot keyed by server code.
pub type ServerMap<T> = HashMap<String, Arc<T>>;

/// Incremental result for a single server.
#[derive(Debug)]
pub struct ServerEvent<T> {
    /// Server the data belongs to.
    pub server_code: String,
    /// Fresh data for that server.
    pub data: Arc<T>,
}

impl<T> Clone for ServerEvent<T> {
    fn clone(&self) -> Self {
        Self {
            server_code: self.server_code.clone(),
            data: Arc::clone(&self.data),
        }
    }
}

/// # Per-Server Orchestrator
///
/// See the module documentation for the cycle shape.
pub struct PerServerOrchestrator<J>
where
    J: FetchJob<Request = String>,
{
    settings: CycleSettings,
    job: Arc<J>,
    servers: ServerListFn,
    latest: Arc<RwLock<ServerMap<J::Output>>>,
    snapshot_tx: Arc<watch::Sender<Snapshot<ServerMap<J::Output>>>>,
    events_tx: broadcast::Sender<ServerEvent<J::Output>>,
    started: AtomicBool,
}

impl<J> PerServerOrchestrator<J>
where
    J: FetchJob<Request = String>,
{
    /// Creates an orchestrator for `kind`, visiting the servers returned by `servers`.
    pub fn new(kind: &str, default_interval: Duration, job: J, servers: ServerListFn) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            settings: CycleSettings::new(kind, default_interval),
            job: Arc::new(job),
            servers,
            latest: Arc::new(RwLock::new(HashMap::new())),
            snapshot_tx: Arc::new(snapshot_tx),
            events_tx,
            started: AtomicBool::new(false),
        }
    }

    /// Replaces the watchdog window applied to each server.
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

    /// Last known data for one server, without waiting for a cycle.
    pub fn get(&self, server_code: &str) -> Option<Arc<J::Output>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_code)
            .cloned()
    }

    /// The last complete round.
    pub fn snapshot(&self) -> Snapshot<ServerMap<J::Output>> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver notified after every complete round.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<ServerMap<J::Output>>> {
        self.snapshot_tx.subscribe()
    }

    /// Receiver of per-server events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent<J::Output>> {
        self.events_tx.subscribe()
    }

    /// Refresh count and latency so far (one count per full round).
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
        let servers = Arc::clone(&self.servers);
        let latest = Arc::clone(&self.latest);
        let snapshot_tx = Arc::clone(&self.snapshot_tx);
        let events_tx = self.events_tx.clone();

        Some(tokio::spawn(async move {
            log::info!(
                "{} per-server orchestrator started (interval {}s)",
                settings.kind,
                settings.interval.as_secs_f32()
            );
            let mut worker = WorkerUnit::spawn(settings.kind.clone(), job);

            loop {
                let started = Instant::now();
                let codes = (*servers)();
                let mut round: ServerMap<J::Output> = HashMap::with_capacity(codes.len());
                let mut failures = 0usize;

                for code in &codes {
                    match worker.dispatch(code.clone(), settings.watchdog).await {
                        Ok(output) => {
                            let data = Arc::new(output);
                            latest
                                .write()
                                .unwrap_or_else(PoisonError::into_inner)
                                .insert(code.clone(), Arc::clone(&data));
                            round.insert(code.clone(), Arc::clone(&data));
                            // Nobody listening is fine.
                            let _ = events_tx.send(ServerEvent {
                                server_code: code.clone(),
                                data,
                            });
                        }
                        Err(e) => {
                            failures += 1;
                            log::error!("{} fetch for {} failed: {}", settings.kind, code, e);
                            // Keep the previous value so the round stays complete.
                            let previous = latest
                                .read()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get(code)
                                .cloned();
                            if let Some(previous) = previous {
                                round.insert(code.clone(), previous);
                            }
                        }
                    }
                }

                // Servers that left the list disappear from the read accessor too.
                latest
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|code, _| round.contains_key(code));
                snapshot_tx.send_replace(Some(Arc::new(round)));

                let delay = settings.finish_cycle(started, failures > 0);
                worker.supervise_for(delay).await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl FetchJob for Echo {
        type Request = String;
        type Output = String;

        async fn run(&self, server_code: String) -> String {
            format!("data:{server_code}")
        }
    }

    #[tokio::test]
    async fn events_arrive_per_server_before_the_round_snapshot() {
        let servers: ServerListFn = Arc::new(|| vec!["en1".to_string(), "pl2".to_string()]);
        let orchestrator =
            PerServerOrchestrator::new("unit_echo", Duration::from_secs(60), Echo, servers);
        let mut events = orchestrator.subscribe_events();
        let mut rounds = orchestrator.subscribe();
        let handle = orchestrator.start().unwrap();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.server_code, "en1");
        assert_eq!(second.server_code, "pl2");
        assert_eq!(second.data.as_str(), "data:pl2");

        rounds.changed().await.unwrap();
        let round = orchestrator.snapshot().unwrap();
        handle.abort();

        assert_eq!(round.len(), 2);
        assert_eq!(orchestrator.get("en1").unwrap().as_str(), "data:en1");
        assert!(orchestrator.get("de1").is_none());
    }
}
