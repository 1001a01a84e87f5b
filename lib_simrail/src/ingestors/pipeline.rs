//! # Ingestion Pipeline
//!
//! Wires the whole engine together:
//!
//! ```text
//! servers (30 s) ──► active server codes ──┬─► trains   (5 s, per server) ──► AnalyticsHub
//!                                          ├─► stations (60 s, per server)
//!                                          └─► time     (300 s, per server)
//! ```
//!
//! Every orchestrator can be tuned with `SIMRAIL_<KIND>_REFRESH_INTERVAL`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::analytics::{DelayMap, MemoryTopologyStore, SignalView, TopologyStore};
use crate::configs::IngestConfig;
use crate::core::{FetchOrchestrator, PerServerOrchestrator, PersistError, ServerListFn};
use crate::ingestors::hub::AnalyticsHub;
use crate::ingestors::jobs::{ServerTimeJob, ServersJob, StationsJob, TrainsJob};
use crate::source::{SimrailClient, TrainKey};

pub const SERVERS_INTERVAL: Duration = Duration::from_secs(30);
pub const TRAINS_INTERVAL: Duration = Duration::from_secs(5);
pub const STATIONS_INTERVAL: Duration = Duration::from_secs(60);
pub const TIME_INTERVAL: Duration = Duration::from_secs(300);

/// # Pipeline
///
/// Orchestrators plus the analytics consumer. Build it with [`Pipeline::new`],
/// run it with [`Pipeline::start`], persist its state with [`Pipeline::flush`].
pub struct Pipeline {
    servers: Arc<FetchOrchestrator<ServersJob>>,
    trains: Arc<PerServerOrchestrator<TrainsJob>>,
    stations: Arc<PerServerOrchestrator<StationsJob>>,
    time: Arc<PerServerOrchestrator<ServerTimeJob>>,
    hub: Arc<AnalyticsHub<SimrailClient>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Builds the pipeline with an in-memory topology store.
    pub fn new(config: &IngestConfig) -> anyhow::Result<Self> {
        Self::with_store(config, Arc::new(MemoryTopologyStore::new()))
    }

    /// Builds the pipeline, sending inferred signal connections to `store`.
    pub fn with_store(config: &IngestConfig, store: Arc<dyn TopologyStore>) -> anyhow::Result<Self> {
        let client = Arc::new(SimrailClient::new(config)?);

        let servers = Arc::new(FetchOrchestrator::new(
            "servers",
            SERVERS_INTERVAL,
            ServersJob::new(Arc::clone(&client)),
        ));

        let server_list = servers.subscribe();
        let active: ServerListFn = Arc::new(move || {
            server_list
                .borrow()
                .as_ref()
                .map(|all| {
                    all.iter()
                        .filter(|s| s.is_active)
                        .map(|s| s.server_code.clone())
                        .collect()
                })
                .unwrap_or_default()
        });

        let trains = Arc::new(PerServerOrchestrator::new(
            "trains",
            TRAINS_INTERVAL,
            TrainsJob::new(Arc::clone(&client)),
            Arc::clone(&active),
        ));
        let stations = Arc::new(PerServerOrchestrator::new(
            "stations",
            STATIONS_INTERVAL,
            StationsJob::new(Arc::clone(&client)),
            Arc::clone(&active),
        ));
        let time = Arc::new(PerServerOrchestrator::new(
            "time",
            TIME_INTERVAL,
            ServerTimeJob::new(Arc::clone(&client)),
            active,
        ));

        let hub = Arc::new(AnalyticsHub::load(config, client, store)?);

        Ok(Self {
            servers,
            trains,
            stations,
            time,
            hub,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts every orchestrator and the analytics consumer.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            log::warn!("pipeline already started");
            return;
        }

        // Subscribe before the first trains cycle can publish.
        let mut events = self.trains.subscribe_events();
        let hub = Arc::clone(&self.hub);
        tasks.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        log::trace!("trains event for {}", event.server_code);
                        // The delay pass runs detached; its result only matters to tests.
                        drop(hub.ingest(event.data));
                    }
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("analytics consumer lagged, {} train batches dropped", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            log::info!("analytics consumer stopped");
        }));

        tasks.extend(self.servers.start());
        tasks.extend(self.trains.start());
        tasks.extend(self.stations.start());
        tasks.extend(self.time.start());
        log::info!("pipeline started with {} tasks", tasks.len());
    }

    /// Stops every task. Analyzer state stays in memory until [`Pipeline::flush`].
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Persists all analyzer state synchronously.
    pub fn flush(&self) -> Result<(), PersistError> {
        self.hub.flush()
    }

    /// Best-effort flush that never blocks; for panic hooks.
    pub fn try_flush(&self) -> usize {
        self.hub.try_flush()
    }

    pub fn servers(&self) -> &FetchOrchestrator<ServersJob> {
        &self.servers
    }

    pub fn trains(&self) -> &PerServerOrchestrator<TrainsJob> {
        &self.trains
    }

    pub fn stations(&self) -> &PerServerOrchestrator<StationsJob> {
        &self.stations
    }

    pub fn time(&self) -> &PerServerOrchestrator<ServerTimeJob> {
        &self.time
    }

    /// Signals enriched with the trains of `server_code` approaching them.
    pub fn signals_with_trains(&self, server_code: &str) -> Vec<SignalView> {
        let trains = self.trains.get(server_code);
        self.hub
            .signals_with_trains(trains.as_deref().map(Vec::as_slice).unwrap_or_default())
    }

    pub fn delays_for(&self, key: &TrainKey) -> Option<DelayMap> {
        self.hub.delays_for(key)
    }

    pub fn route_points(&self, route: &str) -> Option<Vec<(f64, f64)>> {
        self.hub.route_points(route)
    }
}
