//! # Analytics Hub
//!
//! Fans one per-server train batch out to the three analyzers, in a fixed
//! order: signals, then routes, then delays. Signals and routes are cheap and
//! run inline under their own locks. Delays may have to fetch timetables, so
//! they run on a separate task; a batch arriving while the previous delay run
//! is still busy is simply not analyzed for delays.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use tokio::task::JoinHandle;

use crate::analytics::{
    DelayAnalyzer, DelayMap, RouteDeduplicator, ScheduleSource, SignalAnalyzer, SignalView,
    TopologyStore,
};
use crate::configs::IngestConfig;
use crate::core::PersistError;
use crate::source::{Train, TrainKey};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Owner of every analyzer fed by the train stream.
pub struct AnalyticsHub<S: ScheduleSource> {
    signals: Mutex<SignalAnalyzer>,
    routes: Mutex<RouteDeduplicator>,
    delays: Arc<DelayAnalyzer<S>>,
}

impl<S: ScheduleSource> AnalyticsHub<S> {
    /// Loads all analyzer state from the data directory in `config`.
    pub fn load(
        config: &IngestConfig,
        source: Arc<S>,
        store: Arc<dyn TopologyStore>,
    ) -> Result<Self, PersistError> {
        Ok(Self {
            signals: Mutex::new(SignalAnalyzer::load(config.signals_file(), store)?),
            routes: Mutex::new(RouteDeduplicator::load(config.routes_dir())?),
            delays: Arc::new(DelayAnalyzer::load(
                source,
                config.delays_file(),
                config.last_index_file(),
            )?),
        })
    }

    /// Feeds one batch. The returned handle resolves once the delay pass is done
    /// (with `None` if it was skipped because another one was running).
    pub fn ingest(&self, trains: Arc<Vec<Train>>) -> JoinHandle<Option<usize>> {
        let fixed = lock(&self.signals).observe(&trains);
        let added = lock(&self.routes).observe(&trains);
        log::trace!(
            "batch of {} trains: {} signal fixes, {} route points",
            trains.len(),
            fixed,
            added
        );

        let delays = Arc::clone(&self.delays);
        tokio::spawn(async move { delays.process(&trains).await })
    }

    /// Signals with the trains currently approaching them.
    pub fn signals_with_trains(&self, trains: &[Train]) -> Vec<SignalView> {
        lock(&self.signals).signals_with_trains(trains)
    }

    /// Recorded delays of one train run.
    pub fn delays_for(&self, key: &TrainKey) -> Option<DelayMap> {
        self.delays.delays_for(key)
    }

    /// Stored points of one route.
    pub fn route_points(&self, route: &str) -> Option<Vec<(f64, f64)>> {
        lock(&self.routes).points(route).map(<[_]>::to_vec)
    }

    /// Persists every analyzer. All three are attempted; the first failure is returned.
    pub fn flush(&self) -> Result<(), PersistError> {
        let results = [
            lock(&self.signals).flush(),
            lock(&self.routes).flush(),
            self.delays.flush(),
        ];
        let mut first = None;
        for result in results {
            if let Err(e) = result {
                log::error!("flush failed: {}", e);
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Best-effort flush for fault paths: an analyzer whose lock is held
    /// (possibly by the faulting thread itself) is skipped rather than awaited.
    /// Returns how many analyzers were written.
    pub fn try_flush(&self) -> usize {
        let mut written = 0;
        match try_lock(&self.signals).map(|mut signals| signals.flush()) {
            Some(Ok(())) => written += 1,
            Some(Err(e)) => log::error!("signal flush failed: {}", e),
            None => log::warn!("signal table busy, not flushed"),
        }
        match try_lock(&self.routes).map(|mut routes| routes.flush()) {
            Some(Ok(())) => written += 1,
            Some(Err(e)) => log::error!("route flush failed: {}", e),
            None => log::warn!("route table busy, not flushed"),
        }
        match self.delays.try_flush() {
            Ok(true) => written += 1,
            Ok(false) => log::warn!("delay state busy, not flushed"),
            Err(e) => log::error!("delay flush failed: {}", e),
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::MemoryTopologyStore;
    use crate::source::{ServerTime, Timetable, TrainData};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Knows no timetables and no clocks.
    struct NoSchedule;

    impl ScheduleSource for NoSchedule {
        async fn timetable(&self, _server: &str, _train_no: &str) -> Option<Arc<Timetable>> {
            None
        }

        async fn server_time(&self, _server: &str) -> Option<ServerTime> {
            None
        }
    }

    fn config(dir: &std::path::Path) -> IngestConfig {
        IngestConfig {
            data_dir: dir.to_path_buf(),
            ..IngestConfig::default()
        }
    }

    fn hub(config: &IngestConfig) -> AnalyticsHub<NoSchedule> {
        AnalyticsHub::load(config, Arc::new(NoSchedule), Arc::new(MemoryTopologyStore::new()))
            .unwrap()
    }

    fn positioned_train() -> Train {
        Train {
            train_no_local: "101".into(),
            train_name: String::new(),
            start_station: String::new(),
            end_station: String::new(),
            vehicles: Vec::new(),
            server_code: "en1".into(),
            run_id: "run-1".into(),
            train_data: TrainData {
                latitude: Some(50.0),
                longitude: Some(19.0),
                signal_in_front: Some("KO_A@1".into()),
                distance_to_signal_in_front: 2.0,
                ..TrainData::default()
            },
        }
    }

    #[tokio::test]
    async fn try_flush_writes_every_analyzer() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let hub = hub(&config);
        hub.ingest(Arc::new(vec![positioned_train()])).await.unwrap();

        assert_eq!(hub.try_flush(), 3);
        assert!(config.signals_file().exists());
        assert!(config.routes_dir().join("101.csv").exists());
        assert!(config.delays_file().exists());
        assert!(config.last_index_file().exists());
    }

    #[test]
    fn try_flush_skips_a_held_analyzer_without_blocking() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let hub = hub(&config);

        let _routes = hub.routes.lock().unwrap();
        assert_eq!(hub.try_flush(), 2);
        assert!(config.signals_file().exists());
        assert!(config.delays_file().exists());
    }
}
