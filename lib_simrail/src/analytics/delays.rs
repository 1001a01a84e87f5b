//! # Train Delay Analyzer
//!
//! Works out how late each train left its last stop by comparing the
//! timetable's scheduled departure with the server clock at the moment the
//! train's `VDDelayedTimetableIndex` moved forward.
//!
//! ## Per-train state
//! 1. **No baseline**: the first index seen is only remembered.
//! 2. **Tracking**: every strictly greater index triggers one computation for
//!    the stop just left (`index - 1`). An equal or smaller index only
//!    refreshes the remembered value.
//!
//! Both caches expire 30 minutes after a train was last seen. They are
//! snapshotted to bincode blobs every [`SNAPSHOT_INTERVAL`] and on
//! [`DelayAnalyzer::flush`].

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use crate::core::{load_bincode, save_bincode, CacheEntry, PersistError, TtlCache};
use crate::source::models::{Timetable, Train, TrainKey};
use crate::source::server_time::{delay_seconds, ServerTime};
use crate::source::SimrailClient;

/// Lifetime of delay and last-index records after the last touch.
pub const DELAY_TTL: Duration = Duration::from_secs(30 * 60);
/// Minimum spacing of periodic snapshots.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

/// Delay in seconds per timetable index.
pub type DelayMap = BTreeMap<i64, i64>;

/// Where timetables and server clocks come from.
pub trait ScheduleSource: Send + Sync + 'static {
    fn timetable(
        &self,
        server_code: &str,
        train_no: &str,
    ) -> impl Future<Output = Option<Arc<Timetable>>> + Send;

    fn server_time(&self, server_code: &str) -> impl Future<Output = Option<ServerTime>> + Send;
}

impl ScheduleSource for SimrailClient {
    async fn timetable(&self, server_code: &str, train_no: &str) -> Option<Arc<Timetable>> {
        self.fetch_timetable(server_code, train_no).await
    }

    async fn server_time(&self, server_code: &str) -> Option<ServerTime> {
        SimrailClient::server_time(self, server_code).await
    }
}

struct DelayState {
    delays: TtlCache<TrainKey, DelayMap>,
    last_index: TtlCache<TrainKey, i64>,
    last_snapshot: Instant,
}

/// One stop whose departure delay is due.
struct PendingDelay {
    key: TrainKey,
    stop_index: i64,
}

/// # Delay Analyzer
///
/// Safe to share between tasks. Overlapping calls to [`DelayAnalyzer::process`]
/// are skipped, not queued.
pub struct DelayAnalyzer<S: ScheduleSource> {
    source: Arc<S>,
    delays_path: PathBuf,
    last_index_path: PathBuf,
    state: Mutex<DelayState>,
    busy: tokio::sync::Mutex<()>,
}

impl<S: ScheduleSource> DelayAnalyzer<S> {
    /// Restores both caches from their snapshots, if present.
    pub fn load(
        source: Arc<S>,
        delays_path: impl Into<PathBuf>,
        last_index_path: impl Into<PathBuf>,
    ) -> Result<Self, PersistError> {
        let delays_path = delays_path.into();
        let last_index_path = last_index_path.into();

        let mut delays = TtlCache::new(DELAY_TTL);
        if let Some(entries) = load_bincode::<Vec<CacheEntry<TrainKey, DelayMap>>>(&delays_path)? {
            delays.restore(entries);
        }
        let mut last_index = TtlCache::new(DELAY_TTL);
        if let Some(entries) = load_bincode::<Vec<CacheEntry<TrainKey, i64>>>(&last_index_path)? {
            last_index.restore(entries);
        }
        log::info!(
            "delay analyzer restored {} delay records, {} tracked trains",
            delays.len(),
            last_index.len()
        );

        Ok(Self {
            source,
            delays_path,
            last_index_path,
            state: Mutex::new(DelayState {
                delays,
                last_index,
                last_snapshot: Instant::now(),
            }),
            busy: tokio::sync::Mutex::new(()),
        })
    }

    fn state(&self) -> MutexGuard<'_, DelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delays recorded for one train run.
    pub fn delays_for(&self, key: &TrainKey) -> Option<DelayMap> {
        self.state().delays.peek(key).cloned()
    }

    /// Last timetable index seen for one train run.
    pub fn last_index(&self, key: &TrainKey) -> Option<i64> {
        self.state().last_index.peek(key).copied()
    }

    /// Processes one batch. Returns the number of delays written, or `None`
    /// when another batch was still being processed.
    pub async fn process(&self, trains: &[Train]) -> Option<usize> {
        let Ok(_busy) = self.busy.try_lock() else {
            log::debug!("delay batch skipped, previous one still running");
            return None;
        };

        // --- Phase 1: Progress guard ---
        let pending = self.advance_indices(trains);

        // --- Phase 2: Compute delays, one train at a time ---
        let mut written = 0;
        for (job, train) in pending {
            let Some(delay) = self.compute(&job, train).await else {
                continue;
            };
            let mut state = self.state();
            match state.delays.get_mut(&job.key) {
                Some(map) => {
                    map.insert(job.stop_index, delay);
                }
                None => {
                    state
                        .delays
                        .insert(job.key.clone(), DelayMap::from([(job.stop_index, delay)]));
                }
            }
            written += 1;
        }

        // --- Phase 3: Periodic snapshot ---
        let due = self.state().last_snapshot.elapsed() >= SNAPSHOT_INTERVAL;
        if due {
            if let Err(e) = self.flush() {
                log::error!("delay snapshot failed, keeping state in memory: {}", e);
            }
        }
        Some(written)
    }

    fn advance_indices<'a>(&self, trains: &'a [Train]) -> Vec<(PendingDelay, &'a Train)> {
        let mut state = self.state();
        let mut pending = Vec::new();
        for train in trains {
            let key = train.key();
            let index = train.train_data.vd_delayed_timetable_index;
            let previous = state.last_index.get(&key).copied();
            state.last_index.insert(key.clone(), index);

            match previous {
                Some(previous) if index > previous => {
                    // Keeps the record alive while the train runs.
                    state.delays.get(&key);
                    pending.push((
                        PendingDelay {
                            key,
                            stop_index: index - 1,
                        },
                        train,
                    ));
                }
                _ => {}
            }
        }
        pending
    }

    async fn compute(&self, job: &PendingDelay, train: &Train) -> Option<i64> {
        let server = &job.key.server_code;
        let train_no = &job.key.train_no_local;

        let Some(timetable) = self.source.timetable(server, train_no).await else {
            log::warn!("no timetable for {}/{}, delay skipped", server, train_no);
            return None;
        };
        let Some(stop) = usize::try_from(job.stop_index)
            .ok()
            .and_then(|i| timetable.timetable.get(i))
        else {
            log::warn!(
                "{}/{} has no timetable entry {}, delay skipped",
                server,
                train_no,
                job.stop_index
            );
            return None;
        };
        let Some(departure) = stop.departure_time.as_deref() else {
            log::debug!(
                "{}/{} stop {} has no departure time",
                server,
                train_no,
                stop.display_name()
            );
            return None;
        };
        let Some(time) = self.source.server_time(server).await else {
            log::warn!("no server time for {}, delay of {} skipped", server, train_no);
            return None;
        };

        let (Some(scheduled), Some(actual)) = (time.parse_local(departure), time.now_utc()) else {
            log::warn!("{}/{} departure {:?} unusable", server, train_no, departure);
            return None;
        };
        let delay = delay_seconds(actual, scheduled);
        log::debug!(
            "{} ({}) left {} {}s late",
            train_no,
            train.train_name,
            stop.display_name(),
            delay
        );
        Some(delay)
    }

    /// Writes both snapshots now.
    pub fn flush(&self) -> Result<(), PersistError> {
        let mut state = self.state();
        self.write_snapshot(&mut state)
    }

    /// Like [`DelayAnalyzer::flush`], but returns `Ok(false)` instead of
    /// waiting when the state is locked by someone else.
    pub fn try_flush(&self) -> Result<bool, PersistError> {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(false),
        };
        self.write_snapshot(&mut state).map(|()| true)
    }

    fn write_snapshot(&self, state: &mut DelayState) -> Result<(), PersistError> {
        state.delays.purge_expired();
        state.last_index.purge_expired();
        state.last_snapshot = Instant::now();
        let delays = state.delays.snapshot();
        let last_index = state.last_index.snapshot();

        save_bincode(&self.delays_path, &delays)?;
        save_bincode(&self.last_index_path, &last_index)?;
        log::debug!(
            "delay snapshot written ({} delay records, {} tracked trains)",
            delays.len(),
            last_index.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::models::{TimetableEntry, TrainData};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Timetable with three stops; the clock reads "now" on a UTC+1 server.
    struct FixedSchedule {
        departures: Vec<Option<String>>,
        timetable_calls: AtomicUsize,
        stall: bool,
    }

    impl FixedSchedule {
        fn new(departures: Vec<Option<String>>) -> Self {
            Self {
                departures,
                timetable_calls: AtomicUsize::new(0),
                stall: false,
            }
        }
    }

    impl ScheduleSource for FixedSchedule {
        async fn timetable(&self, _server: &str, train_no: &str) -> Option<Arc<Timetable>> {
            self.timetable_calls.fetch_add(1, Ordering::SeqCst);
            if self.stall {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Some(Arc::new(Timetable {
                train_no_local: train_no.into(),
                timetable: self
                    .departures
                    .iter()
                    .map(|d| TimetableEntry {
                        name_of_point: "Stop".into(),
                        departure_time: d.clone(),
                        ..TimetableEntry::default()
                    })
                    .collect(),
                ..Timetable::default()
            }))
        }

        async fn server_time(&self, _server: &str) -> Option<ServerTime> {
            let local_now = Utc::now() + ChronoDuration::hours(1);
            Some(ServerTime::new(local_now.timestamp_millis(), 1))
        }
    }

    fn local_minutes_ago(minutes: i64) -> Option<String> {
        let local = Utc::now() + ChronoDuration::hours(1) - ChronoDuration::minutes(minutes);
        Some(local.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    fn train(index: i64) -> Train {
        Train {
            train_no_local: "446004".into(),
            train_name: "IC".into(),
            start_station: String::new(),
            end_station: String::new(),
            vehicles: Vec::new(),
            server_code: "en1".into(),
            run_id: "run-1".into(),
            train_data: TrainData {
                vd_delayed_timetable_index: index,
                ..TrainData::default()
            },
        }
    }

    fn analyzer(
        dir: &std::path::Path,
        schedule: FixedSchedule,
    ) -> (DelayAnalyzer<FixedSchedule>, Arc<FixedSchedule>) {
        let source = Arc::new(schedule);
        let analyzer = DelayAnalyzer::load(
            Arc::clone(&source),
            dir.join("delays.bin"),
            dir.join("last_index.bin"),
        )
        .unwrap();
        (analyzer, source)
    }

    #[tokio::test]
    async fn delay_is_written_only_on_forward_progress() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let (analyzer, source) = analyzer(
            dir.path(),
            FixedSchedule::new(vec![local_minutes_ago(2), local_minutes_ago(1), None]),
        );
        let key = train(0).key();

        assert_eq!(analyzer.process(&[train(0)]).await, Some(0));
        assert_eq!(analyzer.process(&[train(0)]).await, Some(0));
        assert_eq!(source.timetable_calls.load(Ordering::SeqCst), 0);

        assert_eq!(analyzer.process(&[train(1)]).await, Some(1));
        let delays = analyzer.delays_for(&key).unwrap();
        let delay = delays[&0];
        assert!((119..=122).contains(&delay), "delay was {delay}");
        assert_eq!(analyzer.last_index(&key), Some(1));

        // Going backwards refreshes the index but never writes.
        assert_eq!(analyzer.process(&[train(0)]).await, Some(0));
        assert_eq!(analyzer.last_index(&key), Some(0));
        assert_eq!(analyzer.delays_for(&key).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stops_without_departure_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (analyzer, _) = analyzer(dir.path(), FixedSchedule::new(vec![None, None]));

        analyzer.process(&[train(0)]).await;
        assert_eq!(analyzer.process(&[train(1)]).await, Some(0));
        assert!(analyzer.delays_for(&train(0).key()).is_none());
    }

    #[tokio::test]
    async fn overlapping_batches_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut schedule = FixedSchedule::new(vec![local_minutes_ago(0), local_minutes_ago(0)]);
        schedule.stall = true;
        let (analyzer, _) = analyzer(dir.path(), schedule);
        let analyzer = Arc::new(analyzer);

        analyzer.process(&[train(0)]).await;
        let slow = {
            let analyzer = Arc::clone(&analyzer);
            tokio::spawn(async move { analyzer.process(&[train(1)]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(analyzer.process(&[train(1)]).await, None);
        assert_eq!(slow.await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn snapshots_restore_state() {
        let dir = tempfile::tempdir().unwrap();
        let (analyzer, _) = analyzer(
            dir.path(),
            FixedSchedule::new(vec![local_minutes_ago(5), local_minutes_ago(1)]),
        );
        analyzer.process(&[train(0)]).await;
        analyzer.process(&[train(1)]).await;
        analyzer.flush().unwrap();

        let (restored, _) = analyzer_from(dir.path());
        let key = train(0).key();
        assert_eq!(restored.last_index(&key), Some(1));
        assert_eq!(restored.delays_for(&key), analyzer.delays_for(&key));

        // The restored baseline still guards progress.
        assert_eq!(restored.process(&[train(1)]).await, Some(0));
    }

    #[tokio::test]
    async fn try_flush_gives_way_to_a_held_lock() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let (analyzer, _) = analyzer(dir.path(), FixedSchedule::new(vec![local_minutes_ago(3), None]));
        analyzer.process(&[train(0)]).await;

        {
            let _held = analyzer.state();
            assert!(!analyzer.try_flush().unwrap());
        }
        assert!(!dir.path().join("delays.bin").exists());

        assert!(analyzer.try_flush().unwrap());
        assert!(dir.path().join("delays.bin").exists());
        assert!(dir.path().join("last_index.bin").exists());
    }

    fn analyzer_from(dir: &std::path::Path) -> (DelayAnalyzer<FixedSchedule>, Arc<FixedSchedule>) {
        analyzer(dir, FixedSchedule::new(Vec::new()))
    }
}
