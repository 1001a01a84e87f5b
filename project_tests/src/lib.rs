//! # Integration Test Fixtures
//!
//! Builders shared by the integration tests under `tests/`: synthetic trains
//! and an offline [`ScheduleSource`] with a controllable clock.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use lib_simrail::analytics::ScheduleSource;
use lib_simrail::source::{ServerTime, Timetable, TimetableEntry, Train, TrainData};

/// Initialises `env_logger` once for the calling test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A train on server `en1` with the given route number and optional position.
pub fn train(route: &str, run_id: &str, position: Option<(f64, f64)>) -> Train {
    Train {
        train_no_local: route.to_string(),
        train_name: format!("Train {route}"),
        start_station: "Katowice".into(),
        end_station: "Kraków Główny".into(),
        vehicles: Vec::new(),
        server_code: "en1".into(),
        run_id: run_id.to_string(),
        train_data: TrainData {
            latitude: position.map(|p| p.0),
            longitude: position.map(|p| p.1),
            ..TrainData::default()
        },
    }
}

/// Same train, reporting its signal ahead and timetable progress.
pub fn with_progress(mut train: Train, signal: &str, distance: f64, index: i64) -> Train {
    train.train_data.signal_in_front = Some(signal.to_string());
    train.train_data.distance_to_signal_in_front = distance;
    train.train_data.vd_delayed_timetable_index = index;
    train
}

/// Offline timetables and clocks. Server clocks run `utc_offset_hours` ahead of UTC.
pub struct StaticSchedule {
    timetables: HashMap<String, Arc<Timetable>>,
    utc_offset_hours: i32,
    timetable_requests: AtomicUsize,
}

impl StaticSchedule {
    pub fn new(utc_offset_hours: i32) -> Self {
        Self {
            timetables: HashMap::new(),
            utc_offset_hours,
            timetable_requests: AtomicUsize::new(0),
        }
    }

    /// Registers a timetable whose stops departed the given number of minutes ago
    /// (`None` for arrival-only stops).
    pub fn with_departures(mut self, train_no: &str, minutes_ago: &[Option<i64>]) -> Self {
        let entries = minutes_ago
            .iter()
            .enumerate()
            .map(|(i, minutes)| TimetableEntry {
                name_of_point: format!("Stop {i}"),
                departure_time: minutes.map(|m| self.local_time_minutes_ago(m)),
                ..TimetableEntry::default()
            })
            .collect();
        self.timetables.insert(
            train_no.to_string(),
            Arc::new(Timetable {
                train_no_local: train_no.to_string(),
                timetable: entries,
                ..Timetable::default()
            }),
        );
        self
    }

    /// Server-local wall time `minutes` ago, in timetable format.
    pub fn local_time_minutes_ago(&self, minutes: i64) -> String {
        let local = Utc::now() + ChronoDuration::hours(i64::from(self.utc_offset_hours))
            - ChronoDuration::minutes(minutes);
        local.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn timetable_requests(&self) -> usize {
        self.timetable_requests.load(Ordering::SeqCst)
    }
}

impl ScheduleSource for StaticSchedule {
    async fn timetable(&self, _server_code: &str, train_no: &str) -> Option<Arc<Timetable>> {
        self.timetable_requests.fetch_add(1, Ordering::SeqCst);
        self.timetables.get(train_no).cloned()
    }

    async fn server_time(&self, _server_code: &str) -> Option<ServerTime> {
        let local_now = Utc::now() + ChronoDuration::hours(i64::from(self.utc_offset_hours));
        Some(ServerTime::new(local_now.timestamp_millis(), self.utc_offset_hours))
    }
}
