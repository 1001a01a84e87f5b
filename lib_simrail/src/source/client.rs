//! # SimRail Source Client
//!
//! Thin typed layer over the two upstream hosts. Every call resolves to an
//! empty collection (or `None`) when upstream misbehaves; the failure is
//! logged here and never travels further.
//!
//! Read caches bound the load on the slow-moving endpoints:
//!
//! | Data      | Key               | TTL    | Disk fallback |
//! |-----------|-------------------|--------|---------------|
//! | timezone  | server            | 24 h   | no            |
//! | clock     | server            | 5 min  | no            |
//! | timetable | (server, train)   | 30 min | yes (bincode) |
//!
//! The timetable cache is also capped at [`TIMETABLE_CAPACITY`] entries; the
//! least recently used timetable goes first.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::configs::IngestConfig;
use crate::core::{load_bincode, save_bincode, TtlCache};
use crate::retrieve::ApiClient;
use crate::source::envelope::{parse_collection, parse_envelope, parse_number, SourceError};
use crate::source::models::{ServerDescriptor, Station, Timetable, Train};
use crate::source::server_time::ServerTime;

pub const TIMEZONE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const CLOCK_TTL: Duration = Duration::from_secs(5 * 60);
pub const TIMETABLE_TTL: Duration = Duration::from_secs(30 * 60);
/// Timetables held in memory at most, across all servers.
pub const TIMETABLE_CAPACITY: usize = 2048;

type TimetableKey = (String, String);

/// Typed, cached access to the SimRail public endpoints.
pub struct SimrailClient {
    panel: ApiClient,
    api: ApiClient,
    timetables_dir: PathBuf,
    timezones: Mutex<TtlCache<String, i32>>,
    clocks: Mutex<TtlCache<String, ServerTime>>,
    timetables: Mutex<TtlCache<TimetableKey, Arc<Timetable>>>,
}

impl SimrailClient {
    /// Builds the client for the hosts and data directory in `config`.
    ///
    /// # Errors
    /// Fails when either base URL is not absolute.
    pub fn new(config: &IngestConfig) -> anyhow::Result<Self> {
        Ok(Self {
            panel: ApiClient::new(&config.panel_url)?,
            api: ApiClient::new(&config.api_url)?,
            timetables_dir: config.timetables_dir(),
            timezones: Mutex::new(TtlCache::new(TIMEZONE_TTL)),
            clocks: Mutex::new(TtlCache::new(CLOCK_TTL)),
            timetables: Mutex::new(TtlCache::with_capacity(TIMETABLE_TTL, TIMETABLE_CAPACITY)),
        })
    }

    async fn body(
        client: &ApiClient,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<String, SourceError> {
        let response = client.get_text(path, query).await?;
        if !response.success {
            return Err(SourceError::Status(response.status));
        }
        Ok(response.body)
    }

    async fn panel_list<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Vec<T> {
        match Self::body(&self.panel, path, query).await {
            Ok(body) => parse_envelope(&body),
            Err(e) => {
                log::warn!("{} request failed: {}", path, e);
                Vec::new()
            }
        }
    }

    /// Every known server, active or not.
    pub async fn fetch_servers(&self) -> Vec<ServerDescriptor> {
        self.panel_list("servers-open", &[]).await
    }

    /// Trains currently running on `server_code`.
    pub async fn fetch_trains(&self, server_code: &str) -> Vec<Train> {
        let mut trains: Vec<Train> = self
            .panel_list("trains-open", &[("serverCode", server_code)])
            .await;
        for train in trains.iter_mut().filter(|t| t.server_code.is_empty()) {
            train.server_code = server_code.to_string();
        }
        trains
    }

    /// Stations of `server_code` with their dispatcher occupancy.
    pub async fn fetch_stations(&self, server_code: &str) -> Vec<Station> {
        self.panel_list("stations-open", &[("serverCode", server_code)])
            .await
    }

    /// UTC offset of `server_code` in hours, cached for a day.
    pub async fn fetch_timezone(&self, server_code: &str) -> Option<i32> {
        let key = server_code.to_string();
        if let Some(offset) = lock(&self.timezones).get(&key).copied() {
            return Some(offset);
        }

        let offset = self
            .api_number("getTimeZone", server_code)
            .await
            .map(|hours| hours.round() as i32)?;
        lock(&self.timezones).insert(key, offset);
        Some(offset)
    }

    /// Last clock sample of `server_code`, refreshed when older than five minutes.
    pub async fn server_time(&self, server_code: &str) -> Option<ServerTime> {
        if let Some(time) = lock(&self.clocks).get(&server_code.to_string()).copied() {
            return Some(time);
        }
        self.refresh_server_time(server_code).await
    }

    /// Fetches a fresh clock sample regardless of the cache.
    pub async fn refresh_server_time(&self, server_code: &str) -> Option<ServerTime> {
        let offset = self.fetch_timezone(server_code).await?;
        let clock_ms = self.api_number("getTime", server_code).await?;
        let time = ServerTime::new(clock_ms as i64, offset);
        lock(&self.clocks).insert(server_code.to_string(), time);
        Some(time)
    }

    async fn api_number(&self, path: &str, server_code: &str) -> Option<f64> {
        let result = match Self::body(&self.api, path, &[("serverCode", server_code)]).await {
            Ok(body) => parse_number(&body),
            Err(e) => Err(e),
        };
        result
            .map_err(|e| log::warn!("{} for {} unavailable: {}", path, server_code, e))
            .ok()
    }

    /// Static timetable of `train_no` on `server_code`.
    ///
    /// Served from memory for 30 minutes, then refetched; when upstream has
    /// nothing, the last copy written to disk is used.
    pub async fn fetch_timetable(&self, server_code: &str, train_no: &str) -> Option<Arc<Timetable>> {
        let key = (server_code.to_string(), train_no.to_string());
        if let Some(timetable) = lock(&self.timetables).get(&key).cloned() {
            return Some(timetable);
        }

        let fetched = match Self::body(
            &self.api,
            "getAllTimetables",
            &[("serverCode", server_code), ("train", train_no)],
        )
        .await
        {
            Ok(body) => parse_collection::<Timetable>(&body)
                .map_err(|e| log::warn!("timetable {}/{} discarded: {}", server_code, train_no, e))
                .unwrap_or_default()
                .into_iter()
                .find(|t| t.train_no_local == train_no || t.train_no_local.is_empty()),
            Err(e) => {
                log::warn!("timetable {}/{} request failed: {}", server_code, train_no, e);
                None
            }
        };

        let timetable = match fetched {
            Some(timetable) => {
                self.store_timetable_on_disk(server_code, train_no, &timetable);
                timetable
            }
            None => self.timetable_from_disk(server_code, train_no)?,
        };

        let timetable = Arc::new(timetable);
        lock(&self.timetables).insert(key, Arc::clone(&timetable));
        Some(timetable)
    }

    fn timetable_path(&self, server_code: &str, train_no: &str) -> PathBuf {
        self.timetables_dir
            .join(format!("{}_{}.bin", file_safe(server_code), file_safe(train_no)))
    }

    fn store_timetable_on_disk(&self, server_code: &str, train_no: &str, timetable: &Timetable) {
        let path = self.timetable_path(server_code, train_no);
        if let Err(e) = save_bincode(&path, timetable) {
            log::warn!("{}", e);
        }
    }

    pub(crate) fn timetable_from_disk(&self, server_code: &str, train_no: &str) -> Option<Timetable> {
        match load_bincode(&self.timetable_path(server_code, train_no)) {
            Ok(timetable) => timetable,
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps upstream identifiers from escaping the cache directory.
fn file_safe(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::models::TimetableEntry;

    fn client_in(dir: &std::path::Path) -> SimrailClient {
        let config = IngestConfig {
            data_dir: dir.to_path_buf(),
            ..IngestConfig::default()
        };
        SimrailClient::new(&config).unwrap()
    }

    #[test]
    fn cache_file_names_are_sanitised() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(dir.path());
        let path = client.timetable_path("en1", "../446004");
        assert_eq!(path.file_name().unwrap(), "en1____446004.bin");
        assert!(path.starts_with(dir.path().join("timetables")));
    }

    #[test]
    fn timetable_cache_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(dir.path());
        let mut cache = client.timetables.lock().unwrap();
        for i in 0..=TIMETABLE_CAPACITY {
            cache.insert(("en1".into(), i.to_string()), Arc::new(Timetable::default()));
        }
        assert_eq!(cache.len(), TIMETABLE_CAPACITY);
    }

    #[test]
    fn timetables_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(dir.path());
        assert!(client.timetable_from_disk("en1", "446004").is_none());

        let timetable = Timetable {
            train_no_local: "446004".into(),
            timetable: vec![TimetableEntry {
                name_of_point: "Katowice".into(),
                departure_time: Some("2024-03-01 12:00:00".into()),
                ..TimetableEntry::default()
            }],
            ..Timetable::default()
        };
        client.store_timetable_on_disk("en1", "446004", &timetable);

        assert_eq!(client.timetable_from_disk("en1", "446004"), Some(timetable));
    }

    #[tokio::test]
    async fn cached_values_skip_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_in(dir.path());
        lock(&client.timezones).insert("en1".into(), 2);
        let time = ServerTime::new(1_700_000_000_000, 2);
        lock(&client.clocks).insert("en1".into(), time);

        assert_eq!(client.fetch_timezone("en1").await, Some(2));
        assert_eq!(client.server_time("en1").await, Some(time));
    }
}
