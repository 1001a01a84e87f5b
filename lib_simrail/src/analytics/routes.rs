//! # Route Deduplicator
//!
//! Rebuilds the geometry of each route (keyed by local train number) from the
//! positions trains report. A point is kept only when it is farther than
//! [`MIN_DISTANCE`] degrees from every point already stored for that route, so
//! the stored list stays a sparse trace of the track.
//!
//! Every route is one `<route>.csv` file of `route;lat;lon` rows. Changed
//! routes are written every [`FLUSH_EVERY`] batches and on [`RouteDeduplicator::flush`].

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::{atomic_write, PersistError};
use crate::source::models::Train;

/// Points closer than this (in coordinate degrees) to a stored point are dropped.
pub const MIN_DISTANCE: f64 = 0.0001;
/// Snapshot cadence, in batches.
pub const FLUSH_EVERY: u64 = 11;
/// Snapshots slower than this are reported.
pub const SLOW_PERSIST: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize, Deserialize)]
struct RouteRow {
    route: String,
    lat: f64,
    lon: f64,
}

/// # Route Deduplicator
///
/// In-memory route table plus its on-disk mirror.
pub struct RouteDeduplicator {
    dir: PathBuf,
    routes: HashMap<String, Vec<(f64, f64)>>,
    changed: BTreeSet<String>,
    batches: u64,
}

impl RouteDeduplicator {
    /// Loads every `*.csv` file in `dir`; the directory is created when missing.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| PersistError::io(&dir, e))?;

        let mut routes = HashMap::new();
        let entries = fs::read_dir(&dir).map_err(|e| PersistError::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| PersistError::io(&dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                for (route, point) in read_route_file(&path)? {
                    routes.entry(route).or_insert_with(Vec::new).push(point);
                }
            }
        }

        let deduplicator = Self {
            dir,
            routes,
            changed: BTreeSet::new(),
            batches: 0,
        };
        log::info!(
            "loaded {} routes ({} points) from {}",
            deduplicator.route_count(),
            deduplicator.point_count(),
            deduplicator.dir.display()
        );
        Ok(deduplicator)
    }

    /// Points recorded for `route`, in insertion order.
    pub fn points(&self, route: &str) -> Option<&[(f64, f64)]> {
        self.routes.get(route).map(Vec::as_slice)
    }

    /// Number of routes known.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Total number of stored points over all routes.
    pub fn point_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    /// Offers every positioned train in the batch; returns how many points were kept.
    pub fn observe(&mut self, trains: &[Train]) -> usize {
        let mut added = 0;
        for train in trains {
            let Some(point) = train.position() else {
                continue;
            };
            if self.offer(&train.train_no_local, point) {
                added += 1;
            }
        }

        self.batches += 1;
        if self.batches % FLUSH_EVERY == 0 {
            if let Err(e) = self.flush() {
                log::error!("route snapshot failed, keeping routes in memory: {}", e);
            }
        }
        added
    }

    /// Adds `point` to `route` unless a stored point is within [`MIN_DISTANCE`].
    pub fn offer(&mut self, route: &str, point: (f64, f64)) -> bool {
        let points = self.routes.entry(route.to_string()).or_default();
        let nearest = points
            .iter()
            .map(|&(lat, lon)| (lat - point.0).hypot(lon - point.1))
            .fold(f64::INFINITY, f64::min);
        if nearest <= MIN_DISTANCE {
            return false;
        }
        points.push(point);
        self.changed.insert(route.to_string());
        true
    }

    /// Writes every route changed since the last snapshot.
    pub fn flush(&mut self) -> Result<(), PersistError> {
        if self.changed.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let pending = std::mem::take(&mut self.changed);
        let mut written = 0usize;
        let mut result = Ok(());

        for route in &pending {
            let Some(points) = self.routes.get(route) else {
                continue;
            };
            match write_route_file(&self.route_path(route), route, points) {
                Ok(()) => written += 1,
                Err(e) => {
                    // Retried on the next snapshot.
                    self.changed.insert(route.clone());
                    result = Err(e);
                }
            }
        }

        let elapsed = started.elapsed();
        if elapsed > SLOW_PERSIST {
            log::warn!(
                "route snapshot of {} files took {:.2}s",
                written,
                elapsed.as_secs_f64()
            );
        } else {
            log::debug!("route snapshot of {} files done", written);
        }
        result
    }

    fn route_path(&self, route: &str) -> PathBuf {
        let file: String = route
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.csv"))
    }
}

fn read_route_file(path: &Path) -> Result<Vec<(String, (f64, f64))>, PersistError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_path(path)
        .map_err(|e| PersistError::csv(path, e))?;

    let mut rows = Vec::new();
    for row in reader.deserialize::<RouteRow>() {
        match row {
            Ok(row) => rows.push((row.route, (row.lat, row.lon))),
            Err(e) => log::warn!("skipping route row in {}: {}", path.display(), e),
        }
    }
    Ok(rows)
}

fn write_route_file(path: &Path, route: &str, points: &[(f64, f64)]) -> Result<(), PersistError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(Vec::new());
    for &(lat, lon) in points {
        writer
            .serialize(RouteRow {
                route: route.to_string(),
                lat,
                lon,
            })
            .map_err(|e| PersistError::csv(path, e))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PersistError::io(path, e.into_error()))?;
    atomic_write(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::models::TrainData;

    fn train(no: &str, pos: Option<(f64, f64)>) -> Train {
        Train {
            train_no_local: no.into(),
            train_name: String::new(),
            start_station: String::new(),
            end_station: String::new(),
            vehicles: Vec::new(),
            server_code: "en1".into(),
            run_id: format!("{no}-{pos:?}"),
            train_data: TrainData {
                latitude: pos.map(|p| p.0),
                longitude: pos.map(|p| p.1),
                ..TrainData::default()
            },
        }
    }

    #[test]
    fn near_points_are_dropped_far_points_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut routes = RouteDeduplicator::load(dir.path()).unwrap();

        assert!(routes.offer("101", (50.0, 19.0)));
        assert!(!routes.offer("101", (50.00005, 19.0)));
        assert!(routes.offer("101", (50.0002, 19.0)));
        // Another route has its own geometry.
        assert!(routes.offer("202", (50.0, 19.0)));

        let points = routes.points("101").unwrap();
        assert_eq!(points.len(), 2);
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                assert!((a.0 - b.0).hypot(a.1 - b.1) >= MIN_DISTANCE);
            }
        }
    }

    #[test]
    fn repeated_batch_records_one_point() {
        let dir = tempfile::tempdir().unwrap();
        let mut routes = RouteDeduplicator::load(dir.path()).unwrap();
        let batch = [
            train("101", Some((50.0, 19.0))),
            train("101", Some((50.00005, 19.0))),
            train("101", None),
        ];

        assert_eq!(routes.observe(&batch), 1);
        assert_eq!(routes.observe(&batch), 0);
        assert_eq!(routes.point_count(), 1);
    }

    #[test]
    fn eleventh_batch_writes_changed_routes() {
        let dir = tempfile::tempdir().unwrap();
        let mut routes = RouteDeduplicator::load(dir.path()).unwrap();
        let file = dir.path().join("101.csv");

        routes.observe(&[train("101", Some((50.0, 19.0)))]);
        for _ in 1..FLUSH_EVERY - 1 {
            routes.observe(&[]);
        }
        assert!(!file.exists());

        routes.observe(&[]);
        let text = fs::read_to_string(&file).unwrap();
        assert_eq!(text.trim(), "101;50.0;19.0");

        let reloaded = RouteDeduplicator::load(dir.path()).unwrap();
        assert_eq!(reloaded.points("101"), Some(&[(50.0, 19.0)][..]));
    }

    #[test]
    fn flush_writes_only_when_something_changed() {
        let dir = tempfile::tempdir().unwrap();
        let mut routes = RouteDeduplicator::load(dir.path()).unwrap();
        routes.flush().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        routes.offer("7/8", (1.0, 2.0));
        routes.flush().unwrap();
        assert!(dir.path().join("7_8.csv").exists());
    }
}
