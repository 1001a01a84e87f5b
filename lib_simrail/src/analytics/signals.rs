//! # Signal Topology Analyzer
//!
//! Learns where signals are and how they connect, purely from what trains
//! report about the signal ahead of them.
//!
//! ## Positions
//! A train closer than [`OBSERVATION_RANGE`] to its signal ahead fixes that
//! signal at the train's position. The distance is kept as the record's
//! *accuracy*, and a position is only ever replaced by a strictly closer
//! observation, so accuracy never grows.
//!
//! ## Classification
//! The name decides the kind unless a train reports one of the
//! [`MAIN_SIGNAL_SPEEDS`] for its signal ahead. Such a report marks the
//! signal as main for the rest of the process, and a live approach at such a speed classifies the
//! downstream view even when no history exists.
//!
//! ## Connections
//! When a train's signal ahead changes from `A` to `B`, the edge `A -> B` is
//! offered to the [`TopologyStore`]. Edges that contradict what is already
//! known are logged as connection errors instead, each `(prev, next, error)`
//! at most once.
//!
//! ## Persistence
//! The table lives in `signals.csv` (`name;lat;lon;extra;accuracy`, no header).
//! It is rewritten after every batch that changed it and on [`SignalAnalyzer::flush`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{atomic_write, PersistError};
use crate::source::models::{Train, TrainKey};

/// Observations farther than this from the signal are ignored.
pub const OBSERVATION_RANGE: f64 = 5.0;
/// Connected signals farther apart than this (in degrees) are rejected.
pub const MAX_CONNECTION_SPAN: f64 = 0.05;
/// Permitted speeds reported only for main-signal aspects.
pub const MAIN_SIGNAL_SPEEDS: [f64; 2] = [60.0, 100.0];

fn main_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[\p{Lu}--L][\p{L}\p{N}]*_[\p{L}\p{N}_]+$")
            .expect("Main signal pattern is a valid constant")
    })
}

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^L\d+_\d+[A-Z]*$").expect("Block signal pattern is a valid constant")
    })
}

/// Splits `name@extra` into its name and extra qualifier.
pub fn split_identifier(identifier: &str) -> (&str, &str) {
    identifier.split_once('@').unwrap_or((identifier, ""))
}

/// Broad signal family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Main,
    Block,
}

/// Classifies a signal by name alone; any `@extra` suffix is ignored.
pub fn classify(identifier: &str) -> Option<SignalKind> {
    let (name, _) = split_identifier(identifier);
    if main_pattern().is_match(name) {
        Some(SignalKind::Main)
    } else if block_pattern().is_match(name) {
        Some(SignalKind::Block)
    } else {
        None
    }
}

/// Classifies the signal ahead of a train, taking its permitted speed into account.
pub fn classify_signal_ahead(identifier: &str, permitted_speed: f64) -> Option<SignalKind> {
    if MAIN_SIGNAL_SPEEDS.contains(&permitted_speed) {
        return Some(SignalKind::Main);
    }
    classify(identifier)
}

fn is_block(identifier: &str) -> bool {
    block_pattern().is_match(split_identifier(identifier).0)
}

/// Position of a signal relative to the track circuits around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalRole {
    #[serde(rename = "entry")]
    Entry,
    #[serde(rename = "exit")]
    Exit,
    #[serde(rename = "entry-exit")]
    EntryExit,
}

impl SignalRole {
    fn from_flags(entry: bool, exit: bool) -> Option<Self> {
        match (entry, exit) {
            (true, true) => Some(Self::EntryExit),
            (true, false) => Some(Self::Entry),
            (false, true) => Some(Self::Exit),
            (false, false) => None,
        }
    }
}

impl fmt::Display for SignalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::EntryExit => "entry-exit",
        })
    }
}

/// Infers the role of `identifier` from its forward (`next`) and backward
/// (`prev`) neighbours.
///
/// Neighbour lists that are empty never produce a role.
pub fn infer_role(identifier: &str, next: &[String], prev: &[String]) -> Option<SignalRole> {
    if is_block(identifier) {
        let leaves_block = |side: &[String]| match side {
            [] => false,
            [only] => !is_block(only),
            _ => true,
        };
        SignalRole::from_flags(leaves_block(next), leaves_block(prev))
    } else {
        let all_block = |side: &[String]| !side.is_empty() && side.iter().all(|s| is_block(s));
        SignalRole::from_flags(all_block(prev), all_block(next))
    }
}

/// Last known position of one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub extra: String,
    /// Distance of the observation that fixed this position; smaller is better.
    pub accuracy: f64,
}

impl SignalRecord {
    fn distance_to(&self, other: &SignalRecord) -> f64 {
        (self.latitude - other.latitude).hypot(self.longitude - other.longitude)
    }
}

/// A directed `prev -> next` adjacency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalConnection {
    pub prev: String,
    pub next: String,
}

/// Why an observed adjacency was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionErrorKind {
    ReverseExists,
    TooFarApart,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReverseExists => "reverse connection exists",
            Self::TooFarApart => "signals too far apart",
        })
    }
}

/// One logged `(prev, next, error)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionError {
    pub prev: String,
    pub next: String,
    pub error: ConnectionErrorKind,
}

/// External home of the signal graph and its error log.
pub trait TopologyStore: Send + Sync {
    fn has_connection(&self, prev: &str, next: &str) -> bool;
    fn add_connection(&self, connection: SignalConnection);
    /// `(next, prev)` neighbours of `name`.
    fn neighbours(&self, name: &str) -> (Vec<String>, Vec<String>);
    fn has_connection_error(&self, error: &ConnectionError) -> bool;
    fn add_connection_error(&self, error: ConnectionError);
}

/// In-process [`TopologyStore`].
#[derive(Default)]
pub struct MemoryTopologyStore {
    connections: Mutex<HashSet<SignalConnection>>,
    errors: Mutex<Vec<ConnectionError>>,
}

impl MemoryTopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> Vec<SignalConnection> {
        let mut all: Vec<_> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        all.sort_by(|a, b| (&a.prev, &a.next).cmp(&(&b.prev, &b.next)));
        all
    }

    pub fn connection_errors(&self) -> Vec<ConnectionError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TopologyStore for MemoryTopologyStore {
    fn has_connection(&self, prev: &str, next: &str) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&SignalConnection {
                prev: prev.to_string(),
                next: next.to_string(),
            })
    }

    fn add_connection(&self, connection: SignalConnection) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection);
    }

    fn neighbours(&self, name: &str) -> (Vec<String>, Vec<String>) {
        let connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::new();
        let mut prev = Vec::new();
        for c in connections.iter() {
            if c.prev == name {
                next.push(c.next.clone());
            }
            if c.next == name {
                prev.push(c.prev.clone());
            }
        }
        (next, prev)
    }

    fn has_connection_error(&self, error: &ConnectionError) -> bool {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(error)
    }

    fn add_connection_error(&self, error: ConnectionError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }
}

/// Downstream view of one signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalView {
    #[serde(flatten)]
    pub record: SignalRecord,
    pub kind: Option<SignalKind>,
    pub role: Option<SignalRole>,
    /// Train currently approaching the signal.
    pub train_ahead: Option<TrainKey>,
}

/// # Signal Analyzer
///
/// Owns the signal table. Batches must be delivered one at a time.
pub struct SignalAnalyzer {
    path: PathBuf,
    signals: HashMap<String, SignalRecord>,
    last_ahead: HashMap<TrainKey, String>,
    /// Signals reported at a main-aspect speed whose names alone say otherwise.
    main_by_speed: HashSet<String>,
    store: Arc<dyn TopologyStore>,
    dirty: bool,
}

impl SignalAnalyzer {
    /// Loads the table at `path`. A missing file starts an empty table;
    /// unreadable rows are skipped.
    pub fn load(path: impl Into<PathBuf>, store: Arc<dyn TopologyStore>) -> Result<Self, PersistError> {
        let path = path.into();
        let signals = read_table(&path)?;
        log::info!("loaded {} signals from {}", signals.len(), path.display());
        Ok(Self {
            path,
            signals,
            last_ahead: HashMap::new(),
            main_by_speed: HashSet::new(),
            store,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SignalRecord> {
        self.signals.get(split_identifier(name).0)
    }

    /// Processes one batch of trains; returns how many positions changed.
    pub fn observe(&mut self, trains: &[Train]) -> usize {
        let mut changed = 0;
        for train in trains {
            if self.observe_position(train) {
                changed += 1;
            }
            self.observe_speed(train);
            self.observe_transition(train);
        }
        self.forget_departed(trains);

        if self.dirty {
            if let Err(e) = self.save() {
                log::error!("signal table not persisted, keeping it in memory: {}", e);
            }
        }
        changed
    }

    fn observe_position(&mut self, train: &Train) -> bool {
        let data = &train.train_data;
        let Some(identifier) = data.signal_in_front.as_deref() else {
            return false;
        };
        let Some((latitude, longitude)) = train.position() else {
            return false;
        };
        let distance = data.distance_to_signal_in_front;
        if !(0.0..OBSERVATION_RANGE).contains(&distance) {
            return false;
        }

        let (name, extra) = split_identifier(identifier);
        if self
            .signals
            .get(name)
            .is_some_and(|known| distance >= known.accuracy)
        {
            return false;
        }

        self.signals.insert(
            name.to_string(),
            SignalRecord {
                name: name.to_string(),
                latitude,
                longitude,
                extra: extra.to_string(),
                accuracy: distance,
            },
        );
        self.dirty = true;
        true
    }

    fn observe_speed(&mut self, train: &Train) {
        let data = &train.train_data;
        let Some(identifier) = data.signal_in_front.as_deref() else {
            return;
        };
        let by_speed = classify_signal_ahead(identifier, data.signal_in_front_speed);
        if by_speed == Some(SignalKind::Main) && classify(identifier) != Some(SignalKind::Main) {
            self.main_by_speed.insert(split_identifier(identifier).0.to_string());
        }
    }

    /// Strongest classification known for `name`: a main aspect seen on any
    /// train, else the speed the approaching train reports, else the name.
    pub fn kind_of(&self, name: &str, approach_speed: Option<f64>) -> Option<SignalKind> {
        if self.main_by_speed.contains(name) {
            return Some(SignalKind::Main);
        }
        match approach_speed {
            Some(speed) => classify_signal_ahead(name, speed),
            None => classify(name),
        }
    }

    fn observe_transition(&mut self, train: &Train) {
        let Some(identifier) = train.train_data.signal_in_front.as_deref() else {
            return;
        };
        let current = split_identifier(identifier).0.to_string();
        let previous = self.last_ahead.insert(train.key(), current.clone());
        if let Some(previous) = previous {
            if previous != current {
                self.offer_connection(&previous, &current);
            }
        }
    }

    fn forget_departed(&mut self, trains: &[Train]) {
        let servers: HashSet<&str> = trains.iter().map(|t| t.server_code.as_str()).collect();
        let present: HashSet<TrainKey> = trains.iter().map(Train::key).collect();
        self.last_ahead
            .retain(|key, _| !servers.contains(key.server_code.as_str()) || present.contains(key));
    }

    fn offer_connection(&self, prev: &str, next: &str) {
        if self.store.has_connection(prev, next) {
            return;
        }
        if self.store.has_connection(next, prev) {
            self.record_error(prev, next, ConnectionErrorKind::ReverseExists);
            return;
        }
        if let (Some(a), Some(b)) = (self.signals.get(prev), self.signals.get(next)) {
            if a.distance_to(b) > MAX_CONNECTION_SPAN {
                self.record_error(prev, next, ConnectionErrorKind::TooFarApart);
                return;
            }
        }
        log::debug!("new signal connection {} -> {}", prev, next);
        self.store.add_connection(SignalConnection {
            prev: prev.to_string(),
            next: next.to_string(),
        });
    }

    fn record_error(&self, prev: &str, next: &str, error: ConnectionErrorKind) {
        let error = ConnectionError {
            prev: prev.to_string(),
            next: next.to_string(),
            error,
        };
        if self.store.has_connection_error(&error) {
            return;
        }
        log::warn!("signal connection {} -> {}: {}", prev, next, error.error);
        self.store.add_connection_error(error);
    }

    /// Role of `name` given what the topology store knows about it.
    pub fn role_of(&self, name: &str) -> Option<SignalRole> {
        let (next, prev) = self.store.neighbours(name);
        infer_role(name, &next, &prev)
    }

    /// Every known signal with its kind, role and the train approaching it.
    pub fn signals_with_trains(&self, trains: &[Train]) -> Vec<SignalView> {
        let mut ahead: HashMap<&str, (TrainKey, f64)> = HashMap::new();
        for train in trains {
            let data = &train.train_data;
            if let Some(identifier) = data.signal_in_front.as_deref() {
                ahead.insert(
                    split_identifier(identifier).0,
                    (train.key(), data.signal_in_front_speed),
                );
            }
        }

        let mut views: Vec<SignalView> = self
            .signals
            .values()
            .map(|record| {
                let approaching = ahead.get(record.name.as_str());
                SignalView {
                    kind: self.kind_of(&record.name, approaching.map(|(_, speed)| *speed)),
                    role: self.role_of(&record.name),
                    train_ahead: approaching.map(|(key, _)| key.clone()),
                    record: record.clone(),
                }
            })
            .collect();
        views.sort_by(|a, b| a.record.name.cmp(&b.record.name));
        views
    }

    /// Writes the table regardless of whether it changed.
    pub fn flush(&mut self) -> Result<(), PersistError> {
        self.save()
    }

    fn save(&mut self) -> Result<(), PersistError> {
        let mut records: Vec<&SignalRecord> = self.signals.values().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .from_writer(Vec::new());
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| PersistError::csv(&self.path, e))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PersistError::io(&self.path, e.into_error()))?;

        atomic_write(&self.path, &bytes)?;
        self.dirty = false;
        log::debug!("signal table saved ({} signals)", self.signals.len());
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<HashMap<String, SignalRecord>, PersistError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| PersistError::csv(path, e))?;

    let mut signals = HashMap::new();
    for row in reader.deserialize::<SignalRecord>() {
        match row {
            Ok(record) => {
                signals.insert(record.name.clone(), record);
            }
            Err(e) => log::warn!("skipping signal row in {}: {}", path.display(), e),
        }
    }
    Ok(signals)
}
