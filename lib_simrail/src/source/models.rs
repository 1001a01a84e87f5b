//! Typed shapes of the upstream SimRail payloads.
//!
//! Field names follow the upstream spelling, typos included; the misspelled
//! coordinate keys are accepted alongside the correct ones.

use serde::{Deserialize, Serialize};

/// One game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerDescriptor {
    /// Unique key, e.g. `en1`.
    pub server_code: String,
    /// Display name.
    #[serde(default)]
    pub server_name: String,
    /// Region label.
    #[serde(default)]
    pub server_region: String,
    /// Whether the server is currently running.
    #[serde(default)]
    pub is_active: bool,
}

/// Live state block of a train.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TrainData {
    /// Steam id of the player driving, absent for AI.
    #[serde(rename = "ControlledBySteamID")]
    pub controlled_by_steam_id: Option<String>,
    /// Latitude; absent while the train is off-map.
    #[serde(rename = "Latititute", alias = "Latitude")]
    pub latitude: Option<f64>,
    /// Longitude; absent while the train is off-map.
    #[serde(rename = "Longitute", alias = "Longitude")]
    pub longitude: Option<f64>,
    /// Speed in km/h.
    pub velocity: f64,
    /// Identifier of the next signal, `name@extra`.
    pub signal_in_front: Option<String>,
    /// Distance to that signal in meters.
    pub distance_to_signal_in_front: f64,
    /// Speed permitted by that signal.
    pub signal_in_front_speed: f64,
    /// Last timetable stop passed, delay applied. Never decreases during a run.
    #[serde(rename = "VDDelayedTimetableIndex")]
    pub vd_delayed_timetable_index: i64,
    /// Inside a border station area.
    pub in_border_station_area: bool,
}

/// One running train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Train {
    /// Local train number; unique only together with server and run.
    pub train_no_local: String,
    #[serde(default)]
    pub train_name: String,
    #[serde(default)]
    pub start_station: String,
    #[serde(default)]
    pub end_station: String,
    #[serde(default)]
    pub vehicles: Vec<String>,
    #[serde(default)]
    pub server_code: String,
    /// Instance identifier of this run.
    #[serde(default, rename = "RunId")]
    pub run_id: String,
    #[serde(default)]
    pub train_data: TrainData,
}

/// Identity of one train run: `(local number, server code, instance id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrainKey {
    pub train_no_local: String,
    pub server_code: String,
    pub run_id: String,
}

impl Train {
    /// Identity of this run.
    pub fn key(&self) -> TrainKey {
        TrainKey {
            train_no_local: self.train_no_local.clone(),
            server_code: self.server_code.clone(),
            run_id: self.run_id.clone(),
        }
    }

    /// `(lat, lon)` when the train is on the map.
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.train_data.latitude, self.train_data.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Player occupying a dispatcher post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dispatcher {
    #[serde(default)]
    pub server_code: String,
    #[serde(default)]
    pub steam_id: String,
}

/// One station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Station {
    pub name: String,
    /// Short code namespacing the station's signals.
    #[serde(default)]
    pub prefix: String,
    /// Negative means unplayable (AI only).
    #[serde(default)]
    pub difficulty_level: i32,
    #[serde(default, rename = "Latititude", alias = "Latitude")]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub dispatched_by: Vec<Dispatcher>,
}

/// One stop of a static timetable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimetableEntry {
    pub name_of_point: String,
    pub name_for_person: String,
    pub point_id: String,
    /// Local server time, `yyyy-mm-dd hh:mm:ss`.
    pub arrival_time: Option<String>,
    /// Local server time, `yyyy-mm-dd hh:mm:ss`. Absent at termini.
    pub departure_time: Option<String>,
    pub stop_type: String,
    pub line: i32,
    pub mileage: f64,
    pub max_speed: i32,
}

impl TimetableEntry {
    /// Human name of the stop, falling back to the point name.
    pub fn display_name(&self) -> &str {
        if self.name_for_person.is_empty() {
            &self.name_of_point
        } else {
            &self.name_for_person
        }
    }
}

/// Static timetable of one train number on one server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timetable {
    pub train_no_local: String,
    pub train_name: String,
    pub start_station: String,
    pub end_station: String,
    pub timetable: Vec<TimetableEntry>,
}
