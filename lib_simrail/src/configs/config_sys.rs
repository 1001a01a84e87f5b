//! # Runtime Configuration
//!
//! Host and storage settings arrive as an [`IngestConfig`] built by the
//! binary. Refresh intervals are read per data kind from the process
//! environment; values that are missing fall back to compiled-in defaults,
//! values that are present but malformed are logged and also fall back.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Base URL of the SimRail panel host (servers, trains, stations).
pub const DEFAULT_PANEL_URL: &str = "https://panel.simrail.eu:8084/";
/// Base URL of the SimRail API host (clock, timezone, timetables).
pub const DEFAULT_API_URL: &str = "https://api1.aws.simrail.eu:8082/api/";
/// Directory that receives signal, route, delay and timetable snapshots.
pub const DEFAULT_DATA_DIR: &str = "./data";

const ENV_PREFIX: &str = "SIMRAIL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("Environment variable {var} has an invalid value: {value}")]
    InvalidValue { var: String, value: String },
}

/// # Ingest Configuration
///
/// Host and storage settings shared by the source client, the orchestrators
/// and the analyzers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Base URL for `servers-open`, `trains-open` and `stations-open`.
    pub panel_url: String,
    /// Base URL for `getTime`, `getTimeZone` and `getAllTimetables`.
    pub api_url: String,
    /// Root directory for durable analyzer state.
    pub data_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            panel_url: DEFAULT_PANEL_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl IngestConfig {
    /// Directory holding one `<route>.csv` file per route.
    pub fn routes_dir(&self) -> PathBuf {
        self.data_dir.join("routes")
    }

    /// Path of the signal table.
    pub fn signals_file(&self) -> PathBuf {
        self.data_dir.join("signals.csv")
    }

    /// Directory holding one binary file per `(server, train)` timetable.
    pub fn timetables_dir(&self) -> PathBuf {
        self.data_dir.join("timetables")
    }

    /// Path of the delay-record snapshot.
    pub fn delays_file(&self) -> PathBuf {
        self.data_dir.join("delays.bin")
    }

    /// Path of the last-timetable-index snapshot.
    pub fn last_index_file(&self) -> PathBuf {
        self.data_dir.join("last_index.bin")
    }
}

/// Name of the environment variable overriding the refresh interval of `kind`.
pub fn refresh_interval_var(kind: &str) -> String {
    format!("{}_{}_REFRESH_INTERVAL", ENV_PREFIX, kind.to_uppercase())
}

/// Resolves the refresh interval for a data kind.
///
/// Reads `SIMRAIL_<KIND>_REFRESH_INTERVAL` (whole seconds). Falls back to
/// `default` when the variable is absent or unusable.
pub fn refresh_interval(kind: &str, default: Duration) -> Duration {
    let var = refresh_interval_var(kind);
    match parse_interval(&var, env::var(&var).ok(), default) {
        Ok(interval) => interval,
        Err(e) => {
            log::warn!("{}. Using default of {}s.", e, default.as_secs());
            default
        }
    }
}

/// Parses a raw seconds value. `None` and blank strings mean "use default";
/// zero or non-numeric values are rejected.
pub fn parse_interval(
    var: &str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }

    match trimmed.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(5);

    #[test]
    fn variable_name_is_upper_cased() {
        assert_eq!(refresh_interval_var("trains"), "SIMRAIL_TRAINS_REFRESH_INTERVAL");
    }

    #[test]
    fn absent_or_blank_uses_default() {
        assert_eq!(parse_interval("X", None, DEFAULT).unwrap(), DEFAULT);
        assert_eq!(parse_interval("X", Some("  ".into()), DEFAULT).unwrap(), DEFAULT);
    }

    #[test]
    fn seconds_override_default() {
        let parsed = parse_interval("X", Some("42".into()), DEFAULT).unwrap();
        assert_eq!(parsed, Duration::from_secs(42));
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        assert!(matches!(
            parse_interval("X", Some("0".into()), DEFAULT),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(parse_interval("X", Some("fast".into()), DEFAULT).is_err());
    }

    #[test]
    fn data_paths_hang_off_data_dir() {
        let config = IngestConfig {
            data_dir: PathBuf::from("/var/simrail"),
            ..IngestConfig::default()
        };
        assert_eq!(config.signals_file(), PathBuf::from("/var/simrail/signals.csv"));
        assert_eq!(config.routes_dir(), PathBuf::from("/var/simrail/routes"));
        assert_eq!(config.delays_file(), PathBuf::from("/var/simrail/delays.bin"));
    }
}
