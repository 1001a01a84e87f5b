use clap::Parser;
use lib_simrail::configs::{ConfigError, IngestConfig};
use lib_simrail::configs::config_sys::{DEFAULT_API_URL, DEFAULT_DATA_DIR, DEFAULT_PANEL_URL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "server_simrail.conf";
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[command(about = "SimRail telemetry ingestion and analytics server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "SIMRAIL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "SIMRAIL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "SIMRAIL_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "SIMRAIL_PANEL_URL", help = "Base URL of the panel host (servers, trains, stations).")]
    pub panel_url: Option<String>,

    #[arg(long, env = "SIMRAIL_API_URL", help = "Base URL of the API host (time, timezone, timetables).")]
    pub api_url: Option<String>,

    #[arg(long, env = "SIMRAIL_DATA_DIR", help = "Directory for signal, route, delay and timetable snapshots.")]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    fn defaults() -> Config {
        Config {
            log_dir: Some(PathBuf::from(DEFAULT_LOG_DIR)),
            log_level: Some(DEFAULT_LOG_LEVEL.to_string()),
            panel_url: Some(DEFAULT_PANEL_URL.to_string()),
            api_url: Some(DEFAULT_API_URL.to_string()),
            data_dir: Some(PathBuf::from(DEFAULT_DATA_DIR)),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            panel_url: other.panel_url.or(self.panel_url),
            api_url: other.api_url.or(self.api_url),
            data_dir: other.data_dir.or(self.data_dir),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Library-side view of the resolved settings.
    pub fn ingest_config(&self) -> IngestConfig {
        let defaults = IngestConfig::default();
        IngestConfig {
            panel_url: self.panel_url.clone().unwrap_or(defaults.panel_url),
            api_url: self.api_url.clone().unwrap_or(defaults.api_url),
            data_dir: self.data_dir.clone().unwrap_or(defaults.data_dir),
        }
    }
}

/// Resolves the configuration: defaults < config file < environment/CLI.
pub fn load_config() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();
    // clap::Parser handles both env vars and CLI args.
    resolve(Config::parse())
}

pub fn resolve(cli: Config) -> Result<Config, ConfigError> {
    let mut current_config = Config::defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)?;
        let file_config = serde_json::from_str::<Config>(&config_str).map_err(|e| {
            ConfigError::ParseError {
                path: config_file_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        current_config = current_config.merge(file_config);
    } else if cli.config_path.is_some() {
        // Logging is not up yet.
        eprintln!(
            "Config file not found at {}. Using defaults and environment/CLI values.",
            config_file_path.display()
        );
    }

    Ok(current_config.merge(cli))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_file(path: PathBuf) -> Config {
        Config {
            config_path: Some(path),
            ..Default::default()
        }
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_simrail.conf");
        fs::write(&path, r#"{"logLevel":"debug","dataDir":"/var/lib/simrail"}"#).unwrap();

        let mut cli = cli_with_file(path);
        cli.log_level = Some("warn".into());
        let config = resolve(cli).unwrap();

        assert_eq!(config.log_level(), "warn");
        assert_eq!(config.ingest_config().data_dir, PathBuf::from("/var/lib/simrail"));
        assert_eq!(config.ingest_config().panel_url, DEFAULT_PANEL_URL);
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.conf");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            resolve(cli_with_file(path)),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = resolve(cli_with_file(dir.path().join("absent.conf"))).unwrap();
        assert_eq!(config.log_dir(), PathBuf::from(DEFAULT_LOG_DIR));
        assert_eq!(config.ingest_config(), IngestConfig::default());
    }
}
