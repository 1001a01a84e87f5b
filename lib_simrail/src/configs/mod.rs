//! # Configuration Modules
//!
//! Environment-style configuration for the ingestion engine: upstream hosts,
//! the data directory for durable snapshots, and per-data-kind refresh
//! interval overrides.

/// Provides environment-backed runtime configuration.
pub mod config_sys;

pub use config_sys::{refresh_interval, ConfigError, IngestConfig};
