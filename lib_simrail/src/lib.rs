//! # lib_simrail
//!
//! Ingestion and analytics engine for live SimRail telemetry.
//!
//! Every top-level module sits behind a cargo feature of the same name; `full`
//! (the default) enables them all.

#![forbid(unsafe_code)]

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "source")]
pub mod source;

#[cfg(feature = "analytics")]
pub mod analytics;

#[cfg(feature = "ingestors")]
pub mod ingestors;
