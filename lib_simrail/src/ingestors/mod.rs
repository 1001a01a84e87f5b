//! # Data Ingestors Module
//!
//! Turns the generic orchestration framework into the SimRail ingestion engine.
//!
//! ## Contained Modules:
//! - **`jobs`**: one [`FetchJob`](crate::core::FetchJob) per upstream data kind.
//! - **`hub`**: fans every per-server trains batch out to the analyzers.
//! - **`pipeline`**: builds and starts the orchestrators and the consumer task.

/// Fetch jobs for servers, trains, stations and server time.
pub mod jobs;
/// Analyzer fan-out for train batches.
pub mod hub;
/// The assembled ingestion pipeline.
pub mod pipeline;

// --- Public API Re-exports ---
pub use hub::AnalyticsHub;
pub use jobs::{ServerTimeJob, ServersJob, StationsJob, TrainsJob};
pub use pipeline::Pipeline;
