//! # Analytics Module
//!
//! Consumers of the per-server train stream. Each analyzer owns its derived
//! state and its snapshot files; none of them reaches into another.
//!
//! - `signals`: signal positions, classification and topology.
//! - `delays`: departure delay per train run and stop.
//! - `routes`: deduplicated route geometry.

pub mod delays;
pub mod routes;
pub mod signals;

pub use delays::{DelayAnalyzer, DelayMap, ScheduleSource};
pub use routes::RouteDeduplicator;
pub use signals::{
    classify, infer_role, MemoryTopologyStore, SignalAnalyzer, SignalKind, SignalRecord, SignalRole,
    SignalView, TopologyStore,
};
