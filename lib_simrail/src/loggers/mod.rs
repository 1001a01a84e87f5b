/// Console + rotating file logging built on `fern`.
pub mod logger;
/// Sink receiving orchestrator refresh statistics.
pub mod metrics;

pub use logger::setup_logging;
pub use metrics::{LogMetricsSink, MetricsSink, RefreshStats};
