//! Refresh statistics emitted by every fetch orchestrator after each cycle.

use std::time::Duration;

/// Rolling statistics of one orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RefreshStats {
    /// Completed cycles since start, successful or not.
    pub refresh_count: u64,
    /// Running mean of cycle durations.
    pub avg_latency: Duration,
    /// Duration of the most recent cycle.
    pub last_latency: Duration,
    /// Cycles that ended in a watchdog timeout or a worker crash.
    pub failures: u64,
}

impl RefreshStats {
    /// Folds one more cycle into the statistics.
    pub fn record(&mut self, latency: Duration, failed: bool) {
        let n = self.refresh_count as f64;
        let mean = self.avg_latency.as_secs_f64();
        let next = (mean * n + latency.as_secs_f64()) / (n + 1.0);

        self.refresh_count += 1;
        self.avg_latency = Duration::from_secs_f64(next);
        self.last_latency = latency;
        if failed {
            self.failures += 1;
        }
    }
}

/// External metrics sink. Implementations must not block.
pub trait MetricsSink: Send + Sync {
    /// Called once per completed cycle of the orchestrator named `kind`.
    fn record(&self, kind: &str, stats: &RefreshStats);
}

/// Writes statistics on the `metrics` log target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn record(&self, kind: &str, stats: &RefreshStats) {
        log::debug!(
            target: "metrics",
            "{} refresh #{} took {} ms (avg {} ms, failures {})",
            kind,
            stats.refresh_count,
            stats.last_latency.as_millis(),
            stats.avg_latency.as_millis(),
            stats.failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_average_tracks_mean() {
        let mut stats = RefreshStats::default();
        stats.record(Duration::from_millis(100), false);
        stats.record(Duration::from_millis(300), true);

        assert_eq!(stats.refresh_count, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.last_latency, Duration::from_millis(300));
        let avg = stats.avg_latency.as_millis();
        assert!((199..=201).contains(&avg), "avg was {avg}");
    }
}
