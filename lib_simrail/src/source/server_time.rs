//! # Server Clock Projection
//!
//! Each server runs its own in-game clock, reported in milliseconds as if the
//! local time were UTC, plus a whole-hour offset from real UTC. A [`ServerTime`]
//! captures one clock reading together with the wall time it was taken at, so
//! "now on that server" can be projected without asking upstream again.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format of timetable timestamps, server-local.
pub const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One synchronised clock sample of a server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerTime {
    /// Server clock in epoch milliseconds, local time read as UTC.
    pub server_time_ms: i64,
    /// Wall time at which the sample was taken.
    pub captured_at: DateTime<Utc>,
    /// Hours the server clock runs ahead of UTC.
    pub utc_offset_hours: i32,
}

impl ServerTime {
    pub fn new(server_time_ms: i64, utc_offset_hours: i32) -> Self {
        Self {
            server_time_ms,
            captured_at: Utc::now(),
            utc_offset_hours,
        }
    }

    fn offset(&self) -> ChronoDuration {
        ChronoDuration::hours(i64::from(self.utc_offset_hours))
    }

    /// Current instant on the server, in real UTC.
    pub fn now_utc(&self) -> Option<DateTime<Utc>> {
        self.now_utc_at(Utc::now())
    }

    /// Projection of the server clock at wall time `wall_now`.
    pub fn now_utc_at(&self, wall_now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let sample = DateTime::<Utc>::from_timestamp_millis(self.server_time_ms)?;
        let elapsed = wall_now.signed_duration_since(self.captured_at);
        sample.checked_add_signed(elapsed)?.checked_sub_signed(self.offset())
    }

    /// Absolute instant of a server-local wall time.
    pub fn local_to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        local.and_utc().checked_sub_signed(self.offset())
    }

    /// Parses a `yyyy-mm-dd hh:mm:ss` server-local string into an absolute instant.
    pub fn parse_local(&self, text: &str) -> Option<DateTime<Utc>> {
        let local = NaiveDateTime::parse_from_str(text.trim(), LOCAL_TIME_FORMAT).ok()?;
        self.local_to_utc(local)
    }
}

/// Delay in whole seconds between an actual and a scheduled instant.
pub fn delay_seconds(actual: DateTime<Utc>, scheduled: DateTime<Utc>) -> i64 {
    let millis = actual.signed_duration_since(scheduled).num_milliseconds();
    (millis as f64 / 1000.0).round() as i64
}
