//! Timestamp utilities
//!
//! Vote timestamps and schedule windows are local wall-clock times with no
//! zone attached, so everything here works in `NaiveDateTime`. Monotonic
//! timing (tick periods, publish gating) is left to `tokio::time`.

use chrono::{Local, NaiveDateTime};
use std::sync::Mutex;

/// Timestamp format used in the durable vote log
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Source of wall-clock time for vote capture and per-day log selection
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    pub fn set(&self, t: NaiveDateTime) {
        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = t;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Format a timestamp for the vote log
pub fn format_log_timestamp(t: &NaiveDateTime) -> String {
    t.format(LOG_TIMESTAMP_FORMAT).to_string()
}

/// Parse a vote log timestamp; fractional seconds are optional
pub fn parse_log_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Convert seconds to duration
pub fn secs_to_duration(secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(secs)
}
