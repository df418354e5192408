//! Time source used for job timestamps and elapsed-time reporting.
//!
//! All waiting goes through `tokio::time`, so a paused test runtime
//! drives both delays and [`TokioClock`] readings in lockstep.

use chrono::Utc;
use tokio::time::Instant;

use atelier_core::types::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock anchor advanced by the tokio monotonic clock.
pub struct TokioClock {
    wall_origin: Timestamp,
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            wall_origin: Utc::now(),
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }
}

/// Whole seconds between `since` and `now`, floored at zero.
pub fn elapsed_secs(since: Timestamp, now: Timestamp) -> u64 {
    (now - since).num_seconds().max(0) as u64
}
