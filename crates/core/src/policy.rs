//! Poll cadence, retry and reconciliation policy.
//!
//! The numbers are tuning choices, not contract. The qualitative behaviour
//! they encode is: a fast loop while results are streaming, bounded
//! retries on failure, and local-first cancellation.

use std::time::Duration;

use crate::error::CoreError;

/// Steady-state delay between status requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Delay after an incremental result; the backend is actively flushing.
pub const DEFAULT_FAST_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Delay before retrying a not-yet-visible job.
pub const DEFAULT_NOT_FOUND_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Early not-found responses tolerated before falling back.
pub const DEFAULT_NOT_FOUND_RETRY_LIMIT: u32 = 5;
/// Delay after both status paths failed.
pub const DEFAULT_ERROR_RETRY_DELAY: Duration = Duration::from_secs(10);
/// Status requests per job before it is declared timed out.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 360;
/// Reconciliation backoff steps.
pub const DEFAULT_RECONCILE_SCHEDULE_SECS: [u64; 5] = [1, 2, 4, 8, 15];
/// Reconciliation attempt (1-based) preceded by a flush request.
pub const DEFAULT_RECONCILE_FLUSH_AT: u32 = 3;
/// Delay between an ingested chunk and its follow-up store read.
pub const DEFAULT_CHUNK_REFRESH_DELAY: Duration = Duration::from_millis(1500);
/// Window for an in-flight poll response to land after cancellation.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(500);
/// Number of recent jobs kept in history.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// All poll-loop tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub poll_interval: Duration,
    pub fast_poll_interval: Duration,
    pub not_found_retry_delay: Duration,
    pub not_found_retry_limit: u32,
    pub error_retry_delay: Duration,
    pub max_attempts: u32,
    pub reconcile_schedule: Vec<Duration>,
    /// The flush nudge goes out right before this store listing (1-based,
    /// the immediate listing is 1). Values outside the sweep disable it.
    pub reconcile_flush_at: u32,
    pub chunk_refresh_delay: Duration,
    pub cancel_grace: Duration,
    pub history_limit: usize,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            fast_poll_interval: DEFAULT_FAST_POLL_INTERVAL,
            not_found_retry_delay: DEFAULT_NOT_FOUND_RETRY_DELAY,
            not_found_retry_limit: DEFAULT_NOT_FOUND_RETRY_LIMIT,
            error_retry_delay: DEFAULT_ERROR_RETRY_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            reconcile_schedule: DEFAULT_RECONCILE_SCHEDULE_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            reconcile_flush_at: DEFAULT_RECONCILE_FLUSH_AT,
            chunk_refresh_delay: DEFAULT_CHUNK_REFRESH_DELAY,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl PollPolicy {
    /// Reject policies that would poll forever or never reconcile.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_attempts == 0 {
            return Err(CoreError::Validation("max_attempts must be at least 1".into()));
        }
        if self.reconcile_schedule.is_empty() {
            return Err(CoreError::Validation(
                "reconcile_schedule must have at least one step".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(CoreError::Validation("history_limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Number of reconciliation reads before giving up.
    pub fn reconcile_attempts(&self) -> u32 {
        self.reconcile_schedule.len() as u32
    }

    /// True when the flush nudge precedes store listing `listing`.
    pub fn flush_before(&self, listing: u32) -> bool {
        listing > 1 && listing == self.reconcile_flush_at
    }

    /// Delay before reconciliation attempt `attempt` (1-based). Attempts
    /// past the end of the schedule reuse the last step.
    pub fn reconcile_delay(&self, attempt: u32) -> Duration {
        let idx = (attempt.max(1) - 1) as usize;
        self.reconcile_schedule
            .get(idx)
            .or_else(|| self.reconcile_schedule.last())
            .copied()
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}
