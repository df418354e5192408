//! Job record, status lifecycle and terminal outcomes.
//!
//! A [`Job`] is created `Pending` by the submitter, mutated only by the
//! poll loop or the cancellation controller, and never leaves a terminal
//! status once it reaches one.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Reserved error values
// ---------------------------------------------------------------------------

/// Sentinel stored in [`Job::error`] when the user cancelled the job.
///
/// A `Failed` job carrying this value is a cancellation, not a backend
/// failure.
pub const CANCELLED_BY_USER: &str = "cancelled_by_user";

/// Error recorded when the poll loop exhausts its attempt budget.
pub const TIMEOUT_ERROR: &str = "timed_out_waiting_for_backend";

/// Error recorded when a wedged job is force-terminated locally.
pub const RESET_ERROR: &str = "reset_by_user";

/// Error recorded on a job that stopped polling because a newer
/// submission took its place.
pub const SUPERSEDED_ERROR: &str = "superseded_by_new_job";

/// Progress is reported as an integer percentage.
pub const MAX_PROGRESS: u8 = 100;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` end polling for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire / storage name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Classification of everything that can go wrong with a job.
///
/// Only terminal kinds ever reach the user; the rest are absorbed by the
/// poll loop or the chunk ingestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network error or non-2xx response; retryable with backoff.
    Transport,
    /// The job is not yet visible to the status query path.
    NotFoundTransient,
    /// The backend reported the job as failed.
    BackendFailure,
    /// The user cancelled the job.
    UserCancelled,
    /// The attempt budget was exhausted.
    Timeout,
    /// A result could not be written to the object store.
    PersistAsset,
}

impl FailureKind {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::BackendFailure | Self::UserCancelled | Self::Timeout
        )
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One remotely-executed generation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Integer percentage, 0..=100.
    pub progress: u8,
    /// Current backend activity. Replaced wholesale on every poll.
    pub stage: Option<String>,
    pub message: Option<String>,
    /// Only set when `status == Failed`.
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// A freshly submitted job.
    pub fn pending(id: JobId, now: Timestamp) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            stage: None,
            message: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when the job is `Failed` with the cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Failed && self.error.as_deref() == Some(CANCELLED_BY_USER)
    }

    /// Apply a `Processing` status report.
    ///
    /// Progress never moves backwards for a job id. Returns `false` (and
    /// changes nothing) if the job is already terminal.
    pub fn apply_processing(
        &mut self,
        progress: Option<u8>,
        stage: Option<String>,
        message: Option<String>,
        now: Timestamp,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Processing;
        if let Some(p) = progress {
            self.progress = self.progress.max(p.min(MAX_PROGRESS));
        }
        self.stage = stage;
        self.message = message;
        self.updated_at = now;
        true
    }

    /// Apply a `Pending` status report: the backend has the job queued.
    /// Status and progress are left alone.
    pub fn apply_pending(
        &mut self,
        stage: Option<String>,
        message: Option<String>,
        now: Timestamp,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.stage = stage;
        self.message = message;
        self.updated_at = now;
        true
    }

    /// Mark the job completed. No-op on a terminal job.
    pub fn complete(&mut self, now: Timestamp) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = MAX_PROGRESS;
        self.error = None;
        self.updated_at = now;
        true
    }

    /// Mark the job failed with `error`. No-op on a terminal job, so a
    /// recorded cancellation is never overwritten.
    pub fn fail(&mut self, error: impl Into<String>, now: Timestamp) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now;
        true
    }

    /// Record a user cancellation. Authoritative over any later poll
    /// response; no-op if the job already reached a terminal status.
    pub fn cancel(&mut self, now: Timestamp) -> bool {
        self.fail(CANCELLED_BY_USER, now)
    }

    /// The user-visible outcome, if the job is terminal.
    pub fn outcome(&self) -> Option<TerminalOutcome> {
        match self.status {
            JobStatus::Pending | JobStatus::Processing => None,
            JobStatus::Completed => Some(TerminalOutcome::Completed),
            JobStatus::Failed => Some(match self.error.as_deref() {
                Some(CANCELLED_BY_USER) => TerminalOutcome::UserCancelled,
                Some(TIMEOUT_ERROR) => TerminalOutcome::TimedOut,
                Some(RESET_ERROR) => TerminalOutcome::Reset,
                Some(SUPERSEDED_ERROR) => TerminalOutcome::Superseded,
                Some(other) => TerminalOutcome::BackendFailure(other.to_string()),
                None => TerminalOutcome::BackendFailure("unknown error".to_string()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal outcome
// ---------------------------------------------------------------------------

/// The single user-visible result of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Completed,
    BackendFailure(String),
    UserCancelled,
    TimedOut,
    Reset,
    Superseded,
}

impl TerminalOutcome {
    /// Notification text shown to the user. Cancellation and timeout use
    /// wording distinct from a backend failure.
    pub fn message(&self) -> String {
        match self {
            Self::Completed => "Generation complete.".to_string(),
            Self::BackendFailure(error) => format!("Generation failed: {error}"),
            Self::UserCancelled => "Generation cancelled.".to_string(),
            Self::TimedOut => {
                "Generation timed out. The job may still finish; please try again.".to_string()
            }
            Self::Reset => "Generation was reset.".to_string(),
            Self::Superseded => "Generation replaced by a newer request.".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn job() -> Job {
        Job::pending(JobId::new("j1"), Utc::now())
    }

    #[test]
    fn pending_job_starts_at_zero() {
        let j = job();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.progress, 0);
        assert!(j.error.is_none());
        assert!(j.outcome().is_none());
    }

    #[test]
    fn progress_is_monotonic_while_processing() {
        let mut j = job();
        let now = Utc::now();
        j.apply_processing(Some(40), Some("sampling".into()), None, now);
        j.apply_processing(Some(25), Some("decoding".into()), None, now);
        assert_eq!(j.progress, 40);
        assert_eq!(j.stage.as_deref(), Some("decoding"));
        j.apply_processing(Some(250), None, None, now);
        assert_eq!(j.progress, 100);
    }

    #[test]
    fn stage_and_message_replaced_wholesale() {
        let mut j = job();
        let now = Utc::now();
        j.apply_processing(Some(10), Some("loading".into()), Some("warming up".into()), now);
        j.apply_processing(None, Some("sampling".into()), None, now);
        assert_eq!(j.stage.as_deref(), Some("sampling"));
        assert!(j.message.is_none());
        assert_eq!(j.progress, 10);
    }

    #[test]
    fn pending_report_keeps_status() {
        let mut j = job();
        assert!(j.apply_pending(Some("queued".into()), Some("3 ahead".into()), Utc::now()));
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.message.as_deref(), Some("3 ahead"));
    }

    #[test]
    fn complete_sets_full_progress() {
        let mut j = job();
        assert!(j.complete(Utc::now()));
        assert_eq!(j.progress, 100);
        assert_matches!(j.outcome(), Some(TerminalOutcome::Completed));
    }

    #[test]
    fn cancellation_is_not_overwritten() {
        let mut j = job();
        let now = Utc::now();
        assert!(j.cancel(now));
        assert!(j.is_cancelled());
        assert!(!j.complete(now));
        assert!(!j.fail("out of memory", now));
        assert!(!j.apply_processing(Some(90), None, None, now));
        assert_eq!(j.error.as_deref(), Some(CANCELLED_BY_USER));
        assert_matches!(j.outcome(), Some(TerminalOutcome::UserCancelled));
    }

    #[test]
    fn outcome_distinguishes_failure_variants() {
        let now = Utc::now();

        let mut timed_out = job();
        timed_out.fail(TIMEOUT_ERROR, now);
        assert_matches!(timed_out.outcome(), Some(TerminalOutcome::TimedOut));

        let mut failed = job();
        failed.fail("CUDA OOM", now);
        assert_eq!(
            failed.outcome(),
            Some(TerminalOutcome::BackendFailure("CUDA OOM".into()))
        );
        assert!(!failed.is_cancelled());

        let mut superseded = job();
        superseded.fail(SUPERSEDED_ERROR, now);
        assert_matches!(superseded.outcome(), Some(TerminalOutcome::Superseded));
        assert!(!superseded.is_cancelled());
    }

    #[test]
    fn notification_wording_is_distinct() {
        let cancelled = TerminalOutcome::UserCancelled.message();
        let failed = TerminalOutcome::BackendFailure("boom".into()).message();
        let timed_out = TerminalOutcome::TimedOut.message();
        assert_ne!(cancelled, failed);
        assert!(failed.contains("boom"));
        assert!(timed_out.contains("try again"));
    }

    #[test]
    fn only_terminal_kinds_reach_the_user() {
        assert!(!FailureKind::Transport.is_terminal());
        assert!(!FailureKind::NotFoundTransient.is_terminal());
        assert!(!FailureKind::PersistAsset.is_terminal());
        assert!(FailureKind::UserCancelled.is_terminal());
        assert!(FailureKind::Timeout.is_terminal());
    }

    #[test]
    fn job_serializes_camel_case() {
        let j = job();
        let json = serde_json::to_value(&j).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("createdAt").is_some());
    }
}
