//! User cancellation and the manual reset escape hatch.
//!
//! Cancellation is local-first: the poll loop's token is cancelled and the
//! job is recorded as cancelled in one critical section, before the
//! backend is told anything. The backend request is best-effort, and a
//! short grace period lets any in-flight poll response land and be
//! discarded before the call returns.

use atelier_core::job::{Job, RESET_ERROR};
use atelier_core::progress::ProgressSnapshot;

use crate::error::OrchestratorError;
use crate::state::Shared;

pub(crate) async fn cancel(shared: &Shared) -> Result<Job, OrchestratorError> {
    let now = shared.now();
    let job = {
        let mut state = shared.state.write().await;
        let Some(job) = state.current.as_mut().filter(|job| !job.is_terminal()) else {
            return Err(OrchestratorError::NotActive);
        };
        job.cancel(now);
        let job = job.clone();
        state.stop_polling();
        state.is_generating = false;
        state.progress = ProgressSnapshot::cancelled();
        state.record_history(job.clone(), shared.policy.history_limit);
        job
    };
    tracing::info!(job_id = %job.id, "Job cancelled locally");
    shared.settle(&job).await;

    if let Err(e) = shared.backend.cancel_job(&job.id).await {
        tracing::warn!(
            job_id = %job.id,
            error = %e,
            "Backend cancellation failed, job stays cancelled locally",
        );
    }

    tokio::time::sleep(shared.policy.cancel_grace).await;
    Ok(job)
}

/// Force-terminate whatever is current without a backend round trip.
///
/// A non-terminal job is failed with [`RESET_ERROR`] and kept in history.
/// Either way the current job, progress and in-flight keys are cleared.
pub(crate) async fn reset_stuck(shared: &Shared) -> Option<Job> {
    let now = shared.now();
    let (reset, previous) = {
        let mut state = shared.state.write().await;
        state.stop_polling();
        let previous = state.current.take();
        state.is_generating = false;
        state.progress = ProgressSnapshot::default();

        let reset = previous.clone().and_then(|mut job| {
            if !job.fail(RESET_ERROR, now) {
                return None;
            }
            state.record_history(job.clone(), shared.policy.history_limit);
            Some(job)
        });
        (reset, previous)
    };

    match &reset {
        Some(job) => {
            tracing::warn!(job_id = %job.id, "Stuck job reset");
            shared.settle(job).await;
        }
        None => {
            shared.clear_idle_in_flight().await;
            if let Some(job) = previous {
                tracing::info!(job_id = %job.id, "Cleared finished job");
            }
        }
    }
    reset
}
