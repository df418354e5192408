//! Post-completion reconciliation.
//!
//! After a job completes, the visible result set must converge to what the
//! store actually holds even if chunk events were lost. The sweep lists
//! the store immediately, then again on the policy's backoff schedule,
//! with one flush request to the backend along the way. It stops at the
//! first non-empty listing or when the schedule is exhausted, and never
//! touches the job record.

use atelier_core::types::JobId;

use crate::events::OrchestratorEvent;
use crate::ingest::refresh_cache;
use crate::state::Shared;

/// How a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// At least one result is visible.
    Found { asset_count: usize, attempts: u32 },
    /// Completed with zero visible results. Still actionable: the caller
    /// can re-request results later.
    Empty { attempts: u32 },
    /// The orchestrator shut down before the sweep finished.
    Abandoned { attempts: u32 },
}

pub(crate) async fn reconcile(shared: &Shared, job_id: &JobId) -> ReconcileOutcome {
    let policy = &shared.policy;
    let mut attempts = 1;
    let mut assets = refresh_cache(shared, job_id).await;

    while assets.is_empty() && attempts <= policy.reconcile_attempts() {
        if policy.flush_before(attempts + 1) {
            request_flush(shared, job_id).await;
        }
        let delay = policy.reconcile_delay(attempts);
        tracing::debug!(
            job_id = %job_id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "No results visible yet, retrying",
        );
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                tracing::debug!(job_id = %job_id, attempts, "Reconciliation abandoned on shutdown");
                return ReconcileOutcome::Abandoned { attempts };
            }
            _ = tokio::time::sleep(delay) => {}
        }
        attempts += 1;
        assets = refresh_cache(shared, job_id).await;
    }

    if assets.is_empty() {
        tracing::warn!(job_id = %job_id, attempts, "Completed job has no visible results");
        shared.emit(OrchestratorEvent::ResultsUnavailable {
            job_id: job_id.clone(),
            attempts,
        });
        ReconcileOutcome::Empty { attempts }
    } else {
        tracing::info!(job_id = %job_id, asset_count = assets.len(), attempts, "Results reconciled");
        shared.emit(OrchestratorEvent::ResultsReconciled {
            job_id: job_id.clone(),
            asset_count: assets.len(),
            attempts,
        });
        ReconcileOutcome::Found {
            asset_count: assets.len(),
            attempts,
        }
    }
}

async fn request_flush(shared: &Shared, job_id: &JobId) {
    match shared.backend.request_flush(job_id).await {
        Ok(()) => tracing::info!(job_id = %job_id, "Requested result flush"),
        Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Result flush request failed"),
    }
}
