//! Startup rehydration.
//!
//! History is always restored. The in-flight record resumes polling only
//! when it describes a generating, non-terminal, non-cancelled job; any
//! other record is stale and is discarded.

use std::sync::Arc;

use atelier_core::job::Job;

use crate::events::OrchestratorEvent;
use crate::poll;
use crate::state::Shared;

/// Rehydrate from the persisted mirror. Returns the resumed job, if any.
pub(crate) async fn restore(shared: &Arc<Shared>) -> Option<Job> {
    let history = match shared.persistence.load_history().await {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable job history");
            Vec::new()
        }
    };

    let record = match shared.persistence.load_in_flight().await {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable in-flight record");
            None
        }
    };

    let resumable = record.filter(|record| {
        let ok = record.is_resumable();
        if !ok {
            tracing::warn!(
                job_id = %record.job.id,
                status = record.job.status.name(),
                is_generating = record.is_generating,
                "Discarding stale in-flight record",
            );
        }
        ok
    });

    let token = shared.poll_token();
    {
        let mut state = shared.state.write().await;
        state.history.clear();
        for job in history.into_iter().rev() {
            state.record_history(job, shared.policy.history_limit);
        }
        if let Some(record) = &resumable {
            state.stop_polling();
            state.current = Some(record.job.clone());
            state.progress = record.progress.clone();
            state.is_generating = true;
            state.poll_token = Some(token.clone());
        }
    }

    let Some(record) = resumable else {
        shared.clear_idle_in_flight().await;
        return None;
    };

    let job_id = record.job.id.clone();
    tracing::info!(
        job_id = %job_id,
        status = record.job.status.name(),
        progress = record.job.progress,
        "Resuming in-flight job",
    );
    shared.emit(OrchestratorEvent::Resumed {
        job_id: job_id.clone(),
    });
    poll::spawn(shared, job_id, token);
    Some(record.job)
}
