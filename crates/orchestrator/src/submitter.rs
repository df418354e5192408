//! Job submission.
//!
//! Validation and the backend call happen before any state is touched: a
//! rejected submission leaves no job, no poll loop and no persisted record.

use std::sync::Arc;

use atelier_compute::description::JobDescription;
use atelier_core::generation::{estimate_initial_seconds, GenerationParams};
use atelier_core::job::{Job, SUPERSEDED_ERROR};
use atelier_core::progress::ProgressSnapshot;

use crate::error::OrchestratorError;
use crate::events::OrchestratorEvent;
use crate::poll;
use crate::state::Shared;

pub(crate) async fn submit(
    shared: &Arc<Shared>,
    params: GenerationParams,
) -> Result<Job, OrchestratorError> {
    params.validate()?;
    let description = JobDescription::from_params(&params);

    let job_id = shared
        .backend
        .submit_job(&description)
        .await
        .map_err(OrchestratorError::Submit)?;

    let now = shared.now();
    let job = Job::pending(job_id.clone(), now);
    let snapshot = ProgressSnapshot::initial(estimate_initial_seconds(&params), params.image_count);
    let token = shared.poll_token();

    let superseded = {
        let mut state = shared.state.write().await;
        state.stop_polling();
        let previous = state.current.replace(job.clone());
        let superseded = previous.and_then(|mut prev| {
            if !prev.fail(SUPERSEDED_ERROR, now) {
                return None;
            }
            state.record_history(prev.clone(), shared.policy.history_limit);
            Some(prev)
        });
        state.progress = snapshot;
        state.is_generating = true;
        state.assets.remove(&job_id);
        state.poll_token = Some(token.clone());
        superseded
    };

    if let Some(prev) = &superseded {
        tracing::info!(
            job_id = %prev.id,
            new_job_id = %job_id,
            progress = prev.progress,
            "Job superseded by a new submission",
        );
        shared.settle(prev).await;
    }

    tracing::info!(
        job_id = %job_id,
        client_id = %description.client_id,
        image_count = params.image_count,
        "Job submitted",
    );
    shared.persist_in_flight(&job_id).await;
    shared.emit(OrchestratorEvent::Submitted {
        job_id: job_id.clone(),
    });

    poll::spawn(shared, job_id, token);
    Ok(job)
}
