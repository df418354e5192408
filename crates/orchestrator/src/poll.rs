//! Poll loop and job state machine.
//!
//! One loop runs per active job, spawned on the shared task tracker. Each
//! tick issues a single status request and applies the decoded response
//! before the next tick is scheduled, so ticks for a job never overlap.
//!
//! The loop stops when:
//! - its cancellation token is cancelled (user cancel, reset, supersession),
//! - the job reaches a terminal status,
//! - the attempt budget runs out (local timeout).
//!
//! Every response is applied under the state write lock after re-checking
//! the token, so a cancellation recorded locally always wins over a late
//! response for the same job.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use atelier_compute::api::ComputeApiError;
use atelier_compute::messages::{ChunkPayload, CompletedReport, FailedReport, StatusMessage, StatusReport};
use atelier_core::job::{FailureKind, Job, JobStatus, TIMEOUT_ERROR};
use atelier_core::progress::ProgressSnapshot;
use atelier_core::types::JobId;

use crate::clock::elapsed_secs;
use crate::events::OrchestratorEvent;
use crate::ingest::{ingest_batch, ingest_chunk};
use crate::reconcile::{reconcile, ReconcileOutcome};
use crate::state::{OrchestratorState, Shared};

/// Stage label recorded when a job fails or times out.
const STAGE_FAILED: &str = "failed";

/// What the loop does after a tick.
#[derive(Debug)]
enum Step {
    /// Poll again after the delay.
    Wait(Duration),
    /// The job completed; run the reconciliation sweep, then stop.
    Reconcile,
    Stop,
}

/// Start polling `job_id` with a fresh attempt budget.
pub(crate) fn spawn(shared: &Arc<Shared>, job_id: JobId, token: CancellationToken) {
    let poll = PollLoop {
        shared: Arc::clone(shared),
        job_id,
        token,
        attempts: 0,
    };
    shared.tasks.spawn(poll.run());
}

struct PollLoop {
    shared: Arc<Shared>,
    job_id: JobId,
    token: CancellationToken,
    /// Status ticks issued so far, fallback-only ticks included.
    attempts: u32,
}

impl PollLoop {
    async fn run(mut self) {
        tracing::info!(job_id = %self.job_id, "Polling started");

        loop {
            if self.token.is_cancelled() {
                tracing::debug!(job_id = %self.job_id, attempts = self.attempts, "Polling stopped");
                return;
            }
            if self.attempts >= self.shared.policy.max_attempts {
                self.time_out().await;
                return;
            }
            self.attempts += 1;

            match self.tick().await {
                Step::Wait(delay) => {
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => {
                            tracing::debug!(job_id = %self.job_id, "Polling stopped during delay");
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Step::Reconcile => {
                    self.reconcile_results().await;
                    return;
                }
                Step::Stop => return,
            }
        }
    }

    async fn tick(&mut self) -> Step {
        tracing::debug!(job_id = %self.job_id, attempt = self.attempts, "Polling job status");
        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Step::Stop,
            result = self.shared.backend.get_job_status(&self.job_id) => result,
        };
        match result {
            Ok(message) => self.apply(message).await,
            Err(e) => self.on_status_error(e).await,
        }
    }

    // ---- transport failures ----

    async fn on_status_error(&mut self, error: ComputeApiError) -> Step {
        let policy = &self.shared.policy;

        if error.classify() == FailureKind::NotFoundTransient
            && self.attempts <= policy.not_found_retry_limit
        {
            tracing::warn!(
                job_id = %self.job_id,
                attempt = self.attempts,
                "Job not visible yet, retrying",
            );
            return Step::Wait(policy.not_found_retry_delay);
        }

        tracing::warn!(
            job_id = %self.job_id,
            attempt = self.attempts,
            error = %error,
            "Status request failed, trying fallback",
        );
        let fallback = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Step::Stop,
            result = self.shared.backend.fallback_status(&self.job_id) => result,
        };
        match fallback {
            Ok(message) => self.apply(message).await,
            Err(e) => {
                let delay = self.shared.policy.error_retry_delay;
                tracing::warn!(
                    job_id = %self.job_id,
                    attempt = self.attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Fallback status failed",
                );
                Step::Wait(delay)
            }
        }
    }

    // ---- responses ----

    async fn apply(&mut self, message: StatusMessage) -> Step {
        match message {
            StatusMessage::Pending(report) => self.apply_report(report, JobStatus::Pending).await,
            StatusMessage::Processing(report) => {
                self.apply_report(report, JobStatus::Processing).await
            }
            StatusMessage::ImageReady(chunk) => self.apply_chunk(chunk).await,
            StatusMessage::Completed(report) => self.apply_completed(report).await,
            StatusMessage::Failed(report) => self.apply_failed(report).await,
        }
    }

    async fn apply_report(&mut self, report: StatusReport, status: JobStatus) -> Step {
        let now = self.shared.now();
        let snapshot = {
            let mut state = self.shared.state.write().await;
            if self.discarding(&state) {
                return Step::Stop;
            }
            let image_count = report.image_count.or(state.progress.image_count);
            let total_images = report.total_images.or(state.progress.total_images);
            let Some(job) = state.current_mut(&self.job_id) else {
                return Step::Stop;
            };
            let applied = match status {
                JobStatus::Processing => {
                    job.apply_processing(report.percent(), report.stage, report.message, now)
                }
                _ => job.apply_pending(report.stage, report.message, now),
            };
            if !applied {
                return Step::Stop;
            }
            let snapshot = ProgressSnapshot::from_job(
                job,
                elapsed_secs(job.created_at, now),
                report.estimated_time_remaining,
                image_count,
                total_images,
            );
            state.progress = snapshot.clone();
            snapshot
        };

        tracing::debug!(
            job_id = %self.job_id,
            status = status.name(),
            progress = snapshot.progress,
            stage = snapshot.stage.as_deref().unwrap_or(""),
            "Status applied",
        );
        self.publish_progress(snapshot).await;
        Step::Wait(self.shared.policy.poll_interval)
    }

    async fn apply_chunk(&mut self, chunk: ChunkPayload) -> Step {
        if self.discarding(&*self.shared.state.read().await) {
            return Step::Stop;
        }
        ingest_chunk(&self.shared, &self.job_id, &chunk).await;

        let now = self.shared.now();
        let snapshot = {
            let mut state = self.shared.state.write().await;
            if self.discarding(&state) {
                return Step::Stop;
            }
            let cached = state.asset_count(&self.job_id) as u32;
            let image_count = chunk.image_count.or(Some(cached));
            let total_images = chunk.total_images.or(state.progress.total_images);
            let Some(job) = state.current_mut(&self.job_id) else {
                return Step::Stop;
            };
            let stage = job.stage.clone();
            let message = Some(format!("Received {}", chunk.filename));
            if !job.apply_processing(chunk.percent(), stage, message, now) {
                return Step::Stop;
            }
            let snapshot = ProgressSnapshot::from_job(
                job,
                elapsed_secs(job.created_at, now),
                None,
                image_count,
                total_images,
            );
            state.progress = snapshot.clone();
            snapshot
        };

        self.publish_progress(snapshot).await;
        Step::Wait(self.shared.policy.fast_poll_interval)
    }

    async fn apply_completed(&mut self, report: CompletedReport) -> Step {
        if self.discarding(&*self.shared.state.read().await) {
            return Step::Stop;
        }
        ingest_batch(&self.shared, &self.job_id, &report.images).await;

        let now = self.shared.now();
        let job = {
            let mut state = self.shared.state.write().await;
            if self.discarding(&state) {
                return Step::Stop;
            }
            let cached = state.asset_count(&self.job_id) as u32;
            let Some(job) = state.current_mut(&self.job_id) else {
                return Step::Stop;
            };
            if !job.complete(now) {
                return Step::Stop;
            }
            if let Some(message) = report.message {
                job.message = Some(message);
            }
            let job = job.clone();
            state.is_generating = false;
            state.progress = ProgressSnapshot::completed(
                elapsed_secs(job.created_at, now),
                Some(cached).filter(|count| *count > 0),
            );
            state.record_history(job.clone(), self.shared.policy.history_limit);
            job
        };

        self.token.cancel();
        self.shared.settle(&job).await;
        Step::Reconcile
    }

    async fn apply_failed(&mut self, report: FailedReport) -> Step {
        let error = report.error_text();
        let now = self.shared.now();
        let job = {
            let mut state = self.shared.state.write().await;
            if self.discarding(&state) {
                return Step::Stop;
            }
            let Some(job) = state.current_mut(&self.job_id) else {
                return Step::Stop;
            };
            if !job.fail(error.clone(), now) {
                // Already terminal, most likely a recorded cancellation.
                return Step::Stop;
            }
            let job = job.clone();
            Self::mark_stopped(&mut state, &job, &error, self.shared.policy.history_limit);
            job
        };

        tracing::warn!(job_id = %self.job_id, error = %error, "Backend reported job failure");
        self.token.cancel();
        self.shared.settle(&job).await;
        Step::Stop
    }

    async fn time_out(&mut self) {
        let now = self.shared.now();
        let job = {
            let mut state = self.shared.state.write().await;
            if self.discarding(&state) {
                return;
            }
            let Some(job) = state.current_mut(&self.job_id) else {
                return;
            };
            if !job.fail(TIMEOUT_ERROR, now) {
                return;
            }
            let job = job.clone();
            Self::mark_stopped(
                &mut state,
                &job,
                "Timed out waiting for the compute backend",
                self.shared.policy.history_limit,
            );
            job
        };

        tracing::warn!(
            job_id = %self.job_id,
            attempts = self.attempts,
            "Attempt budget exhausted, job timed out",
        );
        self.token.cancel();
        self.shared.settle(&job).await;
    }

    async fn reconcile_results(&self) {
        let outcome = reconcile(&self.shared, &self.job_id).await;
        if let ReconcileOutcome::Found { asset_count, .. } = outcome {
            let mut state = self.shared.state.write().await;
            let completed = state
                .current
                .as_ref()
                .is_some_and(|job| job.id == self.job_id && job.status == JobStatus::Completed);
            if completed {
                let count = Some(asset_count as u32);
                state.progress.image_count = count;
                state.progress.total_images = count;
            }
        }
    }

    // ---- helpers ----

    /// True when a response for this job must be dropped: the loop was
    /// stopped, or the job is no longer current.
    fn discarding(&self, state: &OrchestratorState) -> bool {
        self.token.is_cancelled() || !state.is_current(&self.job_id)
    }

    fn mark_stopped(state: &mut OrchestratorState, job: &Job, message: &str, history_limit: usize) {
        state.is_generating = false;
        state.progress.stage = Some(STAGE_FAILED.to_string());
        state.progress.message = Some(message.to_string());
        state.progress.estimated_time_remaining = None;
        state.record_history(job.clone(), history_limit);
    }

    async fn publish_progress(&self, snapshot: ProgressSnapshot) {
        self.shared.persist_in_flight(&self.job_id).await;
        self.shared.emit(OrchestratorEvent::Progress {
            job_id: self.job_id.clone(),
            snapshot,
        });
    }
}
