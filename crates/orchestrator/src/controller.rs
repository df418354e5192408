//! Public facade over the orchestrator.
//!
//! [`Orchestrator`] owns the shared state and hands out read-only copies of
//! it. Mutation happens only through [`submit`](Orchestrator::submit),
//! [`cancel`](Orchestrator::cancel), [`reset_stuck`](Orchestrator::reset_stuck)
//! and the background tasks those start.

use std::sync::Arc;

use tokio::sync::broadcast;

use atelier_compute::backend::{ComputeBackend, ObjectStore};
use atelier_core::asset::ResultAsset;
use atelier_core::generation::GenerationParams;
use atelier_core::job::Job;
use atelier_core::policy::PollPolicy;
use atelier_core::progress::ProgressSnapshot;
use atelier_core::types::JobId;

use crate::cancel;
use crate::clock::{Clock, TokioClock};
use crate::error::OrchestratorError;
use crate::events::{OrchestratorEvent, DEFAULT_CAPACITY};
use crate::ingest::refresh_cache;
use crate::persistence::{Persistence, StateStore};
use crate::recovery;
use crate::state::Shared;
use crate::submitter;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct OrchestratorBuilder {
    backend: Arc<dyn ComputeBackend>,
    store: Arc<dyn ObjectStore>,
    state_store: Arc<dyn StateStore>,
    policy: PollPolicy,
    clock: Arc<dyn Clock>,
    event_capacity: usize,
}

impl OrchestratorBuilder {
    pub fn policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Fails if the policy is invalid.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        self.policy.validate()?;
        let shared = Shared::new(
            self.backend,
            self.store,
            Persistence::new(self.state_store),
            self.policy,
            self.clock,
            self.event_capacity,
        );
        Ok(Orchestrator {
            shared: Arc::new(shared),
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one active generation job at a time.
///
/// # Usage
///
/// ```rust,ignore
/// let orchestrator = Orchestrator::builder(backend, results, state).build()?;
/// orchestrator.restore().await;
/// let job = orchestrator.submit(params).await?;
/// orchestrator.wait_until_settled().await;
/// ```
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Start configuring an orchestrator with the default policy and a
    /// [`TokioClock`].
    pub fn builder(
        backend: Arc<dyn ComputeBackend>,
        store: Arc<dyn ObjectStore>,
        state_store: Arc<dyn StateStore>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            backend,
            store,
            state_store,
            policy: PollPolicy::default(),
            clock: Arc::new(TokioClock::new()),
            event_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Rehydrate history and, if a resumable job was in flight, resume
    /// polling it. Returns the resumed job.
    pub async fn restore(&self) -> Option<Job> {
        recovery::restore(&self.shared).await
    }

    /// Validate `params`, create the job on the backend and start polling.
    ///
    /// Any job still polling is superseded. On error nothing is recorded.
    pub async fn submit(&self, params: GenerationParams) -> Result<Job, OrchestratorError> {
        submitter::submit(&self.shared, params).await
    }

    /// Cancel the current job. Local state is final when this returns,
    /// whatever the backend answered.
    pub async fn cancel(&self) -> Result<Job, OrchestratorError> {
        cancel::cancel(&self.shared).await
    }

    /// Force-terminate a wedged job without contacting the backend.
    pub async fn reset_stuck(&self) -> Option<Job> {
        cancel::reset_stuck(&self.shared).await
    }

    /// Re-list the store for `job_id` and merge into the result cache.
    pub async fn refresh_results(&self, job_id: &JobId) -> Vec<ResultAsset> {
        refresh_cache(&self.shared, job_id).await
    }

    pub async fn current_job(&self) -> Option<Job> {
        self.shared.state.read().await.current.clone()
    }

    pub async fn progress(&self) -> ProgressSnapshot {
        self.shared.state.read().await.progress.clone()
    }

    pub async fn is_generating(&self) -> bool {
        self.shared.state.read().await.is_generating
    }

    /// Most recent first.
    pub async fn history(&self) -> Vec<Job> {
        self.shared.state.read().await.history_vec()
    }

    /// Cached results for `job_id`, sorted by filename.
    pub async fn assets(&self, job_id: &JobId) -> Vec<ResultAsset> {
        self.shared
            .state
            .read()
            .await
            .assets
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.shared.events.subscribe()
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.shared.policy
    }

    /// Wait for every background task (poll loops, reconciliation sweeps,
    /// chunk refreshes) started so far to finish.
    pub async fn wait_until_settled(&self) {
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
        self.shared.tasks.reopen();
    }

    /// Stop polling and wait for every background task to exit.
    ///
    /// The in-flight record stays in the state store, so the next process
    /// resumes the job through [`restore`](Self::restore).
    pub async fn shutdown(self) {
        tracing::info!("Orchestrator shutting down");
        self.shared.shutdown.cancel();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.tasks.close();
    }
}
