//! Orchestrator-owned state and the shared context every task works on.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use atelier_compute::backend::{ComputeBackend, ObjectStore};
use atelier_core::asset::{merge_assets, ResultAsset};
use atelier_core::job::Job;
use atelier_core::policy::PollPolicy;
use atelier_core::progress::ProgressSnapshot;
use atelier_core::types::{JobId, Timestamp};

use crate::clock::Clock;
use crate::events::{EventBus, OrchestratorEvent};
use crate::persistence::Persistence;

// ---------------------------------------------------------------------------
// OrchestratorState
// ---------------------------------------------------------------------------

/// Everything the orchestrator knows about the current session.
///
/// `current` and `progress` are written only by the poll loop, the
/// cancellation path and submission. The asset cache is keyed separately
/// and may be written by chunk ingestion at any time.
#[derive(Default)]
pub struct OrchestratorState {
    pub current: Option<Job>,
    pub progress: ProgressSnapshot,
    pub is_generating: bool,
    /// Most recent first, deduplicated by job id.
    pub history: VecDeque<Job>,
    pub assets: HashMap<JobId, Vec<ResultAsset>>,
    /// Continue-polling flag of the active loop.
    pub(crate) poll_token: Option<CancellationToken>,
}

impl OrchestratorState {
    pub fn is_current(&self, job_id: &JobId) -> bool {
        self.current.as_ref().is_some_and(|job| &job.id == job_id)
    }

    /// The current job if it is `job_id`.
    pub fn current_mut(&mut self, job_id: &JobId) -> Option<&mut Job> {
        self.current.as_mut().filter(|job| &job.id == job_id)
    }

    /// Insert or replace `job` at the front of history, keeping at most
    /// `limit` entries. Cached assets of jobs that fall out are dropped
    /// unless the job is still current.
    pub fn record_history(&mut self, job: Job, limit: usize) {
        self.history.retain(|existing| existing.id != job.id);
        self.history.push_front(job);
        if self.history.len() <= limit {
            return;
        }
        for evicted in self.history.split_off(limit) {
            if !self.is_current(&evicted.id) {
                self.assets.remove(&evicted.id);
            }
        }
    }

    pub fn history_vec(&self) -> Vec<Job> {
        self.history.iter().cloned().collect()
    }

    pub fn merge_assets(
        &mut self,
        job_id: &JobId,
        incoming: impl IntoIterator<Item = ResultAsset>,
    ) -> usize {
        merge_assets(self.assets.entry(job_id.clone()).or_default(), incoming)
    }

    pub fn asset_count(&self, job_id: &JobId) -> usize {
        self.assets.get(job_id).map_or(0, Vec::len)
    }

    /// Stop the active poll loop, if any.
    pub(crate) fn stop_polling(&mut self) {
        if let Some(token) = self.poll_token.take() {
            token.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Collaborators and state shared by the controller and its tasks.
pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn ComputeBackend>,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) persistence: Persistence,
    pub(crate) events: EventBus,
    pub(crate) policy: PollPolicy,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) state: RwLock<OrchestratorState>,
    /// Poll loops, reconciliation sweeps and chunk refreshes.
    pub(crate) tasks: TaskTracker,
    /// Parent of every poll token. Cancelled when the orchestrator shuts
    /// down or is dropped.
    pub(crate) shutdown: CancellationToken,
    /// Serializes writes to the persisted mirror.
    persist_gate: Mutex<()>,
}

impl Shared {
    pub(crate) fn new(
        backend: Arc<dyn ComputeBackend>,
        store: Arc<dyn ObjectStore>,
        persistence: Persistence,
        policy: PollPolicy,
        clock: Arc<dyn Clock>,
        event_capacity: usize,
    ) -> Self {
        Self {
            backend,
            store,
            persistence,
            events: EventBus::new(event_capacity),
            policy,
            clock,
            state: RwLock::new(OrchestratorState::default()),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            persist_gate: Mutex::new(()),
        }
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Continue-polling token for a new loop, stopped by shutdown too.
    pub(crate) fn poll_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub(crate) fn emit(&self, event: OrchestratorEvent) {
        self.events.publish(event);
    }

    /// Mirror the in-flight record for `job_id`.
    ///
    /// Writes the state as it is now, not as the caller last saw it, and
    /// writes nothing once the job is terminal or no longer current, or
    /// after shutdown. A failed write is logged; polling carries on.
    pub(crate) async fn persist_in_flight(&self, job_id: &JobId) {
        let _gate = self.persist_gate.lock().await;
        if self.shutdown.is_cancelled() {
            return;
        }
        let (job, progress) = {
            let state = self.state.read().await;
            match &state.current {
                Some(job) if &job.id == job_id && state.is_generating && !job.is_terminal() => {
                    (job.clone(), state.progress.clone())
                }
                _ => return,
            }
        };
        if let Err(e) = self.persistence.save_in_flight(&job, &progress, true).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to persist in-flight state");
        }
    }

    /// Drop the in-flight keys while no job is current.
    pub(crate) async fn clear_idle_in_flight(&self) {
        let _gate = self.persist_gate.lock().await;
        if self.state.read().await.current.is_some() {
            return;
        }
        if let Err(e) = self.persistence.clear_in_flight().await {
            tracing::error!(error = %e, "Failed to clear in-flight state");
        }
    }

    /// Terminal side effects for a job that just transitioned.
    ///
    /// Clears the in-flight keys (unless a newer job owns them), persists
    /// history and emits the job's single terminal event. Callers invoke
    /// this only when their own transition succeeded.
    pub(crate) async fn settle(&self, job: &Job) {
        {
            let _gate = self.persist_gate.lock().await;
            let (owns_keys, history) = {
                let state = self.state.read().await;
                let owns = state.current.as_ref().map_or(true, |c| c.id == job.id);
                (owns, state.history_vec())
            };
            if owns_keys {
                if let Err(e) = self.persistence.clear_in_flight().await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to clear in-flight state");
                }
            }
            if let Err(e) = self.persistence.save_history(&history).await {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to persist job history");
            }
        }

        if let Some(event) = OrchestratorEvent::for_terminal_job(job) {
            tracing::info!(
                job_id = %job.id,
                status = job.status.name(),
                error = job.error.as_deref().unwrap_or(""),
                "Job settled",
            );
            self.emit(event);
        }
    }
}
