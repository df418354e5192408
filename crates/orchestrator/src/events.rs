//! Orchestrator notifications, fanned out over a `tokio::sync::broadcast`
//! channel.
//!
//! Presentation layers subscribe through [`crate::Orchestrator::subscribe`].
//! Every job id receives exactly one terminal event: [`Completed`],
//! [`Failed`], [`Cancelled`], [`TimedOut`], [`Reset`] or [`Superseded`].
//!
//! [`Completed`]: OrchestratorEvent::Completed
//! [`Failed`]: OrchestratorEvent::Failed
//! [`Cancelled`]: OrchestratorEvent::Cancelled
//! [`TimedOut`]: OrchestratorEvent::TimedOut
//! [`Reset`]: OrchestratorEvent::Reset
//! [`Superseded`]: OrchestratorEvent::Superseded

use serde::Serialize;
use tokio::sync::broadcast;

use atelier_core::job::{Job, TerminalOutcome};
use atelier_core::progress::ProgressSnapshot;
use atelier_core::types::JobId;

// ---------------------------------------------------------------------------
// OrchestratorEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// The backend accepted a new job.
    Submitted { job_id: JobId },

    /// A persisted in-flight job was picked up again after a restart.
    Resumed { job_id: JobId },

    /// A fresh progress snapshot was applied.
    Progress {
        job_id: JobId,
        snapshot: ProgressSnapshot,
    },

    /// A chunk was durably stored.
    AssetStored { job_id: JobId, filename: String },

    /// A chunk could not be stored. Non-fatal; reconciliation compensates.
    AssetPersistFailed {
        job_id: JobId,
        filename: String,
        error: String,
    },

    Completed { job_id: JobId },

    /// The backend reported failure.
    Failed { job_id: JobId, error: String },

    Cancelled { job_id: JobId },

    /// The attempt budget ran out.
    TimedOut { job_id: JobId },

    /// The job was force-terminated locally.
    Reset { job_id: JobId },

    /// Polling stopped because a newer submission replaced the job.
    Superseded { job_id: JobId },

    /// Post-completion reconciliation observed the result set.
    ResultsReconciled {
        job_id: JobId,
        asset_count: usize,
        attempts: u32,
    },

    /// Reconciliation gave up with zero visible results. The job stays
    /// completed; results can be re-requested.
    ResultsUnavailable { job_id: JobId, attempts: u32 },
}

impl OrchestratorEvent {
    /// The terminal notification for a job that just reached `outcome`.
    pub fn terminal(job_id: JobId, outcome: TerminalOutcome) -> Self {
        match outcome {
            TerminalOutcome::Completed => Self::Completed { job_id },
            TerminalOutcome::BackendFailure(error) => Self::Failed { job_id, error },
            TerminalOutcome::UserCancelled => Self::Cancelled { job_id },
            TerminalOutcome::TimedOut => Self::TimedOut { job_id },
            TerminalOutcome::Reset => Self::Reset { job_id },
            TerminalOutcome::Superseded => Self::Superseded { job_id },
        }
    }

    /// Terminal notification for a job record, if it is terminal.
    pub fn for_terminal_job(job: &Job) -> Option<Self> {
        job.outcome()
            .map(|outcome| Self::terminal(job.id.clone(), outcome))
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Submitted { job_id }
            | Self::Resumed { job_id }
            | Self::Progress { job_id, .. }
            | Self::AssetStored { job_id, .. }
            | Self::AssetPersistFailed { job_id, .. }
            | Self::Completed { job_id }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id }
            | Self::TimedOut { job_id }
            | Self::Reset { job_id }
            | Self::Superseded { job_id }
            | Self::ResultsReconciled { job_id, .. }
            | Self::ResultsUnavailable { job_id, .. } => job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. }
                | Self::Failed { .. }
                | Self::Cancelled { .. }
                | Self::TimedOut { .. }
                | Self::Reset { .. }
                | Self::Superseded { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`OrchestratorEvent`]s to any number of subscribers.
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Slow receivers past `capacity` observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: OrchestratorEvent) {
        tracing::debug!(job_id = %event.job_id(), ?event, "Orchestrator event");
        // A send error only means nobody is listening.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(OrchestratorEvent::Submitted {
            job_id: JobId::new("j1"),
        });
        let event = rx.recv().await.unwrap();
        assert_matches!(event, OrchestratorEvent::Submitted { job_id } if job_id.as_str() == "j1");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        EventBus::new(4).publish(OrchestratorEvent::Reset {
            job_id: JobId::new("j"),
        });
    }

    #[test]
    fn cancelled_job_maps_to_cancelled_event() {
        let mut job = Job::pending(JobId::new("j2"), Utc::now());
        assert!(OrchestratorEvent::for_terminal_job(&job).is_none());
        job.cancel(Utc::now());
        let event = OrchestratorEvent::for_terminal_job(&job).unwrap();
        assert_matches!(event, OrchestratorEvent::Cancelled { .. });
        assert!(event.is_terminal());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(OrchestratorEvent::ResultsUnavailable {
            job_id: JobId::new("j3"),
            attempts: 5,
        })
        .unwrap();
        assert_eq!(json["type"], "results_unavailable");
        assert_eq!(json["job_id"], "j3");
    }
}
