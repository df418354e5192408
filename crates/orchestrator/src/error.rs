use atelier_compute::api::ComputeApiError;
use atelier_core::error::CoreError;

/// Errors surfaced synchronously by [`crate::Orchestrator`] operations.
///
/// Failures that happen while a job is polling never show up here; they
/// are absorbed by the poll loop and reported as terminal events.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Parameters or policy failed validation. Nothing was sent.
    #[error(transparent)]
    Invalid(#[from] CoreError),

    /// The backend refused or never received the job.
    #[error("Job submission failed: {0}")]
    Submit(#[source] ComputeApiError),

    /// There is no pending or processing job to act on.
    #[error("No active job")]
    NotActive,
}
