//! Seams between the orchestrator and its external collaborators.
//!
//! The orchestrator only ever talks to a [`ComputeBackend`] and an
//! [`ObjectStore`]. [`ComputeApi`] is the production compute backend;
//! stores live in [`crate::store`].

use async_trait::async_trait;

use atelier_core::asset::ResultAsset;
use atelier_core::types::JobId;

use crate::api::{ComputeApi, ComputeApiError};
use crate::description::JobDescription;
use crate::messages::StatusMessage;
use crate::store::StoreError;

/// The remote service that executes generation jobs.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Create a job. Fails with a validation or transport error.
    async fn submit_job(&self, description: &JobDescription) -> Result<JobId, ComputeApiError>;

    /// Primary status query. May return a chunk delivery instead of a
    /// status report.
    async fn get_job_status(&self, job_id: &JobId) -> Result<StatusMessage, ComputeApiError>;

    /// Best-effort cancellation.
    async fn cancel_job(&self, job_id: &JobId) -> Result<(), ComputeApiError>;

    /// Alternate status source, used only after the primary query failed.
    async fn fallback_status(&self, job_id: &JobId) -> Result<StatusMessage, ComputeApiError>;

    /// Nudge the backend to finalize and publish a finished job's outputs.
    async fn request_flush(&self, job_id: &JobId) -> Result<(), ComputeApiError>;
}

/// Durable storage for produced artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Idempotent upsert keyed by `(job_id, filename)`.
    async fn put_asset(
        &self,
        job_id: &JobId,
        filename: &str,
        storage_hint: Option<&str>,
        payload: &[u8],
    ) -> Result<ResultAsset, StoreError>;

    /// Every artifact currently stored for `job_id`.
    async fn list_assets(&self, job_id: &JobId) -> Result<Vec<ResultAsset>, StoreError>;
}

#[async_trait]
impl ComputeBackend for ComputeApi {
    async fn submit_job(&self, description: &JobDescription) -> Result<JobId, ComputeApiError> {
        self.submit(description).await
    }

    async fn get_job_status(&self, job_id: &JobId) -> Result<StatusMessage, ComputeApiError> {
        self.status(job_id).await
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<(), ComputeApiError> {
        self.cancel(job_id).await
    }

    async fn fallback_status(&self, job_id: &JobId) -> Result<StatusMessage, ComputeApiError> {
        self.history(job_id).await
    }

    async fn request_flush(&self, job_id: &JobId) -> Result<(), ComputeApiError> {
        self.flush(job_id).await
    }
}
