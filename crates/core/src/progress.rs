//! UI-facing progress projection of the most recent poll response.
//!
//! A [`ProgressSnapshot`] is overwritten in place on every tick. It holds
//! no identity and no history.

use serde::{Deserialize, Serialize};

use crate::job::{Job, MAX_PROGRESS};

/// Stage label shown before the first poll response arrives.
pub const STAGE_QUEUED: &str = "queued";

/// Stage label of the neutral view shown after a cancellation.
pub const STAGE_CANCELLED: &str = "cancelled";

/// Stage label once the backend reports completion.
pub const STAGE_COMPLETED: &str = "completed";

/// Denormalized view of the latest status report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub progress: u8,
    pub stage: Option<String>,
    pub message: Option<String>,
    /// Seconds since submission.
    pub elapsed_time: u64,
    /// Seconds, when known.
    pub estimated_time_remaining: Option<u64>,
    /// Images produced so far in a batch job.
    pub image_count: Option<u32>,
    pub total_images: Option<u32>,
}

impl ProgressSnapshot {
    /// The snapshot rendered immediately after submission, before any
    /// poll response.
    pub fn initial(estimated_secs: u64, total_images: u32) -> Self {
        Self {
            progress: 0,
            stage: Some(STAGE_QUEUED.to_string()),
            message: Some("Waiting for the compute backend".to_string()),
            elapsed_time: 0,
            estimated_time_remaining: Some(estimated_secs),
            image_count: Some(0),
            total_images: Some(total_images),
        }
    }

    /// Neutral view after a cancellation.
    pub fn cancelled() -> Self {
        Self {
            stage: Some(STAGE_CANCELLED.to_string()),
            message: Some("Generation cancelled".to_string()),
            ..Self::default()
        }
    }

    /// Project the current job state, preferring the backend's ETA and
    /// falling back to a linear extrapolation from elapsed time.
    pub fn from_job(
        job: &Job,
        elapsed_secs: u64,
        reported_eta: Option<u64>,
        image_count: Option<u32>,
        total_images: Option<u32>,
    ) -> Self {
        Self {
            progress: job.progress,
            stage: job.stage.clone(),
            message: job.message.clone(),
            elapsed_time: elapsed_secs,
            estimated_time_remaining: reported_eta
                .or_else(|| estimate_remaining(elapsed_secs, job.progress)),
            image_count,
            total_images,
        }
    }

    /// Final snapshot for a completed job.
    pub fn completed(elapsed_secs: u64, image_count: Option<u32>) -> Self {
        Self {
            progress: MAX_PROGRESS,
            stage: Some(STAGE_COMPLETED.to_string()),
            message: Some("Generation complete".to_string()),
            elapsed_time: elapsed_secs,
            estimated_time_remaining: Some(0),
            image_count,
            total_images: image_count,
        }
    }
}

/// Linear remaining-time estimate. `None` until some progress is known.
pub fn estimate_remaining(elapsed_secs: u64, progress: u8) -> Option<u64> {
    if progress == 0 {
        return None;
    }
    if progress >= MAX_PROGRESS {
        return Some(0);
    }
    let progress = u64::from(progress);
    Some(elapsed_secs * (u64::from(MAX_PROGRESS) - progress) / progress)
}
