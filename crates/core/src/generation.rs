//! Generation request parameters, validation and the initial ETA heuristic.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits and defaults
// ---------------------------------------------------------------------------

/// Largest batch the backend accepts in one job.
pub const MAX_IMAGE_COUNT: u32 = 8;
/// Smallest accepted edge length in pixels.
pub const MIN_DIMENSION: u32 = 256;
/// Largest accepted edge length in pixels.
pub const MAX_DIMENSION: u32 = 2048;
/// Edge lengths must be a multiple of this (latent grid).
pub const DIMENSION_STEP: u32 = 8;
/// Maximum sampler steps.
pub const MAX_STEPS: u32 = 150;
/// Maximum prompt length in characters.
pub const MAX_PROMPT_LEN: usize = 4000;

pub const DEFAULT_DIMENSION: u32 = 1024;
pub const DEFAULT_STEPS: u32 = 30;

// ---------------------------------------------------------------------------
// ETA heuristic
// ---------------------------------------------------------------------------

/// Fixed queueing / model-load overhead in seconds.
const BASE_OVERHEAD_SECS: f64 = 20.0;
/// Seconds for one 1024x1024 image at [`DEFAULT_STEPS`].
const SECS_PER_REFERENCE_IMAGE: f64 = 15.0;
const REFERENCE_PIXELS: f64 = (DEFAULT_DIMENSION * DEFAULT_DIMENSION) as f64;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// User-supplied parameters for one generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Identifier of the already-uploaded reference image.
    pub reference_asset: String,
    /// Where results should be filed (gallery, folder, project).
    pub destination: String,
    pub image_count: u32,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: Option<u64>,
}

impl GenerationParams {
    /// Parameters with default size, steps and a single image.
    pub fn new(
        prompt: impl Into<String>,
        reference_asset: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            reference_asset: reference_asset.into(),
            destination: destination.into(),
            image_count: 1,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            steps: DEFAULT_STEPS,
            seed: None,
        }
    }

    /// Check the submission preconditions.
    pub fn validate(&self) -> Result<(), CoreError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(CoreError::Validation("prompt must not be empty".into()));
        }
        if prompt.chars().count() > MAX_PROMPT_LEN {
            return Err(CoreError::Validation(format!(
                "prompt exceeds {MAX_PROMPT_LEN} characters"
            )));
        }
        if self.reference_asset.trim().is_empty() {
            return Err(CoreError::Validation(
                "a reference asset must be uploaded before submitting".into(),
            ));
        }
        if self.destination.trim().is_empty() {
            return Err(CoreError::Validation(
                "a destination for results must be selected".into(),
            ));
        }
        if self.image_count == 0 || self.image_count > MAX_IMAGE_COUNT {
            return Err(CoreError::Validation(format!(
                "image_count must be between 1 and {MAX_IMAGE_COUNT}, got {}",
                self.image_count
            )));
        }
        validate_dimension("width", self.width)?;
        validate_dimension("height", self.height)?;
        if self.steps == 0 || self.steps > MAX_STEPS {
            return Err(CoreError::Validation(format!(
                "steps must be between 1 and {MAX_STEPS}, got {}",
                self.steps
            )));
        }
        Ok(())
    }
}

fn validate_dimension(name: &str, value: u32) -> Result<(), CoreError> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
        return Err(CoreError::Validation(format!(
            "{name} must be between {MIN_DIMENSION} and {MAX_DIMENSION}, got {value}"
        )));
    }
    if value % DIMENSION_STEP != 0 {
        return Err(CoreError::Validation(format!(
            "{name} must be a multiple of {DIMENSION_STEP}, got {value}"
        )));
    }
    Ok(())
}

/// Rough wall-clock estimate for a job, used for the first progress
/// snapshot before the backend reports anything.
pub fn estimate_initial_seconds(params: &GenerationParams) -> u64 {
    let pixels = f64::from(params.width) * f64::from(params.height);
    let per_image = SECS_PER_REFERENCE_IMAGE
        * (pixels / REFERENCE_PIXELS)
        * (f64::from(params.steps) / f64::from(DEFAULT_STEPS));
    (BASE_OVERHEAD_SECS + per_image * f64::from(params.image_count.max(1))).round() as u64
}
