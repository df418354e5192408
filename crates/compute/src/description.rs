//! Backend job description built from user parameters.

use serde::Serialize;

use atelier_core::generation::GenerationParams;

/// Body of the job-creation request.
#[derive(Debug, Clone, Serialize)]
pub struct JobDescription {
    /// Per-submission correlation id, echoed back in backend logs.
    pub client_id: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Name of the previously uploaded reference image.
    pub reference_image: String,
    pub destination: String,
    pub batch_size: u32,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl JobDescription {
    /// Render validated parameters into the backend's request shape.
    pub fn from_params(params: &GenerationParams) -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            prompt: params.prompt.trim().to_string(),
            negative_prompt: params
                .negative_prompt
                .as_ref()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            reference_image: params.reference_asset.clone(),
            destination: params.destination.clone(),
            batch_size: params.image_count,
            width: params.width,
            height: params.height,
            steps: params.steps,
            seed: params.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_trims_prompt_and_drops_blank_negative() {
        let mut params = GenerationParams::new("  a fox  ", "ref.png", "gallery");
        params.negative_prompt = Some("   ".into());
        let desc = JobDescription::from_params(&params);
        assert_eq!(desc.prompt, "a fox");
        assert!(desc.negative_prompt.is_none());

        let json = serde_json::to_value(&desc).unwrap();
        assert!(json.get("negative_prompt").is_none());
        assert_eq!(json["reference_image"], "ref.png");
        assert_eq!(json["batch_size"], 1);
    }

    #[test]
    fn each_description_gets_a_fresh_client_id() {
        let params = GenerationParams::new("a fox", "ref.png", "gallery");
        let a = JobDescription::from_params(&params);
        let b = JobDescription::from_params(&params);
        assert_ne!(a.client_id, b.client_id);
    }
}
