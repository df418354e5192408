//! Compute backend status payloads and parser.
//!
//! The status endpoint answers with JSON tagged by a `"status"` field.
//! The same endpoint may return a normal status report or a one-off
//! chunk delivery (`image_ready`). This module decodes both into the
//! closed [`StatusMessage`] enum so the poll loop never probes optional
//! fields.

use base64::Engine;
use serde::Deserialize;

use atelier_core::job::MAX_PROGRESS;

/// All known status payloads.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusMessage {
    /// Accepted but not yet started.
    Pending(StatusReport),

    /// Actively running.
    Processing(StatusReport),

    /// One result was produced mid-job and is delivered inline.
    ImageReady(ChunkPayload),

    /// Finished. May carry the whole batch of results.
    Completed(CompletedReport),

    /// The backend gave up on the job.
    Failed(FailedReport),
}

/// Payload for `pending` / `processing` messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusReport {
    /// Percentage; some backends report fractional values.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Seconds, as measured by the backend.
    #[serde(default)]
    pub estimated_time_remaining: Option<u64>,
    #[serde(default)]
    pub image_count: Option<u32>,
    #[serde(default)]
    pub total_images: Option<u32>,
}

impl StatusReport {
    /// Reported progress clamped to `0..=100`.
    pub fn percent(&self) -> Option<u8> {
        self.progress.map(clamp_percent)
    }
}

/// Payload for `image_ready` messages and for each entry of a completed
/// batch.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkPayload {
    pub filename: String,
    /// Subfolder / output type the backend wrote the image under.
    #[serde(default, alias = "subfolder")]
    pub storage_hint: Option<String>,
    /// Base64-encoded image bytes.
    pub data: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub image_count: Option<u32>,
    #[serde(default)]
    pub total_images: Option<u32>,
}

impl ChunkPayload {
    /// Decode the inline image bytes.
    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(self.data.as_bytes())
    }

    pub fn percent(&self) -> Option<u8> {
        self.progress.map(clamp_percent)
    }
}

/// Payload for `completed` messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletedReport {
    #[serde(default)]
    pub images: Vec<ChunkPayload>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload for `failed` messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FailedReport {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl FailedReport {
    /// Best available error text.
    pub fn error_text(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "generation failed".to_string())
    }
}

fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, f64::from(MAX_PROGRESS)) as u8
}

/// Parse a status response body into a typed message.
///
/// Returns `Err` for malformed JSON or an unknown `status` value.
pub fn parse_status(text: &str) -> Result<StatusMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_processing_message() {
        let json = r#"{"status":"processing","progress":35.4,"stage":"sampling","message":"step 12/30","estimated_time_remaining":18}"#;
        let msg = parse_status(json).unwrap();
        match msg {
            StatusMessage::Processing(report) => {
                assert_eq!(report.percent(), Some(35));
                assert_eq!(report.stage.as_deref(), Some("sampling"));
                assert_eq!(report.estimated_time_remaining, Some(18));
            }
            other => panic!("Expected Processing, got {other:?}"),
        }
    }

    #[test]
    fn parse_pending_without_fields() {
        let msg = parse_status(r#"{"status":"pending"}"#).unwrap();
        assert_matches!(msg, StatusMessage::Pending(report) if report.progress.is_none());
    }

    #[test]
    fn parse_image_ready_with_subfolder_alias() {
        let json = r#"{"status":"image_ready","filename":"out_001.png","subfolder":"batch","data":"aGVsbG8=","image_count":1,"total_images":4}"#;
        let msg = parse_status(json).unwrap();
        match msg {
            StatusMessage::ImageReady(chunk) => {
                assert_eq!(chunk.filename, "out_001.png");
                assert_eq!(chunk.storage_hint.as_deref(), Some("batch"));
                assert_eq!(chunk.decode_data().unwrap(), b"hello");
                assert_eq!(chunk.total_images, Some(4));
            }
            other => panic!("Expected ImageReady, got {other:?}"),
        }
    }

    #[test]
    fn parse_completed_with_batch() {
        let json = r#"{"status":"completed","images":[{"filename":"a.png","data":""},{"filename":"b.png","data":""}]}"#;
        let msg = parse_status(json).unwrap();
        assert_matches!(msg, StatusMessage::Completed(report) if report.images.len() == 2);
    }

    #[test]
    fn parse_completed_without_images() {
        let msg = parse_status(r#"{"status":"completed"}"#).unwrap();
        assert_matches!(msg, StatusMessage::Completed(report) if report.images.is_empty());
    }

    #[test]
    fn failed_error_text_falls_back_to_message() {
        let msg = parse_status(r#"{"status":"failed","message":"worker crashed"}"#).unwrap();
        match msg {
            StatusMessage::Failed(report) => assert_eq!(report.error_text(), "worker crashed"),
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn progress_is_clamped() {
        let report = StatusReport {
            progress: Some(180.0),
            ..Default::default()
        };
        assert_eq!(report.percent(), Some(100));
        let report = StatusReport {
            progress: Some(-3.0),
            ..Default::default()
        };
        assert_eq!(report.percent(), Some(0));
    }

    #[test]
    fn invalid_base64_is_an_error() {
        let json = r#"{"status":"image_ready","filename":"x.png","data":"***"}"#;
        let StatusMessage::ImageReady(chunk) = parse_status(json).unwrap() else {
            panic!("Expected ImageReady");
        };
        assert!(chunk.decode_data().is_err());
    }

    #[test]
    fn parse_unknown_status_returns_error() {
        assert!(parse_status(r#"{"status":"teleporting"}"#).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_status("not json at all").is_err());
    }
}
