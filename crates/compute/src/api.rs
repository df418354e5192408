//! REST API client for the compute backend.
//!
//! Wraps the backend HTTP API (reference upload, job submission, status,
//! fallback history, cancellation and flush) using [`reqwest`].

use serde::Deserialize;

use atelier_core::job::FailureKind;
use atelier_core::types::JobId;

use crate::description::JobDescription;
use crate::messages::{parse_status, StatusMessage};

/// HTTP client for a single compute backend.
pub struct ComputeApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Backend-assigned identifier for the job.
    pub job_id: String,
}

/// Response returned by `POST /upload/image`.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    /// Name under which the backend stored the image.
    pub name: String,
    #[serde(default)]
    pub subfolder: Option<String>,
}

/// Errors from the compute REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ComputeApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Compute API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body could not be decoded.
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ComputeApiError {
    /// Map onto the job failure taxonomy. A 404 means the job is not yet
    /// visible to the status path; everything else is a transport problem.
    pub fn classify(&self) -> FailureKind {
        match self {
            Self::ApiError { status: 404, .. } => FailureKind::NotFoundTransient,
            _ => FailureKind::Transport,
        }
    }

    /// True for request-shape errors the caller must fix before retrying.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ApiError { status: 400 | 422, .. })
    }
}

impl ComputeApi {
    /// Create a new API client for a compute backend.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Upload a reference image.
    ///
    /// Sends a multipart `POST /upload/image`. The returned name is what a
    /// [`JobDescription`] refers to.
    pub async fn upload_reference(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, ComputeApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Submit a job for execution.
    ///
    /// Sends `POST /jobs` and returns the backend-assigned job id.
    pub async fn submit(&self, description: &JobDescription) -> Result<JobId, ComputeApiError> {
        let response = self
            .client
            .post(format!("{}/jobs", self.api_url))
            .json(description)
            .send()
            .await?;

        let body: SubmitResponse = Self::parse_response(response).await?;
        Ok(JobId::new(body.job_id))
    }

    /// Query job status via `GET /jobs/{id}`.
    pub async fn status(&self, job_id: &JobId) -> Result<StatusMessage, ComputeApiError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.api_url, job_id))
            .send()
            .await?;

        Self::parse_status_response(response).await
    }

    /// Query job status through the execution history, `GET /history/{id}`.
    ///
    /// Used only when the primary status path fails.
    pub async fn history(&self, job_id: &JobId) -> Result<StatusMessage, ComputeApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, job_id))
            .send()
            .await?;

        Self::parse_status_response(response).await
    }

    /// Ask the backend to stop a queued or running job.
    pub async fn cancel(&self, job_id: &JobId) -> Result<(), ComputeApiError> {
        let response = self
            .client
            .post(format!("{}/jobs/{}/cancel", self.api_url, job_id))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Ask the backend to flush / finalize outputs of a finished job.
    pub async fn flush(&self, job_id: &JobId) -> Result<(), ComputeApiError> {
        let response = self
            .client
            .post(format!("{}/jobs/{}/flush", self.api_url, job_id))
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComputeApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComputeApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComputeApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComputeApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Decode a status body once, at the transport boundary.
    async fn parse_status_response(
        response: reqwest::Response,
    ) -> Result<StatusMessage, ComputeApiError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        Ok(parse_status(&text)?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComputeApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: u16) -> ComputeApiError {
        ComputeApiError::ApiError {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn not_found_is_transient() {
        assert_eq!(api_error(404).classify(), FailureKind::NotFoundTransient);
    }

    #[test]
    fn server_errors_are_transport() {
        assert_eq!(api_error(500).classify(), FailureKind::Transport);
        assert_eq!(api_error(503).classify(), FailureKind::Transport);
    }

    #[test]
    fn decode_errors_are_transport() {
        let err = ComputeApiError::from(serde_json::from_str::<u8>("x").unwrap_err());
        assert_eq!(err.classify(), FailureKind::Transport);
    }

    #[test]
    fn bad_request_is_validation() {
        assert!(api_error(400).is_validation());
        assert!(api_error(422).is_validation());
        assert!(!api_error(500).is_validation());
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ComputeApi::new("http://localhost:8188/".into());
        assert_eq!(api.api_url(), "http://localhost:8188");
    }
}
