//! Produced artifacts and the client-side result cache merge.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

/// Longest accepted result filename.
pub const MAX_FILENAME_LEN: usize = 255;

/// One produced artifact, identified by `(job_id, filename)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultAsset {
    pub job_id: JobId,
    pub filename: String,
    /// Backend-provided placement hint (subfolder, output type).
    pub storage_hint: Option<String>,
    /// Where the object store placed the artifact (path or URL).
    pub location: String,
    pub size_bytes: Option<u64>,
    pub stored_at: Timestamp,
}

/// Merge `incoming` into `cache`, upserting by filename.
///
/// Safe to repeat: merging the same asset twice leaves a single entry.
/// A listing that carries no storage hint keeps the one already cached.
/// Returns the number of entries that were newly added.
pub fn merge_assets(cache: &mut Vec<ResultAsset>, incoming: impl IntoIterator<Item = ResultAsset>) -> usize {
    let mut added = 0;
    for asset in incoming {
        match cache.iter_mut().find(|a| a.filename == asset.filename) {
            Some(existing) => {
                let hint = asset.storage_hint.clone().or_else(|| existing.storage_hint.take());
                *existing = ResultAsset { storage_hint: hint, ..asset };
            }
            None => {
                cache.push(asset);
                added += 1;
            }
        }
    }
    cache.sort_by(|a, b| a.filename.cmp(&b.filename));
    added
}

/// Reject filenames that could escape the job's directory or be hidden
/// from a store listing.
pub fn validate_filename(filename: &str) -> Result<(), CoreError> {
    if filename.trim().is_empty() {
        return Err(CoreError::Validation("filename must not be empty".into()));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(CoreError::Validation(format!(
            "filename exceeds {MAX_FILENAME_LEN} characters"
        )));
    }
    if filename.contains('/') || filename.contains('\\') || filename == "." || filename == ".." {
        return Err(CoreError::Validation(format!(
            "filename '{filename}' must not contain path components"
        )));
    }
    if filename.starts_with('.') {
        return Err(CoreError::Validation(format!(
            "filename '{filename}' must not start with '.'"
        )));
    }
    if filename.chars().any(char::is_control) {
        return Err(CoreError::Validation(
            "filename must not contain control characters".into(),
        ));
    }
    Ok(())
}
