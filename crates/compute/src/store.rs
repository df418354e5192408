//! Result object stores.
//!
//! [`FsObjectStore`] keeps artifacts under `<root>/<job_id>/<filename>`;
//! [`MemoryObjectStore`] keeps them in a map. Both implement
//! [`ObjectStore`] with upsert semantics so redelivered chunks never
//! produce duplicates.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use atelier_core::asset::{validate_filename, ResultAsset};
use atelier_core::error::CoreError;
use atelier_core::types::{JobId, Timestamp};

use crate::backend::ObjectStore;

/// Errors from an object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

/// Local-filesystem result store.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_id: &JobId) -> Result<PathBuf, StoreError> {
        // Job ids come from the backend and end up as a directory name.
        validate_filename(job_id.as_str())?;
        Ok(self.root.join(job_id.as_str()))
    }

    async fn describe(
        job_id: &JobId,
        path: &Path,
        filename: &str,
        storage_hint: Option<&str>,
    ) -> Result<ResultAsset, StoreError> {
        let meta = tokio::fs::metadata(path).await?;
        let stored_at: Timestamp = meta.modified().map(Timestamp::from).unwrap_or_else(|_| Utc::now());
        Ok(ResultAsset {
            job_id: job_id.clone(),
            filename: filename.to_string(),
            storage_hint: storage_hint.map(str::to_string),
            location: path.to_string_lossy().into_owned(),
            size_bytes: Some(meta.len()),
            stored_at,
        })
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_asset(
        &self,
        job_id: &JobId,
        filename: &str,
        storage_hint: Option<&str>,
        payload: &[u8],
    ) -> Result<ResultAsset, StoreError> {
        validate_filename(filename)?;
        let dir = self.job_dir(job_id)?;
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(filename);

        // Same-content redelivery is a no-op.
        if let Ok(existing) = tokio::fs::read(&path).await {
            if existing == payload {
                tracing::debug!(job_id = %job_id, filename, "Asset already stored, skipping write");
                return Self::describe(job_id, &path, filename, storage_hint).await;
            }
        }

        let tmp = dir.join(format!(".{filename}.tmp"));
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(
            job_id = %job_id,
            filename,
            size_bytes = payload.len(),
            "Asset written",
        );
        Self::describe(job_id, &path, filename, storage_hint).await
    }

    async fn list_assets(&self, job_id: &JobId) -> Result<Vec<ResultAsset>, StoreError> {
        let dir = self.job_dir(job_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut assets = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            assets.push(Self::describe(job_id, &entry.path(), &name, None).await?);
        }
        assets.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(assets)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-process result store. Useful for dry runs and tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<JobId, BTreeMap<String, (ResultAsset, Vec<u8>)>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes for one asset.
    pub async fn payload(&self, job_id: &JobId, filename: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(job_id)
            .and_then(|files| files.get(filename))
            .map(|(_, bytes)| bytes.clone())
    }

    /// Total number of stored objects across all jobs.
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_asset(
        &self,
        job_id: &JobId,
        filename: &str,
        storage_hint: Option<&str>,
        payload: &[u8],
    ) -> Result<ResultAsset, StoreError> {
        validate_filename(filename)?;
        let asset = ResultAsset {
            job_id: job_id.clone(),
            filename: filename.to_string(),
            storage_hint: storage_hint.map(str::to_string),
            location: format!("memory://{job_id}/{filename}"),
            size_bytes: Some(payload.len() as u64),
            stored_at: Utc::now(),
        };
        self.objects
            .write()
            .await
            .entry(job_id.clone())
            .or_default()
            .insert(filename.to_string(), (asset.clone(), payload.to_vec()));
        Ok(asset)
    }

    async fn list_assets(&self, job_id: &JobId) -> Result<Vec<ResultAsset>, StoreError> {
        Ok(self
            .objects
            .read()
            .await
            .get(job_id)
            .map(|files| files.values().map(|(asset, _)| asset.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn fs_put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let job = JobId::new("job-1");

        store.put_asset(&job, "a.png", Some("output"), b"pixels").await.unwrap();
        store.put_asset(&job, "a.png", Some("output"), b"pixels").await.unwrap();

        let listed = store.list_assets(&job).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size_bytes, Some(6));
    }

    #[tokio::test]
    async fn fs_put_overwrites_changed_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let job = JobId::new("job-1");

        store.put_asset(&job, "a.png", None, b"v1").await.unwrap();
        let asset = store.put_asset(&job, "a.png", None, b"version2").await.unwrap();

        assert_eq!(asset.size_bytes, Some(8));
        assert_eq!(std::fs::read(dir.path().join("job-1/a.png")).unwrap(), b"version2");
    }

    #[tokio::test]
    async fn fs_list_unknown_job_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.list_assets(&JobId::new("nope")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fs_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let result = store.put_asset(&JobId::new("job"), "../x.png", None, b"").await;
        assert_matches!(result, Err(StoreError::Invalid(_)));

        let result = store.list_assets(&JobId::new("../other")).await;
        assert_matches!(result, Err(StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn hidden_filenames_rejected_by_both_stores() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FsObjectStore::new(dir.path());
        let memory = MemoryObjectStore::new();
        let job = JobId::new("job-1");

        let result = fs.put_asset(&job, ".hidden.png", None, b"x").await;
        assert_matches!(result, Err(StoreError::Invalid(_)));
        let result = memory.put_asset(&job, ".hidden.png", None, b"x").await;
        assert_matches!(result, Err(StoreError::Invalid(_)));

        assert!(fs.list_assets(&job).await.unwrap().is_empty());
        assert_eq!(memory.object_count().await, 0);
    }

    #[tokio::test]
    async fn fs_list_skips_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let job = JobId::new("job-1");
        store.put_asset(&job, "b.png", None, b"b").await.unwrap();
        store.put_asset(&job, "a.png", None, b"a").await.unwrap();
        std::fs::write(dir.path().join("job-1/.c.png.tmp"), b"partial").unwrap();

        let names: Vec<_> = store
            .list_assets(&job)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.filename)
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn memory_put_upserts() {
        let store = MemoryObjectStore::new();
        let job = JobId::new("j");
        store.put_asset(&job, "a.png", None, b"1").await.unwrap();
        store.put_asset(&job, "a.png", None, b"22").await.unwrap();
        store.put_asset(&job, "b.png", None, b"3").await.unwrap();

        assert_eq!(store.object_count().await, 2);
        assert_eq!(store.payload(&job, "a.png").await.unwrap(), b"22");
        assert_eq!(store.list_assets(&job).await.unwrap().len(), 2);
    }
}
