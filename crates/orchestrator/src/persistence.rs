//! Durable mirror of the orchestrator's in-flight state and job history.
//!
//! State is stored under four logical JSON keys:
//!
//! | Key            | Shape                 |
//! |----------------|-----------------------|
//! | `currentJob`   | [`Job`]               |
//! | `isGenerating` | `bool`                |
//! | `progressData` | [`ProgressSnapshot`]  |
//! | `jobHistory`   | `[Job]`, newest first |
//!
//! The orchestrator is the only writer. The record is read back once, at
//! startup, by [`crate::recovery`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use atelier_core::job::{Job, JobStatus};
use atelier_core::progress::ProgressSnapshot;

pub const KEY_CURRENT_JOB: &str = "currentJob";
pub const KEY_IS_GENERATING: &str = "isGenerating";
pub const KEY_PROGRESS: &str = "progressData";
pub const KEY_HISTORY: &str = "jobHistory";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("State store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed persisted value for '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("State encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Key-value storage for JSON documents.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, PersistError>;
    async fn put(&self, key: &str, value: Value) -> Result<(), PersistError>;
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), PersistError>;
}

/// One `<key>.json` file per key under a directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, PersistError> {
        let bytes = match tokio::fs::read(self.path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistError::Decode {
                key: key.to_string(),
                source,
            })
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), PersistError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(&value).map_err(PersistError::Encode)?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.path(key)).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStateStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value under `key`, bypassing the facade.
    pub async fn raw(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.values.read().await.contains_key(key)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, PersistError> {
        Ok(self.raw(key).await)
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), PersistError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Typed facade
// ---------------------------------------------------------------------------

/// The in-flight record as read back at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub job: Job,
    pub progress: ProgressSnapshot,
    pub is_generating: bool,
}

impl PersistedState {
    /// Only a generating, non-terminal, non-cancelled job may resume.
    /// Anything else is stale or corrupt.
    pub fn is_resumable(&self) -> bool {
        self.is_generating
            && matches!(self.job.status, JobStatus::Pending | JobStatus::Processing)
            && !self.job.is_cancelled()
    }
}

/// Typed access to the four persisted keys.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn StateStore>,
}

impl Persistence {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn save_in_flight(
        &self,
        job: &Job,
        progress: &ProgressSnapshot,
        is_generating: bool,
    ) -> Result<(), PersistError> {
        self.put(KEY_CURRENT_JOB, job).await?;
        self.put(KEY_PROGRESS, progress).await?;
        self.put(KEY_IS_GENERATING, &is_generating).await?;
        Ok(())
    }

    /// `Ok(None)` when no job was recorded.
    pub async fn load_in_flight(&self) -> Result<Option<PersistedState>, PersistError> {
        let Some(job) = self.get::<Job>(KEY_CURRENT_JOB).await? else {
            return Ok(None);
        };
        let progress = self.get(KEY_PROGRESS).await?.unwrap_or_default();
        let is_generating = self.get(KEY_IS_GENERATING).await?.unwrap_or(false);
        Ok(Some(PersistedState {
            job,
            progress,
            is_generating,
        }))
    }

    pub async fn clear_in_flight(&self) -> Result<(), PersistError> {
        self.store.remove(KEY_CURRENT_JOB).await?;
        self.store.remove(KEY_PROGRESS).await?;
        self.store.remove(KEY_IS_GENERATING).await?;
        Ok(())
    }

    pub async fn save_history(&self, history: &[Job]) -> Result<(), PersistError> {
        self.put(KEY_HISTORY, history).await
    }

    pub async fn load_history(&self) -> Result<Vec<Job>, PersistError> {
        Ok(self.get(KEY_HISTORY).await?.unwrap_or_default())
    }

    // ---- private helpers ----

    async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), PersistError> {
        let value = serde_json::to_value(value).map_err(PersistError::Encode)?;
        self.store.put(key, value).await
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PersistError> {
        match self.store.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| PersistError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }
}
