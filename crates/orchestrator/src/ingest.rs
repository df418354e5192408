//! Chunk ingestion: durable storage of incremental results.
//!
//! A chunk is stored through the [`ObjectStore`] upsert, merged into the
//! client-side cache and followed by a delayed reconciliation read. A
//! chunk that cannot be stored is logged and dropped; the job carries on
//! and the post-completion sweep picks up whatever the backend did store.
//!
//! [`ObjectStore`]: atelier_compute::backend::ObjectStore

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use atelier_compute::messages::ChunkPayload;
use atelier_core::asset::ResultAsset;
use atelier_core::types::JobId;

use crate::events::OrchestratorEvent;
use crate::state::Shared;

/// Concurrent store writes when a completed response carries a batch.
const BATCH_CONCURRENCY: usize = 4;

/// Store one chunk. Returns the stored asset, or `None` if it was dropped.
pub(crate) async fn ingest_chunk(
    shared: &Arc<Shared>,
    job_id: &JobId,
    chunk: &ChunkPayload,
) -> Option<ResultAsset> {
    let stored = store_chunk(shared, job_id, chunk).await?;
    schedule_refresh(shared, job_id);
    Some(stored)
}

/// Store every image of a completed batch. Returns how many were stored.
pub(crate) async fn ingest_batch(
    shared: &Arc<Shared>,
    job_id: &JobId,
    chunks: &[ChunkPayload],
) -> usize {
    if chunks.is_empty() {
        return 0;
    }
    let writes = chunks.iter().cloned().map(|chunk| {
        let shared = Arc::clone(shared);
        let job_id = job_id.clone();
        async move { store_chunk(&shared, &job_id, &chunk).await }
    });
    let stored = stream::iter(writes)
        .buffer_unordered(BATCH_CONCURRENCY)
        .filter_map(|stored| async move { stored })
        .count()
        .await;
    tracing::info!(job_id = %job_id, stored, total = chunks.len(), "Batch ingested");
    stored
}

/// List the store and merge everything it holds for `job_id` into the
/// cache. Safe to repeat.
pub(crate) async fn refresh_cache(shared: &Shared, job_id: &JobId) -> Vec<ResultAsset> {
    match shared.store.list_assets(job_id).await {
        Ok(listed) => {
            let mut state = shared.state.write().await;
            let added = state.merge_assets(job_id, listed);
            if added > 0 {
                tracing::debug!(job_id = %job_id, added, "Result cache refreshed");
            }
            state.assets.get(job_id).cloned().unwrap_or_default()
        }
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to list results");
            shared
                .state
                .read()
                .await
                .assets
                .get(job_id)
                .cloned()
                .unwrap_or_default()
        }
    }
}

async fn store_chunk(
    shared: &Shared,
    job_id: &JobId,
    chunk: &ChunkPayload,
) -> Option<ResultAsset> {
    let payload = match chunk.decode_data() {
        Ok(bytes) => bytes,
        Err(e) => {
            persist_failed(shared, job_id, &chunk.filename, format!("undecodable payload: {e}"));
            return None;
        }
    };

    match shared
        .store
        .put_asset(job_id, &chunk.filename, chunk.storage_hint.as_deref(), &payload)
        .await
    {
        Ok(asset) => {
            shared
                .state
                .write()
                .await
                .merge_assets(job_id, [asset.clone()]);
            tracing::info!(
                job_id = %job_id,
                filename = %chunk.filename,
                size_bytes = payload.len(),
                "Result stored",
            );
            shared.emit(OrchestratorEvent::AssetStored {
                job_id: job_id.clone(),
                filename: chunk.filename.clone(),
            });
            Some(asset)
        }
        Err(e) => {
            persist_failed(shared, job_id, &chunk.filename, e.to_string());
            None
        }
    }
}

fn persist_failed(shared: &Shared, job_id: &JobId, filename: &str, error: String) {
    tracing::error!(job_id = %job_id, filename, error = %error, "Failed to store result");
    shared.emit(OrchestratorEvent::AssetPersistFailed {
        job_id: job_id.clone(),
        filename: filename.to_string(),
        error,
    });
}

/// Re-read the store shortly after a chunk lands to catch results the
/// backend stored without announcing.
fn schedule_refresh(shared: &Arc<Shared>, job_id: &JobId) {
    let shared_task = Arc::clone(shared);
    let job_id = job_id.clone();
    let delay = shared.policy.chunk_refresh_delay;
    shared.tasks.spawn(async move {
        tokio::select! {
            biased;
            _ = shared_task.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                refresh_cache(&shared_task, &job_id).await;
            }
        }
    });
}
