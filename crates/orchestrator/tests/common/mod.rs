//! Shared fixtures for orchestrator integration tests: a scripted compute
//! backend and an object store that can be told to misbehave.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use tokio::sync::{broadcast, Notify};

use atelier_compute::api::ComputeApiError;
use atelier_compute::backend::{ComputeBackend, ObjectStore};
use atelier_compute::description::JobDescription;
use atelier_compute::messages::{parse_status, StatusMessage};
use atelier_compute::store::{MemoryObjectStore, StoreError};
use atelier_core::asset::ResultAsset;
use atelier_core::generation::GenerationParams;
use atelier_core::policy::PollPolicy;
use atelier_core::types::JobId;
use atelier_orchestrator::persistence::MemoryStateStore;
use atelier_orchestrator::{Orchestrator, OrchestratorEvent};

// ---------------------------------------------------------------------------
// Status payloads
// ---------------------------------------------------------------------------

fn message(value: serde_json::Value) -> StatusMessage {
    parse_status(&value.to_string()).unwrap()
}

pub fn pending() -> Reply {
    Reply::Status(message(json!({ "status": "pending", "stage": "queued" })))
}

pub fn processing(progress: u32) -> Reply {
    Reply::Status(message(json!({
        "status": "processing",
        "progress": progress,
        "stage": "sampling",
        "message": format!("{progress}% done"),
    })))
}

pub fn image_ready(filename: &str, bytes: &[u8]) -> Reply {
    Reply::Status(message(json!({
        "status": "image_ready",
        "filename": filename,
        "subfolder": "output",
        "data": base64::engine::general_purpose::STANDARD.encode(bytes),
    })))
}

pub fn completed() -> Reply {
    Reply::Status(message(json!({ "status": "completed" })))
}

pub fn completed_with(images: &[(&str, &[u8])]) -> Reply {
    let images: Vec<_> = images
        .iter()
        .map(|(name, bytes)| {
            json!({
                "filename": name,
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            })
        })
        .collect();
    Reply::Status(message(json!({ "status": "completed", "images": images })))
}

pub fn failed(error: &str) -> Reply {
    Reply::Status(message(json!({ "status": "failed", "error": error })))
}

pub fn params() -> GenerationParams {
    GenerationParams::new("a lighthouse at dusk", "ref_001.png", "gallery")
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// One scripted answer to a status query.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(StatusMessage),
    /// Non-2xx response with this status code.
    Error(u16),
    /// Never answers.
    Hang,
}

fn api_error(status: u16) -> ComputeApiError {
    ComputeApiError::ApiError {
        status,
        body: "scripted".into(),
    }
}

impl Reply {
    async fn resolve(self) -> Result<StatusMessage, ComputeApiError> {
        match self {
            Reply::Status(message) => Ok(message),
            Reply::Error(status) => Err(api_error(status)),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Compute backend answering from per-job scripts. Submissions are
/// assigned ids `job-1`, `job-2`, ... in order.
pub struct ScriptedBackend {
    submit_failures: Mutex<VecDeque<u16>>,
    statuses: Mutex<HashMap<JobId, VecDeque<Reply>>>,
    default_status: Mutex<Reply>,
    fallbacks: Mutex<VecDeque<Reply>>,
    cancel_fails: AtomicBool,
    calls_per_job: Mutex<HashMap<JobId, u32>>,
    submitted: Mutex<Vec<JobDescription>>,
    status_calls: AtomicU32,
    fallback_calls: AtomicU32,
    cancel_calls: AtomicU32,
    flush_calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            submit_failures: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            default_status: Mutex::new(processing(50)),
            fallbacks: Mutex::new(VecDeque::new()),
            cancel_fails: AtomicBool::new(false),
            calls_per_job: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            status_calls: AtomicU32::new(0),
            fallback_calls: AtomicU32::new(0),
            cancel_calls: AtomicU32::new(0),
            flush_calls: AtomicU32::new(0),
        }
    }

    /// Replies for `job_id`, consumed in order. Once exhausted the default
    /// status is returned.
    pub fn script(self, job_id: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .entry(JobId::new(job_id))
            .or_default()
            .extend(replies);
        self
    }

    pub fn default_status(self, reply: Reply) -> Self {
        *self.default_status.lock().unwrap() = reply;
        self
    }

    /// Replies for the fallback path. Once exhausted it answers 503.
    pub fn fallback(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.fallbacks.lock().unwrap().extend(replies);
        self
    }

    /// Reject the next submission with `status`.
    pub fn reject_submit(self, status: u16) -> Self {
        self.submit_failures.lock().unwrap().push_back(status);
        self
    }

    pub fn failing_cancel(self) -> Self {
        self.cancel_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, job_id: &str) -> u32 {
        self.calls_per_job
            .lock()
            .unwrap()
            .get(&JobId::new(job_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn fallback_calls(&self) -> u32 {
        self.fallback_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn flush_calls(&self) -> u32 {
        self.flush_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<JobDescription> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeBackend for ScriptedBackend {
    async fn submit_job(&self, description: &JobDescription) -> Result<JobId, ComputeApiError> {
        if let Some(status) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(api_error(status));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(description.clone());
        Ok(JobId::new(format!("job-{}", submitted.len())))
    }

    async fn get_job_status(&self, job_id: &JobId) -> Result<StatusMessage, ComputeApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_per_job
            .lock()
            .unwrap()
            .entry(job_id.clone())
            .or_default() += 1;
        let reply = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(job_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_status.lock().unwrap().clone());
        reply.resolve().await
    }

    async fn cancel_job(&self, _job_id: &JobId) -> Result<(), ComputeApiError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.cancel_fails.load(Ordering::SeqCst) {
            return Err(api_error(502));
        }
        Ok(())
    }

    async fn fallback_status(&self, _job_id: &JobId) -> Result<StatusMessage, ComputeApiError> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .fallbacks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Error(503));
        reply.resolve().await
    }

    async fn request_flush(&self, _job_id: &JobId) -> Result<(), ComputeApiError> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Misbehaving object store
// ---------------------------------------------------------------------------

/// [`MemoryObjectStore`] that can fail writes, hold writes on a gate, or
/// hide its contents from the first few listings.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryObjectStore,
    fail_puts: AtomicBool,
    hidden_lists: AtomicU32,
    put_gate: Mutex<Option<Arc<Notify>>>,
    put_calls: AtomicU32,
    list_calls: AtomicU32,
}

impl FlakyStore {
    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    /// The next `n` listings come back empty.
    pub fn hide_lists(&self, n: u32) {
        self.hidden_lists.store(n, Ordering::SeqCst);
    }

    /// Hold every write until the returned gate is notified.
    pub fn gate_puts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.put_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Store an artifact as if the backend had written it directly.
    pub async fn seed(&self, job_id: &str, filename: &str) {
        self.inner
            .put_asset(&JobId::new(job_id), filename, None, b"seeded")
            .await
            .unwrap();
    }

    pub fn put_calls(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put_asset(
        &self,
        job_id: &JobId,
        filename: &str,
        storage_hint: Option<&str>,
        payload: &[u8],
    ) -> Result<ResultAsset, StoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.put_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.put_asset(job_id, filename, storage_hint, payload).await
    }

    async fn list_assets(&self, job_id: &JobId) -> Result<Vec<ResultAsset>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let hidden = self
            .hidden_lists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Ok(Vec::new());
        }
        self.inner.list_assets(job_id).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub results: Arc<FlakyStore>,
    pub state: Arc<MemoryStateStore>,
    pub orchestrator: Orchestrator,
    events: broadcast::Receiver<OrchestratorEvent>,
}

impl Harness {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self::with_policy(backend, PollPolicy::default())
    }

    pub fn with_policy(backend: ScriptedBackend, policy: PollPolicy) -> Self {
        Self::with_state(backend, policy, Arc::new(MemoryStateStore::new()))
    }

    pub fn with_state(
        backend: ScriptedBackend,
        policy: PollPolicy,
        state: Arc<MemoryStateStore>,
    ) -> Self {
        let backend = Arc::new(backend);
        let results = Arc::new(FlakyStore::default());
        let orchestrator = Orchestrator::builder(backend.clone(), results.clone(), state.clone())
            .policy(policy)
            .event_capacity(1024)
            .build()
            .unwrap();
        let events = orchestrator.subscribe();
        Self {
            backend,
            results,
            state,
            orchestrator,
            events,
        }
    }

    /// Every event published since the last drain.
    pub fn drain_events(&mut self) -> Vec<OrchestratorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Terminal events among `events` for `job_id`.
pub fn terminal_events<'a>(events: &'a [OrchestratorEvent], job_id: &str) -> Vec<&'a OrchestratorEvent> {
    events
        .iter()
        .filter(|e| e.is_terminal() && e.job_id().as_str() == job_id)
        .collect()
}

/// Progress values carried by `Progress` events, in order.
pub fn progress_values(events: &[OrchestratorEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::Progress { snapshot, .. } => Some(snapshot.progress),
            _ => None,
        })
        .collect()
}
