//! Compute backend and result store clients.
//!
//! Provides typed status-message decoding, the REST client for the
//! generation backend, the [`ComputeBackend`](backend::ComputeBackend) and
//! [`ObjectStore`](backend::ObjectStore) seams the orchestrator is written
//! against, and filesystem / in-memory result stores.

pub mod api;
pub mod backend;
pub mod description;
pub mod messages;
pub mod store;
