//! Domain types for the generation job orchestrator.
//!
//! This crate has no I/O and no internal dependencies so it can be shared
//! by the transport layer, the orchestrator and any CLI tooling.

pub mod asset;
pub mod error;
pub mod generation;
pub mod job;
pub mod policy;
pub mod progress;
pub mod types;
