//! Generation job orchestrator.
//!
//! Submits a job to a compute backend, polls it to a terminal state,
//! ingests results as they stream in, reconciles the result set after
//! completion, honours local-first cancellation and survives restarts by
//! mirroring in-flight state to a [`persistence::StateStore`].
//!
//! [`Orchestrator`] is the entry point; everything else is plumbing it
//! composes.

mod cancel;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
mod ingest;
pub mod persistence;
mod poll;
pub mod reconcile;
mod recovery;
mod state;
mod submitter;

pub use controller::{Orchestrator, OrchestratorBuilder};
pub use error::OrchestratorError;
pub use events::OrchestratorEvent;
