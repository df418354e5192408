//! `atelier-worker` -- headless generation job runner.
//!
//! Restores any job left in flight by a previous run and polls it to
//! completion. With nothing to resume, uploads a reference image and
//! submits a new job when a prompt is configured. Ctrl-C cancels the
//! active job.
//!
//! # Environment variables
//!
//! | Variable                 | Required | Default   | Description                          |
//! |--------------------------|----------|-----------|--------------------------------------|
//! | `GENERATION_PROMPT`      | no       | --        | Prompt for a new job                 |
//! | `REFERENCE_IMAGE`        | with prompt | --     | Path of the reference image to upload |
//! | `GENERATION_DESTINATION` | no       | `gallery` | Destination for results              |
//! | `GENERATION_IMAGE_COUNT` | no       | `1`       | Images per job                       |
//! | `LOG_FORMAT`             | no       | `text`    | `json` for structured log lines      |
//!
//! Compute backend, state and poll policy settings are read by
//! [`OrchestratorConfig::from_env`].

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_compute::api::ComputeApi;
use atelier_compute::store::FsObjectStore;
use atelier_core::generation::GenerationParams;
use atelier_orchestrator::config::OrchestratorConfig;
use atelier_orchestrator::persistence::JsonFileStore;
use atelier_orchestrator::{Orchestrator, OrchestratorEvent};

const DEFAULT_DESTINATION: &str = "gallery";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = OrchestratorConfig::from_env().context("invalid orchestrator configuration")?;
    tracing::info!(
        compute_api_url = %config.compute_api_url,
        state_dir = %config.state_dir.display(),
        results_dir = %config.results_dir.display(),
        "Starting atelier-worker",
    );

    let api = Arc::new(ComputeApi::new(config.compute_api_url.clone()));
    let orchestrator = Orchestrator::builder(
        api.clone(),
        Arc::new(FsObjectStore::new(config.results_dir.clone())),
        Arc::new(JsonFileStore::new(config.state_dir.clone())),
    )
    .policy(config.policy.clone())
    .build()
    .context("invalid poll policy")?;

    tokio::spawn(log_events(orchestrator.subscribe()));

    match orchestrator.restore().await {
        Some(job) => {
            tracing::info!(job_id = %job.id, progress = job.progress, "Resumed job from previous run");
        }
        None => match std::env::var("GENERATION_PROMPT") {
            Ok(prompt) => submit_new(&orchestrator, &api, prompt).await?,
            Err(_) => {
                tracing::info!("No job to resume and GENERATION_PROMPT is unset, exiting");
                return Ok(());
            }
        },
    }

    tokio::select! {
        _ = orchestrator.wait_until_settled() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, cancelling active job");
            if let Err(e) = orchestrator.cancel().await {
                tracing::warn!(error = %e, "Nothing to cancel");
            }
            orchestrator.wait_until_settled().await;
        }
    }

    if let Some(outcome) = orchestrator.current_job().await.and_then(|job| job.outcome()) {
        tracing::info!(outcome = %outcome.message(), "Worker finished");
    }
    orchestrator.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "atelier_worker=info,atelier_orchestrator=info,atelier_compute=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn submit_new(
    orchestrator: &Orchestrator,
    api: &ComputeApi,
    prompt: String,
) -> anyhow::Result<()> {
    let reference_path =
        std::env::var("REFERENCE_IMAGE").context("REFERENCE_IMAGE is required to submit a job")?;
    let bytes = tokio::fs::read(&reference_path)
        .await
        .with_context(|| format!("failed to read reference image {reference_path}"))?;
    let filename = Path::new(&reference_path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("reference.png")
        .to_string();

    let upload = api
        .upload_reference(&filename, bytes)
        .await
        .context("reference upload failed")?;
    tracing::info!(name = %upload.name, "Reference image uploaded");

    let destination =
        std::env::var("GENERATION_DESTINATION").unwrap_or_else(|_| DEFAULT_DESTINATION.into());
    let mut params = GenerationParams::new(prompt, upload.name, destination);
    if let Ok(count) = std::env::var("GENERATION_IMAGE_COUNT") {
        params.image_count = count
            .parse()
            .with_context(|| format!("GENERATION_IMAGE_COUNT must be an integer, got '{count}'"))?;
    }

    let job = orchestrator
        .submit(params)
        .await
        .context("job submission failed")?;
    tracing::info!(job_id = %job.id, "Job submitted");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<OrchestratorEvent>) {
    loop {
        match events.recv().await {
            Ok(OrchestratorEvent::Progress { job_id, snapshot }) => {
                tracing::info!(
                    job_id = %job_id,
                    progress = snapshot.progress,
                    stage = snapshot.stage.as_deref().unwrap_or(""),
                    eta_secs = snapshot.estimated_time_remaining,
                    "Progress",
                );
            }
            Ok(OrchestratorEvent::AssetStored { job_id, filename }) => {
                tracing::info!(job_id = %job_id, filename = %filename, "Result saved");
            }
            Ok(OrchestratorEvent::ResultsUnavailable { job_id, attempts }) => {
                tracing::warn!(
                    job_id = %job_id,
                    attempts,
                    "Job completed but no results are visible yet",
                );
            }
            Ok(event) if event.is_terminal() => {
                tracing::info!(job_id = %event.job_id(), ?event, "Job finished");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
