use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use atelier_core::error::CoreError;
use atelier_core::policy::PollPolicy;

/// Orchestrator configuration loaded from environment variables.
///
/// Every poll tunable has a default in [`PollPolicy`]; unparseable values
/// fall back to that default with a warning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base URL of the compute backend.
    pub compute_api_url: String,
    /// Directory holding the persisted in-flight record and history.
    pub state_dir: PathBuf,
    /// Root directory of the filesystem result store.
    pub results_dir: PathBuf,
    pub policy: PollPolicy,
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `COMPUTE_API_URL`         | `http://localhost:8188` |
    /// | `STATE_DIR`               | `./state`               |
    /// | `RESULTS_DIR`             | `./results`             |
    /// | `POLL_INTERVAL_MS`        | `5000`                  |
    /// | `FAST_POLL_INTERVAL_MS`   | `1000`                  |
    /// | `NOT_FOUND_RETRY_DELAY_MS`| `2000`                  |
    /// | `NOT_FOUND_RETRY_LIMIT`   | `5`                     |
    /// | `ERROR_RETRY_DELAY_MS`    | `10000`                 |
    /// | `MAX_POLL_ATTEMPTS`       | `360`                   |
    /// | `RECONCILE_SCHEDULE_MS`   | `1000,2000,4000,8000,15000` |
    /// | `RECONCILE_FLUSH_AT`      | `3`                     |
    /// | `CHUNK_REFRESH_DELAY_MS`  | `1500`                  |
    /// | `CANCEL_GRACE_MS`         | `500`                   |
    /// | `JOB_HISTORY_LIMIT`       | `10`                    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let compute_api_url = lookup("COMPUTE_API_URL")
            .map(|url| url.trim().to_string())
            .unwrap_or_else(|| "http://localhost:8188".into());
        validate_url(&compute_api_url)?;

        let state_dir = lookup("STATE_DIR").unwrap_or_else(|| "./state".into()).into();
        let results_dir = lookup("RESULTS_DIR").unwrap_or_else(|| "./results".into()).into();

        let defaults = PollPolicy::default();
        let policy = PollPolicy {
            poll_interval: millis(&lookup, "POLL_INTERVAL_MS", defaults.poll_interval),
            fast_poll_interval: millis(&lookup, "FAST_POLL_INTERVAL_MS", defaults.fast_poll_interval),
            not_found_retry_delay: millis(
                &lookup,
                "NOT_FOUND_RETRY_DELAY_MS",
                defaults.not_found_retry_delay,
            ),
            not_found_retry_limit: parsed(
                &lookup,
                "NOT_FOUND_RETRY_LIMIT",
                defaults.not_found_retry_limit,
            ),
            error_retry_delay: millis(&lookup, "ERROR_RETRY_DELAY_MS", defaults.error_retry_delay),
            max_attempts: parsed(&lookup, "MAX_POLL_ATTEMPTS", defaults.max_attempts),
            reconcile_schedule: schedule(&lookup, "RECONCILE_SCHEDULE_MS", defaults.reconcile_schedule),
            reconcile_flush_at: parsed(&lookup, "RECONCILE_FLUSH_AT", defaults.reconcile_flush_at),
            chunk_refresh_delay: millis(
                &lookup,
                "CHUNK_REFRESH_DELAY_MS",
                defaults.chunk_refresh_delay,
            ),
            cancel_grace: millis(&lookup, "CANCEL_GRACE_MS", defaults.cancel_grace),
            history_limit: parsed(&lookup, "JOB_HISTORY_LIMIT", defaults.history_limit),
        };
        policy.validate()?;

        Ok(Self {
            compute_api_url,
            state_dir,
            results_dir,
            policy,
        })
    }
}

fn validate_url(url: &str) -> Result<(), CoreError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| {
        CoreError::Validation(format!("COMPUTE_API_URL is not a valid URL ('{url}'): {e}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CoreError::Validation(format!(
            "COMPUTE_API_URL must be an http(s) URL, got '{url}'"
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(CoreError::Validation(format!(
            "COMPUTE_API_URL has no host: '{url}'"
        )));
    }
    Ok(())
}

fn parsed<T: FromStr + Copy + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid number, using default");
            default
        }),
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_millis(parsed(lookup, key, default.as_millis() as u64))
}

fn schedule(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Vec<Duration>,
) -> Vec<Duration> {
    let Some(raw) = lookup(key) else {
        return default;
    };
    let steps: Result<Vec<u64>, _> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect();
    match steps {
        Ok(steps) if !steps.is_empty() => steps.into_iter().map(Duration::from_millis).collect(),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid schedule, using default");
            default
        }
    }
}
