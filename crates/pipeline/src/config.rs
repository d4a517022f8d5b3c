use std::str::FromStr;
use std::time::Duration;

use drawq_core::requeue::{RequeuePolicy, DEFAULT_MAX_REQUEUES};
use drawq_core::validation::stuck_threshold;

use crate::error::{PipelineError, PipelineResult};

/// Pipeline configuration loaded from environment variables.
///
/// All fields except `database_url` have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    /// Pool size (default: `20`).
    pub max_connections: u32,
    /// Number of polling workers spawned by the binary (default: `4`).
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    /// Pending candidates inspected per claim attempt (default: `10`).
    pub claim_scan_limit: i64,
    pub generation_timeout: Duration,
    pub reaper_interval: Duration,
    pub stuck_threshold_minutes: i64,
    pub max_requeues: u32,
    pub migration_interval: Duration,
    pub migration_batch_size: i64,
    /// Base URL of the generation provider. Required by the worker binary.
    pub generation_api_url: Option<String>,
    /// Base URL of the storage gateway. Required by the worker binary.
    pub storage_api_url: Option<String>,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default   |
    /// |----------------------------|-----------|
    /// | `DATABASE_URL`             | required  |
    /// | `DATABASE_MAX_CONNECTIONS` | `20`      |
    /// | `WORKER_CONCURRENCY`       | `4`       |
    /// | `POLL_INTERVAL_MS`         | `1000`    |
    /// | `CLAIM_SCAN_LIMIT`         | `10`      |
    /// | `GENERATION_TIMEOUT_SECS`  | `300`     |
    /// | `REAPER_INTERVAL_SECS`     | `60`      |
    /// | `STUCK_THRESHOLD_MINUTES`  | `15`      |
    /// | `MAX_REQUEUES`             | `3`       |
    /// | `MIGRATION_INTERVAL_SECS`  | `30`      |
    /// | `MIGRATION_BATCH_SIZE`     | `20`      |
    /// | `GENERATION_API_URL`       | unset     |
    /// | `STORAGE_API_URL`          | unset     |
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PipelineError::Config("DATABASE_URL must be set".into()))?;

        let stuck_threshold_minutes: i64 = positive_or(&lookup, "STUCK_THRESHOLD_MINUTES", 15)?;
        stuck_threshold(stuck_threshold_minutes).map_err(|e| {
            PipelineError::Config(format!("STUCK_THRESHOLD_MINUTES: {e}"))
        })?;

        Ok(Self {
            database_url,
            max_connections: positive_or(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                drawq_db::DEFAULT_MAX_CONNECTIONS,
            )?,
            worker_concurrency: positive_or(&lookup, "WORKER_CONCURRENCY", 4)?,
            poll_interval: Duration::from_millis(positive_or(&lookup, "POLL_INTERVAL_MS", 1000)?),
            claim_scan_limit: positive_or(&lookup, "CLAIM_SCAN_LIMIT", 10)?,
            generation_timeout: Duration::from_secs(positive_or(
                &lookup,
                "GENERATION_TIMEOUT_SECS",
                300,
            )?),
            reaper_interval: Duration::from_secs(positive_or(&lookup, "REAPER_INTERVAL_SECS", 60)?),
            stuck_threshold_minutes,
            max_requeues: parse_or(&lookup, "MAX_REQUEUES", DEFAULT_MAX_REQUEUES)?,
            migration_interval: Duration::from_secs(positive_or(
                &lookup,
                "MIGRATION_INTERVAL_SECS",
                30,
            )?),
            migration_batch_size: positive_or(&lookup, "MIGRATION_BATCH_SIZE", 20)?,
            generation_api_url: lookup("GENERATION_API_URL").filter(|v| !v.is_empty()),
            storage_api_url: lookup("STORAGE_API_URL").filter(|v| !v.is_empty()),
        })
    }

    pub fn requeue_policy(&self) -> RequeuePolicy {
        RequeuePolicy::new(self.max_requeues)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> PipelineResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("{key} has invalid value '{raw}'"))),
    }
}

/// Like [`parse_or`], but the value must be greater than zero. Intervals
/// feed `tokio::time::interval` and limits feed SQL `LIMIT`.
fn positive_or<T, F>(lookup: &F, key: &str, default: T) -> PipelineResult<T>
where
    T: FromStr + PartialOrd + Default + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default)?;
    if value <= T::default() {
        return Err(PipelineError::Config(format!(
            "{key} must be greater than zero, got {value}"
        )));
    }
    Ok(value)
}
