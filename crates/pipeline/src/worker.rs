//! Polling worker.
//!
//! Each worker polls for Pending tasks every `poll_interval`, acquires one
//! through the guarded claim, runs the generation provider under a timeout,
//! and records the terminal outcome. Any number of workers (in this process
//! or others) can poll the same table; the claim decides who runs what.

use std::sync::Arc;
use std::time::Duration;

use drawq_core::types::DbId;
use drawq_core::validation::validate_artifact_url;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::provider::{GenerationProvider, GenerationRequest, ProgressSink};
use crate::queue::TaskQueue;

/// Tunables for one worker loop.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub claim_scan_limit: i64,
    pub generation_timeout: Duration,
}

impl From<&PipelineConfig> for WorkerSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            claim_scan_limit: config.claim_scan_limit,
            generation_timeout: config.generation_timeout,
        }
    }
}

/// What happened to the task a worker picked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Completed { task_id: DbId },
    Failed { task_id: DbId, error: String },
    /// The terminal write matched nothing: the task was finished elsewhere
    /// while this worker was generating.
    Superseded { task_id: DbId },
}

pub struct TaskWorker {
    name: String,
    queue: TaskQueue,
    provider: Arc<dyn GenerationProvider>,
    settings: WorkerSettings,
}

impl TaskWorker {
    pub fn new(
        name: impl Into<String>,
        queue: TaskQueue,
        provider: Arc<dyn GenerationProvider>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            provider,
            settings,
        }
    }

    /// Run the poll loop until the cancellation token is triggered.
    ///
    /// On every tick the worker drains the queue, one task at a time, before
    /// waiting for the next tick. Database errors are logged and the loop
    /// carries on.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        tracing::info!(
            worker = %self.name,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Task worker started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(worker = %self.name, "Task worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        match self.process_next().await {
                            Ok(Some(_)) => continue,
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(worker = %self.name, error = %e, "Work cycle failed");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Claim and run at most one task. `None` when nothing was claimable.
    pub async fn process_next(&self) -> PipelineResult<Option<WorkOutcome>> {
        let Some(task) = self.queue.claim_next(self.settings.claim_scan_limit).await? else {
            return Ok(None);
        };
        let task_id = task.id;
        tracing::info!(worker = %self.name, task_id, "Generating");

        let request = GenerationRequest::from(&task);
        let sink = ProgressSink::new(self.queue.clone(), task_id);

        let result = match tokio::time::timeout(
            self.settings.generation_timeout,
            self.provider.generate(&request, &sink),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(self.settings.generation_timeout)),
        };

        let artifact = match result.and_then(|artifact| {
            validate_artifact_url(&artifact.result_url)?;
            Ok(artifact)
        }) {
            Ok(artifact) => artifact,
            Err(e) => return self.fail(task_id, e).await.map(Some),
        };

        let outcome = match self
            .queue
            .complete_with_history(task_id, &artifact.result_url, artifact.thumbnail_url.as_deref())
            .await?
        {
            Some(_) => WorkOutcome::Completed { task_id },
            None => {
                tracing::warn!(worker = %self.name, task_id, "Completion superseded");
                WorkOutcome::Superseded { task_id }
            }
        };
        Ok(Some(outcome))
    }

    async fn fail(&self, task_id: DbId, error: PipelineError) -> PipelineResult<WorkOutcome> {
        let message = error.to_string();
        tracing::warn!(worker = %self.name, task_id, error = %message, "Generation failed");

        if self.queue.mark_failed(task_id, &message).await? {
            Ok(WorkOutcome::Failed {
                task_id,
                error: message,
            })
        } else {
            Ok(WorkOutcome::Superseded { task_id })
        }
    }
}
