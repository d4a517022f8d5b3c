//! Stuck-task reaper.
//!
//! On a fixed interval, finds tasks that have sat in Processing past the
//! threshold and either returns them to the queue or, once their requeue
//! budget is spent, fails them. Both writes are guarded on
//! `status = Processing`, so several reapers can run side by side.

use std::future::Future;
use std::time::Duration;

use drawq_core::requeue::{RequeueDecision, RequeuePolicy};
use drawq_core::types::DbId;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::queue::TaskQueue;

/// Attempts per guarded write before giving up on a task for this sweep.
const WRITE_ATTEMPTS: u32 = 3;

/// Backoff before the first retry; doubles on each subsequent one.
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub struct ReaperSettings {
    pub interval: Duration,
    pub stuck_threshold_minutes: i64,
    pub policy: RequeuePolicy,
}

impl From<&PipelineConfig> for ReaperSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            interval: config.reaper_interval,
            stuck_threshold_minutes: config.stuck_threshold_minutes,
            policy: config.requeue_policy(),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub found: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Guarded write matched nothing: another actor moved the task first.
    pub skipped: usize,
    /// Write still failing after retries; picked up again next sweep.
    pub errors: usize,
}

pub struct Reaper {
    queue: TaskQueue,
    settings: ReaperSettings,
}

impl Reaper {
    pub fn new(queue: TaskQueue, settings: ReaperSettings) -> Self {
        Self { queue, settings }
    }

    /// Run the reaper loop until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            threshold_minutes = self.settings.stuck_threshold_minutes,
            max_requeues = self.settings.policy.max_requeues,
            "Reaper started"
        );

        let mut interval = tokio::time::interval(self.settings.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reaper stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.found > 0 => {
                            tracing::info!(
                                found = report.found,
                                requeued = report.requeued,
                                failed = report.failed,
                                skipped = report.skipped,
                                errors = report.errors,
                                "Reaper: sweep finished"
                            );
                        }
                        Ok(_) => tracing::debug!("Reaper: no stuck tasks"),
                        Err(e) => tracing::error!(error = %e, "Reaper: sweep failed"),
                    }
                }
            }
        }
    }

    /// One pass over the stuck tasks.
    pub async fn sweep(&self) -> PipelineResult<ReapReport> {
        let stuck = self
            .queue
            .find_stuck_tasks(self.settings.stuck_threshold_minutes)
            .await?;
        let mut report = ReapReport {
            found: stuck.len(),
            ..Default::default()
        };

        for task in stuck {
            let decision = self.settings.policy.decide(task.requeue_count);
            let written = match &decision {
                RequeueDecision::Requeue => {
                    retry_transient(task.id, || self.queue.requeue(task.id)).await
                }
                RequeueDecision::GiveUp(reason) => {
                    retry_transient(task.id, || self.queue.fail_stuck(task.id, reason)).await
                }
            };

            match (written, decision) {
                (Ok(true), RequeueDecision::Requeue) => {
                    tracing::warn!(
                        task_id = task.id,
                        requeue_count = task.requeue_count + 1,
                        "Stuck task returned to queue"
                    );
                    report.requeued += 1;
                }
                (Ok(true), RequeueDecision::GiveUp(reason)) => {
                    tracing::warn!(task_id = task.id, %reason, "Stuck task failed");
                    report.failed += 1;
                }
                (Ok(false), _) => {
                    tracing::debug!(task_id = task.id, "Stuck task already moved by another actor");
                    report.skipped += 1;
                }
                (Err(e), _) => {
                    tracing::error!(task_id = task.id, error = %e, "Reaper write failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Retry a guarded write on transient failures with doubling backoff.
///
/// Replaying a guarded write is always safe: if an earlier attempt actually
/// committed, the replay simply matches no rows.
async fn retry_transient<F, Fut>(task_id: DbId, mut op: F) -> PipelineResult<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PipelineResult<bool>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < WRITE_ATTEMPTS => {
                tracing::warn!(task_id, attempt, error = %e, "Transient reaper write failure; retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}
