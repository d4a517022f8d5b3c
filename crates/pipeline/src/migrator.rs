//! Origin-to-permanent artifact migration job.
//!
//! Runs an arbitrary time after completion. For each Completed, unmigrated
//! task it copies the origin artifact into long-term storage, then swaps the
//! task's output URLs with a compare-and-swap fenced on the origin URL it
//! read. When a history row exists it is rewritten in the same transaction.
//! A swap that matches nothing means another migrator won; that is not an
//! error.

use std::sync::Arc;
use std::time::Duration;

use drawq_db::models::task::{OutputUrlRewrite, Task};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::queue::TaskQueue;
use crate::storage::StorageClient;

#[derive(Debug, Clone, Copy)]
pub struct MigratorSettings {
    pub interval: Duration,
    pub batch_size: i64,
}

impl From<&PipelineConfig> for MigratorSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            interval: config.migration_interval,
            batch_size: config.migration_batch_size,
        }
    }
}

/// Counts from one migration sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub already_migrated: usize,
    pub failed: usize,
}

pub struct Migrator {
    queue: TaskQueue,
    storage: Arc<dyn StorageClient>,
    settings: MigratorSettings,
}

impl Migrator {
    pub fn new(queue: TaskQueue, storage: Arc<dyn StorageClient>, settings: MigratorSettings) -> Self {
        Self {
            queue,
            storage,
            settings,
        }
    }

    /// Run the migration loop until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            batch_size = self.settings.batch_size,
            "Migration job started"
        );

        let mut interval = tokio::time::interval(self.settings.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Migration job stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.scanned > 0 => {
                            tracing::info!(
                                scanned = report.scanned,
                                migrated = report.migrated,
                                already_migrated = report.already_migrated,
                                failed = report.failed,
                                "Migration: sweep finished"
                            );
                        }
                        Ok(_) => tracing::debug!("Migration: nothing to migrate"),
                        Err(e) => tracing::error!(error = %e, "Migration: sweep failed"),
                    }
                }
            }
        }
    }

    /// One pass over up to `batch_size` unmigrated tasks.
    ///
    /// A failure on one task is logged and counted; the task stays
    /// unmigrated and is retried on the next sweep.
    pub async fn sweep(&self) -> PipelineResult<MigrationReport> {
        let tasks = self.queue.find_unmigrated(self.settings.batch_size).await?;
        let mut report = MigrationReport {
            scanned: tasks.len(),
            ..Default::default()
        };

        for task in &tasks {
            match self.migrate_one(task).await {
                Ok(true) => report.migrated += 1,
                Ok(false) => report.already_migrated += 1,
                Err(e) => {
                    tracing::error!(task_id = task.id, error = %e, "Migration failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Migrate a single task. `Ok(false)` means there was nothing to do.
    pub async fn migrate_one(&self, task: &Task) -> PipelineResult<bool> {
        let Some(origin_url) = task.original_url.as_deref() else {
            return Ok(false);
        };
        if task.is_migrated {
            return Ok(false);
        }

        let permanent = self
            .storage
            .persist(origin_url, task.thumbnail_url.as_deref())
            .await?;

        let swapped = match self.queue.find_history(task.id).await? {
            Some(history) => {
                let rewrite = OutputUrlRewrite {
                    task_id: task.id,
                    history_id: history.id,
                    url: permanent.url.clone(),
                    thumbnail_url: permanent.thumbnail_url.clone(),
                    is_migrated: true,
                    expected_origin_url: origin_url.to_string(),
                    expected_url_version: task.url_version,
                };
                self.queue.update_task_and_history(&rewrite).await?
            }
            None => {
                self.queue
                    .migrate_to_permanent_url(
                        task.id,
                        &permanent.url,
                        permanent.thumbnail_url.as_deref(),
                        origin_url,
                    )
                    .await?
            }
        };

        if swapped {
            tracing::info!(task_id = task.id, url = %permanent.url, "Artifact migrated");
        } else {
            tracing::debug!(task_id = task.id, "Already migrated; nothing to do");
        }
        Ok(swapped)
    }
}
