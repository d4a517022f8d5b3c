//! Operation surface of the drawing-task core.
//!
//! Producers enqueue and split, workers acquire and report, the reaper and
//! the migration job rewrite rows through guarded writes. Conflicts come
//! back as `false` / `None`; only validation and infrastructure failures are
//! errors.

use drawq_core::batch::{BatchProgress, MAX_BATCH_CHILDREN};
use drawq_core::error::CoreError;
use drawq_core::types::{BatchGroupId, DbId};
use drawq_core::validation::{
    clamp_progress, stuck_threshold, truncate_message, validate_artifact_url,
    MAX_ERROR_MESSAGE_LEN, MAX_PROGRESS_MESSAGE_LEN,
};
use drawq_db::models::history::DrawingHistory;
use drawq_db::models::task::{CompletedTask, CreateBatch, CreateTask, OutputUrlRewrite, Task};
use drawq_db::repositories::{HistoryRepo, TaskRepo};
use serde::Serialize;
use sqlx::PgPool;
use validator::Validate;

use crate::error::PipelineResult;

/// Aggregate view of one batch group plus its children in split order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub batch_group_id: BatchGroupId,
    #[serde(flatten)]
    pub progress: BatchProgress,
    pub tasks: Vec<Task>,
}

/// Handle to the task store, cheap to clone across workers.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    pool: PgPool,
}

impl TaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ── Producer side ────────────────────────────────────────────────

    /// Validate and create a Pending task. Returns its id.
    pub async fn enqueue(&self, input: &CreateTask) -> PipelineResult<DbId> {
        input.validate()?;
        let task = TaskRepo::create(&self.pool, input).await?;
        tracing::info!(task_id = task.id, user_id = task.user_id, "Task enqueued");
        Ok(task.id)
    }

    /// Fan one request out into child tasks sharing a fresh batch group id.
    pub async fn create_batch(&self, input: &CreateBatch) -> PipelineResult<BatchGroupId> {
        if input.children.is_empty() {
            return Err(CoreError::Validation("Batch must contain at least one child".into()).into());
        }
        if input.children.len() > MAX_BATCH_CHILDREN {
            return Err(CoreError::Validation(format!(
                "Batch has {} children; the limit is {MAX_BATCH_CHILDREN}",
                input.children.len()
            ))
            .into());
        }
        for spec in input.child_specs() {
            spec.validate()?;
        }
        if let Some(parent_id) = input.parent_task_id {
            if TaskRepo::find_by_id(&self.pool, parent_id).await?.is_none() {
                return Err(CoreError::NotFound {
                    entity: "drawing_task",
                    id: parent_id,
                }
                .into());
            }
        }

        let (batch_group_id, tasks) = TaskRepo::create_batch(&self.pool, input).await?;
        tracing::info!(
            %batch_group_id,
            children = tasks.len(),
            parent_task_id = ?input.parent_task_id,
            "Batch created",
        );
        Ok(batch_group_id)
    }

    /// Aggregate status of a batch group; `None` when no child references it.
    pub async fn get_batch_status(
        &self,
        batch_group_id: BatchGroupId,
    ) -> PipelineResult<Option<BatchStatus>> {
        let tasks = TaskRepo::get_by_batch_group(&self.pool, batch_group_id).await?;
        if tasks.is_empty() {
            return Ok(None);
        }

        let children = tasks
            .iter()
            .map(|t| Ok((t.status()?, t.progress)))
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Some(BatchStatus {
            batch_group_id,
            progress: BatchProgress::from_children(children),
            tasks,
        }))
    }

    pub async fn get_task(&self, id: DbId) -> PipelineResult<Option<Task>> {
        Ok(TaskRepo::find_by_id(&self.pool, id).await?)
    }

    // ── Worker side ──────────────────────────────────────────────────

    /// Claim a specific task. `false` when it is missing or already taken.
    pub async fn try_acquire(&self, id: DbId) -> PipelineResult<bool> {
        let acquired = TaskRepo::try_acquire(&self.pool, id).await?;
        if acquired {
            tracing::info!(task_id = id, "Task acquired");
        }
        Ok(acquired)
    }

    /// Claim the oldest Pending task this caller can win, if any.
    pub async fn claim_next(&self, scan_limit: i64) -> PipelineResult<Option<Task>> {
        let task = TaskRepo::claim_next(&self.pool, scan_limit).await?;
        if let Some(task) = &task {
            tracing::info!(task_id = task.id, "Task acquired");
        }
        Ok(task)
    }

    /// Best-effort progress update with no state-machine effect.
    pub async fn report_progress(
        &self,
        id: DbId,
        percent: i32,
        message: Option<&str>,
    ) -> PipelineResult<bool> {
        let message = message.map(|m| truncate_message(m, MAX_PROGRESS_MESSAGE_LEN));
        let applied =
            TaskRepo::update_progress(&self.pool, id, clamp_progress(percent), message).await?;
        if !applied {
            tracing::debug!(task_id = id, "Progress ignored: task not processing");
        }
        Ok(applied)
    }

    /// Terminal success with the provider's (origin) artifact URL.
    pub async fn complete_with_origin_url(
        &self,
        id: DbId,
        url: &str,
        thumbnail_url: Option<&str>,
    ) -> PipelineResult<bool> {
        validate_artifact_url(url)?;
        let applied =
            TaskRepo::complete_with_origin_url(&self.pool, id, url, thumbnail_url).await?;
        self.log_terminal(id, applied, "completed");
        Ok(applied)
    }

    /// Terminal success that also records the user-facing history row.
    pub async fn complete_with_history(
        &self,
        id: DbId,
        url: &str,
        thumbnail_url: Option<&str>,
    ) -> PipelineResult<Option<CompletedTask>> {
        validate_artifact_url(url)?;
        let done = TaskRepo::complete_with_history(&self.pool, id, url, thumbnail_url).await?;
        self.log_terminal(id, done.is_some(), "completed");
        Ok(done)
    }

    /// Terminal failure with a descriptive message.
    pub async fn mark_failed(&self, id: DbId, error_message: &str) -> PipelineResult<bool> {
        let message = truncate_message(error_message, MAX_ERROR_MESSAGE_LEN);
        let applied = TaskRepo::mark_failed(&self.pool, id, message).await?;
        self.log_terminal(id, applied, "failed");
        Ok(applied)
    }

    fn log_terminal(&self, id: DbId, applied: bool, outcome: &str) {
        if applied {
            tracing::info!(task_id = id, outcome, "Task finished");
        } else {
            tracing::debug!(task_id = id, outcome, "Terminal write ignored: task already terminal or missing");
        }
    }

    // ── Reaper side ──────────────────────────────────────────────────

    /// Ids of Processing tasks older than the threshold, oldest first.
    pub async fn find_stuck(&self, threshold_minutes: i64) -> PipelineResult<Vec<DbId>> {
        Ok(self
            .find_stuck_tasks(threshold_minutes)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect())
    }

    /// Stuck tasks themselves. Rejects a threshold that is not positive or
    /// does not fit a duration.
    pub async fn find_stuck_tasks(&self, threshold_minutes: i64) -> PipelineResult<Vec<Task>> {
        let threshold = stuck_threshold(threshold_minutes)?;
        Ok(TaskRepo::find_stuck(&self.pool, threshold).await?)
    }

    /// Guarded `Processing -> Pending` reset.
    pub async fn requeue(&self, id: DbId) -> PipelineResult<bool> {
        Ok(TaskRepo::requeue(&self.pool, id).await?)
    }

    /// Guarded `Processing -> Failed` for a task out of requeue budget.
    pub async fn fail_stuck(&self, id: DbId, error_message: &str) -> PipelineResult<bool> {
        let message = truncate_message(error_message, MAX_ERROR_MESSAGE_LEN);
        Ok(TaskRepo::fail_stuck(&self.pool, id, message).await?)
    }

    // ── Migration side ───────────────────────────────────────────────

    pub async fn find_unmigrated(&self, limit: i64) -> PipelineResult<Vec<Task>> {
        Ok(TaskRepo::find_unmigrated(&self.pool, limit).await?)
    }

    pub async fn find_history(&self, task_id: DbId) -> PipelineResult<Option<DrawingHistory>> {
        Ok(HistoryRepo::find_by_task(&self.pool, task_id).await?)
    }

    /// Fenced swap to the permanent URL. `false` means already migrated.
    pub async fn migrate_to_permanent_url(
        &self,
        id: DbId,
        url: &str,
        thumbnail_url: Option<&str>,
        expected_origin_url: &str,
    ) -> PipelineResult<bool> {
        validate_artifact_url(url)?;
        Ok(TaskRepo::migrate_to_permanent_url(
            &self.pool,
            id,
            url,
            thumbnail_url,
            expected_origin_url,
        )
        .await?)
    }

    /// Fenced output rewrite of a task and its history row together.
    pub async fn update_task_and_history(&self, rewrite: &OutputUrlRewrite) -> PipelineResult<bool> {
        validate_artifact_url(&rewrite.url)?;
        Ok(TaskRepo::update_task_and_history(&self.pool, rewrite).await?)
    }
}
