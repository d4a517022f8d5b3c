//! Drawing task entity and DTOs.

use drawq_core::error::CoreError;
use drawq_core::task_status::{StatusId, TaskStatus};
use drawq_core::types::{BatchGroupId, DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use validator::Validate;

use super::history::DrawingHistory;

/// A row from the `drawing_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: DbId,
    pub user_id: DbId,
    pub model_id: DbId,
    pub prompt: String,
    pub reference_images: Json<Vec<String>>,
    pub aspect_ratio: Option<String>,
    pub process_mode: Option<String>,
    pub tolerance: Option<i16>,
    pub status_id: StatusId,
    pub progress: i16,
    pub progress_message: Option<String>,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Provisional artifact location recorded at completion, before migration.
    pub original_url: Option<String>,
    pub is_migrated: bool,
    /// Fencing token bumped by every successful output-URL write.
    pub url_version: i32,
    pub error_message: Option<String>,
    pub parent_task_id: Option<DbId>,
    pub batch_group_id: Option<BatchGroupId>,
    pub split_index: Option<i32>,
    pub requeue_count: i32,
    pub claimed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Task {
    /// Decode `status_id` into the state-machine enum.
    pub fn status(&self) -> Result<TaskStatus, CoreError> {
        TaskStatus::try_from(self.status_id)
    }
}

/// DTO for enqueueing a new drawing task.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTask {
    pub user_id: DbId,
    pub model_id: DbId,
    #[validate(length(min = 1, max = 4000))]
    pub prompt: String,
    #[serde(default)]
    #[validate(length(max = 16))]
    pub reference_images: Vec<String>,
    pub aspect_ratio: Option<String>,
    pub process_mode: Option<String>,
    #[validate(range(min = 0, max = 100))]
    pub tolerance: Option<i16>,
}

/// Per-child overrides applied on top of a batch template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchChild {
    pub prompt: Option<String>,
    pub reference_images: Option<Vec<String>>,
    pub process_mode: Option<String>,
}

/// DTO for a split/upscale request fanned out into child tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBatch {
    pub parent_task_id: Option<DbId>,
    pub template: CreateTask,
    pub children: Vec<BatchChild>,
}

impl CreateBatch {
    /// Resolve each child into a full task spec, in split order.
    pub fn child_specs(&self) -> Vec<CreateTask> {
        self.children
            .iter()
            .map(|child| CreateTask {
                prompt: child
                    .prompt
                    .clone()
                    .unwrap_or_else(|| self.template.prompt.clone()),
                reference_images: child
                    .reference_images
                    .clone()
                    .unwrap_or_else(|| self.template.reference_images.clone()),
                process_mode: child
                    .process_mode
                    .clone()
                    .or_else(|| self.template.process_mode.clone()),
                ..self.template.clone()
            })
            .collect()
    }
}

/// Output-URL rewrite applied to a task and its history row together.
///
/// The task-side write is fenced on `expected_origin_url` exactly like a
/// plain migration, and additionally on `expected_url_version`, so replaying
/// the same rewrite is a no-op even when it leaves `is_migrated` false.
#[derive(Debug, Clone)]
pub struct OutputUrlRewrite {
    pub task_id: DbId,
    pub history_id: DbId,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub is_migrated: bool,
    pub expected_origin_url: String,
    /// The task's `url_version` as read by the caller.
    pub expected_url_version: i32,
}

/// Result of completing a task and recording its history row.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedTask {
    pub task: Task,
    pub history: DrawingHistory,
}

/// Query parameters for listing a user's tasks.
#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    /// Filter by status ID.
    pub status_id: Option<StatusId>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
