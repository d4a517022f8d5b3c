//! Drawing history entity: the user-facing copy of a completed task's artifact.

use drawq_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `drawing_history` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DrawingHistory {
    pub id: DbId,
    pub task_id: DbId,
    pub user_id: DbId,
    pub prompt: String,
    pub result_url: String,
    pub thumbnail_url: Option<String>,
    pub is_migrated: bool,
    /// Mirrors the owning task's `url_version` after each lockstep write.
    pub url_version: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
