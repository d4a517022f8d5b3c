//! Repository for the `drawing_history` table.
//!
//! Rows are created by [`TaskRepo::complete_with_history`] and rewritten by
//! [`TaskRepo::update_task_and_history`]; this repo only reads them.
//!
//! [`TaskRepo::complete_with_history`]: super::TaskRepo::complete_with_history
//! [`TaskRepo::update_task_and_history`]: super::TaskRepo::update_task_and_history

use drawq_core::types::DbId;
use sqlx::PgPool;

use crate::models::history::DrawingHistory;

/// Column list for `drawing_history` queries.
pub(crate) const HISTORY_COLUMNS: &str = "\
    id, task_id, user_id, prompt, result_url, thumbnail_url, \
    is_migrated, url_version, created_at, updated_at";

pub struct HistoryRepo;

impl HistoryRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<DrawingHistory>, sqlx::Error> {
        let query = format!("SELECT {HISTORY_COLUMNS} FROM drawing_history WHERE id = $1");
        sqlx::query_as::<_, DrawingHistory>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The history row recorded for a task, if it has completed.
    pub async fn find_by_task(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<Option<DrawingHistory>, sqlx::Error> {
        let query = format!("SELECT {HISTORY_COLUMNS} FROM drawing_history WHERE task_id = $1");
        sqlx::query_as::<_, DrawingHistory>(&query)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }
}
