//! Repository for the `drawing_tasks` table.
//!
//! Every state change is a predicate-guarded `UPDATE` whose affected row count
//! is the only source of truth. Zero rows means another actor got there
//! first (or the task does not exist); callers branch on the returned `bool`
//! instead of treating it as an error.

use chrono::Utc;
use drawq_core::task_status::{StatusId, TaskStatus};
use drawq_core::types::{BatchGroupId, DbId, Timestamp};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use crate::models::history::DrawingHistory;
use crate::models::task::{
    CompletedTask, CreateBatch, CreateTask, OutputUrlRewrite, Task, TaskListQuery,
};
use crate::repositories::history_repo::HISTORY_COLUMNS;

/// Column list for `drawing_tasks` queries.
pub(crate) const COLUMNS: &str = "\
    id, user_id, model_id, prompt, reference_images, aspect_ratio, process_mode, tolerance, \
    status_id, progress, progress_message, \
    result_url, thumbnail_url, original_url, is_migrated, url_version, error_message, \
    parent_task_id, batch_group_id, split_index, requeue_count, \
    claimed_at, created_at, completed_at, updated_at";

/// Maximum page size for task listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for task listing.
const DEFAULT_LIMIT: i64 = 50;

/// Batch placement stamped on a child row at insert time.
struct BatchSlot {
    parent_task_id: Option<DbId>,
    batch_group_id: BatchGroupId,
    split_index: i32,
}

/// Provides queue, state-machine, and migration operations for drawing tasks.
pub struct TaskRepo;

impl TaskRepo {
    // ── Enqueue ──────────────────────────────────────────────────────

    /// Create a new Pending task with `url_version = 0`.
    pub async fn create(pool: &PgPool, input: &CreateTask) -> Result<Task, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        Self::insert(&mut *conn, input, None).await
    }

    /// Insert every child of a split request under one fresh batch group id.
    ///
    /// All rows are written in a single transaction so a group is never
    /// observed half-created. Children are numbered from 0 in input order.
    pub async fn create_batch(
        pool: &PgPool,
        input: &CreateBatch,
    ) -> Result<(BatchGroupId, Vec<Task>), sqlx::Error> {
        let batch_group_id = uuid::Uuid::now_v7();
        let mut tx = pool.begin().await?;

        let mut tasks = Vec::with_capacity(input.children.len());
        for (index, spec) in input.child_specs().iter().enumerate() {
            let slot = BatchSlot {
                parent_task_id: input.parent_task_id,
                batch_group_id,
                split_index: index as i32,
            };
            tasks.push(Self::insert(&mut *tx, spec, Some(slot)).await?);
        }

        tx.commit().await?;
        Ok((batch_group_id, tasks))
    }

    async fn insert(
        conn: &mut PgConnection,
        input: &CreateTask,
        slot: Option<BatchSlot>,
    ) -> Result<Task, sqlx::Error> {
        let query = format!(
            "INSERT INTO drawing_tasks \
                 (user_id, model_id, prompt, reference_images, aspect_ratio, process_mode, \
                  tolerance, status_id, parent_task_id, batch_group_id, split_index) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(input.user_id)
            .bind(input.model_id)
            .bind(&input.prompt)
            .bind(Json(&input.reference_images))
            .bind(&input.aspect_ratio)
            .bind(&input.process_mode)
            .bind(input.tolerance)
            .bind(TaskStatus::Pending.id())
            .bind(slot.as_ref().and_then(|s| s.parent_task_id))
            .bind(slot.as_ref().map(|s| s.batch_group_id))
            .bind(slot.as_ref().map(|s| s.split_index))
            .fetch_one(conn)
            .await
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Find a task by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM drawing_tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Oldest-first Pending tasks, the candidate list for pollers.
    pub async fn get_pending(pool: &PgPool, limit: i64) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM drawing_tasks \
             WHERE status_id = $1 \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(TaskStatus::Pending.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// All children of a batch group ordered by `split_index`.
    pub async fn get_by_batch_group(
        pool: &PgPool,
        batch_group_id: BatchGroupId,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM drawing_tasks \
             WHERE batch_group_id = $1 \
             ORDER BY split_index ASC"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(batch_group_id)
            .fetch_all(pool)
            .await
    }

    /// Newest-first tasks for one user with optional status filter and pagination.
    pub async fn get_user_tasks(
        pool: &PgPool,
        user_id: DbId,
        params: &TaskListQuery,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let query = format!(
            "SELECT {COLUMNS} FROM drawing_tasks \
             WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR status_id = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(user_id)
            .bind(params.status_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    // ── Acquisition ──────────────────────────────────────────────────

    /// Claim a Pending task for processing.
    ///
    /// The status read is only a short-circuit; the guarded update's row
    /// count decides the winner. Two pollers can both pass the read, but the
    /// second update re-checks `status_id = Pending` after the first commits
    /// and matches nothing. A missing task returns `false`.
    pub async fn try_acquire(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current: Option<StatusId> =
            sqlx::query_scalar("SELECT status_id FROM drawing_tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        match current {
            None => {
                tracing::debug!(task_id = id, "Acquire skipped: task not found");
                return Ok(false);
            }
            Some(status_id) if status_id != TaskStatus::Pending.id() => {
                tracing::debug!(task_id = id, status_id, "Acquire skipped: task not pending");
                return Ok(false);
            }
            Some(_) => {}
        }

        let result = sqlx::query(
            "UPDATE drawing_tasks SET status_id = $2, claimed_at = NOW() \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(TaskStatus::Processing.id())
        .bind(TaskStatus::Pending.id())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let acquired = result.rows_affected() == 1;
        if !acquired {
            tracing::debug!(task_id = id, "Acquire lost race to another poller");
        }
        Ok(acquired)
    }

    /// Walk up to `scan_limit` Pending candidates and acquire the first one
    /// this caller wins. Returns the task as it stands after acquisition.
    pub async fn claim_next(pool: &PgPool, scan_limit: i64) -> Result<Option<Task>, sqlx::Error> {
        for candidate in Self::get_pending(pool, scan_limit).await? {
            if Self::try_acquire(pool, candidate.id).await? {
                return Self::find_by_id(pool, candidate.id).await;
            }
        }
        Ok(None)
    }

    // ── Progress / terminal transitions ──────────────────────────────

    /// Best-effort progress update. Only applies while the task is Processing;
    /// never touches status or `url_version`.
    pub async fn update_progress(
        pool: &PgPool,
        id: DbId,
        percent: i16,
        message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE drawing_tasks SET progress = $2, progress_message = COALESCE($3, progress_message) \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(percent)
        .bind(message)
        .bind(TaskStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a task Completed with its provisional (origin) artifact URL.
    ///
    /// Records the origin URL as both `result_url` and `original_url`, resets
    /// `is_migrated`, and bumps `url_version`. Applies only from Processing, so
    /// neither an unclaimed nor a terminal task is ever rewritten.
    pub async fn complete_with_origin_url(
        pool: &PgPool,
        id: DbId,
        origin_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        let task = Self::complete_returning(&mut *conn, id, origin_url, thumbnail_url).await?;
        Ok(task.is_some())
    }

    /// Complete a task and create its history row in one transaction.
    ///
    /// Returns `None` (and writes nothing) when the task is missing or not
    /// Processing.
    pub async fn complete_with_history(
        pool: &PgPool,
        id: DbId,
        origin_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<Option<CompletedTask>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let Some(task) = Self::complete_returning(&mut *tx, id, origin_url, thumbnail_url).await?
        else {
            return Ok(None);
        };

        let query = format!(
            "INSERT INTO drawing_history \
                 (task_id, user_id, prompt, result_url, thumbnail_url, is_migrated, url_version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (task_id) DO UPDATE SET \
                 result_url = EXCLUDED.result_url, \
                 thumbnail_url = EXCLUDED.thumbnail_url, \
                 is_migrated = EXCLUDED.is_migrated, \
                 url_version = EXCLUDED.url_version \
             RETURNING {HISTORY_COLUMNS}"
        );
        let history = sqlx::query_as::<_, DrawingHistory>(&query)
            .bind(task.id)
            .bind(task.user_id)
            .bind(&task.prompt)
            .bind(origin_url)
            .bind(thumbnail_url)
            .bind(task.is_migrated)
            .bind(task.url_version)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(CompletedTask { task, history }))
    }

    async fn complete_returning(
        conn: &mut PgConnection,
        id: DbId,
        origin_url: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<Option<Task>, sqlx::Error> {
        // `is_migrated = false` is only ever written here, and only on a
        // Processing row, which can never have been migrated.
        let query = format!(
            "UPDATE drawing_tasks \
             SET status_id = $2, result_url = $3, thumbnail_url = $4, original_url = $3, \
                 is_migrated = false, url_version = url_version + 1, \
                 completed_at = NOW(), progress = 100, error_message = NULL \
             WHERE id = $1 AND status_id = $5 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(id)
            .bind(TaskStatus::Completed.id())
            .bind(origin_url)
            .bind(thumbnail_url)
            .bind(TaskStatus::Processing.id())
            .fetch_optional(conn)
            .await
    }

    /// Mark a task Failed with a descriptive message.
    ///
    /// Applies only from Processing. No automatic retry follows; the row
    /// stays Failed for operator inspection.
    pub async fn mark_failed(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE drawing_tasks \
             SET status_id = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(TaskStatus::Failed.id())
        .bind(error)
        .bind(TaskStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Reaper ───────────────────────────────────────────────────────

    /// Processing tasks created more than `threshold` ago, oldest first.
    pub async fn find_stuck(
        pool: &PgPool,
        threshold: chrono::Duration,
    ) -> Result<Vec<Task>, sqlx::Error> {
        Self::find_stuck_as_of(pool, threshold, Utc::now()).await
    }

    /// Processing tasks with `created_at < now - threshold`, oldest first.
    ///
    /// The comparison is strict: a task exactly `threshold` old is not stuck.
    pub async fn find_stuck_as_of(
        pool: &PgPool,
        threshold: chrono::Duration,
        now: Timestamp,
    ) -> Result<Vec<Task>, sqlx::Error> {
        let cutoff = now - threshold;
        let query = format!(
            "SELECT {COLUMNS} FROM drawing_tasks \
             WHERE status_id = $1 AND created_at < $2 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(TaskStatus::Processing.id())
            .bind(cutoff)
            .fetch_all(pool)
            .await
    }

    /// Return a stuck Processing task to Pending.
    ///
    /// Guarded on `status_id = Processing`, so of several reapers racing on
    /// the same task exactly one sees an affected row.
    pub async fn requeue(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE drawing_tasks \
             SET status_id = $2, requeue_count = requeue_count + 1, claimed_at = NULL, \
                 progress = 0, progress_message = NULL \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(TaskStatus::Pending.id())
        .bind(TaskStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fail a stuck Processing task whose requeue budget is spent.
    pub async fn fail_stuck(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE drawing_tasks \
             SET status_id = $2, error_message = $3, completed_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(TaskStatus::Failed.id())
        .bind(error)
        .bind(TaskStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Migration ────────────────────────────────────────────────────

    /// Completed, not-yet-migrated tasks with an origin URL, oldest completion first.
    pub async fn find_unmigrated(pool: &PgPool, limit: i64) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM drawing_tasks \
             WHERE status_id = $1 AND is_migrated = false AND original_url IS NOT NULL \
             ORDER BY completed_at ASC, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(TaskStatus::Completed.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Compare-and-swap the output URLs over to permanent storage.
    ///
    /// Matches only a Completed, unmigrated row whose `original_url` still
    /// equals `expected_origin_url`. `false` means the task was already
    /// migrated (or its origin changed) and there is nothing to do; replaying
    /// the call is always safe.
    pub async fn migrate_to_permanent_url(
        pool: &PgPool,
        id: DbId,
        permanent_url: &str,
        permanent_thumbnail_url: Option<&str>,
        expected_origin_url: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        let version = Self::swap_output_urls(
            &mut *conn,
            id,
            permanent_url,
            permanent_thumbnail_url,
            true,
            expected_origin_url,
            None,
        )
        .await?;
        Ok(version.is_some())
    }

    /// Rewrite output URLs on a task and its history row in one transaction.
    ///
    /// The task-side write is the same fenced swap as
    /// [`Self::migrate_to_permanent_url`]; the history row is only written
    /// after that guard matched, and receives the task's new `url_version`.
    /// Any failure rolls both rows back.
    pub async fn update_task_and_history(
        pool: &PgPool,
        rewrite: &OutputUrlRewrite,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let Some(url_version) = Self::swap_output_urls(
            &mut *tx,
            rewrite.task_id,
            &rewrite.url,
            rewrite.thumbnail_url.as_deref(),
            rewrite.is_migrated,
            &rewrite.expected_origin_url,
            Some(rewrite.expected_url_version),
        )
        .await?
        else {
            return Ok(false);
        };

        let history = sqlx::query(
            "UPDATE drawing_history \
             SET result_url = $3, thumbnail_url = $4, is_migrated = $5, url_version = $6 \
             WHERE id = $1 AND task_id = $2",
        )
        .bind(rewrite.history_id)
        .bind(rewrite.task_id)
        .bind(&rewrite.url)
        .bind(&rewrite.thumbnail_url)
        .bind(rewrite.is_migrated)
        .bind(url_version)
        .execute(&mut *tx)
        .await?;

        if history.rows_affected() == 0 {
            tracing::warn!(
                task_id = rewrite.task_id,
                history_id = rewrite.history_id,
                "History row missing for output rewrite; rolling back",
            );
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Fenced output-URL swap. Returns the new `url_version` when the row matched.
    ///
    /// With `expected_url_version` set, the row must also still carry that
    /// version, so a rewrite that keeps `is_migrated = false` cannot apply
    /// twice.
    async fn swap_output_urls(
        conn: &mut PgConnection,
        id: DbId,
        url: &str,
        thumbnail_url: Option<&str>,
        is_migrated: bool,
        expected_origin_url: &str,
        expected_url_version: Option<i32>,
    ) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE drawing_tasks \
             SET result_url = $2, thumbnail_url = $3, is_migrated = $4, \
                 url_version = url_version + 1 \
             WHERE id = $1 AND is_migrated = false AND original_url = $5 AND status_id = $6 \
               AND ($7::INTEGER IS NULL OR url_version = $7) \
             RETURNING url_version",
        )
        .bind(id)
        .bind(url)
        .bind(thumbnail_url)
        .bind(is_migrated)
        .bind(expected_origin_url)
        .bind(TaskStatus::Completed.id())
        .bind(expected_url_version)
        .fetch_optional(conn)
        .await
    }
}
