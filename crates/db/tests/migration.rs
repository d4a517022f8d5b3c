//! Integration tests for completion and the permanent-storage migration.
//!
//! - Completion records the origin URL and bumps `url_version`
//! - Migration is a fenced compare-and-swap, idempotent under replay
//! - Task and history rows move together or not at all

use drawq_core::task_status::TaskStatus;
use drawq_db::models::task::{CreateTask, OutputUrlRewrite};
use drawq_db::repositories::{HistoryRepo, TaskRepo};
use sqlx::PgPool;

const ORIGIN: &str = "https://provider.example.com/out/a.png";
const ORIGIN_THUMB: &str = "https://provider.example.com/out/a_thumb.png";
const PERMANENT: &str = "https://cdn.example.com/drawings/a.png";
const PERMANENT_THUMB: &str = "https://cdn.example.com/drawings/a_thumb.png";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_task(prompt: &str) -> CreateTask {
    CreateTask {
        user_id: 1,
        model_id: 3,
        prompt: prompt.to_string(),
        reference_images: vec![],
        aspect_ratio: Some("1:1".to_string()),
        process_mode: None,
        tolerance: None,
    }
}

async fn acquired_task(pool: &PgPool, prompt: &str) -> i64 {
    let task = TaskRepo::create(pool, &new_task(prompt)).await.unwrap();
    assert!(TaskRepo::try_acquire(pool, task.id).await.unwrap());
    task.id
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_lifecycle_scenario(pool: PgPool) {
    let task = TaskRepo::create(&pool, &new_task("T1")).await.unwrap();
    assert_eq!(task.url_version, 0);

    assert!(TaskRepo::try_acquire(&pool, task.id).await.unwrap());

    assert!(TaskRepo::complete_with_origin_url(&pool, task.id, "A", None)
        .await
        .unwrap());
    let t = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status().unwrap(), TaskStatus::Completed);
    assert_eq!(t.url_version, 1);
    assert!(!t.is_migrated);
    assert_eq!(t.progress, 100);
    assert!(t.completed_at.is_some());

    assert!(
        TaskRepo::migrate_to_permanent_url(&pool, task.id, "B", None, "A")
            .await
            .unwrap()
    );
    let t = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.url_version, 2);
    assert!(t.is_migrated);
    assert_eq!(t.result_url.as_deref(), Some("B"));
    assert_eq!(t.original_url.as_deref(), Some("A"));

    assert!(
        !TaskRepo::migrate_to_permanent_url(&pool, task.id, "B", None, "A")
            .await
            .unwrap()
    );
    let t = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.url_version, 2);
    assert!(t.is_migrated);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_completion_sets_origin_fields(pool: PgPool) {
    let id = acquired_task(&pool, "origin").await;
    TaskRepo::update_progress(&pool, id, 60, Some("upscaling"))
        .await
        .unwrap();

    TaskRepo::complete_with_origin_url(&pool, id, ORIGIN, Some(ORIGIN_THUMB))
        .await
        .unwrap();

    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(t.result_url.as_deref(), Some(ORIGIN));
    assert_eq!(t.original_url.as_deref(), Some(ORIGIN));
    assert_eq!(t.thumbnail_url.as_deref(), Some(ORIGIN_THUMB));
    assert_eq!(t.progress, 100);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_terminal_tasks_reject_second_completion(pool: PgPool) {
    let id = acquired_task(&pool, "twice").await;
    assert!(TaskRepo::complete_with_origin_url(&pool, id, ORIGIN, None)
        .await
        .unwrap());
    TaskRepo::migrate_to_permanent_url(&pool, id, PERMANENT, None, ORIGIN)
        .await
        .unwrap();

    assert!(!TaskRepo::complete_with_origin_url(&pool, id, "https://other/x.png", None)
        .await
        .unwrap());
    assert!(!TaskRepo::mark_failed(&pool, id, "late failure").await.unwrap());

    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(t.status().unwrap(), TaskStatus::Completed);
    assert!(t.is_migrated, "is_migrated must never reset");
    assert_eq!(t.url_version, 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_failed_task_stays_failed(pool: PgPool) {
    let id = acquired_task(&pool, "doomed").await;
    assert!(TaskRepo::mark_failed(&pool, id, "provider timeout").await.unwrap());

    assert!(!TaskRepo::complete_with_origin_url(&pool, id, ORIGIN, None)
        .await
        .unwrap());

    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(t.status().unwrap(), TaskStatus::Failed);
    assert_eq!(t.error_message.as_deref(), Some("provider timeout"));
    assert!(t.completed_at.is_some());
    assert_eq!(t.url_version, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_migration_requires_completion(pool: PgPool) {
    let id = acquired_task(&pool, "still running").await;

    assert!(!TaskRepo::migrate_to_permanent_url(&pool, id, PERMANENT, None, ORIGIN)
        .await
        .unwrap());
    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert!(!t.is_migrated);
    assert_eq!(t.url_version, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_migration_with_stale_origin_is_noop(pool: PgPool) {
    let id = acquired_task(&pool, "stale").await;
    TaskRepo::complete_with_origin_url(&pool, id, ORIGIN, None)
        .await
        .unwrap();

    assert!(!TaskRepo::migrate_to_permanent_url(
        &pool,
        id,
        PERMANENT,
        None,
        "https://provider.example.com/out/other.png",
    )
    .await
    .unwrap());

    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(t.result_url.as_deref(), Some(ORIGIN));
    assert_eq!(t.url_version, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_migrations_apply_once(pool: PgPool) {
    let id = acquired_task(&pool, "contended").await;
    TaskRepo::complete_with_origin_url(&pool, id, ORIGIN, None)
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let url = format!("https://cdn.example.com/drawings/{i}.png");
                TaskRepo::migrate_to_permanent_url(&pool, id, &url, None, ORIGIN).await
            })
        })
        .collect();

    let wins = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|joined| *joined.as_ref().unwrap().as_ref().unwrap())
        .count();
    assert_eq!(wins, 1);

    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(t.url_version, 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_find_unmigrated_lists_only_pending_migrations(pool: PgPool) {
    let migrated = acquired_task(&pool, "migrated").await;
    TaskRepo::complete_with_origin_url(&pool, migrated, ORIGIN, None)
        .await
        .unwrap();
    TaskRepo::migrate_to_permanent_url(&pool, migrated, PERMANENT, None, ORIGIN)
        .await
        .unwrap();

    let waiting = acquired_task(&pool, "waiting").await;
    TaskRepo::complete_with_origin_url(&pool, waiting, ORIGIN, None)
        .await
        .unwrap();

    let _running = acquired_task(&pool, "running").await;

    let found = TaskRepo::find_unmigrated(&pool, 10).await.unwrap();
    let ids: Vec<i64> = found.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![waiting]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_complete_with_history_creates_history_row(pool: PgPool) {
    let id = acquired_task(&pool, "with history").await;

    let done = TaskRepo::complete_with_history(&pool, id, ORIGIN, Some(ORIGIN_THUMB))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.task.url_version, 1);
    assert_eq!(done.history.task_id, id);
    assert_eq!(done.history.result_url, ORIGIN);
    assert_eq!(done.history.url_version, 1);
    assert!(!done.history.is_migrated);

    // Already terminal: nothing written.
    assert!(TaskRepo::complete_with_history(&pool, id, "https://x/y.png", None)
        .await
        .unwrap()
        .is_none());
    let history = HistoryRepo::find_by_task(&pool, id).await.unwrap().unwrap();
    assert_eq!(history.result_url, ORIGIN);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_update_task_and_history_in_lockstep(pool: PgPool) {
    let id = acquired_task(&pool, "lockstep").await;
    let done = TaskRepo::complete_with_history(&pool, id, ORIGIN, Some(ORIGIN_THUMB))
        .await
        .unwrap()
        .unwrap();

    let rewrite = OutputUrlRewrite {
        task_id: id,
        history_id: done.history.id,
        url: PERMANENT.to_string(),
        thumbnail_url: Some(PERMANENT_THUMB.to_string()),
        is_migrated: true,
        expected_origin_url: ORIGIN.to_string(),
        expected_url_version: done.task.url_version,
    };
    assert!(TaskRepo::update_task_and_history(&pool, &rewrite).await.unwrap());

    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    let h = HistoryRepo::find_by_id(&pool, done.history.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(t.result_url.as_deref(), Some(PERMANENT));
    assert_eq!(h.result_url, PERMANENT);
    assert_eq!(h.thumbnail_url.as_deref(), Some(PERMANENT_THUMB));
    assert!(t.is_migrated && h.is_migrated);
    assert_eq!(t.url_version, 2);
    assert_eq!(h.url_version, t.url_version);

    // Replay is a no-op on both rows.
    assert!(!TaskRepo::update_task_and_history(&pool, &rewrite).await.unwrap());
    let h = HistoryRepo::find_by_id(&pool, done.history.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.url_version, 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_update_with_mismatched_history_rolls_back_task(pool: PgPool) {
    let id = acquired_task(&pool, "mismatch").await;
    TaskRepo::complete_with_history(&pool, id, ORIGIN, None)
        .await
        .unwrap()
        .unwrap();

    let rewrite = OutputUrlRewrite {
        task_id: id,
        history_id: 987_654,
        url: PERMANENT.to_string(),
        thumbnail_url: None,
        is_migrated: true,
        expected_origin_url: ORIGIN.to_string(),
        expected_url_version: 1,
    };
    assert!(!TaskRepo::update_task_and_history(&pool, &rewrite).await.unwrap());

    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert!(!t.is_migrated, "task write must roll back with the history write");
    assert_eq!(t.url_version, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_unmigrated_rewrite_replay_is_noop(pool: PgPool) {
    let id = acquired_task(&pool, "rehost").await;
    let done = TaskRepo::complete_with_history(&pool, id, ORIGIN, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.task.url_version, 1);

    // A rewrite that keeps the row unmigrated leaves the origin fence open.
    let rewrite = OutputUrlRewrite {
        task_id: id,
        history_id: done.history.id,
        url: "https://mirror.example.com/a.png".to_string(),
        thumbnail_url: None,
        is_migrated: false,
        expected_origin_url: ORIGIN.to_string(),
        expected_url_version: done.task.url_version,
    };
    assert!(TaskRepo::update_task_and_history(&pool, &rewrite).await.unwrap());
    assert!(!TaskRepo::update_task_and_history(&pool, &rewrite).await.unwrap());

    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    let h = HistoryRepo::find_by_id(&pool, done.history.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!t.is_migrated);
    assert_eq!(t.url_version, 2);
    assert_eq!(h.url_version, 2);
    assert_eq!(h.result_url, "https://mirror.example.com/a.png");

    // The migration still applies on top, from the version it reads.
    let migrate = OutputUrlRewrite {
        url: PERMANENT.to_string(),
        is_migrated: true,
        expected_url_version: t.url_version,
        ..rewrite
    };
    assert!(TaskRepo::update_task_and_history(&pool, &migrate).await.unwrap());
    let t = TaskRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert!(t.is_migrated);
    assert_eq!(t.url_version, 3);
}
