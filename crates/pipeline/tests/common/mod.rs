//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use drawq_db::models::task::CreateTask;
use drawq_pipeline::error::{PipelineError, PipelineResult};
use drawq_pipeline::provider::{
    GeneratedArtifact, GenerationProvider, GenerationRequest, ProgressSink,
};
use drawq_pipeline::storage::{PermanentUrls, StorageClient};
use drawq_pipeline::worker::WorkerSettings;
use sqlx::PgPool;

pub fn new_task(prompt: &str) -> CreateTask {
    CreateTask {
        user_id: 11,
        model_id: 4,
        prompt: prompt.to_string(),
        reference_images: vec!["https://img.example.com/ref.png".to_string()],
        aspect_ratio: Some("3:4".to_string()),
        process_mode: Some("standard".to_string()),
        tolerance: None,
    }
}

pub fn worker_settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(20),
        claim_scan_limit: 10,
        generation_timeout: Duration::from_secs(5),
    }
}

/// Push a task's `created_at` into the past so the reaper sees it as stuck.
pub async fn backdate_minutes(pool: &PgPool, task_id: i64, minutes: i64) {
    sqlx::query("UPDATE drawing_tasks SET created_at = $2 WHERE id = $1")
        .bind(task_id)
        .bind(Utc::now() - chrono::Duration::minutes(minutes))
        .execute(pool)
        .await
        .unwrap();
}

/// Returns a per-task origin URL and reports progress once.
#[derive(Default)]
pub struct EchoProvider {
    pub calls: AtomicUsize,
}

impl EchoProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for EchoProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
        progress: &ProgressSink,
    ) -> PipelineResult<GeneratedArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress.report(50, "rendering").await;
        tokio::task::yield_now().await;
        Ok(GeneratedArtifact {
            result_url: format!("https://provider.example.com/out/{}.png", request.task_id),
            thumbnail_url: Some(format!(
                "https://provider.example.com/out/{}_thumb.png",
                request.task_id
            )),
        })
    }
}

/// Always fails with a provider error.
pub struct FailingProvider;

#[async_trait]
impl GenerationProvider for FailingProvider {
    async fn generate(
        &self,
        _request: &GenerationRequest,
        _progress: &ProgressSink,
    ) -> PipelineResult<GeneratedArtifact> {
        Err(PipelineError::Provider("content policy violation".into()))
    }
}

/// Never returns within any reasonable timeout.
pub struct HangingProvider;

#[async_trait]
impl GenerationProvider for HangingProvider {
    async fn generate(
        &self,
        _request: &GenerationRequest,
        _progress: &ProgressSink,
    ) -> PipelineResult<GeneratedArtifact> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(PipelineError::Provider("unreachable".into()))
    }
}

/// Returns an artifact URL that is not http(s).
pub struct BogusUrlProvider;

#[async_trait]
impl GenerationProvider for BogusUrlProvider {
    async fn generate(
        &self,
        _request: &GenerationRequest,
        _progress: &ProgressSink,
    ) -> PipelineResult<GeneratedArtifact> {
        Ok(GeneratedArtifact {
            result_url: "file:///tmp/out.png".into(),
            thumbnail_url: None,
        })
    }
}

/// Rewrites origin URLs onto a CDN host.
#[derive(Default)]
pub struct CdnStorage {
    pub calls: AtomicUsize,
}

impl CdnStorage {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageClient for CdnStorage {
    async fn persist(
        &self,
        origin_url: &str,
        origin_thumbnail_url: Option<&str>,
    ) -> PipelineResult<PermanentUrls> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rehost = |url: &str| url.replace("provider.example.com/out", "cdn.example.com/perm");
        Ok(PermanentUrls {
            url: rehost(origin_url),
            thumbnail_url: origin_thumbnail_url.map(rehost),
        })
    }
}

/// Storage gateway that is down.
pub struct DownStorage;

#[async_trait]
impl StorageClient for DownStorage {
    async fn persist(
        &self,
        _origin_url: &str,
        _origin_thumbnail_url: Option<&str>,
    ) -> PipelineResult<PermanentUrls> {
        Err(PipelineError::Storage("gateway returned 503: unavailable".into()))
    }
}
