//! Generation provider seam.
//!
//! The provider is a black box invoked by a worker after acquisition: it
//! takes the prompt and reference images and hands back an artifact URL on
//! the provider's own host (the "origin" URL). [`HttpGenerationProvider`]
//! talks to a JSON HTTP endpoint; tests plug in their own implementations.

use async_trait::async_trait;
use drawq_core::types::DbId;
use drawq_db::models::task::Task;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::queue::TaskQueue;

/// Input handed to the provider for one task.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub task_id: DbId,
    pub model_id: DbId,
    pub prompt: String,
    pub reference_images: Vec<String>,
    pub aspect_ratio: Option<String>,
    pub process_mode: Option<String>,
    pub tolerance: Option<i16>,
}

impl From<&Task> for GenerationRequest {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            model_id: task.model_id,
            prompt: task.prompt.clone(),
            reference_images: task.reference_images.0.clone(),
            aspect_ratio: task.aspect_ratio.clone(),
            process_mode: task.process_mode.clone(),
            tolerance: task.tolerance,
        }
    }
}

/// Provider output: the artifact at its origin location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedArtifact {
    pub result_url: String,
    pub thumbnail_url: Option<String>,
}

/// Lets a provider push progress lines back onto the task row.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    queue: TaskQueue,
    task_id: DbId,
}

impl ProgressSink {
    pub fn new(queue: TaskQueue, task_id: DbId) -> Self {
        Self { queue, task_id }
    }

    /// Record progress. Failures are logged and swallowed.
    pub async fn report(&self, percent: i32, message: &str) {
        if let Err(e) = self
            .queue
            .report_progress(self.task_id, percent, Some(message))
            .await
        {
            tracing::warn!(task_id = self.task_id, error = %e, "Failed to record progress");
        }
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        progress: &ProgressSink,
    ) -> PipelineResult<GeneratedArtifact>;
}

/// HTTP client for a JSON generation endpoint.
///
/// Sends `POST {api_url}/generate` with the [`GenerationRequest`] body and
/// expects `{ "result_url": ..., "thumbnail_url": ... }` back.
pub struct HttpGenerationProvider {
    client: reqwest::Client,
    api_url: String,
}

impl HttpGenerationProvider {
    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
        progress: &ProgressSink,
    ) -> PipelineResult<GeneratedArtifact> {
        progress.report(5, "Submitted to provider").await;

        let response = self
            .client
            .post(format!("{}/generate", self.api_url))
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PipelineError::Provider(format!(
                "provider returned {}: {body}",
                status.as_u16()
            )));
        }

        let artifact = response
            .json::<GeneratedArtifact>()
            .await
            .map_err(|e| PipelineError::Provider(format!("malformed provider response: {e}")))?;

        progress.report(95, "Artifact received").await;
        Ok(artifact)
    }
}
