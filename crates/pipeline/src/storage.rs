//! Object-storage gateway seam used by the migration job.
//!
//! The gateway copies an artifact from its origin URL into long-term storage
//! and returns the permanent location. Copying the same origin twice must
//! be harmless; the task-side write is fenced regardless.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Permanent locations of a migrated artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PermanentUrls {
    pub url: String,
    pub thumbnail_url: Option<String>,
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn persist(
        &self,
        origin_url: &str,
        origin_thumbnail_url: Option<&str>,
    ) -> PipelineResult<PermanentUrls>;
}

#[derive(Serialize)]
struct PersistRequest<'a> {
    source_url: &'a str,
    thumbnail_url: Option<&'a str>,
}

/// HTTP client for a storage gateway exposing `POST {api_url}/persist`.
pub struct HttpStorageClient {
    client: reqwest::Client,
    api_url: String,
}

impl HttpStorageClient {
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn persist(
        &self,
        origin_url: &str,
        origin_thumbnail_url: Option<&str>,
    ) -> PipelineResult<PermanentUrls> {
        let response = self
            .client
            .post(format!("{}/persist", self.api_url))
            .json(&PersistRequest {
                source_url: origin_url,
                thumbnail_url: origin_thumbnail_url,
            })
            .send()
            .await
            .map_err(|e| PipelineError::Storage(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PipelineError::Storage(format!(
                "gateway returned {}: {body}",
                status.as_u16()
            )));
        }

        response
            .json::<PermanentUrls>()
            .await
            .map_err(|e| PipelineError::Storage(format!("malformed gateway response: {e}")))
    }
}
