use std::time::Duration;

use drawq_core::error::CoreError;

/// Errors surfaced by the pipeline operations and loops.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A domain-level error from `drawq_core` (validation, not found).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database or transport failure. Safe to retry: no guarded write
    /// applies twice.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The external generation provider rejected or failed the request.
    #[error("Generation provider error: {0}")]
    Provider(String),

    /// The object-storage gateway failed to persist an artifact.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The generation call did not return within the configured limit.
    #[error("Generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Invalid or missing configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<validator::ValidationErrors> for PipelineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Core(CoreError::Validation(errors.to_string()))
    }
}

/// Convenience type alias for pipeline results.
pub type PipelineResult<T> = Result<T, PipelineError>;
