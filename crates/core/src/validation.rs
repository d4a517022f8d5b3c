//! Input validation shared by the task store and the queue facade.

use crate::error::CoreError;

/// Upper bound on the progress percentage.
pub const MAX_PROGRESS: i16 = 100;

/// Maximum length of a progress status line, in characters.
pub const MAX_PROGRESS_MESSAGE_LEN: usize = 500;

/// Maximum length of a stored error message, in characters.
pub const MAX_ERROR_MESSAGE_LEN: usize = 2000;

/// Clamp a reported percentage into 0..=100.
///
/// Progress reports are best effort, so out-of-range values are corrected
/// rather than rejected.
pub fn clamp_progress(percent: i32) -> i16 {
    percent.clamp(0, MAX_PROGRESS as i32) as i16
}

/// Truncate free text to at most `max` characters on a char boundary.
pub fn truncate_message(message: &str, max: usize) -> &str {
    match message.char_indices().nth(max) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

/// Validate an artifact URL written to a task's output fields.
pub fn validate_artifact_url(url: &str) -> Result<(), CoreError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Artifact URL must not be empty".into()));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(CoreError::Validation(format!(
            "Artifact URL must be http(s): '{trimmed}'"
        )));
    }
    Ok(())
}

/// Convert a stuck-task threshold in minutes into a duration.
///
/// The threshold must be positive and representable as a duration.
pub fn stuck_threshold(minutes: i64) -> Result<chrono::Duration, CoreError> {
    if minutes <= 0 {
        return Err(CoreError::Validation(format!(
            "Stuck threshold must be positive, got {minutes} minute(s)"
        )));
    }
    chrono::Duration::try_minutes(minutes).ok_or_else(|| {
        CoreError::Validation(format!("Stuck threshold of {minutes} minutes is out of range"))
    })
}
