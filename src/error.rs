//! Error taxonomy for the run lifecycle.

use thiserror::Error;

/// Rejected input; raised before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("content cannot be empty")]
pub struct ValidationError;

/// Failures talking to the pipeline backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to reach API: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("backend returned {status}{}", detail_suffix(.detail))]
    Status {
        status: reqwest::StatusCode,
        detail: Option<String>,
    },
    #[error("malformed response body: {0}")]
    Decode(#[source] reqwest::Error),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

/// Terminal and transient outcomes of a run, as surfaced to the user.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{message}")]
    Submission {
        message: String,
        #[source]
        source: ApiError,
    },
    #[error("poll skipped: {0}")]
    TransientPoll(#[source] ApiError),
    #[error("{}", crate::model::STAGE_FAILURE_MESSAGE)]
    StageFailure,
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
}

impl RunError {
    /// Map a failed `POST /run` to the message shown to the user.
    pub fn submission(source: ApiError) -> Self {
        let message = match &source {
            ApiError::Status {
                detail: Some(detail),
                ..
            } => detail.clone(),
            ApiError::Status { detail: None, .. } | ApiError::Decode(_) => {
                "Failed to start pipeline".to_string()
            }
            ApiError::Transport(_) => "Failed to reach API".to_string(),
        };
        RunError::Submission { message, source }
    }
}
