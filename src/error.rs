//! Top-level errors surfaced to callers of the orchestrator.
//!
//! Per-backend failures (timeouts, auth rejections, 5xx) are not errors at
//! this level; they land in individual invocation statuses and the pipeline
//! continues as long as one agent succeeds.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The request cannot be processed as submitted (empty text, image
    /// request without image bytes).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Every dispatched agent failed or timed out; there is no candidate
    /// answer to return.
    #[error("no model produced an answer")]
    NoAvailableModel,

    /// Configuration rejected at load or validation time.
    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}
