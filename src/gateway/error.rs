//! Error types for the model gateway.

use std::time::Duration;
use thiserror::Error;

/// Additional context from backend errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the backend.
    pub http_status: Option<u16>,
    /// Backend-specific error code (e.g. "rate_limit_exceeded").
    pub backend_code: Option<String>,
    /// Request ID from the backend (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.backend_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when invoking a backend.
///
/// The gateway performs exactly one outbound call per invocation; retry
/// policy lives in the dispatcher, which consults [`GatewayError::is_retryable`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The backend did not respond within the deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Authentication or authorization failure - fatal for this backend,
    /// never retried.
    #[error("{backend} auth error: {message}")]
    Auth {
        backend: String,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Backend-side error. Rate limits and 5xx-class conditions are
    /// retryable; malformed responses and 4xx rejections are not.
    #[error("{backend} error: {message}")]
    Backend {
        backend: String,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// Invalid request - permanent error, surfaced immediately.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No backend registered under this id.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing API key, bad base URL, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn auth(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            backend: backend.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn auth_with_context(
        backend: impl Into<String>,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::Auth {
            backend: backend.into(),
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn backend(backend: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
            retryable,
            context: None,
        }
    }

    pub fn backend_with_context(
        backend: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the dispatcher may retry this invocation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Auth { .. } => false,
            Self::Backend { retryable, .. } => *retryable,
            Self::InvalidRequest(_) => false,
            Self::UnknownBackend(_) => false,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Config(_) => false,
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Auth { .. } => "auth_error",
            Self::Backend { .. } => "backend_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnknownBackend(_) => "unknown_backend",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Auth { context, .. } => context.as_ref(),
            Self::Backend { context, .. } => context.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_never_retryable() {
        let err = GatewayError::auth("zhipu", "bad key");
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "auth_error");
    }

    #[test]
    fn timeout_is_retryable() {
        let err = GatewayError::Timeout(Duration::from_secs(5));
        assert!(err.is_retryable());
    }

    #[test]
    fn backend_retryability_follows_flag() {
        assert!(GatewayError::backend("tongyi", "500", true).is_retryable());
        assert!(!GatewayError::backend("tongyi", "bad json", false).is_retryable());
    }
}
