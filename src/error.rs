//! Error taxonomy shared by every component.
//!
//! Each [`AgentError`] variant carries a stable machine-readable [`code`](AgentError::code)
//! and maps onto an HTTP status in the server. None of them are fatal to the
//! process: callers always receive a structured result.

use thiserror::Error;

/// Convenience alias used across the library.
pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Malformed input; the caller can fix the request and retry.
    #[error("validation error: {0}")]
    Validation(String),

    /// The uploaded file could not be decoded into text.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The uploaded file decoded to no usable text.
    #[error("empty content: {0}")]
    EmptyContent(String),

    /// Chunks of an uploaded file could not be embedded.
    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),

    /// The configured credentials were rejected by the backend.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The embedding or model backend is unreachable.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// No agent instance has been successfully constructed yet.
    #[error("agent not ready: {0}")]
    NotReady(String),

    /// A reinitialization is already in flight.
    #[error("busy: {0}")]
    Busy(String),

    /// The model backend failed while answering a chat turn.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// An ingestion was abandoned because its file was deleted meanwhile.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The local database or blob directory failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl AgentError {
    /// Machine-readable error code surfaced to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation_error",
            AgentError::UnsupportedFormat(_) => "unsupported_format",
            AgentError::EmptyContent(_) => "empty_content",
            AgentError::EmbeddingFailure(_) => "embedding_failure",
            AgentError::Authentication(_) => "authentication_error",
            AgentError::DependencyUnavailable(_) => "dependency_unavailable",
            AgentError::NotReady(_) => "not_ready",
            AgentError::Busy(_) => "busy",
            AgentError::Upstream(_) => "upstream_error",
            AgentError::Cancelled(_) => "cancelled",
            AgentError::Storage(_) => "storage_error",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::DependencyUnavailable(_)
                | AgentError::NotReady(_)
                | AgentError::Busy(_)
                | AgentError::Upstream(_)
        )
    }
}

/// Failure of a call to the embedding or completion backend.
///
/// Callers translate it into the [`AgentError`] that fits the operation:
/// a rejected key is an authentication problem while constructing an agent
/// but an upstream failure in the middle of a chat turn.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// HTTP 401/403.
    #[error("credentials rejected: {0}")]
    Unauthorized(String),
    /// Any other non-retryable 4xx.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// Network failure, timeout, 429 or 5xx after retries.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with something we could not parse.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Classify a failed HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let msg = format!("{}: {}", status, truncate(body, 300));
        match status.as_u16() {
            401 | 403 => BackendError::Unauthorized(msg),
            429 => BackendError::Unavailable(msg),
            s if s >= 500 => BackendError::Unavailable(msg),
            _ => BackendError::Rejected(msg),
        }
    }

    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }

    /// Mapping used while constructing an agent instance.
    pub fn into_init_error(self) -> AgentError {
        match self {
            BackendError::Unauthorized(m) | BackendError::Rejected(m) => {
                AgentError::Authentication(m)
            }
            BackendError::Unavailable(m) | BackendError::InvalidResponse(m) => {
                AgentError::DependencyUnavailable(m)
            }
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

impl From<sqlx::Error> for AgentError {
    fn from(err: sqlx::Error) -> Self {
        AgentError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Storage(err.to_string())
    }
}
