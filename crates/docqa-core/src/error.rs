//! Error taxonomy shared by every docqa component.
//!
//! Each variant is scoped to the operation that produced it: a failed
//! generation call is delivered to one job's handle, an extraction failure
//! aborts one file of a batch, and so on. Nothing in the core retries.

use thiserror::Error;

/// Result alias used across the core traits.
pub type QaResult<T> = Result<T, QaError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QaError {
    /// The generation or embedding backend failed (network, resource exhaustion).
    #[error("backend error: {0}")]
    TransientBackend(String),

    /// The index or history store could not be reached.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// A document could not be turned into text.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The request was rejected before any work was queued.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The bounded job queue is full and the backpressure policy is `reject`.
    #[error("job queue is full")]
    QueueFull,

    /// The worker pool is shutting down; the job was not (fully) processed.
    #[error("worker pool is shutting down")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl QaError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        QaError::TransientBackend(err.to_string())
    }

    pub fn index<E: std::fmt::Display>(err: E) -> Self {
        QaError::IndexUnavailable(err.to_string())
    }

    pub fn extraction<E: std::fmt::Display>(err: E) -> Self {
        QaError::Extraction(err.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        QaError::Validation(msg.into())
    }

    /// Machine-readable code used by the HTTP layer and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            QaError::TransientBackend(_) => "backend_error",
            QaError::IndexUnavailable(_) => "index_unavailable",
            QaError::Extraction(_) => "extraction_error",
            QaError::Validation(_) => "bad_request",
            QaError::QueueFull => "queue_full",
            QaError::ShuttingDown => "shutting_down",
            QaError::Internal(_) => "internal",
        }
    }
}
