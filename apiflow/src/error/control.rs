//! Errors returned by orchestration stages.

use super::kind::ApiError;
use thiserror::Error;

/// Failure returned by every orchestration entry point.
///
/// Classified remote failures pass through as [`OrchestratorError::Api`]
/// untouched. The remaining variants are control signals raised by the
/// stages themselves and have no remote counterpart.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// A classified API failure.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A pending debounced call was cancelled.
    #[error("call cancelled before it was issued")]
    Cancelled,

    /// The request queue is at capacity.
    #[error("request queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The request queue was cleared while the request was pending.
    #[error("request queue was cleared")]
    QueueCleared,

    /// A batch was flushed with no processor registered for its key.
    #[error("no batch processor registered for key '{key}'")]
    NoProcessorRegistered { key: String },

    /// A batch processor returned fewer results than it was given requests.
    #[error("batch processor returned {received} results for {expected} requests")]
    BatchResultMismatch { expected: usize, received: usize },

    /// The concurrency limiter was shut down.
    #[error("concurrency limiter closed")]
    LimiterClosed,

    /// The stage holding the request went away before resolving it.
    #[error("request abandoned before completion")]
    Abandoned,
}

impl OrchestratorError {
    /// Returns the classified API error, if this is one.
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the machine-readable code, delegating to the API error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Api(err) => err.code(),
            Self::Cancelled => "CANCELLED",
            Self::QueueFull { .. } => "QUEUE_FULL",
            Self::QueueCleared => "QUEUE_CLEARED",
            Self::NoProcessorRegistered { .. } => "NO_PROCESSOR_REGISTERED",
            Self::BatchResultMismatch { .. } => "BATCH_RESULT_MISMATCH",
            Self::LimiterClosed => "LIMITER_CLOSED",
            Self::Abandoned => "ABANDONED",
        }
    }

    /// Returns true for stage-generated control signals.
    pub fn is_control_signal(&self) -> bool {
        !matches!(self, Self::Api(_))
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for OrchestratorError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::Abandoned
    }
}
