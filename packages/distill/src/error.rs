//! Typed errors for the distillation pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Classification of completion-service failures.
///
/// This taxonomy is what the retry policy and credential pool branch on:
/// retryable kinds are retried with a different credential, `RateLimit`
/// additionally cools the offending key down until the next quota reset,
/// and non-retryable kinds propagate immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    /// The service rejected the call for exceeding its rate or quota.
    RateLimit,

    /// The call did not complete within its timeout.
    Timeout,

    /// The service returned a 5xx-class failure.
    ServerError,

    /// The credential was rejected (invalid or revoked key).
    Auth,

    /// The request itself was malformed (contract error).
    Malformed,
}

impl ServiceErrorKind {
    /// Whether a failure of this kind is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceErrorKind::RateLimit | ServiceErrorKind::Timeout | ServiceErrorKind::ServerError
        )
    }
}

/// A failure reported by the external completion service.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ServiceError {
    /// What class of failure this is.
    pub kind: ServiceErrorKind,

    /// Human-readable detail from the service or transport.
    pub message: String,
}

impl ServiceError {
    /// Create a service error of the given kind.
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Rate-limit failure.
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::RateLimit, message)
    }

    /// Timeout failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Timeout, message)
    }

    /// 5xx-class failure.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::ServerError, message)
    }

    /// Authentication failure.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Auth, message)
    }

    /// Malformed-request failure.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Malformed, message)
    }
}

/// Errors surfaced by the completion client after pool selection and retry.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Every credential is over quota or cooling down for this model.
    ///
    /// Returned without a network call; the caller must back off or fail
    /// the requesting unit.
    #[error("all credentials exhausted for model: {model}")]
    QuotaExhausted {
        /// The model that could not be served.
        model: String,
    },

    /// The retry budget ran out on a transient failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The final failure.
        last: ServiceError,
    },

    /// Non-retryable failure (auth, malformed request).
    ///
    /// Propagates immediately without consuming the retry budget and
    /// aborts the surrounding stage.
    #[error("fatal service error: {0}")]
    Fatal(ServiceError),
}

impl CompletionError {
    /// Whether this error must abort the surrounding stage rather than
    /// being absorbed as a single unit's failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CompletionError::Fatal(_))
    }
}

/// Errors that can occur while driving an episode through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transcript segmentation collaborator failed
    #[error("segmenter error: {0}")]
    Segmenter(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Completion client failed fatally
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    /// Checkpoint store operation failed
    #[error("checkpoint store error: {0}")]
    Checkpoint(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Graph store operation failed
    #[error("graph store error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// JSON (de)serialization of a checkpoint payload failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Programming or contract error; never retried
    #[error("fatal: {reason}")]
    Fatal {
        /// What went wrong.
        reason: String,
    },
}

impl PipelineError {
    /// Contract-violation constructor.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for completion-service calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Result type alias for completion-client calls.
pub type CompletionResult<T> = std::result::Result<T, CompletionError>;

/// Boxed error type for external collaborators (stores, segmenters).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for collaborator implementations.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;
