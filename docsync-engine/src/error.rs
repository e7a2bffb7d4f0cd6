//! Error types for the engine.
//!
//! Each variant carries a stable string code that travels in `Error`
//! frames, so clients can distinguish conditions without parsing prose.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while processing client messages.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transport closed underneath an operation.
    #[error("transport closed")]
    TransportClosed,

    /// A frame could not be decoded.
    #[error("malformed frame: {0}")]
    FrameMalformed(String),

    /// A decoded message failed shape or size validation.
    #[error("invalid message: {0}")]
    MessageInvalid(String),

    /// The connection exceeded its message rate budget.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// The operation requires authentication.
    #[error("authentication required")]
    AuthRequired,

    /// Token or API key verification failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The authenticated user lacks the required permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The document id failed charset or length validation.
    #[error("invalid document id: {0}")]
    DocumentIdInvalid(String),

    /// The document namespace is not accessible to this connection.
    #[error("access denied to document: {0}")]
    DocumentAccessDenied(String),

    /// The storage backend failed; in-memory state remains authoritative.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// An outbound message was dropped under backpressure.
    #[error("message dropped under backpressure")]
    BackpressureDrop,
}

impl EngineError {
    /// Stable code carried in `Error` frames.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransportClosed => "TRANSPORT_CLOSED",
            Self::FrameMalformed(_) => "FRAME_MALFORMED",
            Self::MessageInvalid(_) => "MESSAGE_INVALID",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthFailed(_) => "AUTH_FAILED",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::DocumentIdInvalid(_) => "DOCUMENT_ID_INVALID",
            Self::DocumentAccessDenied(_) => "DOCUMENT_ACCESS_DENIED",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::BackpressureDrop => "BACKPRESSURE_DROP",
        }
    }

    /// True for conditions that terminate the connection (close with a
    /// non-1000 code) rather than surfacing as an `Error` frame.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthFailed(_) | Self::TransportClosed)
    }
}
