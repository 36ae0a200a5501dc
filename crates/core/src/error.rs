//! Error taxonomy shared by the store, token, authorization and gateway layers.

use thiserror::Error;

/// Result type used across the service layers.
pub type RbacResult<T> = Result<T, RbacError>;

/// Service-level error.
///
/// Gateways translate these into boundary-specific rejections (RPC status codes
/// or HTTP statuses). `Store` carries backend detail for logs only and must not be
/// echoed to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RbacError {
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing, malformed, expired or otherwise untrusted credentials.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller is authenticated but lacks the required permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Required reference data (e.g. the default role) is missing.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Malformed request or token.
    #[error("invalid: {0}")]
    Invalid(String),

    /// A gateway gave up waiting on the service.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Backend failure (connectivity, driver errors, poisoned locks).
    #[error("store error: {0}")]
    Store(String),
}

impl RbacError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Stable machine-readable code, used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::PermissionDenied(_) => "permission_denied",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::Invalid(_) => "invalid",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Store(_) => "internal",
        }
    }

    /// Message safe to return to a client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}
