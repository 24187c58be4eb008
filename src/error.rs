//! Service-level error taxonomy
//!
//! Every public service operation fails with a [`ServiceError`]. The variants
//! map one-to-one onto transport status codes, so the gateway never has to
//! inspect subsystem errors.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Bad input. The caller must change the request before retrying.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    /// The request collides with existing state (e.g. a payment id reused
    /// with different parameters).
    #[error("{0}")]
    Conflict(String),

    /// Dependency failure. Safe to retry with the same idempotency key.
    #[error("{0}")]
    Internal(String),

    #[error("rate limit exceeded")]
    RateLimited,
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::Internal(_) => "INTERNAL",
            ServiceError::RateLimited => "RATE_LIMITED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::InvalidArgument(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Internal(_) => 500,
            ServiceError::RateLimited => 429,
        }
    }

    /// Numeric code used in the `{code, msg, data}` response envelope.
    pub fn envelope_code(&self) -> i32 {
        match self {
            ServiceError::InvalidArgument(_) => 1001,
            ServiceError::NotFound(_) => 4004,
            ServiceError::Conflict(_) => 4009,
            ServiceError::RateLimited => 4029,
            ServiceError::Internal(_) => 5000,
        }
    }
}
