use thiserror::Error;

use super::state::TransitionError;

/// Payment persistence errors.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment {0} already exists with different parameters")]
    Conflict(String),

    #[error("payment not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The row changed between read and conditional update.
    #[error("concurrent status update on payment {0}")]
    StaleStatus(String),

    #[error("corrupt payment record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("outbox encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PaymentError {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Conflict(_) => "PAYMENT_CONFLICT",
            PaymentError::NotFound(_) => "PAYMENT_NOT_FOUND",
            PaymentError::Transition(_) => "INVALID_STATE_TRANSITION",
            PaymentError::StaleStatus(_) => "STALE_STATUS",
            PaymentError::Corrupt { .. } => "CORRUPT_RECORD",
            PaymentError::Database(_) => "DATABASE_ERROR",
            PaymentError::Encode(_) => "ENCODE_ERROR",
        }
    }
}
