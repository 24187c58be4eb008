use rust_decimal::Decimal;
use thiserror::Error;

/// Ledger errors.
///
/// Business rejections are final for a given payment. [`LedgerError::Database`]
/// is transient: the same transfer may succeed on a later attempt.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("from_account not found")]
    FromAccountNotFound { account_id: String },

    #[error("to_account not found")]
    ToAccountNotFound { account_id: String },

    #[error("insufficient funds")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    #[error("currency mismatch: account {account_id} holds {held}, transfer is in {requested}")]
    CurrencyMismatch {
        account_id: String,
        held: String,
        requested: String,
    },

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    /// An earlier delivery of this payment was rejected with `reason`.
    #[error("payment previously rejected: {reason}")]
    PreviouslyRejected { reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::FromAccountNotFound { .. } => "FROM_ACCOUNT_NOT_FOUND",
            LedgerError::ToAccountNotFound { .. } => "TO_ACCOUNT_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::InvalidTransfer(_) => "INVALID_TRANSFER",
            LedgerError::PreviouslyRejected { .. } => "PREVIOUSLY_REJECTED",
            LedgerError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Whether a retry could change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Database(_))
    }
}
