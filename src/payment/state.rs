//! Payment Status State Machine
//!
//! ```text
//! PENDING ──► COMPLETED
//!    │
//!    └──────► FAILED
//! ```
//!
//! Terminal states accept no transition, not even to themselves.
//! `PENDING -> PENDING` is accepted as a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stored payment status. Persisted as its uppercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    /// Recorded, not yet settled
    Pending,
    /// Terminal: ledger transfer applied
    Completed,
    /// Terminal: ledger rejected the transfer
    Failed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition: {from} is terminal, cannot move to {to}")]
    FromTerminal {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("invalid transition from {from} to {to}")]
    NotAllowed {
        from: PaymentStatus,
        to: PaymentStatus,
    },
}

impl PaymentStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    /// Exact match on the stored name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "COMPLETED" => Some(PaymentStatus::Completed),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn check_transition(self, next: PaymentStatus) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::FromTerminal {
                from: self,
                to: next,
            });
        }
        match (self, next) {
            (PaymentStatus::Pending, _) => Ok(()),
            (from, to) => Err(TransitionError::NotAllowed { from, to }),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status as reported to callers. Unknown stored values read as
/// `PAYMENT_STATUS_UNSPECIFIED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusView {
    #[serde(rename = "PAYMENT_STATUS_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl StatusView {
    pub fn from_stored(s: &str) -> Self {
        PaymentStatus::parse(s).map(Self::from).unwrap_or(StatusView::Unspecified)
    }
}

impl From<PaymentStatus> for StatusView {
    fn from(s: PaymentStatus) -> Self {
        match s {
            PaymentStatus::Pending => StatusView::Pending,
            PaymentStatus::Completed => StatusView::Completed,
            PaymentStatus::Failed => StatusView::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;

    #[test]
    fn test_terminal_states() {
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Pending.is_terminal());
    }

    #[test]
    fn test_pending_transitions() {
        assert!(Pending.check_transition(Completed).is_ok());
        assert!(Pending.check_transition(Failed).is_ok());
        assert!(Pending.check_transition(Pending).is_ok());
    }

    #[test]
    fn test_terminal_rejects_everything() {
        for from in [Completed, Failed] {
            for to in [Pending, Completed, Failed] {
                assert_eq!(
                    from.check_transition(to),
                    Err(TransitionError::FromTerminal { from, to }),
                    "{} -> {} must be rejected",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        for s in [Pending, Completed, Failed] {
            assert_eq!(PaymentStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(PaymentStatus::parse("pending"), None);
        assert_eq!(PaymentStatus::parse("REFUNDED"), None);
    }

    #[test]
    fn test_status_view_fallback() {
        assert_eq!(StatusView::from_stored("COMPLETED"), StatusView::Completed);
        assert_eq!(StatusView::from_stored("???"), StatusView::Unspecified);
        assert_eq!(
            serde_json::to_string(&StatusView::Unspecified).unwrap(),
            "\"PAYMENT_STATUS_UNSPECIFIED\""
        );
    }

    #[test]
    fn test_error_message() {
        let e = Completed.check_transition(Failed).unwrap_err();
        assert_eq!(
            e.to_string(),
            "invalid transition: COMPLETED is terminal, cannot move to FAILED"
        );
    }
}
