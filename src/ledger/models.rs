use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::Currency;

/// One row of `balances`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AccountBalance {
    pub account_id: String,
    pub balance: Decimal,
    pub currency: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            balance: self.balance,
            currency: self.currency.clone(),
        }
    }
}

/// Cached view of a balance. Stored as JSON under `balance:{account_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub balance: Decimal,
    pub currency: String,
}

/// Instruction to move `amount` from one account to another.
///
/// `payment_id` is the dedupe key: a second order with the same id is
/// reported as [`TransferOutcome::AlreadySettled`] without touching balances.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOrder {
    pub payment_id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Balances after the transfer.
    Applied {
        from: AccountBalance,
        to: AccountBalance,
    },
    /// This payment id was settled by an earlier delivery.
    AlreadySettled,
}

impl TransferOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::Applied { .. } => "APPLIED",
            TransferOutcome::AlreadySettled => "ALREADY_SETTLED",
        }
    }
}
