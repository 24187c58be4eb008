use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::{PaymentStatus, StatusView};
use super::validation::ValidatedPayment;

pub const MSG_PAYMENT_INITIATED: &str = "Payment initiated";
pub const MSG_PAYMENT_RETRIEVED: &str = "Payment details retrieved";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    pub payment_id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: String,
}

/// Cached verbatim under the idempotency key; a retry gets these exact bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: String,
    pub status: StatusView,
    pub message: String,
}

impl InitiatePaymentResponse {
    pub fn pending(payment_id: &str) -> Self {
        Self {
            payment_id: payment_id.to_string(),
            status: StatusView::Pending,
            message: MSG_PAYMENT_INITIATED.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPaymentResponse {
    pub payment_id: String,
    pub status: StatusView,
    pub message: String,
    pub amount: Decimal,
    pub currency: String,
    pub from_account: String,
    pub to_account: String,
}

/// One row of `transactions`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub idempotency_key: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn pending(payment: &ValidatedPayment, now: DateTime<Utc>) -> Self {
        Self {
            id: payment.payment_id.clone(),
            from_account: payment.from_account.as_str().to_string(),
            to_account: payment.to_account.as_str().to_string(),
            amount: payment.amount.value(),
            currency: payment.currency.code().to_string(),
            status: PaymentStatus::Pending.as_str().to_string(),
            idempotency_key: payment.idempotency_key.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same transfer parameters. Status, key and timestamps are ignored.
    pub fn same_transfer(&self, other: &PaymentRecord) -> bool {
        self.id == other.id
            && self.from_account == other.from_account
            && self.to_account == other.to_account
            && self.amount == other.amount
            && self.currency == other.currency
    }

    pub fn to_response(&self) -> GetPaymentResponse {
        GetPaymentResponse {
            payment_id: self.id.clone(),
            status: StatusView::from_stored(&self.status),
            message: MSG_PAYMENT_RETRIEVED.to_string(),
            amount: self.amount,
            currency: self.currency.clone(),
            from_account: self.from_account.clone(),
            to_account: self.to_account.clone(),
        }
    }
}
