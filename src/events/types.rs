//! Event wire types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::payment::validation::ValidatedPayment;
use crate::trace_context::TraceContext;

/// Message header list. Order is preserved; lookups are case-insensitive.
pub type Headers = Vec<(String, String)>;

/// Settlement request published once per accepted payment.
///
/// JSON: `{payment_id, from_account, to_account, amount, currency, timestamp}`
/// with `amount` as a decimal string and `timestamp` in RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub payment_id: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

impl SettlementEvent {
    pub fn from_payment(payment: &ValidatedPayment, timestamp: DateTime<Utc>) -> Self {
        Self {
            payment_id: payment.payment_id.clone(),
            from_account: payment.from_account.as_str().to_string(),
            to_account: payment.to_account.as_str().to_string(),
            amount: payment.amount.value(),
            currency: payment.currency.code().to_string(),
            timestamp,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A message on its way to the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Partitioning key. Settlement events use the payment id.
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl OutboundMessage {
    pub fn settlement(
        topic: &str,
        event: &SettlementEvent,
        trace: &TraceContext,
    ) -> Result<Self, serde_json::Error> {
        let mut headers = Headers::new();
        trace.inject(&mut headers);
        Ok(Self {
            topic: topic.to_string(),
            key: event.payment_id.clone(),
            payload: event.encode()?,
            headers,
        })
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl InboundMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn trace_context(&self) -> Option<TraceContext> {
        TraceContext::extract(&self.headers)
    }
}

/// Where a published message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Stable partition for `key`. All events of one payment share a partition.
pub fn partition_for(key: &str, partitions: i32) -> i32 {
    let partitions = partitions.max(1) as u32;
    (crc32fast::hash(key.as_bytes()) % partitions) as i32
}
