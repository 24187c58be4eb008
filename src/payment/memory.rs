//! In-memory `PaymentRepository` for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::error::PaymentError;
use super::models::PaymentRecord;
use super::repository::{InsertOutcome, PaymentRepository, parse_stored_status};
use super::state::PaymentStatus;
use crate::events::outbox::memory::MemoryOutbox;
use crate::events::types::OutboundMessage;

pub struct MemoryPaymentRepository {
    records: Mutex<HashMap<String, PaymentRecord>>,
    outbox: Arc<MemoryOutbox>,
    unavailable: AtomicBool,
}

impl MemoryPaymentRepository {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            outbox: Arc::new(MemoryOutbox::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn outbox(&self) -> Arc<MemoryOutbox> {
        self.outbox.clone()
    }

    pub async fn count(&self) -> usize {
        self.records.lock().await.len()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), PaymentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PaymentError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for MemoryPaymentRepository {
    async fn insert_pending(
        &self,
        record: &PaymentRecord,
        outbox: Option<&OutboundMessage>,
    ) -> Result<InsertOutcome, PaymentError> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(&record.id) {
            return if existing.same_transfer(record) {
                Ok(InsertOutcome::Duplicate)
            } else {
                Err(PaymentError::Conflict(record.id.clone()))
            };
        }
        if let Some(owner) = records.values().find(|r| r.idempotency_key == record.idempotency_key) {
            return Ok(InsertOutcome::KeyTaken {
                payment_id: owner.id.clone(),
            });
        }
        records.insert(record.id.clone(), record.clone());
        if let Some(message) = outbox {
            self.outbox.push(message.clone());
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, payment_id: &str) -> Result<Option<PaymentRecord>, PaymentError> {
        self.check_available()?;
        Ok(self.records.lock().await.get(payment_id).cloned())
    }

    async fn update_status(&self, payment_id: &str, next: PaymentStatus) -> Result<bool, PaymentError> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(payment_id)
            .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))?;

        let current = parse_stored_status(payment_id, &record.status)?;
        current.check_transition(next)?;
        if current == next {
            return Ok(false);
        }
        record.status = next.as_str().to_string();
        record.version += 1;
        record.updated_at = chrono::Utc::now();
        Ok(true)
    }
}
