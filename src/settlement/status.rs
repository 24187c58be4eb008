//! Where settlement results go on the payment side.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::payment::{PaymentError, PaymentRepository, PaymentStatus};

#[async_trait]
pub trait PaymentStatusSink: Send + Sync {
    async fn record(&self, payment_id: &str, status: PaymentStatus) -> Result<(), PaymentError>;
}

/// Writes through to the payments database.
pub struct RepositoryStatusSink {
    repo: Arc<dyn PaymentRepository>,
}

impl RepositoryStatusSink {
    pub fn new(repo: Arc<dyn PaymentRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl PaymentStatusSink for RepositoryStatusSink {
    async fn record(&self, payment_id: &str, status: PaymentStatus) -> Result<(), PaymentError> {
        self.repo.update_status(payment_id, status).await.map(|_| ())
    }
}

/// For deployments where the ledger cannot reach the payments database.
pub struct LogStatusSink;

#[async_trait]
impl PaymentStatusSink for LogStatusSink {
    async fn record(&self, payment_id: &str, status: PaymentStatus) -> Result<(), PaymentError> {
        info!(payment_id = %payment_id, status = %status, "Settlement result (status not persisted)");
        Ok(())
    }
}
