//! Idempotency Store
//!
//! Remembers the successful response for each idempotency key for
//! [`IDEMPOTENCY_TTL`]. Only successes are stored, so a failed request can be
//! retried with the same key.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::models::InitiatePaymentResponse;
use crate::kv::{KvError, KvStore};

pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const KEY_PREFIX: &str = "idempotency:";

#[derive(Clone)]
pub struct IdempotencyStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            ttl: IDEMPOTENCY_TTL,
        }
    }

    pub fn with_ttl(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn key(idempotency_key: &str) -> String {
        format!("{}{}", KEY_PREFIX, idempotency_key)
    }

    /// Stored response for `idempotency_key`, if any.
    ///
    /// An undecodable entry is logged and treated as absent.
    pub async fn lookup(&self, idempotency_key: &str) -> Result<Option<InitiatePaymentResponse>, KvError> {
        let Some(bytes) = self.kv.get(&Self::key(idempotency_key)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(resp) => Ok(Some(resp)),
            Err(e) => {
                warn!(idempotency_key = %idempotency_key, error = %e, "Discarding undecodable idempotency entry");
                Ok(None)
            }
        }
    }

    pub async fn remember(&self, idempotency_key: &str, response: &InitiatePaymentResponse) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(response)?;
        self.kv.set(&Self::key(idempotency_key), &bytes, self.ttl).await
    }
}
