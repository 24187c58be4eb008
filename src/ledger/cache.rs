//! Read-aside balance cache
//!
//! Entries live under `balance:{account_id}` for [`BALANCE_CACHE_TTL`].
//! The cache is never authoritative: callers log and ignore its errors.

use std::sync::Arc;
use std::time::Duration;

use super::models::BalanceSnapshot;
use crate::kv::{KvError, KvStore};

pub const BALANCE_CACHE_TTL: Duration = Duration::from_secs(60);
const KEY_PREFIX: &str = "balance:";

#[derive(Clone)]
pub struct BalanceCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl BalanceCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_ttl(kv, BALANCE_CACHE_TTL)
    }

    pub fn with_ttl(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn key(account_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, account_id)
    }

    pub async fn get(&self, account_id: &str) -> Result<Option<BalanceSnapshot>, KvError> {
        match self.kv.get(&Self::key(account_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, account_id: &str, snapshot: &BalanceSnapshot) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.kv.set(&Self::key(account_id), &bytes, self.ttl).await
    }

    pub async fn invalidate(&self, account_id: &str) -> Result<(), KvError> {
        self.kv.delete(&Self::key(account_id)).await
    }
}
