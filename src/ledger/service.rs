//! Balance inquiry

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::cache::BalanceCache;
use super::store::LedgerStore;
use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub account_id: String,
    pub balance: Decimal,
    pub currency: String,
}

pub struct BalanceService {
    store: Arc<dyn LedgerStore>,
    cache: BalanceCache,
}

impl BalanceService {
    pub fn new(store: Arc<dyn LedgerStore>, cache: BalanceCache) -> Self {
        Self { store, cache }
    }

    /// Cache first, then the ledger. A cache failure degrades to a ledger read.
    ///
    /// The result may be up to the cache TTL stale if an invalidation was lost.
    pub async fn check_balance(&self, account_id: &str) -> Result<BalanceView, ServiceError> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(ServiceError::InvalidArgument("account_id is required".into()));
        }

        match self.cache.get(account_id).await {
            Ok(Some(hit)) => {
                debug!(account_id = %account_id, "Balance cache hit");
                return Ok(BalanceView {
                    account_id: account_id.to_string(),
                    balance: hit.balance,
                    currency: hit.currency,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(account_id = %account_id, error = %e, "Balance cache read failed"),
        }

        let row = self
            .store
            .get_balance(account_id)
            .await
            .map_err(|e| {
                error!(account_id = %account_id, error = %e, "Balance lookup failed");
                ServiceError::Internal("failed to read balance".into())
            })?
            .ok_or_else(|| ServiceError::NotFound("account not found".into()))?;

        if let Err(e) = self.cache.put(account_id, &row.snapshot()).await {
            warn!(account_id = %account_id, error = %e, "Balance cache write failed");
        }

        Ok(BalanceView {
            account_id: row.account_id,
            balance: row.balance,
            currency: row.currency,
        })
    }
}
