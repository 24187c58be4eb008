//! In-memory `LedgerStore` for tests.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::error::LedgerError;
use super::models::{AccountBalance, TransferOrder, TransferOutcome};
use super::store::{LedgerStore, OUTCOME_APPLIED, precheck, replay_outcome, validate_order};
use crate::money::Currency;

#[derive(Default)]
struct State {
    accounts: HashMap<String, AccountBalance>,
    decided: HashMap<String, String>,
}

pub struct MemoryLedgerStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    transfer_calls: AtomicUsize,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            unavailable: AtomicBool::new(false),
            transfer_calls: AtomicUsize::new(0),
        }
    }

    pub async fn open_account(&self, account_id: &str, currency: Currency, balance: Decimal) {
        let now = Utc::now();
        self.state.lock().await.accounts.insert(
            account_id.to_string(),
            AccountBalance {
                account_id: account_id.to_string(),
                balance,
                currency: currency.code().to_string(),
                version: 1,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub async fn balance_of(&self, account_id: &str) -> Option<Decimal> {
        self.state
            .lock()
            .await
            .accounts
            .get(account_id)
            .map(|b| b.balance)
    }

    /// Simulate a lost database connection.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn transfer_calls(&self) -> usize {
        self.transfer_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_balance(&self, account_id: &str) -> Result<Option<AccountBalance>, LedgerError> {
        self.check_available()?;
        Ok(self.state.lock().await.accounts.get(account_id).cloned())
    }

    async fn transfer(&self, order: &TransferOrder) -> Result<TransferOutcome, LedgerError> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        validate_order(order)?;
        self.check_available()?;

        let mut state = self.state.lock().await;
        if let Some(outcome) = state.decided.get(&order.payment_id) {
            return replay_outcome(outcome);
        }

        let from = state.accounts.get(&order.from_account);
        let to = state.accounts.get(&order.to_account);
        let checked = precheck(order, from, to).and_then(|_| {
            to.cloned().ok_or_else(|| LedgerError::ToAccountNotFound {
                account_id: order.to_account.clone(),
            })
        });
        let (mut from_after, mut to_after) = match (checked, from.cloned()) {
            (Ok(to), Some(from)) => (from, to),
            (Err(e), _) => {
                state.decided.insert(order.payment_id.clone(), e.code().to_string());
                return Err(e);
            }
            (Ok(_), None) => unreachable!("precheck guarantees the source exists"),
        };

        let now = Utc::now();
        from_after.balance -= order.amount;
        from_after.version += 1;
        from_after.updated_at = now;
        to_after.balance += order.amount;
        to_after.version += 1;
        to_after.updated_at = now;

        state.accounts.insert(from_after.account_id.clone(), from_after.clone());
        state.accounts.insert(to_after.account_id.clone(), to_after.clone());
        state
            .decided
            .insert(order.payment_id.clone(), OUTCOME_APPLIED.to_string());

        Ok(TransferOutcome::Applied {
            from: from_after,
            to: to_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "11111111-1111-1111-1111-111111111111";
    const B: &str = "22222222-2222-2222-2222-222222222222";

    fn order(id: &str, amount: i64) -> TransferOrder {
        TransferOrder {
            payment_id: id.to_string(),
            from_account: A.to_string(),
            to_account: B.to_string(),
            amount: Decimal::new(amount, 0),
            currency: Currency::Usd,
        }
    }

    #[tokio::test]
    async fn test_transfer_conserves_total() {
        let store = MemoryLedgerStore::new();
        store.open_account(A, Currency::Usd, Decimal::new(500, 0)).await;
        store.open_account(B, Currency::Usd, Decimal::new(100, 0)).await;

        store.transfer(&order("p1", 100)).await.unwrap();

        let a = store.balance_of(A).await.unwrap();
        let b = store.balance_of(B).await.unwrap();
        assert_eq!(a, Decimal::new(400, 0));
        assert_eq!(b, Decimal::new(200, 0));
        assert_eq!(a + b, Decimal::new(600, 0));
    }

    #[tokio::test]
    async fn test_missing_destination_changes_nothing() {
        let store = MemoryLedgerStore::new();
        store.open_account(A, Currency::Usd, Decimal::new(500, 0)).await;

        let err = store.transfer(&order("p1", 100)).await.unwrap_err();
        assert!(matches!(err, LedgerError::ToAccountNotFound { .. }));
        assert_eq!(store.balance_of(A).await.unwrap(), Decimal::new(500, 0));
    }

    #[tokio::test]
    async fn test_unavailable_is_transient_and_not_recorded() {
        let store = MemoryLedgerStore::new();
        store.open_account(A, Currency::Usd, Decimal::new(500, 0)).await;
        store.open_account(B, Currency::Usd, Decimal::ZERO).await;

        store.set_unavailable(true);
        let err = store.transfer(&order("p1", 100)).await.unwrap_err();
        assert!(err.is_transient());

        store.set_unavailable(false);
        assert!(matches!(
            store.transfer(&order("p1", 100)).await.unwrap(),
            TransferOutcome::Applied { .. }
        ));
    }
}
