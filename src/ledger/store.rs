//! Ledger persistence
//!
//! [`PgLedgerStore::transfer`] runs in a single transaction:
//!
//! 1. Claim the payment id in `settled_payments` (a second claim sees the
//!    existing row and reports the earlier decision)
//! 2. Lock both balance rows `FOR UPDATE`, ordered by account id
//! 3. Check source existence, currencies and funds
//! 4. Debit source, credit destination (zero rows credited aborts)
//! 5. Commit
//!
//! Business rejections roll back the transfer and then record the rejection
//! code, so a redelivered event gets the same answer.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, warn};

use super::error::LedgerError;
use super::models::{AccountBalance, TransferOrder, TransferOutcome};
use crate::money::{Amount, Currency, max_amount};

/// Outcome recorded for an applied transfer.
pub(crate) const OUTCOME_APPLIED: &str = "APPLIED";

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_balance(&self, account_id: &str) -> Result<Option<AccountBalance>, LedgerError>;

    /// Apply `order` exactly once per payment id.
    async fn transfer(&self, order: &TransferOrder) -> Result<TransferOutcome, LedgerError>;
}

/// Shape checks that do not need the database.
pub(crate) fn validate_order(order: &TransferOrder) -> Result<(), LedgerError> {
    if order.payment_id.trim().is_empty() {
        return Err(LedgerError::InvalidTransfer("payment_id is empty".into()));
    }
    // Balance columns are NUMERIC(20,2); a sub-unit amount would be rounded
    // separately on each side
    Amount::new(order.amount, order.currency).map_err(|e| LedgerError::InvalidTransfer(e.to_string()))?;
    if order.from_account == order.to_account {
        return Err(LedgerError::InvalidTransfer(
            "from_account and to_account cannot be the same".into(),
        ));
    }
    Ok(())
}

/// Checks against the locked rows, before any balance changes.
///
/// A missing destination is not checked here: it surfaces when the credit
/// updates zero rows.
pub(crate) fn precheck(
    order: &TransferOrder,
    from: Option<&AccountBalance>,
    to: Option<&AccountBalance>,
) -> Result<(), LedgerError> {
    let from = from.ok_or_else(|| LedgerError::FromAccountNotFound {
        account_id: order.from_account.clone(),
    })?;
    let code = order.currency.code();

    if from.currency != code {
        return Err(LedgerError::CurrencyMismatch {
            account_id: from.account_id.clone(),
            held: from.currency.clone(),
            requested: code.to_string(),
        });
    }
    if from.balance < order.amount {
        return Err(LedgerError::InsufficientFunds {
            available: from.balance,
            requested: order.amount,
        });
    }
    if let Some(to) = to {
        if to.currency != code {
            return Err(LedgerError::CurrencyMismatch {
                account_id: to.account_id.clone(),
                held: to.currency.clone(),
                requested: code.to_string(),
            });
        }
        if to.balance + order.amount > max_amount() {
            return Err(LedgerError::InvalidTransfer(
                "credit would exceed the maximum balance".into(),
            ));
        }
    }
    Ok(())
}

/// Map a recorded outcome back to what the first delivery returned.
pub(crate) fn replay_outcome(outcome: &str) -> Result<TransferOutcome, LedgerError> {
    if outcome == OUTCOME_APPLIED {
        Ok(TransferOutcome::AlreadySettled)
    } else {
        Err(LedgerError::PreviouslyRejected {
            reason: outcome.to_string(),
        })
    }
}

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Provision an account. Returns `false` if it already exists.
    pub async fn open_account(
        &self,
        account_id: &str,
        currency: Currency,
        initial_balance: Decimal,
    ) -> Result<bool, LedgerError> {
        if initial_balance < Decimal::ZERO {
            return Err(LedgerError::InvalidTransfer(
                "initial balance cannot be negative".into(),
            ));
        }
        let result = sqlx::query(
            r#"INSERT INTO balances (account_id, balance, currency)
               VALUES ($1, $2, $3)
               ON CONFLICT (account_id) DO NOTHING"#,
        )
        .bind(account_id)
        .bind(initial_balance)
        .bind(currency.code())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn abort(
        &self,
        tx: Transaction<'_, Postgres>,
        order: &TransferOrder,
        err: LedgerError,
    ) -> Result<TransferOutcome, LedgerError> {
        if let Err(e) = tx.rollback().await {
            debug!(error = %e, "Rollback failed");
        }
        self.record_rejection(order, &err).await;
        Err(err)
    }

    async fn record_rejection(&self, order: &TransferOrder, err: &LedgerError) {
        let result = sqlx::query(
            r#"INSERT INTO settled_payments (payment_id, outcome)
               VALUES ($1, $2)
               ON CONFLICT (payment_id) DO NOTHING"#,
        )
        .bind(&order.payment_id)
        .bind(err.code())
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            warn!(payment_id = %order.payment_id, error = %e, "Failed to record rejection");
        }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_balance(&self, account_id: &str) -> Result<Option<AccountBalance>, LedgerError> {
        let row = sqlx::query_as::<_, AccountBalance>(
            r#"SELECT account_id, balance, currency, version, created_at, updated_at
               FROM balances WHERE account_id = $1"#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn transfer(&self, order: &TransferOrder) -> Result<TransferOutcome, LedgerError> {
        validate_order(order)?;

        let mut tx = self.pool.begin().await?;

        // Blocks behind a concurrent claim of the same id until it resolves
        let claimed = sqlx::query(
            r#"INSERT INTO settled_payments (payment_id, outcome)
               VALUES ($1, $2)
               ON CONFLICT (payment_id) DO NOTHING"#,
        )
        .bind(&order.payment_id)
        .bind(OUTCOME_APPLIED)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !claimed {
            let outcome: String =
                sqlx::query_scalar("SELECT outcome FROM settled_payments WHERE payment_id = $1")
                    .bind(&order.payment_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if let Err(e) = tx.rollback().await {
                debug!(error = %e, "Rollback failed");
            }
            debug!(payment_id = %order.payment_id, outcome = %outcome, "Payment already decided");
            return replay_outcome(&outcome);
        }

        let locked: Vec<AccountBalance> = sqlx::query_as(
            r#"SELECT account_id, balance, currency, version, created_at, updated_at
               FROM balances
               WHERE account_id = ANY($1)
               ORDER BY account_id
               FOR UPDATE"#,
        )
        .bind(vec![order.from_account.clone(), order.to_account.clone()])
        .fetch_all(&mut *tx)
        .await?;

        let from = locked.iter().find(|b| b.account_id == order.from_account);
        let to = locked.iter().find(|b| b.account_id == order.to_account);
        if let Err(e) = precheck(order, from, to) {
            return self.abort(tx, order, e).await;
        }

        let from_after: AccountBalance = sqlx::query_as(
            r#"UPDATE balances
               SET balance = balance - $1, version = version + 1, updated_at = NOW()
               WHERE account_id = $2
               RETURNING account_id, balance, currency, version, created_at, updated_at"#,
        )
        .bind(order.amount)
        .bind(&order.from_account)
        .fetch_one(&mut *tx)
        .await?;

        let to_after: Option<AccountBalance> = sqlx::query_as(
            r#"UPDATE balances
               SET balance = balance + $1, version = version + 1, updated_at = NOW()
               WHERE account_id = $2
               RETURNING account_id, balance, currency, version, created_at, updated_at"#,
        )
        .bind(order.amount)
        .bind(&order.to_account)
        .fetch_optional(&mut *tx)
        .await?;

        let to_after = match to_after {
            Some(b) => b,
            None => {
                let err = LedgerError::ToAccountNotFound {
                    account_id: order.to_account.clone(),
                };
                return self.abort(tx, order, err).await;
            }
        };

        tx.commit().await?;

        info!(
            payment_id = %order.payment_id,
            from_account = %order.from_account,
            to_account = %order.to_account,
            amount = %order.amount,
            currency = %order.currency,
            "Transfer applied"
        );
        Ok(TransferOutcome::Applied {
            from: from_after,
            to: to_after,
        })
    }
}
