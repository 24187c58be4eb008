//! Payment persistence
//!
//! `transactions` rows plus the transactional outbox, which shares their
//! database so a payment and its event commit together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::types::Json;
use tracing::debug;

use super::error::PaymentError;
use super::models::PaymentRecord;
use super::state::PaymentStatus;
use crate::events::bus::BusError;
use crate::events::outbox::{Outbox, OutboxEntry};
use crate::events::types::{Headers, OutboundMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with this id and identical transfer parameters already exists.
    Duplicate,
    /// The idempotency key already belongs to another payment.
    KeyTaken { payment_id: String },
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Insert a PENDING record. With `outbox`, the event is written in the
    /// same transaction. A duplicate id with different parameters is a
    /// [`PaymentError::Conflict`]. Id collisions are checked before key
    /// collisions.
    async fn insert_pending(
        &self,
        record: &PaymentRecord,
        outbox: Option<&OutboundMessage>,
    ) -> Result<InsertOutcome, PaymentError>;

    async fn get(&self, payment_id: &str) -> Result<Option<PaymentRecord>, PaymentError>;

    /// Move a payment to `next`. Returns `false` for the PENDING -> PENDING
    /// no-op.
    async fn update_status(&self, payment_id: &str, next: PaymentStatus) -> Result<bool, PaymentError>;
}

pub(crate) fn parse_stored_status(record_id: &str, stored: &str) -> Result<PaymentStatus, PaymentError> {
    PaymentStatus::parse(stored).ok_or_else(|| PaymentError::Corrupt {
        id: record_id.to_string(),
        reason: format!("unknown status {:?}", stored),
    })
}

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn enqueue(conn: &mut PgConnection, message: &OutboundMessage) -> Result<i64, PaymentError> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO outbox (topic, message_key, payload, headers)
               VALUES ($1, $2, $3, $4)
               RETURNING id"#,
        )
        .bind(&message.topic)
        .bind(&message.key)
        .bind(&message.payload)
        .bind(Json(&message.headers))
        .fetch_one(conn)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert_pending(
        &self,
        record: &PaymentRecord,
        outbox: Option<&OutboundMessage>,
    ) -> Result<InsertOutcome, PaymentError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO transactions
                 (id, from_account, to_account, amount, currency, status,
                  idempotency_key, version, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(&record.id)
        .bind(&record.from_account)
        .bind(&record.to_account)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(&record.status)
        .bind(&record.idempotency_key)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            let existing: Option<PaymentRecord> = sqlx::query_as(
                r#"SELECT id, from_account, to_account, amount, currency, status,
                          idempotency_key, version, created_at, updated_at
                   FROM transactions WHERE id = $1"#,
            )
            .bind(&record.id)
            .fetch_optional(&mut *tx)
            .await?;
            let key_owner: Option<String> = match existing {
                Some(_) => None,
                None => {
                    sqlx::query_scalar("SELECT id FROM transactions WHERE idempotency_key = $1")
                        .bind(&record.idempotency_key)
                        .fetch_optional(&mut *tx)
                        .await?
                }
            };
            if let Err(e) = tx.rollback().await {
                debug!(error = %e, "Rollback failed");
            }

            return match (existing, key_owner) {
                (Some(existing), _) if existing.same_transfer(record) => {
                    debug!(payment_id = %record.id, "Payment already recorded");
                    Ok(InsertOutcome::Duplicate)
                }
                (Some(_), _) => Err(PaymentError::Conflict(record.id.clone())),
                (None, Some(payment_id)) => Ok(InsertOutcome::KeyTaken { payment_id }),
                // Conflicting row vanished between insert and read
                (None, None) => Err(PaymentError::Conflict(record.id.clone())),
            };
        }

        if let Some(message) = outbox {
            let outbox_id = Self::enqueue(&mut tx, message).await?;
            debug!(payment_id = %record.id, outbox_id, "Settlement event queued");
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, payment_id: &str) -> Result<Option<PaymentRecord>, PaymentError> {
        let row = sqlx::query_as::<_, PaymentRecord>(
            r#"SELECT id, from_account, to_account, amount, currency, status,
                      idempotency_key, version, created_at, updated_at
               FROM transactions WHERE id = $1"#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_status(&self, payment_id: &str, next: PaymentStatus) -> Result<bool, PaymentError> {
        let stored: String = sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))?;

        let current = parse_stored_status(payment_id, &stored)?;
        current.check_transition(next)?;
        if current == next {
            return Ok(false);
        }

        // CAS on the status we validated against
        let result = sqlx::query(
            r#"UPDATE transactions
               SET status = $1, version = version + 1, updated_at = NOW()
               WHERE id = $2 AND status = $3"#,
        )
        .bind(next.as_str())
        .bind(payment_id)
        .bind(current.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PaymentError::StaleStatus(payment_id.to_string()));
        }
        Ok(true)
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    topic: String,
    message_key: String,
    payload: Vec<u8>,
    headers: Json<Headers>,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl Outbox for PgPaymentRepository {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, BusError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"SELECT id, topic, message_key, payload, headers, created_at
               FROM outbox
               WHERE published_at IS NULL
               ORDER BY id
               LIMIT $1"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| OutboxEntry {
                id: r.id,
                message: OutboundMessage {
                    topic: r.topic,
                    key: r.message_key,
                    payload: r.payload,
                    headers: r.headers.0,
                },
                created_at: r.created_at,
            })
            .collect())
    }

    async fn mark_published(&self, id: i64) -> Result<(), BusError> {
        sqlx::query("UPDATE outbox SET published_at = NOW() WHERE id = $1 AND published_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
