//! PostgreSQL-backed partitioned event log
//!
//! `event_log` holds the messages, `consumer_offsets` the committed position
//! of each group. Offsets within a partition are assigned under a
//! transaction-scoped advisory lock, so they are gap-free and ordered.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::bus::{BusError, EventConsumer, EventPublisher};
use super::types::{Delivery, Headers, InboundMessage, OutboundMessage, partition_for};
use crate::db::Database;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct PgEventLog {
    pool: PgPool,
    partitions: i32,
}

impl PgEventLog {
    pub fn new(pool: PgPool, partitions: i32) -> Self {
        Self {
            pool,
            partitions: partitions.max(1),
        }
    }

    /// Connect to the first reachable broker in `brokers`.
    pub async fn connect(brokers: &[String], partitions: i32) -> Result<Self, BusError> {
        let mut last_err = None;
        for url in brokers {
            match Database::connect(url).await {
                Ok(db) => {
                    debug!(broker = %url, "Event log connected");
                    return Ok(Self::new(db.pool().clone(), partitions));
                }
                Err(e) => {
                    warn!(broker = %url, error = %e, "Broker unreachable, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => BusError::Storage(e),
            None => BusError::Unavailable("no broker configured".into()),
        })
    }

    pub fn consumer(&self, group: &str, topic: &str, poll_interval: Duration) -> PgEventConsumer {
        PgEventConsumer {
            pool: self.pool.clone(),
            partitions: self.partitions,
            group: group.to_string(),
            topic: topic.to_string(),
            poll_interval,
            positions: Mutex::new(None),
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EventPublisher for PgEventLog {
    async fn publish(&self, message: OutboundMessage) -> Result<Delivery, BusError> {
        let partition = partition_for(&message.key, self.partitions);
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), $2)")
            .bind(&message.topic)
            .bind(partition)
            .execute(&mut *tx)
            .await?;

        let offset: i64 = sqlx::query_scalar(
            r#"SELECT COALESCE(MAX("offset") + 1, 0)
               FROM event_log WHERE topic = $1 AND partition = $2"#,
        )
        .bind(&message.topic)
        .bind(partition)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO event_log (topic, partition, "offset", message_key, payload, headers)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&message.topic)
        .bind(partition)
        .bind(offset)
        .bind(&message.key)
        .bind(&message.payload)
        .bind(Json(&message.headers))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Delivery { partition, offset })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    partition: i32,
    offset: i64,
    message_key: String,
    payload: Vec<u8>,
    headers: Json<Headers>,
}

pub struct PgEventConsumer {
    pool: PgPool,
    partitions: i32,
    group: String,
    topic: String,
    poll_interval: Duration,
    positions: Mutex<Option<Vec<i64>>>,
    cursor: AtomicUsize,
}

impl PgEventConsumer {
    async fn load_positions(&self) -> Result<Vec<i64>, BusError> {
        let committed: Vec<(i32, i64)> = sqlx::query_as(
            r#"SELECT partition, next_offset FROM consumer_offsets
               WHERE group_id = $1 AND topic = $2"#,
        )
        .bind(&self.group)
        .bind(&self.topic)
        .fetch_all(&self.pool)
        .await?;

        let mut positions = vec![0i64; self.partitions as usize];
        for (partition, next) in committed {
            if let Some(slot) = positions.get_mut(partition as usize) {
                *slot = next;
            }
        }
        Ok(positions)
    }

    /// One pass over all partitions. `None` when fully caught up.
    async fn poll(&self) -> Result<Option<InboundMessage>, BusError> {
        let mut guard = self.positions.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_positions().await?);
        }
        let Some(positions) = guard.as_mut() else {
            return Ok(None);
        };

        let n = self.partitions as usize;
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for i in 0..n {
            let partition = (start + i) % n;
            let row: Option<LogRow> = sqlx::query_as(
                r#"SELECT partition, "offset", message_key, payload, headers
                   FROM event_log
                   WHERE topic = $1 AND partition = $2 AND "offset" >= $3
                   ORDER BY "offset"
                   LIMIT 1"#,
            )
            .bind(&self.topic)
            .bind(partition as i32)
            .bind(positions[partition])
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                positions[partition] = row.offset + 1;
                return Ok(Some(InboundMessage {
                    topic: self.topic.clone(),
                    partition: row.partition,
                    offset: row.offset,
                    key: row.message_key,
                    payload: row.payload,
                    headers: row.headers.0,
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl EventConsumer for PgEventConsumer {
    async fn fetch(&self) -> Result<InboundMessage, BusError> {
        loop {
            if let Some(message) = self.poll().await? {
                return Ok(message);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn commit(&self, message: &InboundMessage) -> Result<(), BusError> {
        sqlx::query(
            r#"INSERT INTO consumer_offsets (group_id, topic, partition, next_offset, updated_at)
               VALUES ($1, $2, $3, $4, NOW())
               ON CONFLICT (group_id, topic, partition) DO UPDATE
               SET next_offset = GREATEST(consumer_offsets.next_offset, EXCLUDED.next_offset),
                   updated_at = NOW()"#,
        )
        .bind(&self.group)
        .bind(&message.topic)
        .bind(message.partition)
        .bind(message.offset + 1)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
