//! `kv_entries`-backed store, for deployments without an in-process cache.

use super::{KvError, KvStore};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with an optional password that overrides the one in `url`.
    pub async fn connect(url: &str, password: Option<&str>) -> Result<Self, KvError> {
        let mut options = PgConnectOptions::from_str(url)?;
        if let Some(pw) = password {
            options = options.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(2))
            .connect_with(options)
            .await?;
        tracing::info!("Cache connected (PostgreSQL)");
        Ok(Self { pool })
    }
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let value: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT value FROM kv_entries WHERE key = $1 AND expires_at > NOW()")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
        sqlx::query(
            r#"INSERT INTO kv_entries (key, value, expires_at)
               VALUES ($1, $2, NOW() + make_interval(secs => $3))
               ON CONFLICT (key) DO UPDATE
               SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, KvError> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support;

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_pg_set_get_expire() {
        let db = test_support::connect().await;
        let store = PgKvStore::new(db.pool().clone());
        let key = format!("test:{}", uuid::Uuid::new_v4());

        store.set(&key, b"hello", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"hello".to_vec()));

        store.set(&key, b"bye", Duration::ZERO).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);

        // Expired rows stay until purged
        assert!(store.purge_expired().await.is_ok());
        store.delete(&key).await.unwrap();
    }
}
