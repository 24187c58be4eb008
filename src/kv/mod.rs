//! Key-value cache with per-entry TTL
//!
//! Backs the idempotency store and the balance read-aside cache. The backend is
//! selected by URL scheme:
//!
//! | Scheme | Backend |
//! |--------|---------|
//! | `memory://` | [`MemoryKvStore`] (process-local) |
//! | `postgres://`, `postgresql://` | [`PgKvStore`] (`kv_entries` table) |

mod memory;
mod postgres;

pub use memory::MemoryKvStore;
pub use postgres::PgKvStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum KvError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported cache url: {0}")]
    UnsupportedUrl(String),

    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache value codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Byte-oriented cache with expiring entries.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns `None` for a missing or expired key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Insert or overwrite. The entry expires `ttl` after this call.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Drop expired entries, returning how many went. Backends that expire
    /// on their own keep the default.
    async fn purge_expired(&self) -> Result<u64, KvError> {
        Ok(0)
    }
}

/// Open the store named by `url`.
pub async fn open(url: &str, password: Option<&str>) -> Result<Arc<dyn KvStore>, KvError> {
    if url.starts_with("memory://") {
        tracing::info!("Using in-process cache");
        return Ok(Arc::new(MemoryKvStore::new()));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PgKvStore::connect(url, password).await?;
        return Ok(Arc::new(store));
    }
    Err(KvError::UnsupportedUrl(url.to_string()))
}

/// Periodically purge expired entries until `shutdown` fires.
pub fn spawn_kv_sweeper(kv: Arc<dyn KvStore>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match kv.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, "Purged expired cache entries"),
                    Err(e) => warn!(error = %e, "Cache purge failed"),
                },
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store with a switch that makes every call fail.
    pub struct FlakyKvStore {
        inner: MemoryKvStore,
        down: AtomicBool,
    }

    impl FlakyKvStore {
        pub fn new() -> Self {
            Self {
                inner: MemoryKvStore::new(),
                down: AtomicBool::new(false),
            }
        }

        pub fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), KvError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(KvError::Unavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KvStore for FlakyKvStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), KvError> {
            self.check()?;
            self.inner.delete(key).await
        }
    }
}
