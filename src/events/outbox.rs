//! Outbox Relay
//!
//! Publishes events that were written to the outbox in the same transaction
//! as their payment row. An entry is marked published only after the broker
//! accepts it, so a crash between the two republishes the entry on the next
//! pass (the settlement dedupe absorbs the duplicate).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bus::{BusError, EventPublisher};
use super::types::OutboundMessage;

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub message: OutboundMessage,
    pub created_at: DateTime<Utc>,
}

/// Storage side of the outbox.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Oldest unpublished entries first.
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, BusError>;

    async fn mark_published(&self, id: i64) -> Result<(), BusError>;
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }
}

pub struct OutboxRelay {
    outbox: Arc<dyn Outbox>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        outbox: Arc<dyn Outbox>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            config,
        }
    }

    /// Relay until `shutdown` fires. A pass in progress finishes first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting outbox relay"
        );

        while !shutdown.is_cancelled() {
            let relayed = match self.relay_once().await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Outbox relay pass failed");
                    0
                }
            };

            // A full batch means there is likely more waiting
            if relayed > 0 && relayed >= self.config.batch_size {
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("Outbox relay stopped");
    }

    /// Publish one batch. Stops at the first publish failure so later entries
    /// never overtake an earlier one.
    pub async fn relay_once(&self) -> Result<usize, BusError> {
        let entries = self.outbox.pending(self.config.batch_size).await?;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut relayed = 0;
        for entry in entries {
            match self.publisher.publish(entry.message.clone()).await {
                Ok(delivery) => {
                    self.outbox.mark_published(entry.id).await?;
                    debug!(
                        outbox_id = entry.id,
                        key = %entry.message.key,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Outbox entry published"
                    );
                    relayed += 1;
                }
                Err(e) => {
                    warn!(outbox_id = entry.id, key = %entry.message.key, error = %e, "Outbox publish failed, will retry");
                    break;
                }
            }
        }

        if relayed > 0 {
            info!(count = relayed, "Relayed outbox entries");
        }
        Ok(relayed)
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryOutbox;
    use super::*;
    use crate::events::bus::EventConsumer;
    use crate::events::memory::MemoryBroker;

    fn msg(key: &str) -> OutboundMessage {
        OutboundMessage {
            topic: "payment.initiated".into(),
            key: key.into(),
            payload: key.as_bytes().to_vec(),
            headers: vec![],
        }
    }

    fn relay(outbox: Arc<MemoryOutbox>, broker: Arc<MemoryBroker>, batch: usize) -> OutboxRelay {
        OutboxRelay::new(
            outbox,
            broker,
            RelayConfig {
                poll_interval: Duration::from_millis(10),
                batch_size: batch,
            },
        )
    }

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.batch_size, 100);
    }

    #[tokio::test]
    async fn test_relay_publishes_and_marks() {
        let outbox = Arc::new(MemoryOutbox::default());
        let broker = MemoryBroker::new(1);
        outbox.push(msg("p1"));
        outbox.push(msg("p2"));

        let relayed = relay(outbox.clone(), broker.clone(), 10).relay_once().await.unwrap();
        assert_eq!(relayed, 2);
        assert_eq!(outbox.unpublished(), 0);
        assert_eq!(broker.message_count("payment.initiated"), 2);

        // Nothing left
        assert_eq!(relay(outbox, broker, 10).relay_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_relay_respects_batch_size() {
        let outbox = Arc::new(MemoryOutbox::default());
        let broker = MemoryBroker::new(1);
        for i in 0..5 {
            outbox.push(msg(&format!("p{}", i)));
        }
        let r = relay(outbox.clone(), broker, 2);
        assert_eq!(r.relay_once().await.unwrap(), 2);
        assert_eq!(outbox.unpublished(), 3);
    }

    #[tokio::test]
    async fn test_broker_outage_keeps_entries() {
        let outbox = Arc::new(MemoryOutbox::default());
        let broker = MemoryBroker::new(1);
        outbox.push(msg("p1"));
        broker.set_available(false);

        let r = relay(outbox.clone(), broker.clone(), 10);
        assert_eq!(r.relay_once().await.unwrap(), 0);
        assert_eq!(outbox.unpublished(), 1);

        broker.set_available(true);
        assert_eq!(r.relay_once().await.unwrap(), 1);
        assert_eq!(outbox.unpublished(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let outbox = Arc::new(MemoryOutbox::default());
        let broker = MemoryBroker::new(1);
        let r = Arc::new(relay(outbox.clone(), broker.clone(), 10));
        let token = CancellationToken::new();

        let handle = {
            let r = r.clone();
            let token = token.clone();
            tokio::spawn(async move { r.run(token).await })
        };

        outbox.push(msg("late"));
        let consumer = broker.consumer("g", "payment.initiated");
        let m = tokio::time::timeout(Duration::from_secs(2), consumer.fetch())
            .await
            .expect("relay should publish")
            .unwrap();
        assert_eq!(m.key, "late");

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("relay should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_pass_waits_for_poll_interval() {
        let outbox = Arc::new(MemoryOutbox::default());
        let broker = MemoryBroker::new(1);
        // A zero batch relays nothing and must still sleep between passes
        let r = Arc::new(relay(outbox.clone(), broker, 0));
        let token = CancellationToken::new();

        let handle = {
            let r = r.clone();
            let token = token.clone();
            tokio::spawn(async move { r.run(token).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();

        // 10ms interval over 100ms
        assert!(outbox.polls() <= 20, "relay spun: {} polls", outbox.polls());
    }
}
