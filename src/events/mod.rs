//! Event bus
//!
//! - [`types`] - settlement event and message envelopes
//! - [`bus`] - `EventPublisher` / `EventConsumer` seams
//! - [`memory`] - in-process broker (`memory://`)
//! - [`postgres`] - PostgreSQL log (`postgres://`)
//! - [`outbox`] - transactional outbox relay
//!
//! Delivery is at-least-once, ordered per partition. Messages are
//! partitioned by key.

pub mod bus;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod types;

pub use bus::{BusError, EventConsumer, EventPublisher};
pub use memory::MemoryBroker;
pub use outbox::{Outbox, OutboxEntry, OutboxRelay, RelayConfig};
pub use postgres::PgEventLog;
pub use types::{Delivery, Headers, InboundMessage, OutboundMessage, SettlementEvent};

use std::sync::Arc;
use std::time::Duration;

/// A connected bus, shared by the publisher and consumer roles of one process.
#[derive(Clone)]
pub enum EventBus {
    Memory(Arc<MemoryBroker>),
    Postgres(PgEventLog),
}

impl EventBus {
    /// Connect using the first broker URL's scheme. Every listed broker must
    /// use the same scheme.
    pub async fn connect(brokers: &[String], partitions: i32) -> Result<Self, BusError> {
        let first = brokers
            .first()
            .ok_or_else(|| BusError::Unavailable("no broker configured".into()))?;

        if first.starts_with("memory://") {
            tracing::info!(partitions, "Using in-process event bus");
            return Ok(EventBus::Memory(MemoryBroker::new(partitions)));
        }
        if first.starts_with("postgres://") || first.starts_with("postgresql://") {
            let log = PgEventLog::connect(brokers, partitions).await?;
            return Ok(EventBus::Postgres(log));
        }
        Err(BusError::UnsupportedUrl(first.clone()))
    }

    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        match self {
            EventBus::Memory(broker) => broker.clone(),
            EventBus::Postgres(log) => Arc::new(log.clone()),
        }
    }

    pub fn consumer(&self, group: &str, topic: &str, poll_interval: Duration) -> Arc<dyn EventConsumer> {
        match self {
            EventBus::Memory(broker) => Arc::new(broker.consumer(group, topic)),
            EventBus::Postgres(log) => Arc::new(log.consumer(group, topic, poll_interval)),
        }
    }
}
