//! In-process partitioned broker
//!
//! Same delivery contract as the PostgreSQL log: per-partition order, group
//! offsets, redelivery of anything not committed. Used for `memory://` and
//! for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use super::bus::{BusError, EventConsumer, EventPublisher};
use super::types::{Delivery, Headers, InboundMessage, OutboundMessage, partition_for};

struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    headers: Headers,
}

#[derive(Default)]
struct BrokerState {
    /// topic -> partition -> records
    logs: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic, partition) -> next offset to deliver
    committed: HashMap<(String, String, i32), i64>,
}

pub struct MemoryBroker {
    partitions: i32,
    state: Mutex<BrokerState>,
    notify: Notify,
    available: AtomicBool,
}

impl MemoryBroker {
    pub fn new(partitions: i32) -> Arc<Self> {
        Arc::new(Self {
            partitions: partitions.max(1),
            state: Mutex::new(BrokerState::default()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
        })
    }

    pub fn partitions(&self) -> i32 {
        self.partitions
    }

    /// While unavailable, publish and fetch fail with [`BusError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            self.notify.notify_waiters();
        }
    }

    /// Join `group` on `topic`, starting from the group's committed offsets.
    pub fn consumer(self: &Arc<Self>, group: &str, topic: &str) -> MemoryConsumer {
        MemoryConsumer {
            broker: Arc::clone(self),
            group: group.to_string(),
            topic: topic.to_string(),
            positions: Mutex::new(None),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Total messages ever published to `topic`.
    pub fn message_count(&self, topic: &str) -> usize {
        self.lock()
            .logs
            .get(topic)
            .map(|parts| parts.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), BusError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Unavailable("memory broker offline".into()))
        }
    }
}

#[async_trait]
impl EventPublisher for MemoryBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<Delivery, BusError> {
        self.check_available()?;
        let partition = partition_for(&message.key, self.partitions);
        let offset = {
            let mut state = self.lock();
            let parts = state
                .logs
                .entry(message.topic)
                .or_insert_with(|| (0..self.partitions).map(|_| Vec::new()).collect());
            let log = &mut parts[partition as usize];
            log.push(StoredRecord {
                key: message.key,
                payload: message.payload,
                headers: message.headers,
            });
            (log.len() - 1) as i64
        };
        self.notify.notify_waiters();
        Ok(Delivery { partition, offset })
    }
}

pub struct MemoryConsumer {
    broker: Arc<MemoryBroker>,
    group: String,
    topic: String,
    /// Next offset to hand out, per partition. Loaded on first poll.
    positions: Mutex<Option<Vec<i64>>>,
    cursor: AtomicUsize,
}

impl MemoryConsumer {
    fn poll(&self) -> Option<InboundMessage> {
        let state = self.broker.lock();
        let mut positions = self.positions.lock().unwrap_or_else(PoisonError::into_inner);
        let n = self.broker.partitions;
        let positions = positions.get_or_insert_with(|| {
            (0..n)
                .map(|p| {
                    state
                        .committed
                        .get(&(self.group.clone(), self.topic.clone(), p))
                        .copied()
                        .unwrap_or(0)
                })
                .collect()
        });

        let parts = state.logs.get(&self.topic)?;
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for i in 0..n as usize {
            let partition = (start + i) % n as usize;
            let position = positions[partition];
            if let Some(record) = parts[partition].get(position as usize) {
                positions[partition] = position + 1;
                return Some(InboundMessage {
                    topic: self.topic.clone(),
                    partition: partition as i32,
                    offset: position,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    headers: record.headers.clone(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl EventConsumer for MemoryConsumer {
    async fn fetch(&self) -> Result<InboundMessage, BusError> {
        loop {
            // Register before polling so a publish in between is not missed
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.broker.check_available()?;
            if let Some(message) = self.poll() {
                return Ok(message);
            }
            notified.await;
        }
    }

    async fn commit(&self, message: &InboundMessage) -> Result<(), BusError> {
        let mut state = self.broker.lock();
        let next = message.offset + 1;
        state
            .committed
            .entry((self.group.clone(), message.topic.clone(), message.partition))
            .and_modify(|o| *o = (*o).max(next))
            .or_insert(next);
        Ok(())
    }
}
