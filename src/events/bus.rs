//! Event bus seams

use async_trait::async_trait;
use thiserror::Error;

use super::types::{Delivery, InboundMessage, OutboundMessage};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported broker url: {0}")]
    UnsupportedUrl(String),

    #[error("bus storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("header codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl BusError {
    pub fn code(&self) -> &'static str {
        match self {
            BusError::Unavailable(_) => "BROKER_UNAVAILABLE",
            BusError::UnsupportedUrl(_) => "UNSUPPORTED_URL",
            BusError::Storage(_) => "STORAGE_ERROR",
            BusError::Codec(_) => "CODEC_ERROR",
        }
    }
}

/// Durable publish. `Ok` means the broker has accepted the message.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<Delivery, BusError>;
}

/// Group consumer with explicit offset commits.
///
/// Uncommitted messages are redelivered to the next consumer of the group
/// (at-least-once).
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Wait for the next message. Cancel-safe: dropping the future loses
    /// nothing.
    async fn fetch(&self) -> Result<InboundMessage, BusError>;

    /// Mark `message` and everything before it in its partition as done.
    async fn commit(&self, message: &InboundMessage) -> Result<(), BusError>;
}
