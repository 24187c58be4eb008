//! Payment intake and status tracking
//!
//! - [`validation`] - request checks and validated account ids
//! - [`state`] - PENDING / COMPLETED / FAILED state machine
//! - [`repository`] - `transactions` table and the outbox
//! - [`idempotency`] - 24h response cache keyed by idempotency key
//! - [`service`] - `initiate_payment` / `get_payment`

pub mod error;
pub mod idempotency;
pub mod models;
pub mod repository;
pub mod service;
pub mod state;
pub mod validation;

#[cfg(test)]
pub(crate) mod memory;

pub use error::PaymentError;
pub use idempotency::{IDEMPOTENCY_TTL, IdempotencyStore};
pub use models::{GetPaymentResponse, InitiatePaymentRequest, InitiatePaymentResponse, PaymentRecord};
pub use repository::{InsertOutcome, PaymentRepository, PgPaymentRepository};
pub use service::{EventDispatch, PaymentService};
pub use state::{PaymentStatus, StatusView, TransitionError};
pub use validation::{AccountId, ValidatedPayment, ValidationError, validate_initiate_payment};
