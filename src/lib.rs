//! paysettle - payment intake and ledger settlement
//!
//! A payment is accepted once (idempotency key + payment id), recorded as
//! PENDING, and handed to the ledger as a settlement event. The ledger moves
//! the money atomically and reports COMPLETED or FAILED back.
//!
//! # Modules
//!
//! - [`money`] - currencies and positive fixed-point amounts
//! - [`payment`] - validation, state machine, repository, intake service
//! - [`ledger`] - balances, atomic transfer, balance cache
//! - [`events`] - settlement event, bus seams and adapters, outbox relay
//! - [`settlement`] - settlement consumer loop
//! - [`kv`] - TTL key-value store (idempotency responses, balance cache)
//! - [`gateway`] - HTTP surface
//! - [`ratelimit`] - per-client fixed-window limiter
//! - [`trace_context`] - `traceparent` propagation
//! - [`config`] / [`logging`] - bootstrap

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod gateway;
pub mod kv;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod payment;
pub mod ratelimit;
pub mod settlement;
pub mod trace_context;

pub use error::ServiceError;
pub use money::{Amount, Currency, MoneyError};
pub use payment::{PaymentStatus, StatusView};
pub use trace_context::TraceContext;
