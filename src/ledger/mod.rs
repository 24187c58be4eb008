//! Ledger: account balances and atomic transfers
//!
//! - [`store`] - `LedgerStore` seam and the PostgreSQL implementation
//! - [`cache`] - read-aside balance cache
//! - [`service`] - balance inquiry
//!
//! A transfer debits the source and credits the destination in one database
//! transaction. Either both rows change or neither does.

pub mod cache;
pub mod error;
pub mod models;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod memory;

pub use cache::{BALANCE_CACHE_TTL, BalanceCache};
pub use error::LedgerError;
pub use models::{AccountBalance, BalanceSnapshot, TransferOrder, TransferOutcome};
pub use service::{BalanceService, BalanceView};
pub use store::{LedgerStore, PgLedgerStore};
