//! Settlement: consumes settlement events and moves money on the ledger
//!
//! - [`consumer`] - fetch / transfer / commit loop
//! - [`status`] - reports COMPLETED / FAILED back to the payment record

pub mod consumer;
pub mod status;


pub use consumer::{Disposition, SettlementConsumer, SettlementStats, SettlementStatsSnapshot};
pub use status::{LogStatusSink, PaymentStatusSink, RepositoryStatusSink};
