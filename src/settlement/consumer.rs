//! Settlement Consumer
//!
//! Applies settlement events to the ledger:
//!
//! ```text
//! fetch ─► decode ─► ledger.transfer ─► invalidate caches ─► record status ─► commit
//! ```
//!
//! The offset is committed whatever the outcome, including undecodable
//! messages and failed transfers. A message is only redelivered if the
//! process stops between fetch and commit; the ledger's payment-id dedupe
//! makes that redelivery harmless.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::status::PaymentStatusSink;
use crate::events::bus::EventConsumer;
use crate::events::types::{InboundMessage, SettlementEvent};
use crate::ledger::{BalanceCache, LedgerStore, TransferOrder, TransferOutcome};
use crate::money::Currency;
use crate::payment::{PaymentError, PaymentStatus, TransitionError};

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transfer applied now
    Settled,
    /// Transfer was applied by an earlier delivery
    AlreadySettled,
    /// Ledger refused the transfer; the code says why
    Rejected(&'static str),
    /// Ledger unreachable; payment left PENDING
    Deferred,
    /// Payload could not be decoded
    Poison,
}

impl Disposition {
    /// Payment status this outcome resolves to, if any.
    pub fn resolved_status(&self) -> Option<PaymentStatus> {
        match self {
            Disposition::Settled | Disposition::AlreadySettled => Some(PaymentStatus::Completed),
            Disposition::Rejected(_) => Some(PaymentStatus::Failed),
            Disposition::Deferred | Disposition::Poison => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SettlementStats {
    pub settled: AtomicU64,
    pub duplicates: AtomicU64,
    pub rejected: AtomicU64,
    pub deferred: AtomicU64,
    pub poison: AtomicU64,
    pub commit_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementStatsSnapshot {
    pub settled: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub poison: u64,
    pub commit_failures: u64,
}

impl SettlementStats {
    fn count(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Settled => &self.settled,
            Disposition::AlreadySettled => &self.duplicates,
            Disposition::Rejected(_) => &self.rejected,
            Disposition::Deferred => &self.deferred,
            Disposition::Poison => &self.poison,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SettlementStatsSnapshot {
        SettlementStatsSnapshot {
            settled: self.settled.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            poison: self.poison.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for SettlementStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "settled={} duplicates={} rejected={} deferred={} poison={} commit_failures={}",
            self.settled, self.duplicates, self.rejected, self.deferred, self.poison, self.commit_failures
        )
    }
}

pub struct SettlementConsumer {
    consumer: Arc<dyn EventConsumer>,
    ledger: Arc<dyn LedgerStore>,
    cache: BalanceCache,
    status: Arc<dyn PaymentStatusSink>,
    error_backoff: Duration,
    stats: SettlementStats,
}

impl SettlementConsumer {
    pub fn new(
        consumer: Arc<dyn EventConsumer>,
        ledger: Arc<dyn LedgerStore>,
        cache: BalanceCache,
        status: Arc<dyn PaymentStatusSink>,
        error_backoff: Duration,
    ) -> Self {
        Self {
            consumer,
            ledger,
            cache,
            status,
            error_backoff,
            stats: SettlementStats::default(),
        }
    }

    pub fn stats(&self) -> SettlementStatsSnapshot {
        self.stats.snapshot()
    }

    /// Consume until `shutdown` fires.
    ///
    /// A message interrupted mid-processing is not committed, so the next
    /// member of the group receives it again.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Settlement consumer started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                r = self.consumer.fetch() => r,
            };

            let message = match fetched {
                Ok(m) => m,
                Err(e) => {
                    error!(error = %e, "Failed to fetch settlement event");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.error_backoff) => continue,
                    }
                }
            };

            let disposition = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    warn!(
                        partition = message.partition,
                        offset = message.offset,
                        "Shutdown during settlement, offset left uncommitted"
                    );
                    break;
                }
                d = self.process(&message) => d,
            };
            debug!(offset = message.offset, disposition = ?disposition, "Settlement event handled");

            if let Err(e) = self.consumer.commit(&message).await {
                self.stats.commit_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Failed to commit offset"
                );
            }
        }

        info!(stats = %self.stats(), "Settlement consumer stopped");
    }

    /// Handle one message. Never fails: every outcome is a [`Disposition`].
    pub async fn process(&self, message: &InboundMessage) -> Disposition {
        let trace_id = message
            .trace_context()
            .map(|t| t.trace_id())
            .unwrap_or_default();
        let span = info_span!(
            "settle",
            key = %message.key,
            partition = message.partition,
            offset = message.offset,
            trace_id = %trace_id
        );
        let disposition = self.settle(message).instrument(span).await;
        self.stats.count(disposition);
        disposition
    }

    async fn settle(&self, message: &InboundMessage) -> Disposition {
        let event = match SettlementEvent::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Undecodable settlement event, skipping");
                return Disposition::Poison;
            }
        };

        let disposition = match Currency::parse(&event.currency) {
            Ok(currency) => self.transfer(&event, currency).await,
            Err(e) => {
                warn!(payment_id = %event.payment_id, error = %e, "Settlement rejected");
                Disposition::Rejected("UNSUPPORTED_CURRENCY")
            }
        };

        if let Some(status) = disposition.resolved_status() {
            self.record_status(&event.payment_id, status).await;
        }
        disposition
    }

    async fn transfer(&self, event: &SettlementEvent, currency: Currency) -> Disposition {
        let order = TransferOrder {
            payment_id: event.payment_id.clone(),
            from_account: event.from_account.clone(),
            to_account: event.to_account.clone(),
            amount: event.amount,
            currency,
        };

        match self.ledger.transfer(&order).await {
            Ok(TransferOutcome::Applied { from, to }) => {
                info!(
                    payment_id = %order.payment_id,
                    amount = %order.amount,
                    from_balance = %from.balance,
                    to_balance = %to.balance,
                    "Payment settled"
                );
                self.invalidate(&order.from_account).await;
                self.invalidate(&order.to_account).await;
                Disposition::Settled
            }
            Ok(TransferOutcome::AlreadySettled) => {
                info!(payment_id = %order.payment_id, "Duplicate delivery, already settled");
                Disposition::AlreadySettled
            }
            Err(e) if e.is_transient() => {
                error!(payment_id = %order.payment_id, error = %e, "Settlement failed, payment left PENDING");
                Disposition::Deferred
            }
            Err(e) => {
                warn!(payment_id = %order.payment_id, code = e.code(), error = %e, "Settlement rejected");
                Disposition::Rejected(e.code())
            }
        }
    }

    async fn invalidate(&self, account_id: &str) {
        if let Err(e) = self.cache.invalidate(account_id).await {
            warn!(account_id = %account_id, error = %e, "Balance cache invalidation failed");
        }
    }

    async fn record_status(&self, payment_id: &str, status: PaymentStatus) {
        match self.status.record(payment_id, status).await {
            Ok(()) => debug!(payment_id = %payment_id, status = %status, "Payment status recorded"),
            Err(PaymentError::Transition(TransitionError::FromTerminal { from, .. })) => {
                debug!(payment_id = %payment_id, current = %from, "Payment already terminal");
            }
            Err(e) => {
                warn!(payment_id = %payment_id, status = %status, error = %e, "Failed to record payment status");
            }
        }
    }
}
