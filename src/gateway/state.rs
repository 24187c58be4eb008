use std::sync::Arc;

use crate::db::Database;
use crate::ledger::BalanceService;
use crate::payment::PaymentService;
use crate::ratelimit::FixedWindowRateLimiter;

/// Shared gateway state. A role without a service leaves its routes unmounted.
#[derive(Clone)]
pub struct AppState {
    /// Intake (payment role)
    pub payments: Option<Arc<PaymentService>>,
    /// Balance inquiry (ledger role)
    pub balances: Option<Arc<BalanceService>>,
    pub limiter: Arc<FixedWindowRateLimiter>,
    /// Pinged by `/health` when present
    pub db: Option<Database>,
}

impl AppState {
    pub fn new(limiter: Arc<FixedWindowRateLimiter>) -> Self {
        Self {
            payments: None,
            balances: None,
            limiter,
            db: None,
        }
    }

    pub fn with_payments(mut self, payments: Arc<PaymentService>) -> Self {
        self.payments = Some(payments);
        self
    }

    pub fn with_balances(mut self, balances: Arc<BalanceService>) -> Self {
        self.balances = Some(balances);
        self
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }
}
