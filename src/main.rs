//! paysettle
//!
//! ```text
//! paysettle [--env dev] [--role payment|ledger|all]
//! ```
//!
//! - `payment`: intake HTTP + outbox relay
//! - `ledger`: balance HTTP + settlement consumer
//! - `all`: both in one process

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use paysettle::config::{AppConfig, DispatchMode, ServiceEnv};
use paysettle::db::Database;
use paysettle::events::{EventBus, OutboxRelay, RelayConfig};
use paysettle::gateway::{self, AppState};
use paysettle::kv;
use paysettle::ledger::{BalanceCache, BalanceService, PgLedgerStore};
use paysettle::payment::{EventDispatch, IdempotencyStore, PaymentService, PgPaymentRepository};
use paysettle::ratelimit::FixedWindowRateLimiter;
use paysettle::settlement::{LogStatusSink, PaymentStatusSink, RepositoryStatusSink, SettlementConsumer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Payment,
    Ledger,
    All,
}

impl Role {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "payment" => Some(Role::Payment),
            "ledger" => Some(Role::Ledger),
            "all" => Some(Role::All),
            _ => None,
        }
    }

    fn runs_payment(self) -> bool {
        matches!(self, Role::Payment | Role::All)
    }

    fn runs_ledger(self) -> bool {
        matches!(self, Role::Ledger | Role::All)
    }
}

fn arg_value(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    arg_value(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_role() -> anyhow::Result<Role> {
    match arg_value(&["--role"]) {
        None => Ok(Role::All),
        Some(r) => Role::parse(&r).with_context(|| format!("unknown role '{}' (payment|ledger|all)", r)),
    }
}

fn main() {
    // A missing .env is normal in deployed environments
    let _ = dotenvy::dotenv();

    let env = get_env();
    let role = match get_role() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            std::process::exit(2);
        }
    };
    let app_config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            std::process::exit(1);
        }
    };
    let service_env = match ServiceEnv::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = paysettle::logging::init_logging(&app_config);
    info!(
        build = env!("PAYSETTLE_BUILD"),
        env = %env,
        role = ?role,
        dispatch = ?service_env.dispatch_mode,
        "Starting paysettle"
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start tokio runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(role, app_config, service_env)) {
        error!(error = ?e, "paysettle exited with error");
        eprintln!("FATAL: {:#}", e);
        std::process::exit(1);
    }
    info!("paysettle stopped");
}

async fn run(role: Role, config: AppConfig, service_env: ServiceEnv) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    let db = Database::connect(&service_env.database_url)
        .await
        .context("connecting to DATABASE_URL")?;
    db.apply_schema().await.context("applying schema")?;
    info!("Database connected");

    let kv = kv::open(&service_env.cache_url, service_env.cache_password.as_deref())
        .await
        .context("opening CACHE_URL")?;
    let bus = EventBus::connect(&service_env.event_bus_brokers, service_env.event_bus_partitions)
        .await
        .context("connecting to EVENT_BUS_BROKERS")?;

    let limit = service_env
        .rate_limit_per_minute
        .unwrap_or(config.gateway.rate_limit_per_minute);
    let limiter = Arc::new(FixedWindowRateLimiter::per_minute(limit));
    let mut state = AppState::new(limiter.clone()).with_database(db.clone());

    let mut local_payments: Option<Arc<PgPaymentRepository>> = None;

    if role.runs_payment() {
        let repo = Arc::new(PgPaymentRepository::new(db.pool().clone()));
        let dispatch = match service_env.dispatch_mode {
            DispatchMode::Outbox => {
                let relay = OutboxRelay::new(
                    repo.clone(),
                    bus.publisher(),
                    RelayConfig {
                        poll_interval: Duration::from_millis(config.outbox.poll_interval_ms),
                        batch_size: config.outbox.batch_size,
                    },
                );
                let token = shutdown.clone();
                tasks.push(("outbox-relay", tokio::spawn(async move { relay.run(token).await })));
                EventDispatch::Outbox
            }
            DispatchMode::Direct => EventDispatch::Direct(bus.publisher()),
        };

        let payments = PaymentService::new(
            repo.clone(),
            IdempotencyStore::new(kv.clone()),
            dispatch,
            service_env.event_bus_topic.clone(),
        );
        state = state.with_payments(Arc::new(payments));
        local_payments = Some(repo);
    }

    if role.runs_ledger() {
        let ledger = Arc::new(PgLedgerStore::new(db.pool().clone()));
        let cache = BalanceCache::new(kv.clone());
        state = state.with_balances(Arc::new(BalanceService::new(ledger.clone(), cache.clone())));

        let status: Arc<dyn PaymentStatusSink> = match (&service_env.payments_database_url, local_payments) {
            (Some(url), _) => {
                let payments_db = Database::connect(url)
                    .await
                    .context("connecting to PAYMENTS_DATABASE_URL")?;
                Arc::new(RepositoryStatusSink::new(Arc::new(PgPaymentRepository::new(
                    payments_db.pool().clone(),
                ))))
            }
            (None, Some(repo)) => Arc::new(RepositoryStatusSink::new(repo)),
            (None, None) => {
                warn!("PAYMENTS_DATABASE_URL not set, settlement results are logged only");
                Arc::new(LogStatusSink)
            }
        };

        let consumer = bus.consumer(
            &service_env.event_bus_group,
            &service_env.event_bus_topic,
            config.settlement.poll_interval(),
        );
        let settlement = SettlementConsumer::new(consumer, ledger, cache, status, config.settlement.error_backoff());
        let token = shutdown.clone();
        tasks.push(("settlement", tokio::spawn(async move { settlement.run(token).await })));
    }

    tasks.push((
        "rate-limit-sweeper",
        gateway::spawn_rate_limit_sweeper(
            limiter,
            Duration::from_secs(config.gateway.rate_limit_sweep_secs),
            shutdown.clone(),
        ),
    ));
    tasks.push((
        "kv-sweeper",
        kv::spawn_kv_sweeper(kv, Duration::from_secs(config.cache.sweep_secs), shutdown.clone()),
    ));

    let app = gateway::router(Arc::new(state));
    let server = tokio::spawn({
        let token = shutdown.clone();
        let addr = service_env.listen_addr;
        async move {
            let result = gateway::serve(addr, app, token.clone()).await;
            // Server exit takes the workers down with it
            token.cancel();
            result
        }
    });

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    for (name, task) in tasks {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Task panicked");
        }
    }

    server
        .await
        .context("HTTP server task panicked")?
        .context("HTTP server failed")
}
