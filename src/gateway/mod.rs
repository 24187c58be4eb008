//! HTTP Gateway
//!
//! ```text
//! POST /api/v1/payments                     initiate payment   (payment role)
//! GET  /api/v1/payments/{payment_id}        payment details    (payment role)
//! GET  /api/v1/accounts/{account_id}/balance balance inquiry   (ledger role)
//! GET  /health
//! ```
//!
//! `/api/v1` routes sit behind the per-client rate limiter.

pub mod handlers;
pub mod response;
pub mod state;

pub use response::{ApiError, ApiResponse, ApiResult};
pub use state::AppState;

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ratelimit::FixedWindowRateLimiter;

/// Client key for rate limiting: first `X-Forwarded-For` hop, then
/// `X-Real-Ip`, then the peer address.
fn client_key(request: &Request<Body>) -> String {
    let headers = request.headers();
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limit_middleware(State(state): State<Arc<AppState>>, request: Request<Body>, next: Next) -> Response {
    let client = client_key(&request);
    if let Err(e) = state.limiter.check(&client) {
        warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");
        return ApiError(e).into_response();
    }
    next.run(request).await
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut api: Router<Arc<AppState>> = Router::new();
    if state.payments.is_some() {
        api = api
            .route("/payments", post(handlers::initiate_payment))
            .route("/payments/{payment_id}", get(handlers::get_payment));
    }
    if state.balances.is_some() {
        api = api.route("/accounts/{account_id}/balance", get(handlers::check_balance));
    }

    let mut app = Router::new().route("/health", get(handlers::health_check));
    if state.payments.is_some() || state.balances.is_some() {
        app = app.nest(
            "/api/v1",
            api.layer(from_fn_with_state(state.clone(), rate_limit_middleware)),
        );
    }
    app.with_state(state)
}

/// Serve until `shutdown` fires, then drain in-flight requests.
pub async fn serve(addr: SocketAddr, app: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP gateway stopped");
    Ok(())
}

/// Periodically drop idle rate-limit windows.
pub fn spawn_rate_limit_sweeper(
    limiter: Arc<FixedWindowRateLimiter>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = limiter.evict_expired();
                    if evicted > 0 {
                        debug!(evicted, remaining = limiter.tracked_clients(), "Evicted idle rate-limit windows");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::ledger::memory::MemoryLedgerStore;
    use crate::ledger::{BalanceCache, BalanceService};
    use crate::money::Currency;
    use crate::payment::memory::MemoryPaymentRepository;
    use crate::payment::{EventDispatch, IdempotencyStore, PaymentService};
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const A: &str = "3f2b8c1e-9a4d-4e7b-8c2f-1a2b3c4d5e6f";
    const B: &str = "7d6c5b4a-3f2e-4d1c-9b8a-0f1e2d3c4b5a";

    fn payment_service() -> Arc<PaymentService> {
        Arc::new(PaymentService::new(
            Arc::new(MemoryPaymentRepository::new()),
            IdempotencyStore::new(Arc::new(MemoryKvStore::new())),
            EventDispatch::Outbox,
            "payment.initiated",
        ))
    }

    async fn balance_service() -> Arc<BalanceService> {
        let ledger = Arc::new(MemoryLedgerStore::new());
        ledger.open_account(A, Currency::Try, Decimal::new(50000, 2)).await;
        Arc::new(BalanceService::new(
            ledger,
            BalanceCache::new(Arc::new(MemoryKvStore::new())),
        ))
    }

    fn payment_app(limit: u32) -> Router {
        let limiter = Arc::new(FixedWindowRateLimiter::per_minute(limit));
        router(Arc::new(AppState::new(limiter).with_payments(payment_service())))
    }

    fn body(payment_id: &str, to: &str) -> Value {
        json!({
            "payment_id": payment_id,
            "from_account": A,
            "to_account": to,
            "amount": "100.00",
            "currency": "TRY",
            "idempotency_key": format!("key-{}", payment_id),
        })
    }

    fn post_json(uri: &str, value: &Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = payment_app(100);
        let (status, json) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["code"], 0);
        assert!(json["data"]["timestamp_ms"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_initiate_then_get() {
        let app = payment_app(100);

        let (status, json) = call(&app, post_json("/api/v1/payments", &body("pay-1", B))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"]["payment_id"], "pay-1");
        assert_eq!(json["data"]["status"], "PENDING");
        assert_eq!(json["data"]["message"], "Payment initiated");

        let (status, json) = call(&app, get("/api/v1/payments/pay-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["amount"], "100.00");
        assert_eq!(json["data"]["currency"], "TRY");
        assert_eq!(json["data"]["message"], "Payment details retrieved");
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let app = payment_app(100);

        let bad = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = call(&app, bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], 1001);
        assert!(json.get("data").is_none());

        let (status, _) = call(&app, post_json("/api/v1/payments", &body("pay-2", A))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = call(&app, get("/api/v1/payments/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], 4004);

        call(&app, post_json("/api/v1/payments", &body("pay-3", B))).await;
        let mut changed = body("pay-3", B);
        changed["amount"] = json!("99.00");
        changed["idempotency_key"] = json!("another-key");
        let (status, json) = call(&app, post_json("/api/v1/payments", &changed)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], 4009);
    }

    #[tokio::test]
    async fn test_rate_limit_per_client() {
        let app = payment_app(2);
        let from = |ip: &str| {
            Request::builder()
                .uri("/api/v1/payments/x")
                .header("x-forwarded-for", format!("{}, 10.0.0.1", ip))
                .body(Body::empty())
                .unwrap()
        };

        call(&app, from("203.0.113.7")).await;
        call(&app, from("203.0.113.7")).await;
        let (status, json) = call(&app, from("203.0.113.7")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["code"], 4029);

        let (status, _) = call(&app, from("198.51.100.1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Health is not limited
        let (status, _) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_routes_follow_role() {
        let limiter = Arc::new(FixedWindowRateLimiter::default());
        let ledger_app = router(Arc::new(
            AppState::new(limiter).with_balances(balance_service().await),
        ));

        let uri = format!("/api/v1/accounts/{}/balance", A);
        let (status, json) = call(&ledger_app, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["balance"], "500.00");
        assert_eq!(json["data"]["currency"], "TRY");

        let resp = ledger_app.clone().oneshot(get("/api/v1/payments/x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let payment_only = payment_app(100);
        let resp = payment_only.oneshot(get(&uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_client_key_fallbacks() {
        let req = Request::builder()
            .header("x-real-ip", "192.0.2.5")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "192.0.2.5");

        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_key(&req), "127.0.0.1");
    }
}
