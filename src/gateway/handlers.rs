//! HTTP handlers
//!
//! Thin adapters: decode, call the service with a deadline, wrap the result
//! in the envelope.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::response::{ApiError, ApiResponse, ApiResult, ok};
use super::state::AppState;
use crate::error::ServiceError;
use crate::ledger::BalanceView;
use crate::payment::{GetPaymentResponse, InitiatePaymentRequest, InitiatePaymentResponse};
use crate::trace_context::{TRACEPARENT_HEADER, TraceContext};

/// Upper bound on one service call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn with_deadline<T>(fut: impl Future<Output = Result<T, ServiceError>>) -> Result<T, ApiError> {
    match tokio::time::timeout(REQUEST_TIMEOUT, fut).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => {
            warn!(timeout_ms = REQUEST_TIMEOUT.as_millis() as u64, "Request timed out");
            Err(ServiceError::Internal("request timed out".into()).into())
        }
    }
}

/// Incoming `traceparent`, or a fresh root when absent or malformed.
fn trace_from_headers(headers: &HeaderMap) -> TraceContext {
    let incoming = headers
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok());
    match incoming.and_then(TraceContext::parse) {
        Some(trace) => trace,
        None => {
            if let Some(raw) = incoming {
                debug!(traceparent = %raw, "Ignoring malformed traceparent");
            }
            TraceContext::new_root()
        }
    }
}

fn unavailable(what: &str) -> ApiError {
    ServiceError::Internal(format!("{} service not configured", what)).into()
}

/// POST /api/v1/payments
pub async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<InitiatePaymentRequest>, JsonRejection>,
) -> ApiResult<InitiatePaymentResponse> {
    let Json(req) = body.map_err(|e| ServiceError::InvalidArgument(format!("invalid request body: {}", e.body_text())))?;
    let payments = state.payments.as_ref().ok_or_else(|| unavailable("payment"))?;

    let trace = trace_from_headers(&headers);
    let resp = with_deadline(payments.initiate_payment(req, trace)).await?;
    ok(resp)
}

/// GET /api/v1/payments/{payment_id}
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<String>,
) -> ApiResult<GetPaymentResponse> {
    let payments = state.payments.as_ref().ok_or_else(|| unavailable("payment"))?;
    ok(with_deadline(payments.get_payment(&payment_id)).await?)
}

/// GET /api/v1/accounts/{account_id}/balance
pub async fn check_balance(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> ApiResult<BalanceView> {
    let balances = state.balances.as_ref().ok_or_else(|| unavailable("balance"))?;
    ok(with_deadline(balances.check_balance(&account_id)).await?)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
}

/// GET /health
///
/// 503 when the database is configured and does not answer.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    if let Some(db) = &state.db {
        if let Err(e) = db.health_check().await {
            tracing::error!(error = %e, "Health check: database ping failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    code: 503,
                    msg: "unavailable".to_string(),
                    data: None,
                }),
            );
        }
    }
    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: Utc::now().timestamp_millis(),
        })),
    )
}
