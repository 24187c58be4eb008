//! Payment intake
//!
//! `initiate_payment` order of operations:
//!
//! 1. Idempotency lookup (a hit returns the stored response, no re-validation)
//! 2. Validation
//! 3. Persist PENDING record (+ outbox row in outbox mode). The record's
//!    unique idempotency key settles two requests that both missed step 1:
//!    the loser gets the winner's response
//! 4. Direct mode only: publish the settlement event
//! 5. Remember the response under the idempotency key
//!
//! Failure after step 3 in direct mode leaves a PENDING record with no event.
//! The caller sees an error and may retry with the same key; the retry finds
//! the record as a duplicate and publishes again.

use chrono::Utc;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

use super::error::PaymentError;
use super::idempotency::IdempotencyStore;
use super::models::{GetPaymentResponse, InitiatePaymentRequest, InitiatePaymentResponse, PaymentRecord};
use super::repository::{InsertOutcome, PaymentRepository};
use super::validation::validate_initiate_payment;
use crate::error::ServiceError;
use crate::events::bus::EventPublisher;
use crate::events::types::{OutboundMessage, SettlementEvent};
use crate::trace_context::TraceContext;

/// How the settlement event leaves the service.
#[derive(Clone)]
pub enum EventDispatch {
    /// Written to the outbox with the payment row; a relay publishes it.
    Outbox,
    /// Published inline after the payment row commits.
    Direct(Arc<dyn EventPublisher>),
}

impl EventDispatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventDispatch::Outbox => "outbox",
            EventDispatch::Direct(_) => "direct",
        }
    }
}

pub struct PaymentService {
    repo: Arc<dyn PaymentRepository>,
    idempotency: IdempotencyStore,
    dispatch: EventDispatch,
    topic: String,
}

impl PaymentService {
    pub fn new(
        repo: Arc<dyn PaymentRepository>,
        idempotency: IdempotencyStore,
        dispatch: EventDispatch,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            idempotency,
            dispatch,
            topic: topic.into(),
        }
    }

    pub async fn initiate_payment(
        &self,
        req: InitiatePaymentRequest,
        trace: TraceContext,
    ) -> Result<InitiatePaymentResponse, ServiceError> {
        let span = info_span!(
            "initiate_payment",
            payment_id = %req.payment_id,
            trace_id = %trace.trace_id()
        );
        self.initiate_inner(req, trace).instrument(span).await
    }

    async fn initiate_inner(
        &self,
        req: InitiatePaymentRequest,
        trace: TraceContext,
    ) -> Result<InitiatePaymentResponse, ServiceError> {
        let idempotency_key = req.idempotency_key.trim().to_string();
        if idempotency_key.is_empty() {
            return Err(ServiceError::InvalidArgument("idempotency_key is required".into()));
        }

        match self.idempotency.lookup(&idempotency_key).await {
            Ok(Some(cached)) => {
                info!(idempotency_key = %idempotency_key, "Returning cached response");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => {
                // Fail closed
                error!(idempotency_key = %idempotency_key, error = %e, "Idempotency lookup failed");
                return Err(ServiceError::Internal("idempotency store unavailable".into()));
            }
        }

        let payment = validate_initiate_payment(&req).map_err(|e| {
            warn!(error = %e, "Payment rejected by validation");
            ServiceError::InvalidArgument(e.to_string())
        })?;

        let now = Utc::now();
        let record = PaymentRecord::pending(&payment, now);
        let event = SettlementEvent::from_payment(&payment, now);
        let message = OutboundMessage::settlement(&self.topic, &event, &trace.child()).map_err(|e| {
            error!(error = %e, "Failed to encode settlement event");
            ServiceError::Internal("failed to encode settlement event".into())
        })?;

        let outbox = matches!(self.dispatch, EventDispatch::Outbox).then_some(&message);
        let outcome = self
            .repo
            .insert_pending(&record, outbox)
            .await
            .map_err(|e| match e {
                PaymentError::Conflict(id) => {
                    warn!(payment_id = %id, "Payment id reused with different parameters");
                    ServiceError::Conflict(format!("payment {} already exists with different parameters", id))
                }
                other => {
                    error!(error = %other, "Failed to save payment");
                    ServiceError::Internal("failed to save payment".into())
                }
            })?;

        if let InsertOutcome::KeyTaken { payment_id } = &outcome {
            info!(
                idempotency_key = %idempotency_key,
                owner = %payment_id,
                "Idempotency key already used by another payment"
            );
            return Ok(InitiatePaymentResponse::pending(payment_id));
        }

        if let EventDispatch::Direct(publisher) = &self.dispatch {
            match publisher.publish(message).await {
                Ok(delivery) => info!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Settlement event published"
                ),
                Err(e) => {
                    // Record stays PENDING with no event until the caller retries
                    error!(error = %e, "Failed to publish settlement event");
                    return Err(ServiceError::Internal("failed to publish settlement event".into()));
                }
            }
        }

        let response = InitiatePaymentResponse::pending(&payment.payment_id);
        if let Err(e) = self.idempotency.remember(&idempotency_key, &response).await {
            warn!(idempotency_key = %idempotency_key, error = %e, "Failed to cache idempotent response");
        }

        let duplicate = outcome == InsertOutcome::Duplicate;
        info!(
            amount = %payment.amount,
            currency = %payment.currency,
            duplicate,
            dispatch = self.dispatch.as_str(),
            "Payment initiated"
        );
        Ok(response)
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<GetPaymentResponse, ServiceError> {
        let payment_id = payment_id.trim();
        if payment_id.is_empty() {
            return Err(ServiceError::InvalidArgument("payment_id is required".into()));
        }

        let record = self
            .repo
            .get(payment_id)
            .await
            .map_err(|e| {
                error!(payment_id = %payment_id, error = %e, "Failed to load payment");
                ServiceError::Internal("failed to load payment".into())
            })?
            .ok_or_else(|| ServiceError::NotFound("payment not found".into()))?;

        Ok(record.to_response())
    }
}
