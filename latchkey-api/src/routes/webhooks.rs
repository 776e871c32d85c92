//! Billing Webhook Endpoint
//!
//! POST /api/v1/webhooks/billing receives payment-processor deliveries.
//! The raw body is verified against the shared HMAC secret before any
//! parsing; an unverifiable delivery is rejected without touching the
//! ledger.
//!
//! Every 2xx acknowledges the delivery. Errors (unknown account, store
//! failure) roll back and surface as non-2xx so the processor's
//! at-least-once retry redelivers.

use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::reconciler::{verify_signature, ReconcileOutcome, SIGNATURE_HEADER};
use crate::state::AppState;
use latchkey_core::BillingEvent;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: ReconcileOutcome,
}

// ============================================================================
// HANDLER
// ============================================================================

/// POST /api/v1/webhooks/billing - Receive a billing event delivery.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/billing",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Delivery processed", body = WebhookResponse),
        (status = 400, description = "Malformed event envelope", body = crate::error::ApiError),
        (status = 401, description = "Signature verification failed", body = crate::error::ApiError),
        (status = 404, description = "No account for this event", body = crate::error::ApiError),
        (status = 503, description = "Ledger store unavailable", body = crate::error::ApiError),
    ),
)]
pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::untrusted_event("Missing signature header"))?;

    if !verify_signature(&state.config.webhook_secret, &body, signature) {
        tracing::warn!("Webhook delivery failed signature verification");
        return Err(ApiError::untrusted_event(
            "Webhook signature verification failed",
        ));
    }

    let event: BillingEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid_input(format!("Malformed billing event: {}", e)))?;

    let outcome = state.reconciler.apply(&event).await?;

    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/billing", post(billing_webhook))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_response_serializes_outcome() {
        let response = WebhookResponse {
            received: true,
            outcome: ReconcileOutcome::Duplicate,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"outcome\":\"duplicate\""));
    }
}
