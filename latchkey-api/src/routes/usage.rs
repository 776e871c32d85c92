//! Usage Endpoint
//!
//! GET /api/v1/usage/{access_code} reports lifetime totals and usage over
//! the trailing quota window. Read-only; consumes no quota.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use latchkey_core::{AccessCode, BillingStatus, PlanTier, QuotaCeiling, WindowedUsage};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UsageResponse {
    pub access_code: AccessCode,
    pub plan: PlanTier,
    pub billing_status: BillingStatus,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    /// Usage inside the trailing quota window.
    pub window: WindowedUsage,
    pub window_hours: i64,
    /// Requests left under the ceiling; null when the plan has no
    /// client-visible ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_remaining: Option<i64>,
}

// ============================================================================
// HANDLER
// ============================================================================

/// GET /api/v1/usage/{access_code} - Usage totals for an account.
#[utoipa::path(
    get,
    path = "/api/v1/usage/{access_code}",
    tag = "Usage",
    params(
        ("access_code" = String, Path, description = "Account access code"),
    ),
    responses(
        (status = 200, description = "Usage reported", body = UsageResponse),
        (status = 401, description = "Unknown access code", body = crate::error::ApiError),
        (status = 503, description = "Ledger store unavailable", body = crate::error::ApiError),
    ),
)]
pub async fn usage(
    State(state): State<AppState>,
    Path(access_code): Path<AccessCode>,
) -> ApiResult<Json<UsageResponse>> {
    let account = state
        .store
        .account_get(&access_code)
        .await?
        .ok_or_else(ApiError::unknown_code)?;

    let limits = &state.config.plan_limits;
    let since = Utc::now() - limits.window();
    let window = state.store.windowed_usage(&access_code, since).await?;

    let requests_remaining = match limits.ceiling(account.plan) {
        QuotaCeiling::Lifetime(limit) => Some((limit - account.total_requests).max(0)),
        QuotaCeiling::Windowed(_) => None,
    };

    Ok(Json(UsageResponse {
        access_code: account.access_code,
        plan: account.plan,
        billing_status: account.billing_status,
        total_requests: account.total_requests,
        total_tokens: account.total_tokens,
        total_cost: account.total_cost,
        window,
        window_hours: limits.window_hours,
        requests_remaining,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/:access_code", get(usage))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_response_serializes_window() {
        let response = UsageResponse {
            access_code: AccessCode::new("ABCD1234EFGH5678"),
            plan: PlanTier::Standard,
            billing_status: BillingStatus::Active,
            total_requests: 42,
            total_tokens: 9001,
            total_cost: 0.37,
            window: WindowedUsage {
                requests: 7,
                tokens: 1200,
                cost: 0.02,
            },
            window_hours: 24,
            requests_remaining: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"window_hours\":24"));
        assert!(json.contains("\"requests\":7"));
        assert!(!json.contains("requests_remaining"));
    }
}
