//! Account Endpoints
//!
//! - POST /api/v1/accounts/trial - provision a fresh trial access code
//! - POST /api/v1/validate - report an access code's standing without
//!   consuming quota
//!
//! Validation reports denials as data rather than HTTP errors: the IDE
//! add-in polls it to decide what UI to show, and a denied code is a
//! normal answer there, not a failure.

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::admission::{Decision, Denial};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use latchkey_core::{AccessCode, Account, BillingStatus, PlanTier};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TrialAccountResponse {
    pub access_code: AccessCode,
    pub plan: PlanTier,
    pub requests_remaining: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ValidateRequest {
    pub access_code: AccessCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_status: Option<BillingStatus>,
    /// Requests left under the ceiling; null when the plan has no
    /// client-visible ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_remaining: Option<i64>,
    /// Denial reason when `valid` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn denial_reason(denial: &Denial) -> String {
    match denial {
        Denial::UnknownCode => "unknown_code".to_string(),
        Denial::Disabled => "disabled".to_string(),
        Denial::BillingInactive(status) => format!("billing_{}", status),
        Denial::QuotaExceeded { .. } => "quota_exceeded".to_string(),
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/accounts/trial - Provision a trial account.
#[utoipa::path(
    post,
    path = "/api/v1/accounts/trial",
    tag = "Accounts",
    responses(
        (status = 200, description = "Trial account created", body = TrialAccountResponse),
        (status = 503, description = "Ledger store unavailable", body = crate::error::ApiError),
    ),
)]
pub async fn create_trial(
    State(state): State<AppState>,
) -> ApiResult<Json<TrialAccountResponse>> {
    // The code space makes collisions vanishingly rare; the retry loop
    // exists so a collision is still not a user-visible failure.
    for _ in 0..5 {
        let account = Account::new_trial(AccessCode::random(), Utc::now());
        if state.store.account_insert_trial(&account).await? {
            tracing::info!(code = %account.access_code, "Trial account provisioned");
            return Ok(Json(TrialAccountResponse {
                access_code: account.access_code,
                plan: account.plan,
                requests_remaining: state.config.plan_limits.trial_lifetime_requests,
            }));
        }
    }

    Err(ApiError::internal_error(
        "Access code generation kept colliding",
    ))
}

/// POST /api/v1/validate - Report an access code's standing.
#[utoipa::path(
    post,
    path = "/api/v1/validate",
    tag = "Accounts",
    request_body = ValidateRequest,
    responses(
        (status = 200, description = "Standing reported", body = ValidateResponse),
        (status = 503, description = "Ledger store unavailable", body = crate::error::ApiError),
    ),
)]
pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<ValidateResponse>> {
    let (account, decision) = state
        .admission
        .check(&request.access_code, 1, Utc::now())
        .await?;

    let response = match decision {
        Decision::Allow { remaining } => {
            let account = account
                .ok_or_else(|| ApiError::internal_error("Admission allowed without account"))?;
            ValidateResponse {
                valid: true,
                plan: Some(account.plan),
                billing_status: Some(account.billing_status),
                requests_remaining: remaining,
                reason: None,
            }
        }
        Decision::Deny(denial) => ValidateResponse {
            valid: false,
            plan: account.as_ref().map(|a| a.plan),
            billing_status: account.as_ref().map(|a| a.billing_status),
            requests_remaining: None,
            reason: Some(denial_reason(&denial)),
        },
    };

    Ok(Json(response))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/accounts/trial", post(create_trial))
        .route("/validate", post(validate))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_reasons_are_stable_strings() {
        assert_eq!(denial_reason(&Denial::UnknownCode), "unknown_code");
        assert_eq!(
            denial_reason(&Denial::BillingInactive(BillingStatus::PastDue)),
            "billing_past_due"
        );
        assert_eq!(
            denial_reason(&Denial::QuotaExceeded { used: 50, limit: 50 }),
            "quota_exceeded"
        );
    }

    #[test]
    fn validate_response_omits_empty_fields() {
        let response = ValidateResponse {
            valid: false,
            plan: None,
            billing_status: None,
            requests_remaining: None,
            reason: Some("unknown_code".into()),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("plan"));
        assert!(json.contains("unknown_code"));
    }
}
