//! Admin Endpoints
//!
//! Operational endpoints guarded by a shared admin credential in the
//! `x-admin-code` header. When no credential is configured the endpoints
//! refuse everything; there is no unauthenticated admin mode.
//!
//! - GET /api/v1/admin/accounts - list accounts
//! - PUT /api/v1/admin/accounts/{access_code}/enabled - kill switch
//! - DELETE /api/v1/admin/accounts/{access_code} - delete an account
//! - GET /api/v1/admin/cache/stats - response cache occupancy
//! - DELETE /api/v1/admin/cache - flush the response cache
//! - POST /api/v1/admin/context/sweep - run a context sweep now

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::response_cache::ResponseCacheStats;
use crate::state::AppState;
use latchkey_core::{AccessCode, Account};

/// Header carrying the shared admin credential.
pub const ADMIN_HEADER: &str = "x-admin-code";

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AccountListResponse {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AdminActionResponse {
    pub access_code: AccessCode,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PurgeResponse {
    pub removed: u64,
}

// ============================================================================
// GUARD
// ============================================================================

fn require_admin(config: &ApiConfig, headers: &HeaderMap) -> ApiResult<()> {
    let expected = config
        .admin_code
        .as_ref()
        .ok_or_else(|| ApiError::forbidden("Admin endpoints are not configured"))?;

    let presented = headers
        .get(ADMIN_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::forbidden("Missing admin credential"))?;

    if presented != expected.expose_secret() {
        tracing::warn!("Rejected admin request with wrong credential");
        return Err(ApiError::forbidden("Wrong admin credential"));
    }

    Ok(())
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/v1/admin/accounts - List accounts, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/admin/accounts",
    tag = "Admin",
    params(ListQuery),
    responses(
        (status = 200, description = "Accounts listed", body = AccountListResponse),
        (status = 403, description = "Admin credential missing or wrong", body = crate::error::ApiError),
    ),
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<AccountListResponse>> {
    require_admin(&state.config, &headers)?;

    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);
    let accounts = state.store.account_list(limit, offset).await?;

    Ok(Json(AccountListResponse { accounts }))
}

/// PUT /api/v1/admin/accounts/{access_code}/enabled - Kill switch.
#[utoipa::path(
    put,
    path = "/api/v1/admin/accounts/{access_code}/enabled",
    tag = "Admin",
    params(
        ("access_code" = String, Path, description = "Account access code"),
    ),
    request_body = SetEnabledRequest,
    responses(
        (status = 200, description = "Flag updated", body = AdminActionResponse),
        (status = 403, description = "Admin credential missing or wrong", body = crate::error::ApiError),
        (status = 404, description = "Account not found", body = crate::error::ApiError),
    ),
)]
pub async fn set_enabled(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(access_code): Path<AccessCode>,
    Json(request): Json<SetEnabledRequest>,
) -> ApiResult<Json<AdminActionResponse>> {
    require_admin(&state.config, &headers)?;

    let updated = state
        .store
        .account_set_enabled(&access_code, request.enabled)
        .await?;
    if !updated {
        return Err(ApiError::account_not_found());
    }

    tracing::info!(code = %access_code, enabled = request.enabled, "Account flag updated");
    Ok(Json(AdminActionResponse {
        access_code,
        done: true,
    }))
}

/// DELETE /api/v1/admin/accounts/{access_code} - Delete an account.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/accounts/{access_code}",
    tag = "Admin",
    params(
        ("access_code" = String, Path, description = "Account access code"),
    ),
    responses(
        (status = 200, description = "Account deleted", body = AdminActionResponse),
        (status = 403, description = "Admin credential missing or wrong", body = crate::error::ApiError),
        (status = 404, description = "Account not found", body = crate::error::ApiError),
    ),
)]
pub async fn delete_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(access_code): Path<AccessCode>,
) -> ApiResult<Json<AdminActionResponse>> {
    require_admin(&state.config, &headers)?;

    let deleted = state.store.account_delete(&access_code).await?;
    if !deleted {
        return Err(ApiError::account_not_found());
    }

    tracing::info!(code = %access_code, "Account deleted");
    Ok(Json(AdminActionResponse {
        access_code,
        done: true,
    }))
}

/// GET /api/v1/admin/cache/stats - Response cache occupancy.
#[utoipa::path(
    get,
    path = "/api/v1/admin/cache/stats",
    tag = "Admin",
    responses(
        (status = 200, description = "Cache stats", body = ResponseCacheStats),
        (status = 403, description = "Admin credential missing or wrong", body = crate::error::ApiError),
    ),
)]
pub async fn cache_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ResponseCacheStats>> {
    require_admin(&state.config, &headers)?;
    Ok(Json(state.responses.stats()))
}

/// DELETE /api/v1/admin/cache - Flush the response cache.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/cache",
    tag = "Admin",
    responses(
        (status = 200, description = "Cache flushed", body = PurgeResponse),
        (status = 403, description = "Admin credential missing or wrong", body = crate::error::ApiError),
    ),
)]
pub async fn clear_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<PurgeResponse>> {
    require_admin(&state.config, &headers)?;

    let removed = state.responses.clear() as u64;
    tracing::info!(removed, "Response cache flushed by operator");
    Ok(Json(PurgeResponse { removed }))
}

/// POST /api/v1/admin/context/sweep - Sweep expired context snapshots now.
#[utoipa::path(
    post,
    path = "/api/v1/admin/context/sweep",
    tag = "Admin",
    responses(
        (status = 200, description = "Sweep complete", body = PurgeResponse),
        (status = 403, description = "Admin credential missing or wrong", body = crate::error::ApiError),
        (status = 503, description = "Store unavailable", body = crate::error::ApiError),
    ),
)]
pub async fn sweep_context(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<PurgeResponse>> {
    require_admin(&state.config, &headers)?;

    let removed = state.store.context_sweep(Utc::now()).await?;
    tracing::info!(removed, "Context sweep run by operator");
    Ok(Json(PurgeResponse { removed }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/accounts", get(list_accounts))
        .route("/accounts/:access_code/enabled", put(set_enabled))
        .route("/accounts/:access_code", delete(delete_account))
        .route("/cache/stats", get(cache_stats))
        .route("/cache", delete(clear_cache))
        .route("/context/sweep", post(sweep_context))
        .with_state(state)
}
