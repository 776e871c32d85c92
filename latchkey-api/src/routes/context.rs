//! Context Endpoints
//!
//! - POST /api/v1/context - store a context snapshot
//! - GET /api/v1/context/recent/{access_code} - list live snapshots
//! - DELETE /api/v1/context/{access_code} - drop everything for an account
//!
//! Context operations require a known access code but do not consume
//! request quota; they exist so the add-in can ship editor state ahead of
//! the prompts that reference it.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use latchkey_core::{AccessCode, ContextPayload, ContextSnapshot};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StoreContextRequest {
    pub access_code: AccessCode,
    pub payload: ContextPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StoreContextResponse {
    pub fingerprint: String,
    /// True when identical content was already stored and only its expiry
    /// was refreshed.
    pub deduplicated: bool,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct RecentQuery {
    /// Max snapshots to return, newest first.
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RecentContextResponse {
    pub snapshots: Vec<ContextSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ClearContextResponse {
    pub deleted: u64,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn require_account(state: &AppState, code: &AccessCode) -> ApiResult<()> {
    state
        .store
        .account_get(code)
        .await?
        .map(|_| ())
        .ok_or_else(ApiError::unknown_code)
}

/// POST /api/v1/context - Store a context snapshot.
#[utoipa::path(
    post,
    path = "/api/v1/context",
    tag = "Context",
    request_body = StoreContextRequest,
    responses(
        (status = 200, description = "Snapshot stored", body = StoreContextResponse),
        (status = 400, description = "Payload failed validation", body = crate::error::ApiError),
        (status = 401, description = "Unknown access code", body = crate::error::ApiError),
        (status = 413, description = "Payload too large", body = crate::error::ApiError),
    ),
)]
pub async fn store_context(
    State(state): State<AppState>,
    Json(request): Json<StoreContextRequest>,
) -> ApiResult<Json<StoreContextResponse>> {
    require_account(&state, &request.access_code).await?;

    let stored = state
        .context
        .store_snapshot(&request.access_code, &request.payload)
        .await?;

    Ok(Json(StoreContextResponse {
        fingerprint: stored.snapshot.fingerprint,
        deduplicated: stored.deduplicated,
        expires_at: stored.snapshot.expires_at,
    }))
}

/// GET /api/v1/context/recent/{access_code} - List live snapshots.
#[utoipa::path(
    get,
    path = "/api/v1/context/recent/{access_code}",
    tag = "Context",
    params(
        ("access_code" = String, Path, description = "Account access code"),
        RecentQuery,
    ),
    responses(
        (status = 200, description = "Live snapshots, newest first", body = RecentContextResponse),
        (status = 401, description = "Unknown access code", body = crate::error::ApiError),
    ),
)]
pub async fn recent_context(
    State(state): State<AppState>,
    Path(access_code): Path<AccessCode>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<RecentContextResponse>> {
    require_account(&state, &access_code).await?;

    let limit = query.limit.clamp(1, 100);
    let snapshots = state.context.recent(&access_code, limit).await?;

    Ok(Json(RecentContextResponse { snapshots }))
}

/// DELETE /api/v1/context/{access_code} - Drop all snapshots.
#[utoipa::path(
    delete,
    path = "/api/v1/context/{access_code}",
    tag = "Context",
    params(
        ("access_code" = String, Path, description = "Account access code"),
    ),
    responses(
        (status = 200, description = "Snapshots removed", body = ClearContextResponse),
        (status = 401, description = "Unknown access code", body = crate::error::ApiError),
    ),
)]
pub async fn clear_context(
    State(state): State<AppState>,
    Path(access_code): Path<AccessCode>,
) -> ApiResult<Json<ClearContextResponse>> {
    require_account(&state, &access_code).await?;

    let deleted = state.context.clear(&access_code).await?;
    tracing::info!(code = %access_code, deleted, "Context cleared");

    Ok(Json(ClearContextResponse { deleted }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(store_context))
        .route("/recent/:access_code", get(recent_context))
        .route("/:access_code", delete(clear_context))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_query_defaults() {
        let query: RecentQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, 20);
    }

    #[test]
    fn store_request_parses_payload() {
        let request: StoreContextRequest = serde_json::from_str(
            r#"{
                "access_code": "ABCD1234EFGH5678",
                "payload": {"kind": "file_excerpt", "content": {"path": "a.rs"}}
            }"#,
        )
        .unwrap();
        assert_eq!(request.payload.kind, "file_excerpt");
        assert!(request.payload.validate().is_ok());
    }
}
