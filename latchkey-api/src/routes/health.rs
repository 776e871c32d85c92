//! Health Endpoints
//!
//! - /health/ping - bare responsiveness probe
//! - /health/live - process liveness with uptime
//! - /health/ready - readiness, gated on ledger reachability
//!
//! No credentials required. Readiness reports the ledger probe result so
//! an operator can tell a cold pool from a dead database.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::LedgerStore;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LivenessResponse {
    pub alive: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReadinessResponse {
    pub ready: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub ledger: LedgerProbe,
}

/// Outcome of one round trip to the ledger store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LedgerProbe {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Connections currently held by the pool.
    pub pool_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LedgerProbe {
    async fn run(store: &LedgerStore) -> Self {
        let started = std::time::Instant::now();
        match store.ping().await {
            Ok(()) => LedgerProbe {
                reachable: true,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                pool_connections: store.pool_size(),
                error: None,
            },
            Err(err) => LedgerProbe {
                reachable: false,
                latency_ms: None,
                pool_connections: store.pool_size(),
                error: Some(err.message),
            },
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Bare responsiveness probe.
#[utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses(
        (status = 200, description = "Service is responding", body = String),
    ),
)]
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive", body = LivenessResponse),
    ),
)]
pub async fn liveness(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        alive: true,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /health/ready - Readiness, gated on ledger reachability.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessResponse),
        (status = 503, description = "Ledger store unreachable", body = ReadinessResponse),
    ),
)]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let ledger = LedgerProbe::run(&state.store).await;

    let response = ReadinessResponse {
        ready: ledger.reachable,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        ledger,
    };

    let status = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_reports_the_probe() {
        let response = ReadinessResponse {
            ready: false,
            version: "0.3.0".to_string(),
            uptime_secs: 12,
            ledger: LedgerProbe {
                reachable: false,
                latency_ms: None,
                pool_connections: 0,
                error: Some("connection refused".to_string()),
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"ready\":false"));
        assert!(json.contains("connection refused"));
        assert!(!json.contains("latency_ms"));
    }

    #[test]
    fn healthy_probe_omits_the_error_field() {
        let probe = LedgerProbe {
            reachable: true,
            latency_ms: Some(3),
            pool_connections: 4,
            error: None,
        };

        let json = serde_json::to_string(&probe).unwrap();
        assert!(json.contains("\"latency_ms\":3"));
        assert!(!json.contains("error"));
    }
}
