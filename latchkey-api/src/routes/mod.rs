//! REST API Routes Module
//!
//! Route handlers organized by concern:
//! - Chat completions gated by access-code admission
//! - Account provisioning and validation
//! - Usage reporting
//! - Context snapshot storage
//! - Billing webhooks
//! - Admin operations
//! - Health checks (Kubernetes-compatible)
//! - CORS support for browser-based clients

pub mod account;
pub mod admin;
pub mod chat;
pub mod context;
pub mod health;
pub mod usage;
pub mod webhooks;

use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use secrecy::ExposeSecret;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{rate_limit_middleware, RateLimitState};
use crate::openapi::ApiDoc;
use crate::state::AppState;

// Re-export route creation functions for convenience
pub use account::create_router as account_router;
pub use admin::create_router as admin_router;
pub use chat::create_router as chat_router;
pub use context::create_router as context_router;
pub use health::create_router as health_router;
pub use usage::create_router as usage_router;
pub use webhooks::create_router as webhooks_router;

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

/// Check if running in a production environment.
fn is_production_environment() -> bool {
    std::env::var("LATCHKEY_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

/// Validate API configuration for production use.
fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.webhook_secret.expose_secret().is_empty() {
        return Err(ApiError::invalid_input(
            "Webhook secret not configured for production. Set LATCHKEY_WEBHOOK_SECRET.",
        ));
    }
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set LATCHKEY_CORS_ORIGINS.",
        ));
    }
    if !config.rate_limit_enabled {
        tracing::warn!(
            "Rate limiting is disabled in production - this is not recommended.\n\
             Set LATCHKEY_RATE_LIMIT_ENABLED=true to enable rate limiting."
        );
    }
    Ok(())
}

// ============================================================================
// ROUTER ASSEMBLY
// ============================================================================

/// Build the /api/v1 routes.
fn build_api_routes(state: &AppState) -> Router {
    Router::new()
        .nest("/chat", chat::create_router(state.clone()))
        .merge(account::create_router(state.clone()))
        .nest("/usage", usage::create_router(state.clone()))
        .nest("/context", context::create_router(state.clone()))
        .nest("/webhooks", webhooks::create_router(state.clone()))
        .nest("/admin", admin::create_router(state.clone()))
}

/// Create the complete API router.
///
/// # Routes
/// - All REST API routes under /api/v1/*
/// - Health checks at /health/* (public)
/// - OpenAPI spec at /openapi.json
///
/// # Middleware Order (outer to inner)
/// 1. CORS (outermost) - handles preflight requests
/// 2. Request tracing
/// 3. Rate limiting - rejects floods before any database work
/// 4. Request timeout
/// 5. Handlers - admission control happens per account inside
///
/// In production (LATCHKEY_ENVIRONMENT=production), validates that the
/// webhook secret and CORS origins are configured before serving anything.
pub fn create_api_router(state: AppState) -> ApiResult<Router> {
    if is_production_environment() {
        validate_api_config_for_production(&state.config)?;
    }

    let rate_limit_state = RateLimitState::new(state.config.clone());
    let cors = build_cors_layer(&state.config);

    let router = Router::new()
        .nest("/api/v1", build_api_routes(&state))
        .nest("/health", health::create_router(state.clone()))
        .route("/openapi.json", get(openapi_json));

    Ok(router
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
        .layer(from_fn_with_state(rate_limit_state, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-admin-code"),
            HeaderName::from_static("x-latchkey-signature"),
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("retry-after"),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        // Development mode: allow all origins
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any).expose_headers(Any)
    } else {
        // Production mode: only allow configured origins
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn production_validation_rejects_missing_secret() {
        let config = ApiConfig {
            cors_origins: vec!["https://latchkey.dev".to_string()],
            ..ApiConfig::default()
        };
        assert!(validate_api_config_for_production(&config).is_err());
    }

    #[test]
    fn production_validation_rejects_open_cors() {
        let config = ApiConfig {
            webhook_secret: SecretString::from("whsec_test"),
            ..ApiConfig::default()
        };
        assert!(validate_api_config_for_production(&config).is_err());
    }

    #[test]
    fn production_validation_accepts_hardened_config() {
        let config = ApiConfig {
            webhook_secret: SecretString::from("whsec_test"),
            cors_origins: vec!["https://latchkey.dev".to_string()],
            ..ApiConfig::default()
        };
        assert!(validate_api_config_for_production(&config).is_ok());
    }
}
