//! Latchkey API Server Entry Point
//!
//! Bootstraps configuration, ensures the ledger schema exists, spawns the
//! context sweeper, and starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use latchkey_api::{
    create_api_router, AdmissionController, AnthropicProvider, ApiConfig, ApiError, ApiResult,
    AppState, ContextCache, DbConfig, LedgerStore, ProviderConfig, Reconciler, ResponseCache,
    UsageRecorder,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing();

    let db_config = DbConfig::from_env();
    let store = LedgerStore::from_config(&db_config)?;
    store.ensure_schema().await?;

    let config = Arc::new(ApiConfig::from_env());
    let provider = Arc::new(AnthropicProvider::new(ProviderConfig::from_env())?);

    let context = ContextCache::new(
        store.clone(),
        config.context_ttl,
        config.context_sweep_interval,
        config.context_max_per_account,
    );
    context.spawn_sweeper();

    let state = AppState {
        store: store.clone(),
        admission: AdmissionController::new(store.clone(), config.plan_limits.clone()),
        reconciler: Reconciler::new(store.clone()),
        usage: UsageRecorder::new(
            store.clone(),
            config.usage_write_attempts,
            config.usage_retry_base_delay,
        ),
        context,
        responses: ResponseCache::new(config.response_cache_ttl, config.response_cache_capacity),
        provider,
        config,
        start_time: std::time::Instant::now(),
    };

    let app: Router = create_api_router(state)?;

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting Latchkey API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("latchkey_api=info,tower_http=info"));

    if std::env::var("LATCHKEY_LOG_JSON").map(|v| v == "true").unwrap_or(false) {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("LATCHKEY_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("LATCHKEY_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
