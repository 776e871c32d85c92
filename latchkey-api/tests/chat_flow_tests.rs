//! DB-backed tests for the full chat flow: admission, context write,
//! completion, and the post-call debit.
//!
//! The upstream provider is stubbed so the flow runs without network
//! access; the ledger is a real PostgreSQL instance configured through
//! the LATCHKEY_DB_* environment variables.

#![cfg(feature = "db-tests")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::connect_info::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use latchkey_api::{
    create_api_router, AdmissionController, ApiConfig, ApiResult, AppState, Completion,
    CompletionProvider, CompletionRequest, ContextCache, DbConfig, LedgerStore, Reconciler,
    ResponseCache, UsageRecorder,
};
use latchkey_core::{AccessCode, Account};
use secrecy::SecretString;
use tower::ServiceExt;

/// Upstream stand-in that always produces the same completion.
struct FixedProvider;

#[async_trait::async_trait]
impl CompletionProvider for FixedProvider {
    async fn complete(&self, request: &CompletionRequest) -> ApiResult<Completion> {
        Ok(Completion {
            content: format!("echo: {}", request.prompt),
            model: "test-model".to_string(),
            input_tokens: 10,
            output_tokens: 20,
        })
    }
}

async fn test_store() -> ApiResult<LedgerStore> {
    let store = LedgerStore::from_config(&DbConfig::from_env())?;
    store.ensure_schema().await?;
    Ok(store)
}

/// Build a full router whose debit writer targets the given store; every
/// other component uses the real test database.
fn test_router(store: &LedgerStore, usage_store: LedgerStore) -> Router {
    let config = Arc::new(ApiConfig {
        webhook_secret: SecretString::from("whsec_chat"),
        ..ApiConfig::default()
    });

    let state = AppState {
        store: store.clone(),
        admission: AdmissionController::new(store.clone(), config.plan_limits.clone()),
        reconciler: Reconciler::new(store.clone()),
        usage: UsageRecorder::new(usage_store, 1, Duration::from_millis(1)),
        context: ContextCache::new(
            store.clone(),
            config.context_ttl,
            config.context_sweep_interval,
            config.context_max_per_account,
        ),
        responses: ResponseCache::new(config.response_cache_ttl, config.response_cache_capacity),
        provider: Arc::new(FixedProvider),
        config,
        start_time: std::time::Instant::now(),
    };

    create_api_router(state).unwrap()
}

fn chat_request(body: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/api/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn provision_trial(store: &LedgerStore) -> ApiResult<Account> {
    let account = Account::new_trial(AccessCode::random(), Utc::now());
    assert!(store.account_insert_trial(&account).await?);
    Ok(account)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn chat_debits_the_ledger_and_stores_the_attached_context() -> ApiResult<()> {
    let store = test_store().await?;
    let account = provision_trial(&store).await?;
    let router = test_router(&store, store.clone());

    let body = format!(
        r#"{{
            "access_code": "{}",
            "prompt": "write a test",
            "context": {{"kind": "file_excerpt", "content": {{"path": "src/lib.rs"}}}}
        }}"#,
        account.access_code
    );
    let response = router.oneshot(chat_request(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["content"], "echo: write a test");
    assert_eq!(json["cached"], false);
    assert_eq!(json["requests_used"], 1);
    assert_eq!(json["requests_remaining"], 49);

    // The debit landed.
    let loaded = store.account_get(&account.access_code).await?.unwrap();
    assert_eq!(loaded.total_requests, 1);
    assert_eq!(loaded.total_tokens, 30);

    // So did the attached payload.
    let live = store
        .context_recent(&account.access_code, Utc::now(), 10)
        .await?;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].payload.kind, "file_excerpt");

    store.account_delete(&account.access_code).await?;
    Ok(())
}

#[tokio::test]
async fn unwritable_debit_fails_the_request() -> ApiResult<()> {
    let store = test_store().await?;
    let account = provision_trial(&store).await?;

    // The debit writer points at a port nothing listens on; admission and
    // context still reach the real database, so the request is admitted
    // and the completion produced, but the debit cannot land.
    let unreachable = LedgerStore::from_config(&DbConfig {
        port: 1,
        timeout: Duration::from_millis(200),
        ..DbConfig::from_env()
    })?;
    let router = test_router(&store, unreachable);

    let body = format!(
        r#"{{"access_code": "{}", "prompt": "write a test"}}"#,
        account.access_code
    );
    let response = router.oneshot(chat_request(&body)).await.unwrap();
    assert_ne!(response.status(), StatusCode::OK);

    // Nothing was recorded against the account.
    let loaded = store.account_get(&account.access_code).await?.unwrap();
    assert_eq!(loaded.total_requests, 0);

    store.account_delete(&account.access_code).await?;
    Ok(())
}
