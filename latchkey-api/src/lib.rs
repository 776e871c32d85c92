//! Latchkey API - Access-Code Gated Completion Backend
//!
//! This crate exposes the REST layer (Axum) of the Latchkey service: an
//! IDE add-in exchanges prompts for model completions, gated by prepaid
//! access codes. The backend keeps a durable ledger of accounts, quota
//! and billing state in PostgreSQL, reconciles payment-processor webhook
//! deliveries into that ledger, and caches editor context snapshots by
//! content fingerprint.
//!
//! No personal data is stored anywhere; the access code is the whole
//! identity.

pub mod admission;
pub mod completion;
pub mod config;
pub mod context_cache;
pub mod db;
pub mod error;
pub mod middleware;
pub mod openapi;
pub mod reconciler;
pub mod response_cache;
pub mod routes;
pub mod state;
pub mod usage;

// Re-export commonly used types
pub use admission::{AdmissionController, Decision, Denial};
pub use completion::{AnthropicProvider, Completion, CompletionProvider, CompletionRequest, ProviderConfig};
pub use config::ApiConfig;
pub use context_cache::ContextCache;
pub use db::{DbConfig, LedgerStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use openapi::ApiDoc;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use response_cache::{ResponseCache, ResponseCacheStats};
pub use routes::create_api_router;
pub use state::AppState;
pub use usage::UsageRecorder;
