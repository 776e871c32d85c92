//! Shared application state for Axum routers.

use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::completion::CompletionProvider;
use crate::config::ApiConfig;
use crate::context_cache::ContextCache;
use crate::db::LedgerStore;
use crate::reconciler::Reconciler;
use crate::response_cache::ResponseCache;
use crate::usage::UsageRecorder;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Ledger store (accounts, usage, billing events, snapshots).
    pub store: LedgerStore,
    /// Admission policy over the ledger.
    pub admission: AdmissionController,
    /// Billing event reconciler.
    pub reconciler: Reconciler,
    /// Retrying post-call debit writer.
    pub usage: UsageRecorder,
    /// TTL'd content-addressed context storage.
    pub context: ContextCache,
    /// In-memory completion cache.
    pub responses: ResponseCache,
    /// Upstream model provider.
    pub provider: Arc<dyn CompletionProvider>,
    /// Loaded API configuration.
    pub config: Arc<ApiConfig>,
    /// Process start, reported by the health endpoints.
    pub start_time: std::time::Instant,
}
