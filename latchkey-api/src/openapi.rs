//! OpenAPI Specification for the Latchkey API
//!
//! This module defines the OpenAPI document for the Latchkey REST API.
//! It uses utoipa to generate the specification from Rust types and
//! route annotations.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};

// Import route modules for path references
use crate::routes::{account, admin, chat, context, health, usage, webhooks};

// Import domain types from latchkey-core
use latchkey_core::{
    AccessCode, Account, BillingStatus, ContextPayload, ContextSnapshot, PlanTier, WindowedUsage,
};

/// OpenAPI document for the Latchkey API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Latchkey API",
        version = "0.3.0",
        description = "Access-code gated completion backend with prepaid billing reconciliation and context caching",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Chat", description = "Prompt-for-completion exchange gated by access codes"),
        (name = "Accounts", description = "Trial provisioning and access code validation"),
        (name = "Usage", description = "Lifetime and windowed usage reporting"),
        (name = "Context", description = "TTL'd content-addressed editor context snapshots"),
        (name = "Webhooks", description = "Billing event deliveries from the payment processor"),
        (name = "Admin", description = "Credential-gated operational endpoints"),
        (name = "Health", description = "Liveness and readiness checks")
    ),
    paths(
        // === Chat Routes ===
        chat::chat,

        // === Account Routes ===
        account::create_trial,
        account::validate,

        // === Usage Routes ===
        usage::usage,

        // === Context Routes ===
        context::store_context,
        context::recent_context,
        context::clear_context,

        // === Webhook Routes ===
        webhooks::billing_webhook,

        // === Admin Routes ===
        admin::list_accounts,
        admin::set_enabled,
        admin::delete_account,
        admin::cache_stats,
        admin::clear_cache,
        admin::sweep_context,

        // === Health Routes ===
        health::ping,
        health::liveness,
        health::readiness,
    ),
    components(schemas(
        // Domain types
        AccessCode,
        Account,
        BillingStatus,
        PlanTier,
        WindowedUsage,
        ContextPayload,
        ContextSnapshot,

        // Error types
        ApiError,
        ErrorCode,

        // Request/response types
        chat::ChatRequest,
        chat::ChatResponse,
        chat::RequestsRemaining,
        account::TrialAccountResponse,
        account::ValidateRequest,
        account::ValidateResponse,
        usage::UsageResponse,
        context::StoreContextRequest,
        context::StoreContextResponse,
        context::RecentContextResponse,
        context::ClearContextResponse,
        webhooks::WebhookResponse,
        crate::reconciler::ReconcileOutcome,
        admin::AccountListResponse,
        admin::SetEnabledRequest,
        admin::AdminActionResponse,
        admin::PurgeResponse,
        crate::response_cache::ResponseCacheStats,
        health::LivenessResponse,
        health::ReadinessResponse,
        health::LedgerProbe,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_builds() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/chat"));
        assert!(doc.paths.paths.contains_key("/api/v1/webhooks/billing"));
        assert!(doc.paths.paths.contains_key("/health/ready"));
    }

    #[test]
    fn openapi_document_serializes() {
        let json = serde_json::to_string(&ApiDoc::openapi()).unwrap();
        assert!(json.contains("Latchkey API"));
    }
}
