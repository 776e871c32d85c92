//! Chat Endpoint
//!
//! POST /api/v1/chat exchanges a prompt for a model completion, gated by
//! the admission controller and debited by the usage recorder.
//!
//! Request flow: admission check, optional context write, context attach,
//! response-cache lookup, upstream call, post-call debit. A cache hit
//! skips the upstream call and is debited as a zero-cost success so trial
//! accounting stays honest.
//!
//! A debit that cannot be written fails the request: serving completions
//! that never reach the ledger under-bills a consumed resource, which is
//! worse than making the client retry.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::completion::CompletionRequest;
use crate::error::ApiResult;
use crate::state::AppState;
use latchkey_core::{
    AccessCode, Account, ContextPayload, PlanLimits, QuotaCeiling, TokenRates, UsageOutcome,
    UsageRecord,
};

// ============================================================================
// TYPES
// ============================================================================

/// Chat request from the IDE add-in.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatRequest {
    pub access_code: AccessCode,
    pub prompt: String,
    /// Context payload to store alongside this request. Persisted before
    /// the completion runs, so it is attached to this call and available
    /// to later ones.
    #[serde(default)]
    pub context: Option<ContextPayload>,
    /// Upper bound on generated tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Attach the account's live context snapshots to the request.
    #[serde(default = "default_true")]
    pub include_context: bool,
    /// Max context snapshots to attach, newest first.
    #[serde(default = "default_context_limit")]
    pub context_limit: i64,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_true() -> bool {
    true
}

fn default_context_limit() -> i64 {
    5
}

/// Requests left under the account's ceiling, or the sentinel for metered
/// plans whose ceiling is not client-visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(untagged)]
pub enum RequestsRemaining {
    Count(i64),
    Sentinel(String),
}

impl RequestsRemaining {
    pub fn unlimited() -> Self {
        RequestsRemaining::Sentinel("unlimited".to_string())
    }
}

/// Chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    /// Whether this response was served from the completion cache.
    pub cached: bool,
    /// Lifetime requests consumed, this one included.
    pub requests_used: i64,
    pub requests_remaining: RequestsRemaining,
}

/// Usage summary after the current request lands.
fn usage_summary(account: &Account, limits: &PlanLimits) -> (i64, RequestsRemaining) {
    let used = account.total_requests + 1;
    match limits.ceiling(account.plan) {
        QuotaCeiling::Lifetime(limit) => {
            (used, RequestsRemaining::Count((limit - used).max(0)))
        }
        QuotaCeiling::Windowed(_) => (used, RequestsRemaining::unlimited()),
    }
}

// ============================================================================
// HANDLER
// ============================================================================

/// POST /api/v1/chat - Exchange a prompt for a completion.
#[utoipa::path(
    post,
    path = "/api/v1/chat",
    tag = "Chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Completion produced", body = ChatResponse),
        (status = 400, description = "Invalid context payload", body = crate::error::ApiError),
        (status = 401, description = "Unknown access code", body = crate::error::ApiError),
        (status = 402, description = "Billing inactive", body = crate::error::ApiError),
        (status = 429, description = "Quota exhausted or rate limited", body = crate::error::ApiError),
        (status = 502, description = "Upstream model call failed", body = crate::error::ApiError),
        (status = 503, description = "Ledger store unavailable", body = crate::error::ApiError),
    ),
)]
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let now = chrono::Utc::now();
    let account = state
        .admission
        .authorize(&request.access_code, 1, now)
        .await?;
    let (requests_used, requests_remaining) =
        usage_summary(&account, state.admission.limits());

    // The attached payload lands before the completion runs; an invalid
    // payload or unreachable store fails here, before any money is spent.
    if let Some(payload) = &request.context {
        state
            .context
            .store_snapshot(&request.access_code, payload)
            .await?;
    }

    // Context reads are auxiliary: a failed read degrades to no context
    // instead of failing an admitted request.
    let snapshots = if request.include_context {
        match state
            .context
            .recent(&request.access_code, request.context_limit)
            .await
        {
            Ok(snapshots) => snapshots,
            Err(err) => {
                tracing::warn!(code = %request.access_code, error = %err, "Context read failed");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let fingerprints: Vec<String> = snapshots.iter().map(|s| s.fingerprint.clone()).collect();
    let cache_key =
        crate::response_cache::ResponseCache::key(&request.prompt, &fingerprints, account.plan);

    if let Some(cached) = state.responses.get(&cache_key) {
        // No upstream call was made, so no cost accrues, but the request
        // still counts against the ceiling. The debit must land.
        let record = UsageRecord::zero(UsageOutcome::Success);
        state.usage.record(&request.access_code, &record).await?;

        return Ok(Json(ChatResponse {
            content: cached.content,
            model: cached.model,
            input_tokens: cached.input_tokens,
            output_tokens: cached.output_tokens,
            cost: 0.0,
            cached: true,
            requests_used,
            requests_remaining,
        }));
    }

    let completion_request = CompletionRequest {
        prompt: request.prompt.clone(),
        context_blocks: snapshots
            .iter()
            .map(|s| serde_json::json!({ "kind": s.payload.kind, "content": s.payload.content }))
            .collect(),
        tier: account.plan,
        max_tokens: request.max_tokens,
    };

    let completion = match state.provider.complete(&completion_request).await {
        Ok(completion) => completion,
        Err(err) => {
            // The failed call is logged against the account but consumes
            // neither quota nor money; this record is best-effort.
            let record = UsageRecord::zero(UsageOutcome::Failure);
            if let Err(record_err) = state.usage.record(&request.access_code, &record).await {
                tracing::warn!(
                    code = %request.access_code,
                    error = %record_err,
                    "Failure record dropped"
                );
            }
            return Err(err);
        }
    };

    let rates = TokenRates::for_tier(account.plan);
    let cost = rates.cost_for(completion.input_tokens, completion.output_tokens);

    let record = UsageRecord {
        input_tokens: completion.input_tokens,
        output_tokens: completion.output_tokens,
        cost,
        outcome: UsageOutcome::Success,
    };
    // A dropped debit after a produced completion would under-bill a
    // consumed resource; the recorder has already retried, so surface it.
    state.usage.record(&request.access_code, &record).await?;

    state.responses.put(cache_key, completion.clone());

    Ok(Json(ChatResponse {
        content: completion.content,
        model: completion.model,
        input_tokens: completion.input_tokens,
        output_tokens: completion.output_tokens,
        cost,
        cached: false,
        requests_used,
        requests_remaining,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new().route("/", post(chat)).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_core::PlanTier;

    #[test]
    fn request_defaults() {
        let request: ChatRequest = serde_json::from_str(
            r#"{"access_code": "ABCD1234EFGH5678", "prompt": "write a test"}"#,
        )
        .unwrap();
        assert_eq!(request.max_tokens, 1024);
        assert!(request.include_context);
        assert_eq!(request.context_limit, 5);
        assert!(request.context.is_none());
    }

    #[test]
    fn request_carries_optional_context_payload() {
        let request: ChatRequest = serde_json::from_str(
            r#"{
                "access_code": "ABCD1234EFGH5678",
                "prompt": "write a test",
                "context": {
                    "kind": "file_excerpt",
                    "content": {"path": "src/lib.rs"}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(request.context.unwrap().kind, "file_excerpt");
    }

    #[test]
    fn trial_summary_counts_down_and_clamps() {
        let limits = PlanLimits::default();
        let mut account =
            Account::new_trial(AccessCode::new("T".repeat(16)), chrono::Utc::now());

        account.total_requests = 0;
        assert_eq!(
            usage_summary(&account, &limits),
            (1, RequestsRemaining::Count(49))
        );

        account.total_requests = 49;
        assert_eq!(
            usage_summary(&account, &limits),
            (50, RequestsRemaining::Count(0))
        );
    }

    #[test]
    fn metered_summary_uses_the_unlimited_sentinel() {
        let limits = PlanLimits::default();
        let mut account =
            Account::new_trial(AccessCode::new("M".repeat(16)), chrono::Utc::now());
        account.plan = PlanTier::Plus;
        account.total_requests = 7;
        assert_eq!(
            usage_summary(&account, &limits),
            (8, RequestsRemaining::unlimited())
        );
    }

    #[test]
    fn requests_remaining_serializes_as_number_or_sentinel() {
        assert_eq!(
            serde_json::to_string(&RequestsRemaining::Count(7)).unwrap(),
            "7"
        );
        assert_eq!(
            serde_json::to_string(&RequestsRemaining::unlimited()).unwrap(),
            "\"unlimited\""
        );
    }
}
