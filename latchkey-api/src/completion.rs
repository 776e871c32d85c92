//! Upstream Completion Provider
//!
//! The admitted prompt, plus any live context snapshots, is forwarded to
//! an upstream model API. The provider sits behind a trait so the chat
//! route can be exercised in tests without network access.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{ApiError, ApiResult};
use latchkey_core::PlanTier;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// A completion request assembled by the chat route.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Rendered context blocks, oldest first.
    pub context_blocks: Vec<serde_json::Value>,
    pub tier: PlanTier,
    pub max_tokens: u32,
}

/// A completed upstream call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Model family per plan tier. Trial and standard ride the small model;
/// plus pays for the large one.
pub fn model_for_tier(tier: PlanTier) -> &'static str {
    match tier {
        PlanTier::Trial | PlanTier::Standard => "claude-3-5-haiku-latest",
        PlanTier::Plus => "claude-3-7-sonnet-latest",
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Abstraction over the upstream model API.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> ApiResult<Completion>;
}

// ============================================================================
// ANTHROPIC PROVIDER
// ============================================================================

/// Provider configuration, loaded from environment variables.
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub timeout: Duration,
    pub max_concurrency: usize,
}

impl ProviderConfig {
    /// Environment variables:
    /// - `LATCHKEY_UPSTREAM_API_KEY`: upstream API key
    /// - `LATCHKEY_UPSTREAM_BASE_URL`: default "https://api.anthropic.com"
    /// - `LATCHKEY_UPSTREAM_TIMEOUT_SECS`: default 60
    /// - `LATCHKEY_UPSTREAM_CONCURRENCY`: default 32
    pub fn from_env() -> Self {
        Self {
            api_key: SecretString::from(
                std::env::var("LATCHKEY_UPSTREAM_API_KEY").unwrap_or_default(),
            ),
            base_url: std::env::var("LATCHKEY_UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
            timeout: Duration::from_secs(
                std::env::var("LATCHKEY_UPSTREAM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_concurrency: std::env::var("LATCHKEY_UPSTREAM_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(32),
        }
    }
}

/// Messages-API client with a concurrency gate.
pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
    semaphore: Arc<Semaphore>,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::internal_error(format!("HTTP client build failed: {}", e)))?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));

        Ok(Self {
            client,
            config,
            semaphore,
        })
    }

    /// Render the context blocks into a system preamble.
    fn render_system(context_blocks: &[serde_json::Value]) -> Option<String> {
        if context_blocks.is_empty() {
            return None;
        }
        let mut out = String::from(
            "The user shared the following editor context with this request:\n",
        );
        for block in context_blocks {
            out.push_str(&block.to_string());
            out.push('\n');
        }
        Some(out)
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(&self, request: &CompletionRequest) -> ApiResult<Completion> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ApiError::internal_error("Provider semaphore closed"))?;

        let model = model_for_tier(request.tier);

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = Self::render_system(&request.context_blocks) {
            body["system"] = json!(system);
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::timeout("upstream completion")
                } else {
                    tracing::error!(error = %e, "Upstream request failed");
                    ApiError::upstream_error("Upstream model call failed")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, detail = %detail, "Upstream returned error");
            return Err(ApiError::upstream_error(format!(
                "Upstream returned status {}",
                status
            )));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "Upstream response parse failed");
            ApiError::upstream_error("Upstream response was malformed")
        })?;

        let content = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            content,
            model: parsed.model,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: i64,
    output_tokens: i64,
}
