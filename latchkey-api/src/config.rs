//! API Configuration Module
//!
//! This module provides configuration for CORS, rate limiting, webhook
//! verification, caching, and other production-level API settings.
//! Configuration is loaded from environment variables with sensible
//! defaults for development.

use secrecy::SecretString;
use std::time::Duration;

use latchkey_core::PlanLimits;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS, rate limiting, and production hardening.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Rate Limiting Configuration
    // ========================================================================
    /// Whether per-IP rate limiting is enabled.
    pub rate_limit_enabled: bool,

    /// Rate limit per IP, per minute.
    pub rate_limit_per_minute: u32,

    /// Burst capacity (allow this many requests beyond the limit temporarily).
    pub rate_limit_burst: u32,

    // ========================================================================
    // Secrets
    // ========================================================================
    /// HMAC secret shared with the payment processor for webhook signatures.
    pub webhook_secret: SecretString,

    /// Shared admin credential for the admin endpoints. None disables them.
    pub admin_code: Option<SecretString>,

    // ========================================================================
    // Quotas and Caches
    // ========================================================================
    /// Per-tier request ceilings.
    pub plan_limits: PlanLimits,

    /// Lifetime of a stored context snapshot.
    pub context_ttl: Duration,

    /// Interval between expired-snapshot sweeps.
    pub context_sweep_interval: Duration,

    /// Max live snapshots kept per account; oldest are dropped past this.
    pub context_max_per_account: i64,

    /// Lifetime of a cached completion response.
    pub response_cache_ttl: Duration,

    /// Max entries held by the in-memory response cache.
    pub response_cache_capacity: usize,

    // ========================================================================
    // Usage Recording
    // ========================================================================
    /// Debit write attempts before giving up (initial try included).
    pub usage_write_attempts: u32,

    /// Base delay between debit retries; doubles per attempt.
    pub usage_retry_base_delay: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(), // Empty = allow all
            cors_max_age_secs: 86400,

            rate_limit_enabled: true,
            rate_limit_per_minute: 60,
            rate_limit_burst: 10,

            webhook_secret: SecretString::from(""),
            admin_code: None,

            plan_limits: PlanLimits::default(),
            context_ttl: Duration::from_secs(3600),
            context_sweep_interval: Duration::from_secs(300),
            context_max_per_account: 50,
            response_cache_ttl: Duration::from_secs(600),
            response_cache_capacity: 1024,

            usage_write_attempts: 3,
            usage_retry_base_delay: Duration::from_millis(100),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `LATCHKEY_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `LATCHKEY_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `LATCHKEY_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `LATCHKEY_RATE_LIMIT_PER_MINUTE`: Requests per minute per IP (default: 60)
    /// - `LATCHKEY_RATE_LIMIT_BURST`: Burst capacity (default: 10)
    /// - `LATCHKEY_WEBHOOK_SECRET`: HMAC secret for webhook signatures
    /// - `LATCHKEY_ADMIN_CODE`: Admin credential; unset disables admin routes
    /// - `LATCHKEY_TRIAL_LIFETIME_REQUESTS`: Trial request ceiling (default: 50)
    /// - `LATCHKEY_CONTEXT_TTL_SECS`: Context snapshot lifetime (default: 3600)
    /// - `LATCHKEY_CONTEXT_SWEEP_SECS`: Sweep interval (default: 300)
    /// - `LATCHKEY_CONTEXT_MAX_PER_ACCOUNT`: Snapshot cap per account (default: 50)
    /// - `LATCHKEY_RESPONSE_CACHE_TTL_SECS`: Response cache lifetime (default: 600)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = std::env::var("LATCHKEY_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_max_age_secs = env_parse("LATCHKEY_CORS_MAX_AGE_SECS", defaults.cors_max_age_secs);

        let rate_limit_enabled = std::env::var("LATCHKEY_RATE_LIMIT_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let rate_limit_per_minute =
            env_parse("LATCHKEY_RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute);
        let rate_limit_burst = env_parse("LATCHKEY_RATE_LIMIT_BURST", defaults.rate_limit_burst);

        let webhook_secret = SecretString::from(
            std::env::var("LATCHKEY_WEBHOOK_SECRET").unwrap_or_default(),
        );

        let admin_code = std::env::var("LATCHKEY_ADMIN_CODE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let mut plan_limits = PlanLimits::default();
        plan_limits.trial_lifetime_requests = env_parse(
            "LATCHKEY_TRIAL_LIFETIME_REQUESTS",
            plan_limits.trial_lifetime_requests,
        );
        plan_limits.standard_window_requests = env_parse(
            "LATCHKEY_STANDARD_WINDOW_REQUESTS",
            plan_limits.standard_window_requests,
        );
        plan_limits.plus_window_requests = env_parse(
            "LATCHKEY_PLUS_WINDOW_REQUESTS",
            plan_limits.plus_window_requests,
        );

        Self {
            cors_origins,
            cors_max_age_secs,
            rate_limit_enabled,
            rate_limit_per_minute,
            rate_limit_burst,
            webhook_secret,
            admin_code,
            plan_limits,
            context_ttl: Duration::from_secs(env_parse("LATCHKEY_CONTEXT_TTL_SECS", 3600)),
            context_sweep_interval: Duration::from_secs(env_parse(
                "LATCHKEY_CONTEXT_SWEEP_SECS",
                300,
            )),
            context_max_per_account: env_parse("LATCHKEY_CONTEXT_MAX_PER_ACCOUNT", 50),
            response_cache_ttl: Duration::from_secs(env_parse(
                "LATCHKEY_RESPONSE_CACHE_TTL_SECS",
                600,
            )),
            response_cache_capacity: env_parse(
                "LATCHKEY_RESPONSE_CACHE_CAPACITY",
                defaults.response_cache_capacity,
            ),
            usage_write_attempts: env_parse(
                "LATCHKEY_USAGE_WRITE_ATTEMPTS",
                defaults.usage_write_attempts,
            ),
            usage_retry_base_delay: Duration::from_millis(env_parse(
                "LATCHKEY_USAGE_RETRY_BASE_MS",
                100,
            )),
        }
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            // Dev mode: allow all
            return true;
        }
        self.cors_origins.iter().any(|allowed| allowed == origin)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(config.cors_origins.is_empty());
        assert!(config.rate_limit_enabled);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.plan_limits.trial_lifetime_requests, 50);
        assert_eq!(config.context_ttl, Duration::from_secs(3600));
        assert!(config.admin_code.is_none());
    }

    #[test]
    fn test_is_production() {
        let mut config = ApiConfig::default();
        assert!(!config.is_production());

        config.cors_origins = vec!["https://latchkey.dev".to_string()];
        assert!(config.is_production());
    }

    #[test]
    fn test_origin_allowed() {
        let mut config = ApiConfig::default();
        assert!(config.is_origin_allowed("https://anything.example"));

        config.cors_origins = vec!["https://latchkey.dev".to_string()];
        assert!(config.is_origin_allowed("https://latchkey.dev"));
        assert!(!config.is_origin_allowed("https://evil.example"));
    }
}
