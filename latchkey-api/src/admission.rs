//! Admission Controller
//!
//! Gates every chat request on account existence, the administrative kill
//! switch, billing status, and the plan's request ceiling. The decision
//! itself is a pure function over a loaded account and its windowed usage,
//! so the policy is testable without a database; the controller wraps it
//! with ledger reads.
//!
//! Store failures fail closed: a request that cannot be checked is denied
//! with a retryable 503, never waved through.

use chrono::{DateTime, Utc};

use crate::db::LedgerStore;
use crate::error::{ApiError, ApiResult};
use latchkey_core::{AccessCode, Account, BillingStatus, PlanLimits, QuotaCeiling};

// ============================================================================
// DECISION TYPES
// ============================================================================

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq)]
pub enum Denial {
    /// No account exists for the presented code.
    UnknownCode,
    /// The account exists but was administratively disabled.
    Disabled,
    /// The account's billing status does not admit requests.
    BillingInactive(BillingStatus),
    /// The applicable request ceiling is exhausted.
    QuotaExceeded { used: i64, limit: i64 },
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Request admitted. `remaining` is the request count left under the
    /// applicable ceiling; None means no client-visible ceiling (metered
    /// plans, where billing is the real control).
    Allow { remaining: Option<i64> },
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

impl Denial {
    /// The HTTP error this denial surfaces as.
    pub fn into_api_error(self) -> ApiError {
        match self {
            Denial::UnknownCode => ApiError::unknown_code(),
            Denial::Disabled => ApiError::account_disabled(),
            Denial::BillingInactive(status) => ApiError::billing_inactive(status),
            Denial::QuotaExceeded { used, limit } => {
                ApiError::quota_exceeded("Request quota exhausted")
                    .with_details(serde_json::json!({
                        "requests_used": used,
                        "requests_limit": limit,
                    }))
            }
        }
    }
}

// ============================================================================
// PURE DECISION LOGIC
// ============================================================================

/// Admission policy over a loaded account.
///
/// `window_requests` is the count of successful requests inside the
/// trailing quota window; it is only consulted for metered tiers.
/// `requested_units` is the number of requests the caller is about to
/// spend, one for a single chat call.
pub fn decide(
    account: Option<&Account>,
    window_requests: i64,
    requested_units: i64,
    limits: &PlanLimits,
) -> Decision {
    let units = requested_units.max(1);
    let account = match account {
        Some(account) => account,
        None => return Decision::Deny(Denial::UnknownCode),
    };

    if !account.is_enabled {
        return Decision::Deny(Denial::Disabled);
    }

    // Metered plans require billing in good standing. Subscription trial
    // periods (Trialing with a billing ref) are in good standing.
    if account.plan.is_metered()
        && !matches!(
            account.billing_status,
            BillingStatus::Active | BillingStatus::Trialing
        )
    {
        return Decision::Deny(Denial::BillingInactive(account.billing_status));
    }

    match limits.ceiling(account.plan) {
        QuotaCeiling::Lifetime(limit) => {
            if account.total_requests + units > limit {
                Decision::Deny(Denial::QuotaExceeded {
                    used: account.total_requests,
                    limit,
                })
            } else {
                Decision::Allow {
                    remaining: Some(limit - account.total_requests),
                }
            }
        }
        QuotaCeiling::Windowed(limit) => {
            if window_requests + units > limit {
                Decision::Deny(Denial::QuotaExceeded {
                    used: window_requests,
                    limit,
                })
            } else {
                // Abuse ceiling only; not surfaced as a client quota.
                Decision::Allow { remaining: None }
            }
        }
    }
}

// ============================================================================
// ADMISSION CONTROLLER
// ============================================================================

/// Ledger-backed admission controller.
#[derive(Clone)]
pub struct AdmissionController {
    store: LedgerStore,
    limits: PlanLimits,
}

impl AdmissionController {
    pub fn new(store: LedgerStore, limits: PlanLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &PlanLimits {
        &self.limits
    }

    /// Load the account and evaluate admission without erroring on denial.
    /// Used by the validate endpoint, which reports denials as data.
    pub async fn check(
        &self,
        code: &AccessCode,
        requested_units: i64,
        now: DateTime<Utc>,
    ) -> ApiResult<(Option<Account>, Decision)> {
        let account = self.store.account_get(code).await?;

        let window_requests = match &account {
            Some(acct) if acct.plan.is_metered() => {
                let since = now - self.limits.window();
                self.store.windowed_usage(code, since).await?.requests
            }
            _ => 0,
        };

        let decision = decide(account.as_ref(), window_requests, requested_units, &self.limits);
        Ok((account, decision))
    }

    /// Admit or reject a request spending `requested_units`. Denials
    /// become HTTP errors.
    pub async fn authorize(
        &self,
        code: &AccessCode,
        requested_units: i64,
        now: DateTime<Utc>,
    ) -> ApiResult<Account> {
        let (account, decision) = self.check(code, requested_units, now).await?;

        match decision {
            Decision::Allow { .. } => {
                // decide() only allows when the account exists.
                account.ok_or_else(|| ApiError::internal_error("Admission allowed without account"))
            }
            Decision::Deny(denial) => {
                tracing::info!(code = %code, denial = ?denial, "Request denied");
                Err(denial.into_api_error())
            }
        }
    }
}
