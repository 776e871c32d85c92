//! Ledger accounts and the billing status lifecycle.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownVariant;
use crate::plan::PlanTier;

// ============================================================================
// ACCESS CODE
// ============================================================================

/// Opaque prepaid access code identifying a ledger account.
///
/// Codes are the only credential in the system; there is no PII attached to
/// an account. The newtype keeps codes from being confused with other
/// strings (billing refs, event ids) at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(transparent)]
pub struct AccessCode(String);

impl AccessCode {
    /// Number of alphanumeric characters in a generated code.
    pub const LEN: usize = 16;

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Generate a fresh random alphanumeric code.
    ///
    /// Used at trial provisioning and when the reconciler creates an
    /// account for a paid signup that never had one.
    pub fn random() -> Self {
        let code: String = rand::rng()
            .sample_iter(rand::distr::Alphanumeric)
            .take(Self::LEN)
            .map(char::from)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AccessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AccessCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccessCode {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ============================================================================
// BILLING STATUS
// ============================================================================

/// Billing lifecycle state of an account.
///
/// Transitions are driven exclusively by the webhook reconciler; request
/// handlers only ever read this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    /// Trial account, never attached to a paid subscription.
    Trialing,
    /// Paid subscription in good standing.
    Active,
    /// Last invoice failed; admission is denied until payment recovers.
    PastDue,
    /// Subscription ended. Terminal: no later event revives the account.
    Canceled,
}

impl BillingStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BillingStatus::Canceled)
    }

    /// Whether this status admits paid requests.
    pub fn is_active(&self) -> bool {
        matches!(self, BillingStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Trialing => "trialing",
            BillingStatus::Active => "active",
            BillingStatus::PastDue => "past_due",
            BillingStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(BillingStatus::Trialing),
            "active" => Ok(BillingStatus::Active),
            "past_due" => Ok(BillingStatus::PastDue),
            "canceled" => Ok(BillingStatus::Canceled),
            other => Err(UnknownVariant::new("billing status", other)),
        }
    }
}

// ============================================================================
// ACCOUNT
// ============================================================================

/// A ledger account as stored in the accounts table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Account {
    pub access_code: AccessCode,
    pub plan: PlanTier,
    pub billing_status: BillingStatus,
    /// Payment-processor customer reference. Present iff the account has
    /// ever completed checkout; trial accounts carry `None`.
    pub billing_ref: Option<String>,
    /// Administrative kill switch, independent of billing status.
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    /// Lifetime counters, updated by the usage recorder.
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    /// Occurrence time of the last billing event applied to this account.
    /// Events older than this are stale and skipped by the reconciler.
    pub last_event_at: Option<DateTime<Utc>>,
}

impl Account {
    /// A fresh trial account with zeroed counters.
    pub fn new_trial(access_code: AccessCode, now: DateTime<Utc>) -> Self {
        Self {
            access_code,
            plan: PlanTier::Trial,
            billing_status: BillingStatus::Trialing,
            billing_ref: None,
            is_enabled: true,
            created_at: now,
            last_activity: None,
            total_requests: 0,
            total_tokens: 0,
            total_cost: 0.0,
            last_event_at: None,
        }
    }

    /// Metered accounts must carry a billing ref; trial accounts must not.
    /// A row violating this indicates ledger corruption.
    pub fn billing_ref_consistent(&self) -> bool {
        self.plan.is_metered() == self.billing_ref.is_some()
    }
}
