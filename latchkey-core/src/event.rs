//! Billing lifecycle events and usage records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::plan::PlanTier;

// ============================================================================
// BILLING EVENTS
// ============================================================================

/// Event kinds emitted by the payment processor.
///
/// Unrecognized kinds are preserved as `Unknown` so deliveries can be
/// acknowledged (and logged) without failing; the processor sends many
/// event types the reconciler does not care about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BillingEventKind {
    /// Checkout finished; the account now has a billing ref and a plan.
    CheckoutCompleted,
    /// A subscription object was created (possibly still trialing).
    SubscriptionCreated,
    /// An invoice was paid; the account is in good standing.
    InvoicePaid,
    /// An invoice payment attempt failed.
    InvoicePaymentFailed,
    /// The subscription ended for good.
    SubscriptionDeleted,
    /// Any other event type; acknowledged but not applied.
    Unknown(String),
}

impl BillingEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            BillingEventKind::CheckoutCompleted => "checkout.completed",
            BillingEventKind::SubscriptionCreated => "subscription.created",
            BillingEventKind::InvoicePaid => "invoice.paid",
            BillingEventKind::InvoicePaymentFailed => "invoice.payment_failed",
            BillingEventKind::SubscriptionDeleted => "subscription.deleted",
            BillingEventKind::Unknown(s) => s,
        }
    }
}

impl From<String> for BillingEventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "checkout.completed" => BillingEventKind::CheckoutCompleted,
            "subscription.created" => BillingEventKind::SubscriptionCreated,
            "invoice.paid" => BillingEventKind::InvoicePaid,
            "invoice.payment_failed" => BillingEventKind::InvoicePaymentFailed,
            "subscription.deleted" => BillingEventKind::SubscriptionDeleted,
            _ => BillingEventKind::Unknown(s),
        }
    }
}

impl From<BillingEventKind> for String {
    fn from(kind: BillingEventKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl fmt::Display for BillingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload fields. All optional: the processor omits fields
/// that do not apply to the event type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingEventData {
    /// Access code from checkout metadata. Present on checkout events,
    /// where it links the new billing ref to an existing account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_code: Option<crate::account::AccessCode>,
    /// Plan tier purchased, on checkout and subscription events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanTier>,
    /// Processor-side subscription identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    /// Whether the purchased subscription starts with a trial period.
    #[serde(default)]
    pub trial_period: bool,
}

/// A billing event as delivered on the webhook, after signature
/// verification and envelope parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingEvent {
    /// Processor-assigned unique event id; the idempotency key.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BillingEventKind,
    /// Processor customer reference the event applies to.
    pub billing_ref: String,
    /// When the event occurred at the processor. Ordering between competing
    /// deliveries is resolved on this timestamp, not arrival order.
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub data: BillingEventData,
}

// ============================================================================
// USAGE RECORDS
// ============================================================================

/// Outcome of the upstream model call a usage record accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOutcome {
    Success,
    Failure,
}

/// One debit against an account, written after the model call completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub outcome: UsageOutcome,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }

    /// A zero-cost record, used for cache hits and failed upstream calls.
    pub fn zero(outcome: UsageOutcome) -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            outcome,
        }
    }
}

/// Aggregated usage over the trailing quota window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WindowedUsage {
    pub requests: i64,
    pub tokens: i64,
    pub cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_round_trips_known_types() {
        let kind = BillingEventKind::from("invoice.payment_failed".to_string());
        assert_eq!(kind, BillingEventKind::InvoicePaymentFailed);
        assert_eq!(String::from(kind), "invoice.payment_failed");
    }

    #[test]
    fn event_kind_preserves_unknown_types() {
        let kind = BillingEventKind::from("customer.updated".to_string());
        assert_eq!(kind, BillingEventKind::Unknown("customer.updated".into()));
        assert_eq!(kind.as_str(), "customer.updated");
    }

    #[test]
    fn billing_event_deserializes_from_webhook_shape() {
        let json = r#"{
            "id": "evt_001",
            "type": "checkout.completed",
            "billing_ref": "cus_42",
            "occurred_at": "2026-01-15T10:00:00Z",
            "data": { "access_code": "ABCD1234EFGH5678", "plan": "standard", "subscription_id": "sub_9" }
        }"#;
        let event: BillingEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, BillingEventKind::CheckoutCompleted);
        assert_eq!(
            event.data.access_code,
            Some(crate::account::AccessCode::new("ABCD1234EFGH5678"))
        );
        assert_eq!(event.data.plan, Some(PlanTier::Standard));
        assert_eq!(event.data.subscription_id.as_deref(), Some("sub_9"));
        assert!(!event.data.trial_period);
    }

    #[test]
    fn billing_event_data_defaults_when_absent() {
        let json = r#"{
            "id": "evt_002",
            "type": "invoice.paid",
            "billing_ref": "cus_42",
            "occurred_at": "2026-01-15T10:00:00Z"
        }"#;
        let event: BillingEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.data, BillingEventData::default());
    }

    #[test]
    fn zero_usage_record_carries_outcome() {
        let record = UsageRecord::zero(UsageOutcome::Failure);
        assert_eq!(record.total_tokens(), 0);
        assert_eq!(record.cost, 0.0);
        assert_eq!(record.outcome, UsageOutcome::Failure);
    }
}
