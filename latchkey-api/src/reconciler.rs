//! Webhook Reconciler
//!
//! Applies payment-processor billing events to the ledger with two
//! guarantees:
//!
//! - Idempotency: the event id is inserted into billing_events inside the
//!   same transaction as the account update. A redelivered event hits the
//!   primary key and is acknowledged as a duplicate no-op.
//! - Ordering: competing deliveries are resolved on the event's occurrence
//!   timestamp, not arrival order. An event older than the last one applied
//!   to the account is skipped as stale.
//!
//! The status transition itself is a pure function so the state machine is
//! testable without a database.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::db::LedgerStore;
use crate::error::{ApiError, ApiResult};
use latchkey_core::{Account, BillingEvent, BillingEventKind, BillingStatus, PlanTier};

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SIGNATURE VERIFICATION
// ============================================================================

/// Header carrying the hex-encoded HMAC-SHA256 of the raw request body.
pub const SIGNATURE_HEADER: &str = "x-latchkey-signature";

/// Verify a webhook delivery signature against the shared secret.
///
/// Comparison happens inside the Mac so it is constant-time.
pub fn verify_signature(secret: &SecretString, body: &[u8], signature_hex: &str) -> bool {
    let expected = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// ============================================================================
// PURE TRANSITION LOGIC
// ============================================================================

/// Result of resolving one event against the account's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move the account to this status.
    Apply(BillingStatus),
    /// The event kind carries no status change for this account.
    Ignore,
    /// The account is in a terminal status; nothing revives it.
    Terminal,
}

/// The billing status state machine.
///
/// Canceled is terminal: a late invoice.paid redelivered after
/// subscription.deleted must not resurrect the account.
pub fn resolve_transition(current: BillingStatus, kind: &BillingEventKind) -> Transition {
    if current.is_terminal() {
        return Transition::Terminal;
    }

    match kind {
        BillingEventKind::CheckoutCompleted => Transition::Apply(BillingStatus::Active),
        BillingEventKind::SubscriptionCreated => Transition::Apply(BillingStatus::Active),
        BillingEventKind::InvoicePaid => Transition::Apply(BillingStatus::Active),
        BillingEventKind::InvoicePaymentFailed => Transition::Apply(BillingStatus::PastDue),
        BillingEventKind::SubscriptionDeleted => Transition::Apply(BillingStatus::Canceled),
        BillingEventKind::Unknown(_) => Transition::Ignore,
    }
}

/// Whether an event is stale relative to the last one applied.
///
/// Strictly-older events are stale; an event with the same timestamp as
/// the last applied one is still applied (distinct events can share a
/// second at the processor).
pub fn is_stale(occurred_at: DateTime<Utc>, last_event_at: Option<DateTime<Utc>>) -> bool {
    match last_event_at {
        Some(last) => occurred_at < last,
        None => false,
    }
}

// ============================================================================
// RECONCILE OUTCOME
// ============================================================================

/// What processing a delivery did. All variants acknowledge the delivery;
/// failures that should trigger a processor retry are ApiErrors instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The account status was updated.
    Applied,
    /// Event id already processed; no-op.
    Duplicate,
    /// Event is older than the last applied one; no-op.
    Stale,
    /// Account is in a terminal status; no-op.
    Terminal,
    /// Event kind is not one the reconciler acts on; no-op.
    Ignored,
}

impl ReconcileOutcome {
    fn effect_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied => "applied",
            ReconcileOutcome::Duplicate => "duplicate",
            ReconcileOutcome::Stale => "stale",
            ReconcileOutcome::Terminal => "terminal",
            ReconcileOutcome::Ignored => "ignored",
        }
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Ledger-backed webhook reconciler.
#[derive(Clone)]
pub struct Reconciler {
    store: LedgerStore,
}

impl Reconciler {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Apply one verified billing event.
    ///
    /// Errors roll the transaction back, leaving no idempotency row, so
    /// the processor's at-least-once retry gets a clean second attempt.
    pub async fn apply(&self, event: &BillingEvent) -> ApiResult<ReconcileOutcome> {
        let mut conn = self.store.get_conn().await?;
        let tx = conn.transaction().await?;

        // Idempotency row first. A conflict means this event id was fully
        // processed by an earlier delivery.
        let inserted = tx
            .execute(
                "INSERT INTO billing_events (event_id, kind, processed_at, effect)
                 VALUES ($1, $2, $3, 'pending')
                 ON CONFLICT (event_id) DO NOTHING",
                &[&event.id, &event.kind.as_str(), &Utc::now()],
            )
            .await?;

        if inserted == 0 {
            tx.rollback().await?;
            tracing::info!(event_id = %event.id, "Duplicate billing event acknowledged");
            return Ok(ReconcileOutcome::Duplicate);
        }

        // Unknown kinds are logged and acknowledged without touching any
        // account; the processor sends many types we do not act on.
        if matches!(event.kind, BillingEventKind::Unknown(_)) {
            finish(&tx, &event.id, ReconcileOutcome::Ignored).await?;
            tx.commit().await?;
            return Ok(ReconcileOutcome::Ignored);
        }

        let account = self.lock_or_create_account(&tx, event).await?;

        if is_stale(event.occurred_at, account.last_event_at) {
            finish(&tx, &event.id, ReconcileOutcome::Stale).await?;
            tx.commit().await?;
            tracing::info!(
                event_id = %event.id,
                occurred_at = %event.occurred_at,
                "Stale billing event skipped"
            );
            return Ok(ReconcileOutcome::Stale);
        }

        let outcome = match resolve_transition(account.billing_status, &event.kind) {
            Transition::Apply(mut new_status) => {
                if event.kind == BillingEventKind::CheckoutCompleted && event.data.trial_period {
                    new_status = BillingStatus::Trialing;
                }
                self.apply_update(&tx, &account, event, new_status).await?;
                ReconcileOutcome::Applied
            }
            Transition::Terminal => ReconcileOutcome::Terminal,
            Transition::Ignore => ReconcileOutcome::Ignored,
        };

        finish(&tx, &event.id, outcome).await?;
        tx.commit().await?;

        tracing::info!(
            event_id = %event.id,
            kind = %event.kind,
            outcome = ?outcome,
            "Billing event processed"
        );
        Ok(outcome)
    }

    /// Lock the target account row for the duration of the transaction,
    /// creating it when the event is a paid signup for a subject the
    /// ledger has never seen.
    ///
    /// A checkout that carries an access code in its metadata links the
    /// purchase to that existing (trial) account; if that account is gone
    /// the delivery fails and the processor retries. Checkout and
    /// subscription creation without a matching row provision a fresh
    /// account with a newly generated access code inside the same
    /// transaction. Every other kind requires an existing row; a miss is
    /// a delivery failure (ordering may just mean the signup event has
    /// not arrived yet).
    async fn lock_or_create_account(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        event: &BillingEvent,
    ) -> ApiResult<Account> {
        let linked_code = if event.kind == BillingEventKind::CheckoutCompleted {
            event.data.access_code.as_ref()
        } else {
            None
        };

        let row = if let Some(code) = linked_code {
            tx.query_opt(
                "SELECT access_code, billing_status, last_event_at
                 FROM accounts WHERE access_code = $1 FOR UPDATE",
                &[&code.as_str()],
            )
            .await?
        } else {
            tx.query_opt(
                "SELECT access_code, billing_status, last_event_at
                 FROM accounts WHERE billing_ref = $1 FOR UPDATE",
                &[&event.billing_ref],
            )
            .await?
        };

        let row = match row {
            Some(row) => row,
            None if linked_code.is_none()
                && matches!(
                    event.kind,
                    BillingEventKind::CheckoutCompleted | BillingEventKind::SubscriptionCreated
                ) =>
            {
                return self.create_account(tx, event).await;
            }
            None => return Err(ApiError::account_not_found()),
        };

        let status_str: &str = row.get(1);
        let billing_status = status_str
            .parse::<BillingStatus>()
            .map_err(|e| ApiError::internal_error(format!("Corrupt account row: {}", e)))?;

        // Only the fields the reconciler consults are loaded here.
        let mut account = Account::new_trial(
            latchkey_core::AccessCode::new(row.get::<_, String>(0)),
            Utc::now(),
        );
        account.billing_status = billing_status;
        account.last_event_at = row.get(2);
        Ok(account)
    }

    /// Provision an account for a paid signup that never went through
    /// trial provisioning. The generated code is the buyer's credential
    /// from here on; the processor surfaces it to them out of band.
    async fn create_account(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        event: &BillingEvent,
    ) -> ApiResult<Account> {
        let plan = event.data.plan.unwrap_or(PlanTier::Standard);
        let now = Utc::now();

        // The code space makes collisions vanishingly rare; retry a few
        // times so one is still not a lost delivery.
        for _ in 0..5 {
            let code = latchkey_core::AccessCode::random();
            let inserted = tx
                .execute(
                    "INSERT INTO accounts
                         (access_code, plan, billing_status, billing_ref, is_enabled, created_at)
                     VALUES ($1, $2, 'trialing', $3, TRUE, $4)
                     ON CONFLICT (access_code) DO NOTHING",
                    &[&code.as_str(), &plan.as_str(), &event.billing_ref, &now],
                )
                .await?;

            if inserted == 1 {
                tracing::info!(
                    code = %code,
                    billing_ref = %event.billing_ref,
                    plan = %plan,
                    "Account provisioned from billing event"
                );
                let mut account = Account::new_trial(code, now);
                account.plan = plan;
                account.billing_ref = Some(event.billing_ref.clone());
                return Ok(account);
            }
        }

        Err(ApiError::internal_error(
            "Access code generation kept colliding",
        ))
    }

    async fn apply_update(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        account: &Account,
        event: &BillingEvent,
        new_status: BillingStatus,
    ) -> ApiResult<()> {
        if event.kind == BillingEventKind::CheckoutCompleted {
            // Checkout attaches billing identity and the purchased plan.
            let plan = event.data.plan.unwrap_or(PlanTier::Standard);
            tx.execute(
                "UPDATE accounts
                 SET billing_status = $2, plan = $3, billing_ref = $4, last_event_at = $5
                 WHERE access_code = $1",
                &[
                    &account.access_code.as_str(),
                    &new_status.as_str(),
                    &plan.as_str(),
                    &event.billing_ref,
                    &event.occurred_at,
                ],
            )
            .await?;
        } else {
            tx.execute(
                "UPDATE accounts
                 SET billing_status = $2, last_event_at = $3
                 WHERE access_code = $1",
                &[
                    &account.access_code.as_str(),
                    &new_status.as_str(),
                    &event.occurred_at,
                ],
            )
            .await?;
        }
        Ok(())
    }
}

/// Record the final effect on the idempotency row.
async fn finish(
    tx: &deadpool_postgres::Transaction<'_>,
    event_id: &str,
    outcome: ReconcileOutcome,
) -> ApiResult<()> {
    tx.execute(
        "UPDATE billing_events SET effect = $2 WHERE event_id = $1",
        &[&event_id, &outcome.effect_str()],
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let secret = SecretString::from("whsec_test");
        let body = br#"{"id":"evt_1"}"#;

        let mut mac = HmacSha256::new_from_slice(b"whsec_test").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(&secret, body, &sig));
        assert!(!verify_signature(&secret, b"tampered", &sig));
        assert!(!verify_signature(&secret, body, "deadbeef"));
        assert!(!verify_signature(&secret, body, "not-hex"));
    }

    #[test]
    fn canceled_is_terminal_for_every_kind() {
        for kind in [
            BillingEventKind::CheckoutCompleted,
            BillingEventKind::SubscriptionCreated,
            BillingEventKind::InvoicePaid,
            BillingEventKind::InvoicePaymentFailed,
            BillingEventKind::SubscriptionDeleted,
            BillingEventKind::Unknown("customer.updated".into()),
        ] {
            assert_eq!(
                resolve_transition(BillingStatus::Canceled, &kind),
                Transition::Terminal
            );
        }
    }

    #[test]
    fn payment_failure_and_recovery() {
        assert_eq!(
            resolve_transition(BillingStatus::Active, &BillingEventKind::InvoicePaymentFailed),
            Transition::Apply(BillingStatus::PastDue)
        );
        assert_eq!(
            resolve_transition(BillingStatus::PastDue, &BillingEventKind::InvoicePaid),
            Transition::Apply(BillingStatus::Active)
        );
    }

    #[test]
    fn deletion_cancels_from_any_live_status() {
        for status in [
            BillingStatus::Trialing,
            BillingStatus::Active,
            BillingStatus::PastDue,
        ] {
            assert_eq!(
                resolve_transition(status, &BillingEventKind::SubscriptionDeleted),
                Transition::Apply(BillingStatus::Canceled)
            );
        }
    }

    #[test]
    fn unknown_kinds_are_ignored() {
        assert_eq!(
            resolve_transition(
                BillingStatus::Active,
                &BillingEventKind::Unknown("charge.refunded".into())
            ),
            Transition::Ignore
        );
    }

    #[test]
    fn staleness_is_strictly_older() {
        let now = Utc::now();
        assert!(!is_stale(now, None));
        assert!(!is_stale(now, Some(now)));
        assert!(is_stale(now - chrono::Duration::seconds(1), Some(now)));
        assert!(!is_stale(now + chrono::Duration::seconds(1), Some(now)));
    }
}
