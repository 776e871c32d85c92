//! Property-Based Tests for Admission Control
//!
//! For any account state and windowed usage, the admission policy must
//! never admit a disabled or unknown account, never admit past the
//! applicable ceiling, and never surface a client-visible quota for
//! metered plans.

use chrono::Utc;
use latchkey_api::admission::{decide, Decision, Denial};
use latchkey_core::{AccessCode, Account, BillingStatus, PlanLimits, PlanTier, QuotaCeiling};
use proptest::prelude::*;

// ============================================================================
// STRATEGIES
// ============================================================================

fn tier_strategy() -> impl Strategy<Value = PlanTier> {
    prop_oneof![
        Just(PlanTier::Trial),
        Just(PlanTier::Standard),
        Just(PlanTier::Plus),
    ]
}

fn status_strategy() -> impl Strategy<Value = BillingStatus> {
    prop_oneof![
        Just(BillingStatus::Trialing),
        Just(BillingStatus::Active),
        Just(BillingStatus::PastDue),
        Just(BillingStatus::Canceled),
    ]
}

fn account_strategy() -> impl Strategy<Value = Account> {
    (
        tier_strategy(),
        status_strategy(),
        any::<bool>(),
        0i64..2_000,
    )
        .prop_map(|(plan, billing_status, is_enabled, total_requests)| {
            let mut account = Account::new_trial(AccessCode::new("P".repeat(16)), Utc::now());
            account.plan = plan;
            account.billing_status = billing_status;
            account.is_enabled = is_enabled;
            account.total_requests = total_requests;
            if plan.is_metered() {
                account.billing_ref = Some("cus_prop".to_string());
            }
            account
        })
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// A missing account is always denied as unknown, regardless of usage.
    #[test]
    fn missing_account_is_always_unknown(window in 0i64..2_000, units in 1i64..10) {
        let decision = decide(None, window, units, &PlanLimits::default());
        prop_assert_eq!(decision, Decision::Deny(Denial::UnknownCode));
    }

    /// A disabled account is always denied, before any other policy.
    #[test]
    fn disabled_is_always_denied(mut account in account_strategy(), window in 0i64..2_000) {
        account.is_enabled = false;
        let decision = decide(Some(&account), window, 1, &PlanLimits::default());
        prop_assert_eq!(decision, Decision::Deny(Denial::Disabled));
    }

    /// Whenever a request is admitted, the account was enabled, metered
    /// billing was in good standing, and the requested units fit under
    /// the ceiling.
    #[test]
    fn allow_implies_every_gate_passed(
        account in account_strategy(),
        window in 0i64..2_000,
        units in 1i64..10,
    ) {
        let limits = PlanLimits::default();
        if let Decision::Allow { remaining } = decide(Some(&account), window, units, &limits) {
            prop_assert!(account.is_enabled);

            if account.plan.is_metered() {
                prop_assert!(matches!(
                    account.billing_status,
                    BillingStatus::Active | BillingStatus::Trialing
                ));
                // Metered ceilings are abuse limits, never a client quota.
                prop_assert_eq!(remaining, None);
            }

            match limits.ceiling(account.plan) {
                QuotaCeiling::Lifetime(limit) => {
                    prop_assert!(account.total_requests + units <= limit);
                    prop_assert_eq!(remaining, Some(limit - account.total_requests));
                }
                QuotaCeiling::Windowed(limit) => {
                    prop_assert!(window + units <= limit);
                }
            }
        }
    }

    /// A trial account at or past its lifetime ceiling is always denied
    /// with the exact used/limit pair.
    #[test]
    fn exhausted_trial_is_always_denied(over in 0i64..100) {
        let limits = PlanLimits::default();
        let mut account = Account::new_trial(AccessCode::new("P".repeat(16)), Utc::now());
        account.total_requests = limits.trial_lifetime_requests + over;

        let decision = decide(Some(&account), 0, 1, &limits);
        prop_assert_eq!(
            decision,
            Decision::Deny(Denial::QuotaExceeded {
                used: limits.trial_lifetime_requests + over,
                limit: limits.trial_lifetime_requests,
            })
        );
    }

    /// Windowed usage never influences trial admission; the trial ceiling
    /// is over the whole account lifetime.
    #[test]
    fn trial_ignores_windowed_usage(used in 0i64..50, window in 0i64..2_000) {
        let limits = PlanLimits::default();
        let mut account = Account::new_trial(AccessCode::new("P".repeat(16)), Utc::now());
        account.total_requests = used;

        let with_window = decide(Some(&account), window, 1, &limits);
        let without_window = decide(Some(&account), 0, 1, &limits);
        prop_assert_eq!(with_window, without_window);
    }

    /// A non-positive unit count is treated as a single request; asking
    /// for zero work never slips past an exhausted ceiling.
    #[test]
    fn zero_units_still_cost_one(units in -5i64..1) {
        let limits = PlanLimits::default();
        let mut account = Account::new_trial(AccessCode::new("P".repeat(16)), Utc::now());
        account.total_requests = limits.trial_lifetime_requests;

        let decision = decide(Some(&account), 0, units, &limits);
        prop_assert!(
            matches!(decision, Decision::Deny(Denial::QuotaExceeded { .. })),
            "expected QuotaExceeded denial, got {:?}",
            decision
        );
    }
}
