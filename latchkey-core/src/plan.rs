//! Plan tiers, quota ceilings, and token rate cards.
//!
//! The limit table is static configuration: trial accounts get a hard
//! lifetime request ceiling, metered tiers get a generous windowed ceiling
//! that exists purely as an abuse guard (monetary billing is the real
//! control for paid plans).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownVariant;

// ============================================================================
// PLAN TIER
// ============================================================================

/// Billing plan tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Free trial with a hard lifetime request ceiling.
    #[default]
    Trial,
    /// Metered tier A: pay-per-token on the smaller model family.
    Standard,
    /// Metered tier B: pay-per-token on the larger model family.
    Plus,
}

impl PlanTier {
    /// Metered tiers are billed per token by the payment processor and
    /// require an active billing status for admission.
    pub fn is_metered(&self) -> bool {
        !matches!(self, PlanTier::Trial)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Trial => "trial",
            PlanTier::Standard => "standard",
            PlanTier::Plus => "plus",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(PlanTier::Trial),
            "standard" => Ok(PlanTier::Standard),
            "plus" => Ok(PlanTier::Plus),
            other => Err(UnknownVariant::new("plan tier", other)),
        }
    }
}

// ============================================================================
// QUOTA CEILINGS
// ============================================================================

/// The kind of request ceiling a plan tier is subject to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCeiling {
    /// Hard cap on lifetime requests (trial accounts).
    Lifetime(i64),
    /// Abuse-guard cap on requests within the trailing quota window.
    Windowed(i64),
}

/// Static per-tier request limit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Lifetime request ceiling for trial accounts.
    pub trial_lifetime_requests: i64,
    /// Windowed abuse ceiling for the standard tier.
    pub standard_window_requests: i64,
    /// Windowed abuse ceiling for the plus tier.
    pub plus_window_requests: i64,
    /// Trailing window, in hours, over which metered usage is counted.
    pub window_hours: i64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            trial_lifetime_requests: 50,
            standard_window_requests: 500,
            plus_window_requests: 1000,
            window_hours: 24,
        }
    }
}

impl PlanLimits {
    /// The ceiling that applies to the given tier.
    pub fn ceiling(&self, tier: PlanTier) -> QuotaCeiling {
        match tier {
            PlanTier::Trial => QuotaCeiling::Lifetime(self.trial_lifetime_requests),
            PlanTier::Standard => QuotaCeiling::Windowed(self.standard_window_requests),
            PlanTier::Plus => QuotaCeiling::Windowed(self.plus_window_requests),
        }
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.window_hours)
    }
}

// ============================================================================
// TOKEN RATES
// ============================================================================

/// Per-1000-token rates used to accrue cost on usage events.
///
/// These mirror the processor's metered prices and exist for local
/// accounting and display; the processor's own meters remain authoritative
/// for invoicing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenRates {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl TokenRates {
    pub const ZERO: TokenRates = TokenRates {
        input_per_1k: 0.0,
        output_per_1k: 0.0,
    };

    /// Rate card for a plan tier. Trial usage accrues no monetary cost.
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Trial => TokenRates::ZERO,
            PlanTier::Standard => TokenRates {
                input_per_1k: 0.0013,
                output_per_1k: 0.0065,
            },
            PlanTier::Plus => TokenRates {
                input_per_1k: 0.005,
                output_per_1k: 0.02,
            },
        }
    }

    /// Derived cost for a token count pair.
    pub fn cost_for(&self, input_tokens: i64, output_tokens: i64) -> f64 {
        let input = (input_tokens.max(0) as f64 / 1000.0) * self.input_per_1k;
        let output = (output_tokens.max(0) as f64 / 1000.0) * self.output_per_1k;
        input + output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_tier_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PlanTier::Standard).unwrap(),
            "\"standard\""
        );
        assert_eq!(PlanTier::from_str("plus").unwrap(), PlanTier::Plus);
        assert!(PlanTier::from_str("platinum").is_err());
    }

    #[test]
    fn trial_is_not_metered() {
        assert!(!PlanTier::Trial.is_metered());
        assert!(PlanTier::Standard.is_metered());
        assert!(PlanTier::Plus.is_metered());
    }

    #[test]
    fn default_limits_match_tier_table() {
        let limits = PlanLimits::default();
        assert_eq!(limits.ceiling(PlanTier::Trial), QuotaCeiling::Lifetime(50));
        assert_eq!(
            limits.ceiling(PlanTier::Standard),
            QuotaCeiling::Windowed(500)
        );
        assert_eq!(limits.ceiling(PlanTier::Plus), QuotaCeiling::Windowed(1000));
        assert_eq!(limits.window(), chrono::Duration::hours(24));
    }

    #[test]
    fn trial_usage_accrues_zero_cost() {
        let rates = TokenRates::for_tier(PlanTier::Trial);
        assert_eq!(rates.cost_for(100_000, 100_000), 0.0);
    }

    #[test]
    fn metered_cost_scales_per_thousand_tokens() {
        let rates = TokenRates::for_tier(PlanTier::Standard);
        let cost = rates.cost_for(2000, 1000);
        let expected = 2.0 * 0.0013 + 1.0 * 0.0065;
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn negative_token_counts_clamp_to_zero() {
        let rates = TokenRates::for_tier(PlanTier::Plus);
        assert_eq!(rates.cost_for(-5, -5), 0.0);
    }
}
