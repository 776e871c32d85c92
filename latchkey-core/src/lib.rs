//! Core data types for the Latchkey access-code billing engine.
//!
//! This crate holds the domain model shared by the API layer and its tests:
//! access codes and ledger accounts, plan tiers with their limit/rate tables,
//! billing lifecycle events, usage records, and content-addressed context
//! payloads. Everything here is pure data and pure logic - no I/O.

pub mod account;
pub mod context;
pub mod error;
pub mod event;
pub mod plan;

pub use account::{AccessCode, Account, BillingStatus};
pub use context::{
    canonical_json_bytes, canonicalize_json, sha256_hex, ContextPayload, ContextSnapshot,
    CONTEXT_SCHEMA_VERSION, MAX_CONTEXT_BYTES,
};
pub use error::{PayloadError, UnknownVariant};
pub use event::{
    BillingEvent, BillingEventData, BillingEventKind, UsageOutcome, UsageRecord, WindowedUsage,
};
pub use plan::{PlanLimits, PlanTier, QuotaCeiling, TokenRates};
