//! Property-Based Tests for Context Fingerprinting
//!
//! The dedup fingerprint must be stable across semantically-equal JSON:
//! object key order never matters, metadata never matters, and the
//! canonical form must round-trip to an equal value.

use latchkey_core::{
    canonical_json_bytes, canonicalize_json, ContextPayload, CONTEXT_SCHEMA_VERSION,
};
use proptest::prelude::*;
use serde_json::Value;

// ============================================================================
// STRATEGIES
// ============================================================================

/// Arbitrary JSON values, bounded in depth and width.
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9 _./-]{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6).prop_map(|map| {
                Value::Object(map.into_iter().collect())
            }),
        ]
    })
}

fn payload(content: Value) -> ContextPayload {
    ContextPayload {
        schema_version: CONTEXT_SCHEMA_VERSION,
        kind: "file_excerpt".to_string(),
        content,
        metadata: None,
    }
}

/// Rebuild a JSON value with object keys in reversed order, preserving
/// semantics while changing serialization order.
fn reverse_key_order(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map.iter().rev() {
                out.insert(key.clone(), reverse_key_order(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(reverse_key_order).collect()),
        other => other.clone(),
    }
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Canonicalization is idempotent.
    #[test]
    fn canonicalization_is_idempotent(value in json_strategy()) {
        let once = canonicalize_json(&value);
        let twice = canonicalize_json(&once);
        prop_assert_eq!(once, twice);
    }

    /// The canonical bytes parse back to a value equal to the original.
    #[test]
    fn canonical_bytes_round_trip(value in json_strategy()) {
        let bytes = canonical_json_bytes(&value);
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        prop_assert_eq!(parsed, value);
    }

    /// Object key order never affects the fingerprint, at any nesting depth.
    #[test]
    fn key_order_never_affects_fingerprint(value in json_strategy()) {
        let reversed = reverse_key_order(&value);
        prop_assert_eq!(
            payload(value).fingerprint(),
            payload(reversed).fingerprint()
        );
    }

    /// Metadata and kind never affect the fingerprint; it covers content only.
    #[test]
    fn fingerprint_covers_content_only(
        content in json_strategy(),
        kind in "[a-z_]{1,16}",
        note in "[a-z ]{0,32}",
    ) {
        let plain = payload(content.clone());
        let mut annotated = payload(content);
        annotated.kind = kind;
        annotated.metadata = Some(serde_json::json!({ "note": note }));
        prop_assert_eq!(plain.fingerprint(), annotated.fingerprint());
    }

    /// Fingerprints are always 64 lowercase hex characters.
    #[test]
    fn fingerprint_shape_is_stable(value in json_strategy()) {
        let fp = payload(value).fingerprint();
        prop_assert_eq!(fp.len(), 64);
        prop_assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    /// Different canonical content yields different fingerprints.
    #[test]
    fn distinct_content_gets_distinct_fingerprints(a in json_strategy(), b in json_strategy()) {
        prop_assume!(canonical_json_bytes(&a) != canonical_json_bytes(&b));
        prop_assert_ne!(payload(a).fingerprint(), payload(b).fingerprint());
    }
}
