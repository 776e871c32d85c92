//! Content-addressed context payloads.
//!
//! Snapshots are deduplicated by a fingerprint over the payload content.
//! The fingerprint must be stable across semantically-equal JSON, so it is
//! computed over a canonical form: object keys sorted recursively, no
//! insignificant whitespace. Two clients serializing the same map in
//! different key orders produce the same fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::account::AccessCode;
use crate::error::PayloadError;

/// The only context payload schema version this build accepts.
pub const CONTEXT_SCHEMA_VERSION: u32 = 1;

/// Upper bound on a serialized payload, in bytes.
pub const MAX_CONTEXT_BYTES: usize = 64 * 1024;

// ============================================================================
// CANONICAL JSON
// ============================================================================

/// Rebuilds a JSON value with object keys sorted recursively.
///
/// `serde_json::Map` preserves insertion order by default, so sorting must
/// happen by reconstruction rather than in place.
pub fn canonicalize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), canonicalize_json(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_json).collect()),
        other => other.clone(),
    }
}

/// Compact serialization of the canonical form.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    // Serializing a Value to a Vec cannot fail.
    serde_json::to_vec(&canonicalize_json(value)).unwrap_or_default()
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// A context payload as submitted by the IDE add-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ContextPayload {
    /// Payload schema version; defaults to the current version when omitted.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Client-chosen payload kind, e.g. "file_excerpt" or "diagnostics".
    pub kind: String,
    /// The context content itself. Arbitrary JSON, fingerprinted as-is.
    pub content: Value,
    /// Optional client annotations. Not part of the fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

fn default_schema_version() -> u32 {
    CONTEXT_SCHEMA_VERSION
}

impl ContextPayload {
    /// Validates the payload against the boundary rules.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.schema_version != CONTEXT_SCHEMA_VERSION {
            return Err(PayloadError::UnsupportedSchemaVersion {
                found: self.schema_version,
                supported: CONTEXT_SCHEMA_VERSION,
            });
        }
        if self.kind.trim().is_empty() {
            return Err(PayloadError::EmptyKind);
        }
        if self.content.is_null() {
            return Err(PayloadError::NullContent);
        }
        let bytes = canonical_json_bytes(&self.content).len();
        if bytes > MAX_CONTEXT_BYTES {
            return Err(PayloadError::TooLarge {
                bytes,
                max: MAX_CONTEXT_BYTES,
            });
        }
        Ok(())
    }

    /// Content fingerprint used for deduplication.
    ///
    /// Covers `content` only: metadata and kind may differ between
    /// submissions of the same underlying context.
    pub fn fingerprint(&self) -> String {
        sha256_hex(&canonical_json_bytes(&self.content))
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// A stored context snapshot, scoped to one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ContextSnapshot {
    pub access_code: AccessCode,
    pub fingerprint: String,
    pub payload: ContextPayload,
    pub created_at: DateTime<Utc>,
    /// Snapshots past this instant are invisible to reads and eligible
    /// for physical deletion by the sweeper.
    pub expires_at: DateTime<Utc>,
}

impl ContextSnapshot {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(content: Value) -> ContextPayload {
        ContextPayload {
            schema_version: CONTEXT_SCHEMA_VERSION,
            kind: "file_excerpt".into(),
            content,
            metadata: None,
        }
    }

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let a = payload(json!({"path": "src/main.rs", "lang": "rust", "body": "fn main() {}"}));
        let b = payload(json!({"body": "fn main() {}", "lang": "rust", "path": "src/main.rs"}));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn nested_objects_are_canonicalized() {
        let a = json!({"outer": {"b": 1, "a": {"z": true, "y": false}}});
        let b = json!({"outer": {"a": {"y": false, "z": true}, "b": 1}});
        assert_eq!(canonical_json_bytes(&a), canonical_json_bytes(&b));
    }

    #[test]
    fn array_order_is_significant() {
        let a = payload(json!(["one", "two"]));
        let b = payload(json!(["two", "one"]));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn metadata_does_not_affect_fingerprint() {
        let mut a = payload(json!({"x": 1}));
        let mut b = a.clone();
        a.metadata = Some(json!({"source": "editor"}));
        b.metadata = Some(json!({"source": "lsp"}));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn validation_rejects_bad_payloads() {
        let mut p = payload(json!({"ok": true}));
        assert!(p.validate().is_ok());

        p.schema_version = 2;
        assert!(matches!(
            p.validate(),
            Err(PayloadError::UnsupportedSchemaVersion { found: 2, .. })
        ));
        p.schema_version = CONTEXT_SCHEMA_VERSION;

        p.kind = "   ".into();
        assert_eq!(p.validate(), Err(PayloadError::EmptyKind));
        p.kind = "file_excerpt".into();

        p.content = Value::Null;
        assert_eq!(p.validate(), Err(PayloadError::NullContent));
    }

    #[test]
    fn validation_rejects_oversized_content() {
        let big = "x".repeat(MAX_CONTEXT_BYTES + 1);
        let p = payload(json!({ "body": big }));
        assert!(matches!(p.validate(), Err(PayloadError::TooLarge { .. })));
    }

    #[test]
    fn schema_version_defaults_when_omitted() {
        let p: ContextPayload =
            serde_json::from_value(json!({"kind": "diagnostics", "content": {"errors": []}}))
                .unwrap();
        assert_eq!(p.schema_version, CONTEXT_SCHEMA_VERSION);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let snapshot = ContextSnapshot {
            access_code: AccessCode::new("A".repeat(16)),
            fingerprint: "f".repeat(64),
            payload: payload(json!({"x": 1})),
            created_at: now,
            expires_at: now,
        };
        assert!(snapshot.is_expired(now));
        assert!(!snapshot.is_expired(now - chrono::Duration::seconds(1)));
    }
}
