//! Error types for Latchkey domain validation.

use thiserror::Error;

/// A string value did not match any known variant of an enumerated type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what}: '{value}'")]
pub struct UnknownVariant {
    /// Name of the enumerated type (e.g. "plan tier").
    pub what: &'static str,
    /// The rejected input.
    pub value: String,
}

impl UnknownVariant {
    pub fn new(what: &'static str, value: impl Into<String>) -> Self {
        Self {
            what,
            value: value.into(),
        }
    }
}

/// Context payload validation errors.
///
/// Payloads are validated at the Context Cache boundary; downstream code may
/// assume any stored payload passed these checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("unsupported context schema version {found} (supported: {supported})")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    #[error("context payload kind must be non-empty")]
    EmptyKind,

    #[error("context payload content must not be null")]
    NullContent,

    #[error("context payload is {bytes} bytes, exceeding the {max} byte limit")]
    TooLarge { bytes: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_variant_display_names_type_and_value() {
        let err = UnknownVariant::new("plan tier", "platinum");
        assert_eq!(err.to_string(), "unknown plan tier: 'platinum'");
    }

    #[test]
    fn payload_error_display_mentions_limit() {
        let err = PayloadError::TooLarge {
            bytes: 100_000,
            max: 65_536,
        };
        assert!(err.to_string().contains("65536"));
    }
}
