//! Error types for configuration loading.
//!
//! # Design
//!
//! - Keep messages constant; the offending field, reason, and value travel as structured context.
//! - Field identifiers are the environment variable names so operators can fix them directly.

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Two fields were individually valid but disagree with each other.
    #[error("conflicting configuration fields")]
    Conflict {
        /// Field that was rejected.
        field: &'static str,
        /// Field it conflicts with.
        other: &'static str,
        /// Machine-readable reason for the conflict.
        reason: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: &'static str,
        reason: &'static str,
        value: Option<impl Into<String>>,
    ) -> Self {
        Self::InvalidField {
            field,
            reason,
            value: value.map(Into::into),
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_stay_constant_while_context_is_structured() {
        let err = ConfigError::invalid("PDFSQUEEZE_BIND_ADDR", "unparseable", Some("nope"));
        assert_eq!(err.to_string(), "invalid configuration field");
        match err {
            ConfigError::InvalidField {
                field,
                reason,
                value,
            } => {
                assert_eq!(field, "PDFSQUEEZE_BIND_ADDR");
                assert_eq!(reason, "unparseable");
                assert_eq!(value.as_deref(), Some("nope"));
            }
            ConfigError::Conflict { .. } => panic!("unexpected variant"),
        }

        let conflict = ConfigError::Conflict {
            field: "a",
            other: "b",
            reason: "exceeds",
        };
        assert_eq!(conflict.to_string(), "conflicting configuration fields");
    }
}
