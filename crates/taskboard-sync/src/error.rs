//! Error types for the sync layer
//!
//! Provides error handling for:
//! - Authority failures (classified for notice routing)
//! - Structural edit failures from the store
//! - Record decoding failures
//! - Illegal sync-state transitions
//! - Configuration loading

use crate::binding::ListBinding;
use crate::state::SyncState;
use taskboard_model::{FieldName, Identifier, ModelError};
use taskboard_store::StoreError;

/// How a failure is reported to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Field-level rejection, shown inline next to the field
    Validation,
    /// Network, auth or server failure, shown as a generic notice
    Transient,
    /// Entity vanished on the authority
    NotFound,
}

/// Failure reported by the remote authority
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// Request rejected by field validation
    #[error("validation failed: {message}")]
    Validation {
        /// Offending field when the authority names one
        field: Option<FieldName>,
        message: String,
    },

    /// Entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or rejected credentials
    #[error("unauthorized")]
    Unauthorized,

    /// Write conflicts with newer durable state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network failure or server error
    #[error("transient failure: {0}")]
    Transient(String),
}

impl AuthorityError {
    /// Validation error without a field
    #[inline]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: message.into(),
        }
    }

    /// Validation error naming a field
    #[inline]
    pub fn invalid_field(field: FieldName, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field),
            message: message.into(),
        }
    }

    #[inline]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Classify for notice routing
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Validation { .. } => FailureClass::Validation,
            Self::NotFound(_) => FailureClass::NotFound,
            Self::Unauthorized | Self::Conflict(_) | Self::Transient(_) => FailureClass::Transient,
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Check if local state should be re-fetched after this failure
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Main sync error type
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Authority rejected or failed a request
    #[error("authority error: {0}")]
    Authority(#[from] AuthorityError),

    /// Structural edit rejected by the store
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Authority record could not be decoded
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Item is not present in any loaded collection
    #[error("unknown item: {0}")]
    UnknownItem(Identifier),

    /// Operation not offered by this list
    #[error("{operation} not supported by {binding}")]
    Unsupported {
        operation: &'static str,
        binding: ListBinding,
    },

    /// Sync-state machine rejected a transition
    #[error("invalid sync transition from {from} to {to}")]
    InvalidTransition { from: SyncState, to: SyncState },
}

impl SyncError {
    /// Classify for notice routing
    #[must_use]
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Authority(err) => err.class(),
            _ => FailureClass::Transient,
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Authority(err) if err.is_retryable())
    }

    /// Authority failure, if this is one
    #[must_use]
    pub fn authority(&self) -> Option<&AuthorityError> {
        match self {
            Self::Authority(err) => Some(err),
            _ => None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML did not parse
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed but out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_error_classification() {
        assert_eq!(
            AuthorityError::invalid_field(FieldName::TITLE, "too long").class(),
            FailureClass::Validation
        );
        assert_eq!(AuthorityError::NotFound("t1".into()).class(), FailureClass::NotFound);
        assert_eq!(AuthorityError::Unauthorized.class(), FailureClass::Transient);
        assert_eq!(AuthorityError::Conflict("stale".into()).class(), FailureClass::Transient);
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(SyncError::from(AuthorityError::transient("timeout")).is_retryable());
        assert!(!SyncError::from(AuthorityError::validation("bad")).is_retryable());
        assert!(!SyncError::UnknownItem("x".into()).is_retryable());
    }

    #[test]
    fn store_errors_route_as_transient() {
        let err = SyncError::from(StoreError::SameCollection("s1".into()));
        assert_eq!(err.failure_class(), FailureClass::Transient);
        assert!(err.authority().is_none());
    }
}
