//! Relay Error Taxonomy
//!
//! Every failure that can abort a block attempt is mapped onto [`RelayError`]
//! so the sync loop and its retry policy can tell a flaky node apart from a
//! key problem that no amount of retrying will fix.

use thiserror::Error;

/// Whether retrying the same height can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network hiccup, inconsistent node view, retryable remote rejection
    Transient,
    /// Retrying cannot help; the relayer should stop and page an operator
    Fatal,
}

/// Errors raised while relaying one Chain A block.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Chain A or Chain B could not be reached, or answered garbage
    #[error("rpc failure: {0:#}")]
    Rpc(anyhow::Error),

    /// A transaction or header did not have the shape the relay depends on
    #[error("data shape violation: {0}")]
    DataShape(String),

    /// The mint batch could not be encoded
    #[error("encoding failure: {0}")]
    Encoding(String),

    /// The relayer key is missing or malformed, or signing itself failed
    #[error("signing failure: {0}")]
    Signing(String),

    /// Chain B refused the message
    #[error("rejected by chain B (permanent: {permanent}): {message}")]
    Rejected { message: String, permanent: bool },

    /// Chain B reports the message was already applied
    #[error("duplicate submission: {0}")]
    Duplicate(String),

    /// Persisted relay state could not be read or written
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    /// The height cursor is at `u64::MAX` and has no next height
    #[error("height cursor {0} cannot advance")]
    HeightOverflow(u64),
}

impl RelayError {
    /// Classifies the error for the retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::Signing(_) => ErrorClass::Fatal,
            RelayError::Rejected { permanent: true, .. } => ErrorClass::Fatal,
            RelayError::HeightOverflow(_) => ErrorClass::Fatal,
            RelayError::Rpc(_)
            | RelayError::DataShape(_)
            | RelayError::Encoding(_)
            | RelayError::Rejected { permanent: false, .. }
            | RelayError::Duplicate(_)
            | RelayError::Storage(_) => ErrorClass::Transient,
        }
    }
}

/// Convenience alias used across the relay core.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_errors_are_fatal() {
        let err = RelayError::Signing("bad key".to_string());
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_rejection_class_follows_permanence() {
        let retryable = RelayError::Rejected {
            message: "busy".to_string(),
            permanent: false,
        };
        let permanent = RelayError::Rejected {
            message: "malformed payload".to_string(),
            permanent: true,
        };
        assert_eq!(retryable.class(), ErrorClass::Transient);
        assert_eq!(permanent.class(), ErrorClass::Fatal);
        assert!(permanent.to_string().contains("permanent: true"));
    }

    #[test]
    fn test_rpc_error_keeps_context_chain() {
        let err = RelayError::Rpc(anyhow::anyhow!("connection refused").context("get_tip_block_number"));
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.to_string().contains("connection refused"));
    }
}
