//! Error types for the tenax engine.

use crate::transaction::conflict::{ReadConflict, WriteClash};
use tenax_store::{LockKind, StoreError};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed type configuration; never recoverable inside a
    /// transaction.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The persistence adapter violated or reported a contract failure.
    #[error("persistence error: {0}")]
    Persistence(StoreError),

    /// A non-suspending lock acquisition failed; recoverable by retrying.
    #[error("{kind} lock unavailable: {name}")]
    Lock {
        /// Which lock kind failed.
        kind: LockKind,
        /// The lock's name.
        name: String,
    },

    /// A value this transaction read was changed externally.
    #[error(transparent)]
    ReadIntegrity(#[from] ReadConflict),

    /// A value this transaction wrote was also changed externally.
    #[error(transparent)]
    WriteClash(#[from] WriteClash),

    /// Operation not permitted in the current transaction state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A domain object reported a failure.
    #[error("domain error: {message}")]
    Domain {
        /// Description from the domain object.
        message: String,
    },
}

impl EngineError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a domain error.
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    /// Returns true for integrity failures (read integrity or write
    /// clash), which get the reset-and-reraise treatment when they escape
    /// a transaction block.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::ReadIntegrity(_) | Self::WriteClash(_))
    }

    /// Returns true for lock failures, which propagate without resetting
    /// the transaction so the caller can back off and retry.
    #[must_use]
    pub fn is_lock(&self) -> bool {
        matches!(self, Self::Lock { .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockUnavailable { kind, name } => Self::Lock { kind, name },
            other => Self::Persistence(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_failures_convert_from_store() {
        let err: EngineError =
            StoreError::lock_unavailable(LockKind::Object, "user/1").into();
        assert!(err.is_lock());
        assert_eq!(format!("{err}"), "object lock unavailable: user/1");
    }

    #[test]
    fn other_store_errors_become_persistence() {
        let err: EngineError = StoreError::corrupt("bad record").into();
        assert!(matches!(err, EngineError::Persistence(_)));
        assert!(!err.is_lock());
    }
}
