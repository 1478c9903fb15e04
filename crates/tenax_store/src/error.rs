//! Error types for the tenax store.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The lock scope a failed acquisition was aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// The store-wide lock serialising transaction enumeration.
    Global,
    /// A per-transaction lock guarding its persisted state.
    Transaction,
    /// A per-object lock held during commit.
    Object,
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Transaction => write!(f, "transaction"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted record could not be decoded.
    #[error("corrupt record: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// An entry was enqueued twice for the same section slot.
    #[error("entry already enqueued for {savepoint} at position {position}")]
    AlreadyEnqueued {
        /// Savepoint name of the offending section.
        savepoint: String,
        /// Position within the section.
        position: u64,
    },

    /// A non-blocking lock acquisition found the lock held elsewhere.
    #[error("{kind} lock unavailable: {name}")]
    LockUnavailable {
        /// Which kind of lock failed.
        kind: LockKind,
        /// The lock's name.
        name: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::corrupt(err.to_string())
    }
}

impl StoreError {
    /// Creates a corrupt record error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates a lock unavailable error.
    pub fn lock_unavailable(kind: LockKind, name: impl Into<String>) -> Self {
        Self::LockUnavailable {
            kind,
            name: name.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_kind_display() {
        assert_eq!(format!("{}", LockKind::Global), "global");
        assert_eq!(format!("{}", LockKind::Transaction), "transaction");
        assert_eq!(format!("{}", LockKind::Object), "object");
    }

    #[test]
    fn lock_unavailable_message() {
        let err = StoreError::lock_unavailable(LockKind::Object, "user/1");
        assert_eq!(format!("{err}"), "object lock unavailable: user/1");
    }
}
