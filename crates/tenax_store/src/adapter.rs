//! The persistence and lock adapter contract.
//!
//! An adapter is the durable side of the engine: it stores section
//! `information` records and log entry records (as self-describing JSON
//! values, so the store never interprets entry semantics), enumerates what
//! has been persisted, and hands out scoped advisory locks.
//!
//! ## Lock discipline
//!
//! All three lock scopes are advisory and re-entrant within the same
//! thread. Acquisition returns an RAII [`LockGuard`]; dropping the guard
//! releases the lock on every exit path, including panics.

use crate::error::{LockKind, StoreResult};
use serde_json::Value;
use std::fmt;

/// Identifies one section (savepoint slice) of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SectionRef {
    /// The owning transaction's identifier.
    pub transaction_id: String,
    /// 1-based savepoint version within the transaction.
    pub version: u64,
}

impl SectionRef {
    /// Creates a section reference.
    #[must_use]
    pub fn new(transaction_id: impl Into<String>, version: u64) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            version,
        }
    }

    /// Returns the savepoint name, `<tx_id>/<version>`.
    #[must_use]
    pub fn savepoint(&self) -> String {
        format!("{}/{}", self.transaction_id, self.version)
    }
}

impl fmt::Display for SectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.transaction_id, self.version)
    }
}

/// The scope a lock acquisition targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockScope {
    /// The store-wide lock.
    Global,
    /// A per-transaction lock.
    Transaction(String),
    /// A per-object lock, named by the object key.
    Object(String),
}

impl LockScope {
    /// Returns the lock kind for error reporting.
    #[must_use]
    pub fn kind(&self) -> LockKind {
        match self {
            Self::Global => LockKind::Global,
            Self::Transaction(_) => LockKind::Transaction,
            Self::Object(_) => LockKind::Object,
        }
    }

    /// Returns the lock's name within its kind.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Global => "global",
            Self::Transaction(name) | Self::Object(name) => name,
        }
    }
}

/// An RAII guard for a held lock.
///
/// The lock is released when the guard is dropped. Guards may be held
/// across adapter calls; re-acquiring a lock the current thread already
/// holds nests instead of deadlocking. Guards are intentionally not
/// `Send`: a lock must be released on the thread that acquired it.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce()>>,
}

impl LockGuard {
    /// Creates a guard that runs `release` when dropped.
    #[must_use]
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Creates a guard that releases nothing.
    ///
    /// Used for re-entrant acquisitions where an outer guard owns the
    /// actual release.
    #[must_use]
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Durable store for transaction sections and scoped advisory locks.
///
/// Entries are opaque, self-describing JSON records; the engine above
/// decides what they mean. Implementations must be safe to share across
/// threads; interior mutability is expected.
pub trait PersistenceAdapter: Send + Sync {
    /// Adds an entry record to the pending queue.
    ///
    /// `position` is the entry's insertion index within its section and
    /// doubles as the queue deduplication key.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::AlreadyEnqueued`] if that section slot is
    /// already in the queue.
    ///
    /// [`StoreError::AlreadyEnqueued`]: crate::StoreError::AlreadyEnqueued
    fn enqueue(&self, section: &SectionRef, position: u64, record: Value) -> StoreResult<()>;

    /// Flushes the pending queue to durable storage.
    ///
    /// Each flushed entry is tagged with a section-unique entry identifier;
    /// the identifiers are returned in queue order. The caller must hold
    /// the transaction lock of every queued section (the adapter re-enters
    /// it per transaction). Idempotent on an empty queue.
    fn persist(&self) -> StoreResult<Vec<u64>>;

    /// Lists all transactions with at least one persisted section.
    ///
    /// Enumeration happens under the global lock.
    fn transaction_identifiers(&self) -> StoreResult<Vec<String>>;

    /// Lists the persisted savepoint versions of a transaction, ascending.
    ///
    /// Runs under the transaction's lock.
    fn savepoint_versions(&self, transaction_id: &str) -> StoreResult<Vec<u64>>;

    /// Loads the persisted `(entry_id, record)` pairs of a section, in
    /// entry-id order.
    fn log_entries(&self, section: &SectionRef) -> StoreResult<Vec<(u64, Value)>>;

    /// Removes all persisted data for a transaction.
    ///
    /// Runs under the transaction's lock. Removing an unknown transaction
    /// is a no-op.
    fn reset_transaction(&self, transaction_id: &str) -> StoreResult<()>;

    /// Acquires a scoped advisory lock.
    ///
    /// With `blocking` set, waits until the lock is available; otherwise
    /// fails with [`StoreError::LockUnavailable`] if it is held elsewhere.
    /// Re-entrant within the same thread.
    ///
    /// [`StoreError::LockUnavailable`]: crate::StoreError::LockUnavailable
    fn lock(&self, scope: &LockScope, blocking: bool) -> StoreResult<LockGuard>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_name() {
        let section = SectionRef::new("tr1", 3);
        assert_eq!(section.savepoint(), "tr1/3");
        assert_eq!(format!("{section}"), "tr1/3");
    }

    #[test]
    fn scope_kind_and_name() {
        assert_eq!(LockScope::Global.kind(), LockKind::Global);
        assert_eq!(LockScope::Global.name(), "global");

        let scope = LockScope::Object("user/1".into());
        assert_eq!(scope.kind(), LockKind::Object);
        assert_eq!(scope.name(), "user/1");
    }

    #[test]
    fn guard_runs_release_on_drop() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let guard = LockGuard::new(move || flag.store(true, Ordering::SeqCst));

        assert!(!released.load(Ordering::SeqCst));
        drop(guard);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn noop_guard_is_inert() {
        let guard = LockGuard::noop();
        drop(guard);
    }
}
