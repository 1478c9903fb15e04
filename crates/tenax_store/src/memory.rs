//! In-memory persistence adapter.
//!
//! Backs the same contract as the file adapter with `Arc`-shared state.
//! Cloning the adapter models a second process attached to the same
//! store: clones share persisted sections and the lock table but each
//! keeps its own pending queue, mirroring how file adapters share a
//! directory but not their in-process queues.

use crate::adapter::{LockGuard, LockScope, PersistenceAdapter, SectionRef};
use crate::error::{StoreError, StoreResult};
use crate::lock::LockTable;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Persisted entries of one section, keyed by entry id.
type SectionData = BTreeMap<u64, Value>;

/// Persisted sections of one transaction, keyed by savepoint version.
type TransactionData = BTreeMap<u64, SectionData>;

#[derive(Debug)]
struct Queued {
    section: SectionRef,
    position: u64,
    record: Value,
}

/// Shared store state.
#[derive(Default)]
struct Shared {
    transactions: Mutex<BTreeMap<String, TransactionData>>,
}

/// A memory-backed persistence adapter for tests and ephemeral engines.
pub struct MemoryAdapter {
    shared: Arc<Shared>,
    locks: Arc<LockTable>,
    queue: Mutex<Vec<Queued>>,
}

impl MemoryAdapter {
    /// Creates a fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            locks: LockTable::new(),
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Creates another handle onto the same store.
    ///
    /// The handle shares persisted state and locks but has its own
    /// pending queue, like a second process opening the same directory.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            locks: Arc::clone(&self.locks),
            queue: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transactions = self.shared.transactions.lock();
        f.debug_struct("MemoryAdapter")
            .field("transactions", &transactions.len())
            .field("queued", &self.queue.lock().len())
            .finish()
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn enqueue(&self, section: &SectionRef, position: u64, record: Value) -> StoreResult<()> {
        let mut queue = self.queue.lock();
        if queue
            .iter()
            .any(|q| q.section == *section && q.position == position)
        {
            return Err(StoreError::AlreadyEnqueued {
                savepoint: section.savepoint(),
                position,
            });
        }
        queue.push(Queued {
            section: section.clone(),
            position,
            record,
        });
        Ok(())
    }

    fn persist(&self) -> StoreResult<Vec<u64>> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx_guards: Vec<(String, LockGuard)> = Vec::new();
        for queued in queue.iter() {
            if !tx_guards
                .iter()
                .any(|(id, _)| id == &queued.section.transaction_id)
            {
                let scope = LockScope::Transaction(queued.section.transaction_id.clone());
                let guard = self.lock(&scope, true)?;
                tx_guards.push((queued.section.transaction_id.clone(), guard));
            }
        }

        let mut transactions = self.shared.transactions.lock();
        let mut ids = Vec::with_capacity(queue.len());
        for queued in queue.drain(..) {
            let section = transactions
                .entry(queued.section.transaction_id.clone())
                .or_default()
                .entry(queued.section.version)
                .or_default();
            let entry_id = section.keys().next_back().copied().unwrap_or(0) + 1;
            section.insert(entry_id, queued.record);
            ids.push(entry_id);
        }
        Ok(ids)
    }

    fn transaction_identifiers(&self) -> StoreResult<Vec<String>> {
        let _guard = self.lock(&LockScope::Global, true)?;
        Ok(self.shared.transactions.lock().keys().cloned().collect())
    }

    fn savepoint_versions(&self, transaction_id: &str) -> StoreResult<Vec<u64>> {
        let scope = LockScope::Transaction(transaction_id.to_string());
        let _guard = self.lock(&scope, true)?;

        Ok(self
            .shared
            .transactions
            .lock()
            .get(transaction_id)
            .map(|tx| tx.keys().copied().collect())
            .unwrap_or_default())
    }

    fn log_entries(&self, section: &SectionRef) -> StoreResult<Vec<(u64, Value)>> {
        let scope = LockScope::Transaction(section.transaction_id.clone());
        let _guard = self.lock(&scope, true)?;

        Ok(self
            .shared
            .transactions
            .lock()
            .get(&section.transaction_id)
            .and_then(|tx| tx.get(&section.version))
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, record)| (*id, record.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn reset_transaction(&self, transaction_id: &str) -> StoreResult<()> {
        let scope = LockScope::Transaction(transaction_id.to_string());
        let _guard = self.lock(&scope, true)?;

        self.shared.transactions.lock().remove(transaction_id);
        self.queue
            .lock()
            .retain(|q| q.section.transaction_id != transaction_id);
        Ok(())
    }

    fn lock(&self, scope: &LockScope, blocking: bool) -> StoreResult<LockGuard> {
        self.locks.acquire(scope, blocking)
    }
}
