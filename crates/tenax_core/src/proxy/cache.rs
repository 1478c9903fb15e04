//! Per-transaction proxy cache and new-object id allocation.

use crate::keys::{new_object_id, ObjectKey};
use crate::log::{EntryKind, LogEntry};
use crate::proxy::ObjectProxy;
use crate::transaction::Transaction;
use std::collections::HashMap;
use std::rc::Rc;

/// Memoizes proxies per object key and allocates `new_NNNNN` identifiers.
///
/// A transaction's code must see the same proxy for a given key
/// throughout the transaction's life; the cache guarantees that.
pub(crate) struct ProxyCache {
    proxies: HashMap<ObjectKey, Rc<ObjectProxy>>,
    next_new_index: u64,
}

impl ProxyCache {
    pub(crate) fn new() -> Self {
        Self {
            proxies: HashMap::new(),
            next_new_index: 1,
        }
    }

    pub(crate) fn get(&self, key: &ObjectKey) -> Option<Rc<ObjectProxy>> {
        self.proxies.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, key: ObjectKey, proxy: Rc<ObjectProxy>) {
        self.proxies.insert(key, proxy);
    }

    /// Allocates the next in-transaction object identifier.
    pub(crate) fn next_id(&mut self) -> String {
        let id = new_object_id(self.next_new_index);
        self.next_new_index += 1;
        id
    }

    /// Moves the allocator past identifiers a resumed log already uses.
    pub(crate) fn seed_new_index(&mut self, next: u64) {
        self.next_new_index = self.next_new_index.max(next);
    }
}

/// Object-level queries over a transaction's log.
///
/// All orderings are by first appearance in the log.
pub struct ObjectQueries<'tx> {
    transaction: &'tx Transaction,
}

impl<'tx> ObjectQueries<'tx> {
    pub(crate) fn new(transaction: &'tx Transaction) -> Self {
        Self { transaction }
    }

    /// Objects initialized in the current (still open) section.
    #[must_use]
    pub fn initialized(&self) -> Vec<ObjectKey> {
        let current = self.transaction.current_section().version();
        let mut keys = Vec::new();
        for ((version, _), entry) in self.transaction.entries() {
            if version == current
                && matches!(entry.kind, EntryKind::ObjectInitialization { .. })
                && !keys.contains(&entry.object_key)
            {
                keys.push(entry.object_key.clone());
            }
        }
        keys
    }

    /// Objects born anywhere in this transaction.
    #[must_use]
    pub fn created(&self) -> Vec<ObjectKey> {
        self.transaction
            .objects_where(|entry| matches!(entry.kind, EntryKind::ObjectInitialization { .. }))
    }

    /// Union of [`Self::initialized`] and [`Self::created`].
    #[must_use]
    pub fn initialized_or_created(&self) -> Vec<ObjectKey> {
        let mut keys = self.created();
        for key in self.initialized() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Objects a destruction method ran on.
    #[must_use]
    pub fn destroyed(&self) -> Vec<ObjectKey> {
        self.transaction
            .objects_where(|entry| matches!(entry.kind, EntryKind::ObjectDestruction { .. }))
    }

    /// Objects with at least one observed attribute.
    #[must_use]
    pub fn read(&self) -> Vec<ObjectKey> {
        self.transaction
            .objects_where(|entry| matches!(entry.kind, EntryKind::AttributeRead { .. }))
    }

    /// Objects that will be touched at commit, in order of first
    /// appearance.
    #[must_use]
    pub fn fateful(&self) -> Vec<ObjectKey> {
        self.transaction.objects_where(LogEntry::persist_required)
    }

    /// Was this object born in this transaction?
    #[must_use]
    pub fn is_new(&self, key: &ObjectKey) -> bool {
        key.is_new()
    }

    /// Did this object exist before this transaction?
    #[must_use]
    pub fn is_existing(&self, key: &ObjectKey) -> bool {
        !key.is_new()
    }

    /// Was this object created (initialization logged) here?
    #[must_use]
    pub fn is_created(&self, key: &ObjectKey) -> bool {
        self.created().contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn next_id_is_monotonic() {
        let mut cache = ProxyCache::new();
        assert_eq!(cache.next_id(), "new_00001");
        assert_eq!(cache.next_id(), "new_00002");
    }

    #[test]
    fn seeding_never_goes_backwards() {
        let mut cache = ProxyCache::new();
        cache.seed_new_index(5);
        assert_eq!(cache.next_id(), "new_00005");
        cache.seed_new_index(2);
        assert_eq!(cache.next_id(), "new_00006");
    }

    fn push(tx: &mut Transaction, key: &ObjectKey, kind: EntryKind, covered: bool) {
        let savepoint = tx.current_section().savepoint();
        let attribute = matches!(
            kind,
            EntryKind::AttributeRead { .. } | EntryKind::AttributeChange { .. }
        )
        .then(|| key.attribute("x"));
        let mut entry = LogEntry::new(savepoint, "tr1", key.clone(), attribute, kind);
        entry.object_persisted = covered;
        tx.current_section_mut().push(entry).unwrap();
    }

    #[test]
    fn object_queries_classify_by_entry_kind() {
        let mut tx = Transaction::new("tr1");
        let born = ObjectKey::new("user", "new_00001");
        let observed = ObjectKey::new("user", "9");
        let gone = ObjectKey::new("account", "4");

        push(
            &mut tx,
            &born,
            EntryKind::ObjectInitialization { method: "init".into() },
            false,
        );
        push(
            &mut tx,
            &observed,
            EntryKind::AttributeRead {
                value: Value::Integer(1),
                method: "x".into(),
            },
            true,
        );
        push(
            &mut tx,
            &gone,
            EntryKind::ObjectDestruction { method: "destroy".into() },
            true,
        );

        let queries = ObjectQueries::new(&tx);
        assert_eq!(queries.created(), vec![born.clone()]);
        assert_eq!(queries.initialized(), vec![born.clone()]);
        assert_eq!(queries.destroyed(), vec![gone.clone()]);
        assert_eq!(queries.read(), vec![observed.clone()]);
        assert_eq!(queries.fateful(), vec![observed.clone(), gone]);
        assert!(queries.is_new(&born));
        assert!(queries.is_created(&born));
        assert!(queries.is_existing(&observed));
    }

    #[test]
    fn initialized_is_current_section_only() {
        let mut tx = Transaction::new("tr1");
        let first = ObjectKey::new("user", "new_00001");
        push(
            &mut tx,
            &first,
            EntryKind::ObjectInitialization { method: "init".into() },
            false,
        );
        tx.begin_new_section();

        let queries = ObjectQueries::new(&tx);
        assert!(queries.initialized().is_empty());
        assert_eq!(queries.created(), vec![first.clone()]);
        assert_eq!(queries.initialized_or_created(), vec![first]);
    }
}
