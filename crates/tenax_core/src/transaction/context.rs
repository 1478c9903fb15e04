//! Per-block transaction context.
//!
//! A context is created when a transaction block starts (fresh or
//! resumed) and dropped when it ends. It owns the in-memory
//! [`Transaction`], the proxy cache, and the collaborators every
//! operation needs: the type registry, the persistence adapter and the
//! engine configuration.
//!
//! The context is deliberately single-threaded (`Rc`/`RefCell`): one
//! transaction manager runs per thread, and proxies handed to the block
//! hold weak references back to it, so nothing survives the block's end.

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::keys::{AttributeKey, ObjectKey, NEW_ID_PREFIX};
use crate::log::{EntryKind, LogEntry};
use crate::object::SharedObject;
use crate::proxy::{ClassProxy, ObjectProxy, ProxyCache};
use crate::registry::TypeRegistry;
use crate::section::Section;
use crate::transaction::conflict::{ReadConflict, WriteClash};
use crate::transaction::Transaction;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tenax_store::{LockScope, PersistenceAdapter, SectionRef};
use tracing::{debug, info};

pub(crate) struct TxContext {
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) adapter: Arc<dyn PersistenceAdapter>,
    pub(crate) config: Config,
    pub(crate) transaction: RefCell<Transaction>,
    pub(crate) cache: RefCell<ProxyCache>,
}

impl TxContext {
    /// Creates or resumes the transaction `identifier`.
    ///
    /// Prior sections are loaded under the transaction lock and
    /// reconstructed entry by entry; the new-object id allocator is
    /// seeded past every identifier the log already uses.
    pub(crate) fn start(
        registry: Arc<TypeRegistry>,
        adapter: Arc<dyn PersistenceAdapter>,
        config: Config,
        identifier: &str,
    ) -> EngineResult<Rc<Self>> {
        let loaded = {
            let _guard = adapter.lock(&LockScope::Transaction(identifier.to_string()), true)?;
            let versions = adapter.savepoint_versions(identifier)?;
            let mut sections = Vec::with_capacity(versions.len());
            for version in versions {
                let section_ref = SectionRef::new(identifier.to_string(), version);
                let records = adapter.log_entries(&section_ref)?;
                let mut entries = Vec::with_capacity(records.len());
                for (entry_id, record) in records {
                    entries.push(LogEntry::from_record(record, entry_id)?);
                }
                sections.push(Section::from_persisted(identifier.to_string(), version, entries));
            }
            sections
        };

        let transaction = if loaded.is_empty() {
            Transaction::new(identifier)
        } else {
            debug!(
                transaction = identifier,
                sections = loaded.len(),
                "resumed persisted transaction"
            );
            Transaction::resumed(identifier, loaded)
        };

        let mut cache = ProxyCache::new();
        let next_new = transaction
            .entries()
            .filter_map(|(_, entry)| {
                entry
                    .object_key
                    .object_id()
                    .strip_prefix(NEW_ID_PREFIX)
                    .and_then(|rest| rest.parse::<u64>().ok())
            })
            .max()
            .map_or(1, |max| max + 1);
        cache.seed_new_index(next_new);

        Ok(Rc::new(Self {
            registry,
            adapter,
            config,
            transaction: RefCell::new(transaction),
            cache: RefCell::new(cache),
        }))
    }

    pub(crate) fn identifier(&self) -> String {
        self.transaction.borrow().identifier().to_string()
    }

    // ----- proxies -------------------------------------------------------

    /// Returns the memoized proxy for a key, creating it if needed.
    ///
    /// Transaction code must see the same proxy for a given key for the
    /// context's whole life.
    pub(crate) fn proxy_for_key(
        self: &Rc<Self>,
        key: ObjectKey,
        underlying: Option<SharedObject>,
    ) -> Rc<ObjectProxy> {
        let mut cache = self.cache.borrow_mut();
        if let Some(existing) = cache.get(&key) {
            if let Some(object) = underlying {
                existing.attach_underlying(object);
            }
            return existing;
        }
        let proxy = Rc::new(ObjectProxy::new(Rc::downgrade(self), key.clone(), underlying));
        cache.insert(key, Rc::clone(&proxy));
        proxy
    }

    /// Wraps an existing domain object.
    pub(crate) fn wrap(self: &Rc<Self>, object: SharedObject) -> EngineResult<Rc<ObjectProxy>> {
        let class_name = object.lock().class_name().to_string();
        if !self.registry.proxy_instances(&class_name)? {
            return Err(EngineError::configuration(format!(
                "class {class_name:?} is not configured for instance proxying"
            )));
        }
        let id = self.registry.id_of(&class_name, &mut *object.lock())?;
        let key = ObjectKey::new(class_name, id);
        Ok(self.proxy_for_key(key, Some(object)))
    }

    /// Returns a class-level proxy.
    pub(crate) fn class_proxy(self: &Rc<Self>, class_name: &str) -> ClassProxy {
        ClassProxy::new(Rc::downgrade(self), class_name.to_string())
    }

    /// Creates a fresh instance through the class's init method and logs
    /// its birth.
    pub(crate) fn create_instance(
        self: &Rc<Self>,
        class_name: &str,
    ) -> EngineResult<Rc<ObjectProxy>> {
        let instance = self.registry.init(class_name)?;
        let id = self.cache.borrow_mut().next_id();
        let key = ObjectKey::new(class_name, id);
        let proxy = self.proxy_for_key(key, Some(instance));
        self.log_object_initialization(&proxy, "init")?;
        Ok(proxy)
    }

    /// Looks an instance up through the class's lookup method.
    pub(crate) fn lookup_instance(
        self: &Rc<Self>,
        class_name: &str,
        id: &str,
    ) -> EngineResult<Option<Rc<ObjectProxy>>> {
        match self.registry.lookup(class_name, id)? {
            Some(object) => {
                let key = ObjectKey::new(class_name, id);
                Ok(Some(self.proxy_for_key(key, Some(object))))
            }
            None => Ok(None),
        }
    }

    /// Resolves the underlying object for a key: cached instance, or the
    /// class's init (new objects) / lookup (existing objects).
    pub(crate) fn resolve_underlying(&self, key: &ObjectKey) -> EngineResult<SharedObject> {
        if key.is_new() {
            return self.registry.init(key.class_name());
        }
        self.registry
            .lookup(key.class_name(), key.object_id())?
            .ok_or_else(|| {
                EngineError::invalid_operation(format!("no such object: {key}"))
            })
    }

    // ----- logging -------------------------------------------------------

    fn push_entry(
        &self,
        object_key: ObjectKey,
        attribute_key: Option<AttributeKey>,
        kind: EntryKind,
    ) -> EngineResult<()> {
        self.push_entry_with(object_key, attribute_key, kind, false)
    }

    fn push_entry_with(
        &self,
        object_key: ObjectKey,
        attribute_key: Option<AttributeKey>,
        kind: EntryKind,
        covered: bool,
    ) -> EngineResult<()> {
        let mut tx = self.transaction.borrow_mut();
        let savepoint = tx.current_section().savepoint();
        let identifier = tx.identifier().to_string();
        let mut entry = LogEntry::new(savepoint, identifier, object_key, attribute_key, kind);
        entry.object_persisted = covered;
        tx.current_section_mut().push(entry)
    }

    /// Logs an observed attribute value.
    ///
    /// Idempotent within a section: a repeated read of the same value
    /// with no intervening change is not logged again.
    pub(crate) fn log_attribute_read(
        &self,
        proxy: &ObjectProxy,
        attribute: &str,
        value: Value,
        method: &str,
    ) -> EngineResult<()> {
        let key = proxy.key().attribute(attribute);
        {
            let tx = self.transaction.borrow();
            if let Some(last) = tx.current_section().last_attribute_entry(&key) {
                if matches!(&last.kind, EntryKind::AttributeRead { value: seen, .. } if *seen == value)
                {
                    return Ok(());
                }
            }
        }
        self.push_entry(
            proxy.key().clone(),
            Some(key),
            EntryKind::AttributeRead {
                value,
                method: method.to_string(),
            },
        )
    }

    /// Logs an attribute assignment.
    ///
    /// If the attribute has never been read in this transaction, a read
    /// of the old value is logged first: the user saw it. Assignments
    /// that change nothing are elided.
    pub(crate) fn log_attribute_change(
        &self,
        proxy: &ObjectProxy,
        attribute: &str,
        old_value: Value,
        new_value: Value,
        method: &str,
    ) -> EngineResult<()> {
        let key = proxy.key().attribute(attribute);
        let never_read = self.transaction.borrow().read_attribute_value(&key).is_none();
        if never_read {
            self.log_attribute_read(proxy, attribute, old_value.clone(), attribute)?;
        }
        if old_value == new_value {
            return Ok(());
        }
        self.push_entry(
            proxy.key().clone(),
            Some(key),
            EntryKind::AttributeChange {
                old_value,
                new_value,
                method: method.to_string(),
            },
        )
    }

    /// Logs the birth of a new object.
    pub(crate) fn log_object_initialization(
        &self,
        proxy: &ObjectProxy,
        method: &str,
    ) -> EngineResult<()> {
        self.push_entry(
            proxy.key().clone(),
            None,
            EntryKind::ObjectInitialization {
                method: method.to_string(),
            },
        )
    }

    /// Logs a persistence call and marks its coverage: all prior entries
    /// for the object plus all prior reads in the current section.
    pub(crate) fn log_object_persistence(
        &self,
        proxy: &ObjectProxy,
        method: &str,
        args: Vec<Value>,
    ) -> EngineResult<()> {
        self.push_entry(
            proxy.key().clone(),
            None,
            EntryKind::ObjectPersistence {
                method: method.to_string(),
                args,
            },
        )?;
        self.transaction
            .borrow_mut()
            .current_section_mut()
            .mark_object_persisted(proxy.key());
        Ok(())
    }

    /// Logs a destruction call; persistence coverage propagates the same
    /// way as for persistence methods.
    pub(crate) fn log_object_destruction(
        &self,
        proxy: &ObjectProxy,
        method: &str,
    ) -> EngineResult<()> {
        self.push_entry(
            proxy.key().clone(),
            None,
            EntryKind::ObjectDestruction {
                method: method.to_string(),
            },
        )?;
        self.transaction
            .borrow_mut()
            .current_section_mut()
            .mark_object_persisted(proxy.key());
        Ok(())
    }

    /// Logs an integrity override; with `update_value`, also refreshes
    /// the read set so further reads see the acknowledged value.
    pub(crate) fn log_read_integrity_override(
        &self,
        proxy: &ObjectProxy,
        attribute: &str,
        external_value: Value,
        update_value: bool,
    ) -> EngineResult<()> {
        let key = proxy.key().attribute(attribute);
        self.push_entry(
            proxy.key().clone(),
            Some(key),
            EntryKind::ReadIntegrityOverride {
                external_value: external_value.clone(),
            },
        )?;
        if update_value {
            // The refreshed read must survive with the override itself,
            // or a resumed transaction would revalidate against the stale
            // pre-override observation.
            self.push_entry_with(
                proxy.key().clone(),
                Some(proxy.key().attribute(attribute)),
                EntryKind::AttributeRead {
                    value: external_value,
                    method: attribute.to_string(),
                },
                true,
            )?;
        }
        Ok(())
    }

    /// Logs a change veto: the transaction's own writes to the attribute
    /// are discarded and the external value adopted.
    pub(crate) fn log_attribute_change_veto(
        &self,
        proxy: &ObjectProxy,
        attribute: &str,
        external_value: Value,
    ) -> EngineResult<()> {
        let key = proxy.key().attribute(attribute);
        self.push_entry(
            proxy.key().clone(),
            Some(key),
            EntryKind::AttributeChangeVeto {
                external_value: external_value.clone(),
            },
        )?;
        // Durable for the same reason as the veto: the adopted value is
        // what every later section and the commit revalidation compare
        // against.
        self.push_entry_with(
            proxy.key().clone(),
            Some(proxy.key().attribute(attribute)),
            EntryKind::AttributeRead {
                value: external_value,
                method: attribute.to_string(),
            },
            true,
        )
    }

    // ----- conflict resolution ------------------------------------------

    /// Accepts an external change over a read: logs the override and
    /// persists it immediately, then opens a fresh section so a retry
    /// cannot discard the decision.
    pub(crate) fn resolve_ignore(
        self: &Rc<Self>,
        conflict: &ReadConflict,
        update_value: bool,
    ) -> EngineResult<()> {
        let proxy = self.proxy_for_key(conflict.object.clone(), None);
        self.log_read_integrity_override(
            &proxy,
            &conflict.attribute,
            conflict.external_value.clone(),
            update_value,
        )?;
        self.persist_resolution()
    }

    /// Keeps our written value despite the external change.
    pub(crate) fn resolve_use_ours(self: &Rc<Self>, clash: &WriteClash) -> EngineResult<()> {
        let proxy = self.proxy_for_key(clash.object.clone(), None);
        self.log_read_integrity_override(
            &proxy,
            &clash.attribute,
            clash.external_value.clone(),
            false,
        )?;
        self.persist_resolution()
    }

    /// Discards our written value in favour of the external one.
    pub(crate) fn resolve_use_theirs(self: &Rc<Self>, clash: &WriteClash) -> EngineResult<()> {
        let proxy = self.proxy_for_key(clash.object.clone(), None);
        self.log_attribute_change_veto(&proxy, &clash.attribute, clash.external_value.clone())?;
        self.persist_resolution()
    }

    fn persist_resolution(&self) -> EngineResult<()> {
        self.persist_current()?;
        self.transaction.borrow_mut().begin_new_section();
        Ok(())
    }

    // ----- integrity verification ---------------------------------------

    /// Verifies that an attribute this transaction depends on still holds
    /// the value it read.
    ///
    /// Without `force`, verification only runs when instant integrity
    /// failure is configured. New objects cannot be changed externally
    /// and are always clean.
    pub(crate) fn verify_attribute_integrity(
        &self,
        proxy: &ObjectProxy,
        attribute: &str,
        force: bool,
    ) -> EngineResult<()> {
        let key = proxy.key().attribute(attribute);

        let (last_read, read_method) = {
            let tx = self.transaction.borrow();
            match tx.read_attribute_value(&key) {
                None => return Ok(()),
                Some(value) => (
                    value,
                    tx.latest_read_method(&key)
                        .unwrap_or_else(|| attribute.to_string()),
                ),
            }
        };

        if !force && !self.config.instant_read_integrity_fail {
            return Ok(());
        }
        if proxy.key().is_new() {
            return Ok(());
        }

        let shared = proxy.underlying()?;
        let live = shared.lock().invoke(&read_method, &[])?;
        if live == last_read {
            return Ok(());
        }

        let tx = self.transaction.borrow();
        if tx.read_integrity_override(&key, &live) {
            return Ok(());
        }
        if tx.attribute_has_value(&key) {
            let our_value = tx.attribute_value(&key).unwrap_or(Value::Null);
            return Err(WriteClash {
                object: proxy.key().clone(),
                attribute: attribute.to_string(),
                our_value,
                external_value: live,
            }
            .into());
        }
        Err(ReadConflict {
            object: proxy.key().clone(),
            attribute: attribute.to_string(),
            last_read_value: last_read,
            external_value: live,
        }
        .into())
    }

    // ----- lifecycle -----------------------------------------------------

    /// Commits the transaction: lock, revalidate, apply, clear.
    pub(crate) fn commit(self: &Rc<Self>) -> EngineResult<()> {
        let identifier = self.identifier();
        if self.transaction.borrow().committed() {
            return Err(EngineError::invalid_operation(format!(
                "transaction {identifier} is already committed"
            )));
        }

        let _tx_guard = self
            .adapter
            .lock(&LockScope::Transaction(identifier.clone()), true)?;

        // Fateful objects, sorted by key for deadlock-free acquisition.
        // New objects are excluded: nobody else can see them yet.
        let fateful: Vec<ObjectKey> = {
            let tx = self.transaction.borrow();
            let mut keys: Vec<_> = tx
                .fateful_objects()
                .into_iter()
                .filter(|key| !key.is_new())
                .collect();
            keys.sort();
            keys
        };

        let mut object_guards = Vec::with_capacity(fateful.len());
        for key in &fateful {
            // Non-suspending: a busy object aborts the whole commit, and
            // dropping the guards releases everything acquired so far.
            let guard = self
                .adapter
                .lock(&LockScope::Object(key.to_string()), false)?;
            object_guards.push(guard);
        }

        // Revalidate the combined read set while holding all locks.
        let read_keys = self.transaction.borrow().read_set_keys();
        for attr_key in read_keys {
            let proxy = self.proxy_for_key(attr_key.object().clone(), None);
            self.verify_attribute_integrity(&proxy, attr_key.attribute(), true)?;
        }

        let versions: Vec<u64> = self
            .transaction
            .borrow()
            .sections()
            .iter()
            .map(Section::version)
            .collect();
        for version in versions {
            self.apply_section(version)?;
        }

        self.transaction.borrow_mut().mark_committed();
        self.adapter.reset_transaction(&identifier)?;
        info!(transaction = %identifier, objects = fateful.len(), "committed");
        Ok(())
    }

    /// Applies one section's coverable entries, in insertion order.
    fn apply_section(self: &Rc<Self>, version: u64) -> EngineResult<()> {
        let entries: Vec<(usize, LogEntry)> = {
            let tx = self.transaction.borrow();
            let section = tx
                .sections()
                .iter()
                .find(|s| s.version() == version)
                .expect("section vanished during commit");
            section
                .entries()
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.persist_required())
                .map(|(index, entry)| (index, entry.clone()))
                .collect()
        };

        for (index, entry) in entries {
            match &entry.kind {
                EntryKind::AttributeChange {
                    new_value, method, ..
                } => {
                    let key = entry
                        .attribute_key
                        .clone()
                        .expect("change entry without attribute key");
                    if self.transaction.borrow().vetoed_after(&key, (version, index)) {
                        continue;
                    }
                    let proxy = self.proxy_for_key(entry.object_key.clone(), None);
                    let shared = proxy.underlying()?;
                    shared.lock().invoke(method, &[new_value.clone()])?;
                }
                EntryKind::ObjectPersistence { method, args } => {
                    let proxy = self.proxy_for_key(entry.object_key.clone(), None);
                    let shared = proxy.underlying()?;
                    shared.lock().invoke(method, args)?;
                }
                EntryKind::ObjectDestruction { method } => {
                    let proxy = self.proxy_for_key(entry.object_key.clone(), None);
                    let shared = proxy.underlying()?;
                    shared.lock().invoke(method, &[])?;
                }
                EntryKind::AttributeRead { .. }
                | EntryKind::ObjectInitialization { .. }
                | EntryKind::ReadIntegrityOverride { .. }
                | EntryKind::AttributeChangeVeto { .. } => {}
            }
        }
        Ok(())
    }

    /// Persists the current section's durable entries.
    ///
    /// Only entries covered by a persistence method (or overrides and
    /// vetoes) reach the adapter; anything else evaporates with the
    /// block. A section with nothing durable stays open and mutable.
    pub(crate) fn persist_current(&self) -> EngineResult<()> {
        let identifier = self.identifier();
        let _guard = self
            .adapter
            .lock(&LockScope::Transaction(identifier.clone()), true)?;

        let mut tx = self.transaction.borrow_mut();
        if tx.current_section().persisted() {
            return Ok(());
        }
        let section_ref = tx.current_section().section_ref();

        let selected: Vec<usize> = tx
            .current_section()
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.persist_required())
            .map(|(index, _)| index)
            .collect();
        if selected.is_empty() {
            return Ok(());
        }

        for &index in &selected {
            let entry = &mut tx.current_section_mut().entries_mut()[index];
            entry.transaction_persisted = true;
            let record = entry.to_record()?;
            self.adapter.enqueue(&section_ref, index as u64, record)?;
        }
        let ids = self.adapter.persist()?;
        for (&index, id) in selected.iter().zip(ids) {
            tx.current_section_mut().entries_mut()[index].entry_id = Some(id);
        }

        tx.current_section_mut().mark_persisted();
        tx.mark_persisted();
        debug!(
            transaction = %identifier,
            savepoint = %section_ref.savepoint(),
            entries = selected.len(),
            "persisted section"
        );
        Ok(())
    }

    /// Rolls the current section back, keeping its savepoint number.
    /// A no-op once the section is persisted.
    pub(crate) fn rollback_current(&self) -> EngineResult<()> {
        let mut tx = self.transaction.borrow_mut();
        if !tx.current_section().persisted() {
            tx.current_section_mut().reset()?;
        }
        Ok(())
    }

    /// Removes all persisted state and clears the in-memory sections.
    pub(crate) fn reset(&self) -> EngineResult<()> {
        let identifier = self.identifier();
        self.adapter.reset_transaction(&identifier)?;
        self.transaction.borrow_mut().clear();
        debug!(transaction = %identifier, "reset");
        Ok(())
    }
}

impl std::fmt::Debug for TxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxContext")
            .field("transaction", &self.identifier())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tenax_store::MemoryAdapter;

    fn context() -> Rc<TxContext> {
        TxContext::start(
            Arc::new(TypeRegistry::new()),
            Arc::new(MemoryAdapter::new()),
            Config::new(),
            "tr1",
        )
        .unwrap()
    }

    fn proxy(ctx: &Rc<TxContext>) -> Rc<ObjectProxy> {
        ctx.proxy_for_key(ObjectKey::new("user", "17"), None)
    }

    fn entry_kinds(ctx: &Rc<TxContext>) -> Vec<String> {
        let tx = ctx.transaction.borrow();
        tx.entries()
            .map(|(_, entry)| match entry.kind {
                EntryKind::AttributeRead { .. } => "read".to_string(),
                EntryKind::AttributeChange { .. } => "change".to_string(),
                EntryKind::ObjectInitialization { .. } => "init".to_string(),
                EntryKind::ObjectPersistence { .. } => "persistence".to_string(),
                EntryKind::ObjectDestruction { .. } => "destruction".to_string(),
                EntryKind::ReadIntegrityOverride { .. } => "override".to_string(),
                EntryKind::AttributeChangeVeto { .. } => "veto".to_string(),
            })
            .collect()
    }

    #[test]
    fn repeated_reads_are_logged_once() {
        let ctx = context();
        let proxy = proxy(&ctx);

        ctx.log_attribute_read(&proxy, "first", Value::text("John"), "first")
            .unwrap();
        ctx.log_attribute_read(&proxy, "first", Value::text("John"), "first")
            .unwrap();
        assert_eq!(entry_kinds(&ctx), vec!["read"]);

        // A changed observation is logged again.
        ctx.log_attribute_read(&proxy, "first", Value::text("Johnny"), "first")
            .unwrap();
        assert_eq!(entry_kinds(&ctx), vec!["read", "read"]);
    }

    #[test]
    fn first_change_backfills_a_read() {
        let ctx = context();
        let proxy = proxy(&ctx);

        ctx.log_attribute_change(
            &proxy,
            "first",
            Value::text("John"),
            Value::text("Foo"),
            "first=",
        )
        .unwrap();

        assert_eq!(entry_kinds(&ctx), vec!["read", "change"]);
        let key = proxy.key().attribute("first");
        let tx = ctx.transaction.borrow();
        assert_eq!(tx.read_attribute_value(&key), Some(Value::text("John")));
        assert_eq!(tx.attribute_value(&key), Some(Value::text("Foo")));
    }

    #[test]
    fn unchanged_assignment_is_elided() {
        let ctx = context();
        let proxy = proxy(&ctx);

        ctx.log_attribute_change(
            &proxy,
            "first",
            Value::text("John"),
            Value::text("John"),
            "first=",
        )
        .unwrap();

        // Only the backfilled read remains.
        assert_eq!(entry_kinds(&ctx), vec!["read"]);
    }

    #[test]
    fn persistence_marks_coverage() {
        let ctx = context();
        let proxy = proxy(&ctx);

        ctx.log_attribute_change(
            &proxy,
            "first",
            Value::text("John"),
            Value::text("Foo"),
            "first=",
        )
        .unwrap();
        ctx.log_object_persistence(&proxy, "save", Vec::new()).unwrap();

        let tx = ctx.transaction.borrow();
        assert!(tx.entries().all(|(_, e)| e.persist_required()));
    }

    #[test]
    fn veto_refreshes_read_and_drops_write() {
        let ctx = context();
        let proxy = proxy(&ctx);

        ctx.log_attribute_change(
            &proxy,
            "first",
            Value::text("John"),
            Value::text("Foo"),
            "first=",
        )
        .unwrap();
        ctx.log_attribute_change_veto(&proxy, "first", Value::text("Moo"))
            .unwrap();

        let key = proxy.key().attribute("first");
        let tx = ctx.transaction.borrow();
        assert!(!tx.attribute_has_value(&key));
        assert_eq!(tx.read_attribute_value(&key), Some(Value::text("Moo")));
    }

    #[test]
    fn persist_skips_uncovered_entries() {
        let ctx = context();
        let proxy = proxy(&ctx);

        ctx.log_attribute_change(
            &proxy,
            "first",
            Value::text("John"),
            Value::text("Foo"),
            "first=",
        )
        .unwrap();
        // No persistence method ran; nothing must reach the adapter.
        ctx.persist_current().unwrap();

        assert!(ctx.adapter.transaction_identifiers().unwrap().is_empty());
        assert!(!ctx.transaction.borrow().current_section().persisted());
    }

    #[test]
    fn persist_assigns_entry_ids_and_seals_section() {
        let ctx = context();
        let proxy = proxy(&ctx);

        ctx.log_attribute_change(
            &proxy,
            "first",
            Value::text("John"),
            Value::text("Foo"),
            "first=",
        )
        .unwrap();
        ctx.log_object_persistence(&proxy, "save", Vec::new()).unwrap();
        ctx.persist_current().unwrap();

        let tx = ctx.transaction.borrow();
        assert!(tx.persisted());
        assert!(tx.current_section().persisted());
        assert!(tx
            .entries()
            .all(|(_, e)| e.entry_id.is_some() && e.transaction_persisted));
        assert_eq!(
            ctx.adapter.transaction_identifiers().unwrap(),
            vec!["tr1".to_string()]
        );
    }

    #[test]
    fn resumption_rebuilds_state() {
        let adapter = Arc::new(MemoryAdapter::new());
        {
            let ctx = TxContext::start(
                Arc::new(TypeRegistry::new()),
                Arc::clone(&adapter) as Arc<dyn PersistenceAdapter>,
                Config::new(),
                "tr1",
            )
            .unwrap();
            let proxy = ctx.proxy_for_key(ObjectKey::new("user", "17"), None);
            ctx.log_attribute_change(
                &proxy,
                "first",
                Value::text("John"),
                Value::text("Foo"),
                "first=",
            )
            .unwrap();
            ctx.log_object_persistence(&proxy, "save", Vec::new()).unwrap();
            ctx.persist_current().unwrap();
        }

        let ctx = TxContext::start(
            Arc::new(TypeRegistry::new()),
            adapter as Arc<dyn PersistenceAdapter>,
            Config::new(),
            "tr1",
        )
        .unwrap();
        let tx = ctx.transaction.borrow();
        let key = ObjectKey::new("user", "17").attribute("first");
        assert_eq!(tx.attribute_value(&key), Some(Value::text("Foo")));
        assert_eq!(tx.read_attribute_value(&key), Some(Value::text("John")));
        assert_eq!(tx.current_section().version(), 2);
    }

    #[test]
    fn new_id_allocator_seeded_past_resumed_entries() {
        let adapter = Arc::new(MemoryAdapter::new());
        {
            let ctx = TxContext::start(
                Arc::new(TypeRegistry::new()),
                Arc::clone(&adapter) as Arc<dyn PersistenceAdapter>,
                Config::new(),
                "tr1",
            )
            .unwrap();
            let key = ObjectKey::new("user", "new_00002");
            let proxy = ctx.proxy_for_key(key, None);
            ctx.log_object_initialization(&proxy, "init").unwrap();
            ctx.log_object_persistence(&proxy, "save", Vec::new()).unwrap();
            ctx.persist_current().unwrap();
        }

        let ctx = TxContext::start(
            Arc::new(TypeRegistry::new()),
            adapter as Arc<dyn PersistenceAdapter>,
            Config::new(),
            "tr1",
        )
        .unwrap();
        assert_eq!(ctx.cache.borrow_mut().next_id(), "new_00003");
    }

    #[test]
    fn rollback_resets_only_unpersisted_sections() {
        let ctx = context();
        let proxy = proxy(&ctx);

        ctx.log_attribute_read(&proxy, "first", Value::text("John"), "first")
            .unwrap();
        ctx.rollback_current().unwrap();
        assert!(entry_kinds(&ctx).is_empty());

        ctx.log_attribute_read(&proxy, "first", Value::text("John"), "first")
            .unwrap();
        ctx.log_object_persistence(&proxy, "save", Vec::new()).unwrap();
        ctx.persist_current().unwrap();
        // Persisted: rollback is a no-op.
        ctx.rollback_current().unwrap();
        assert_eq!(entry_kinds(&ctx), vec!["read", "persistence"]);
    }

    #[test]
    fn reset_clears_adapter_and_memory() {
        let ctx = context();
        let proxy = proxy(&ctx);

        ctx.log_attribute_read(&proxy, "first", Value::text("John"), "first")
            .unwrap();
        ctx.log_object_persistence(&proxy, "save", Vec::new()).unwrap();
        ctx.persist_current().unwrap();

        ctx.reset().unwrap();
        assert!(ctx.adapter.transaction_identifiers().unwrap().is_empty());
        assert!(entry_kinds(&ctx).is_empty());
        assert!(ctx.transaction.borrow().reset());
    }
}
