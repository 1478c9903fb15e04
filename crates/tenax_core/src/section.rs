//! Transaction sections (savepoints).
//!
//! A section is one contiguous execution slice of a transaction. It owns
//! the log entries recorded during that slice and maintains the derived
//! read/write sets. Once persisted, a section is immutable; resumption
//! rebuilds older sections from their persisted entries and opens a fresh
//! one on top.

use crate::error::{EngineError, EngineResult};
use crate::keys::{AttributeKey, ObjectKey};
use crate::log::{EntryKind, LogEntry};
use crate::value::Value;
use std::collections::HashMap;
use tenax_store::SectionRef;

/// One savepoint slice of a transaction.
#[derive(Debug, Clone)]
pub struct Section {
    transaction_id: String,
    savepoint_version: u64,
    entries: Vec<LogEntry>,
    read_set: HashMap<AttributeKey, Value>,
    write_set: HashMap<AttributeKey, Value>,
    integrity_overrides: HashMap<AttributeKey, Value>,
    change_vetoes: HashMap<AttributeKey, Value>,
    persisted: bool,
}

impl Section {
    /// Opens a fresh, empty section.
    #[must_use]
    pub fn new(transaction_id: impl Into<String>, savepoint_version: u64) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            savepoint_version,
            entries: Vec::new(),
            read_set: HashMap::new(),
            write_set: HashMap::new(),
            integrity_overrides: HashMap::new(),
            change_vetoes: HashMap::new(),
            persisted: false,
        }
    }

    /// Rebuilds a section from its persisted entries.
    ///
    /// The derived sets are re-indexed from the entries, so resumption
    /// yields the same effective state the original process had.
    #[must_use]
    pub fn from_persisted(
        transaction_id: impl Into<String>,
        savepoint_version: u64,
        entries: Vec<LogEntry>,
    ) -> Self {
        let mut section = Self::new(transaction_id, savepoint_version);
        for entry in entries {
            section.index(&entry);
            section.entries.push(entry);
        }
        section.persisted = true;
        section
    }

    /// Returns the savepoint name, `<tx_id>/<version>`.
    #[must_use]
    pub fn savepoint(&self) -> String {
        format!("{}/{}", self.transaction_id, self.savepoint_version)
    }

    /// Returns the 1-based savepoint version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.savepoint_version
    }

    /// Returns the store reference for this section.
    #[must_use]
    pub fn section_ref(&self) -> SectionRef {
        SectionRef::new(self.transaction_id.clone(), self.savepoint_version)
    }

    /// Returns true once the section has been flushed to the adapter.
    #[must_use]
    pub fn persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    /// The entries recorded in this section, in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [LogEntry] {
        &mut self.entries
    }

    /// Latest read value per attribute.
    #[must_use]
    pub fn read_set(&self) -> &HashMap<AttributeKey, Value> {
        &self.read_set
    }

    /// Latest written (and not vetoed) value per attribute.
    #[must_use]
    pub fn write_set(&self) -> &HashMap<AttributeKey, Value> {
        &self.write_set
    }

    /// Acknowledged external values per attribute.
    #[must_use]
    pub fn integrity_overrides(&self) -> &HashMap<AttributeKey, Value> {
        &self.integrity_overrides
    }

    /// Vetoed attributes with the external value adopted instead.
    #[must_use]
    pub fn change_vetoes(&self) -> &HashMap<AttributeKey, Value> {
        &self.change_vetoes
    }

    /// Appends an entry.
    ///
    /// # Errors
    ///
    /// A persisted section is immutable.
    pub(crate) fn push(&mut self, entry: LogEntry) -> EngineResult<()> {
        self.ensure_mutable("append to")?;
        self.index(&entry);
        self.entries.push(entry);
        Ok(())
    }

    /// Updates the derived sets for an entry.
    fn index(&mut self, entry: &LogEntry) {
        let Some(key) = entry.attribute_key.clone() else {
            return;
        };
        match &entry.kind {
            EntryKind::AttributeRead { value, .. } => {
                self.read_set.insert(key, value.clone());
            }
            EntryKind::AttributeChange { new_value, .. } => {
                self.write_set.insert(key, new_value.clone());
            }
            EntryKind::ReadIntegrityOverride { external_value } => {
                self.integrity_overrides.insert(key, external_value.clone());
            }
            EntryKind::AttributeChangeVeto { external_value } => {
                // A veto invalidates the section's own pending write.
                self.write_set.remove(&key);
                self.change_vetoes.insert(key, external_value.clone());
            }
            EntryKind::ObjectInitialization { .. }
            | EntryKind::ObjectPersistence { .. }
            | EntryKind::ObjectDestruction { .. } => {}
        }
    }

    /// Marks entries as covered by a persistence (or destruction) method:
    /// every prior entry for `object`, plus every prior attribute read in
    /// this section. A persistence call commits the read dependencies the
    /// decision was based on, whatever object they belong to.
    pub(crate) fn mark_object_persisted(&mut self, object: &ObjectKey) {
        for entry in &mut self.entries {
            if entry.object_key == *object
                || matches!(entry.kind, EntryKind::AttributeRead { .. })
            {
                entry.object_persisted = true;
            }
        }
    }

    /// The most recent read or change entry touching `key`.
    ///
    /// Used for read idempotence: a repeated read with no intervening
    /// change is not logged again.
    pub(crate) fn last_attribute_entry(&self, key: &AttributeKey) -> Option<&LogEntry> {
        self.entries.iter().rev().find(|entry| {
            entry.attribute_key.as_ref() == Some(key)
                && matches!(
                    entry.kind,
                    EntryKind::AttributeRead { .. } | EntryKind::AttributeChange { .. }
                )
        })
    }

    /// Empties the section.
    ///
    /// # Errors
    ///
    /// A persisted section cannot be reset.
    pub(crate) fn reset(&mut self) -> EngineResult<()> {
        self.ensure_mutable("reset")?;
        self.entries.clear();
        self.read_set.clear();
        self.write_set.clear();
        self.integrity_overrides.clear();
        self.change_vetoes.clear();
        Ok(())
    }

    fn ensure_mutable(&self, action: &str) -> EngineResult<()> {
        if self.persisted {
            return Err(EngineError::invalid_operation(format!(
                "cannot {action} persisted section {}",
                self.savepoint()
            )));
        }
        Ok(())
    }
}
