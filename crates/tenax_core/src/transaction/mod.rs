//! Transactions: ordered sections, cross-section queries, and the
//! commit/persist/rollback lifecycle.
//!
//! [`Transaction`] is the data model: the ordered list of sections and
//! the queries evaluated across them (newest first). The orchestration —
//! resuming from the adapter, verifying integrity against live objects,
//! committing under locks — lives in the per-block context.

pub mod conflict;
pub(crate) mod context;

use crate::keys::{AttributeKey, ObjectKey};
use crate::log::{EntryKind, LogEntry};
use crate::section::Section;
use crate::value::Value;
use std::collections::HashMap;

/// Global position of an entry: `(savepoint_version, index in section)`.
///
/// Entry `a` precedes `b` iff `a.position < b.position`; this order is
/// the definitive commit order.
pub type EntryPosition = (u64, usize);

/// A named, persisted series of mutations on domain objects, committed
/// atomically.
#[derive(Debug)]
pub struct Transaction {
    identifier: String,
    sections: Vec<Section>,
    persisted: bool,
    committed: bool,
    reset: bool,
}

impl Transaction {
    /// Creates a transaction with a single fresh section.
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let section = Section::new(identifier.clone(), 1);
        Self {
            identifier,
            sections: vec![section],
            persisted: false,
            committed: false,
            reset: false,
        }
    }

    /// Rebuilds a transaction from loaded sections, opening a fresh
    /// current section after the newest persisted one.
    #[must_use]
    pub fn resumed(identifier: impl Into<String>, loaded: Vec<Section>) -> Self {
        let identifier = identifier.into();
        let persisted = !loaded.is_empty();
        let next_version = loaded.last().map_or(1, |s| s.version() + 1);

        let mut sections = loaded;
        sections.push(Section::new(identifier.clone(), next_version));

        Self {
            identifier,
            sections,
            persisted,
            committed: false,
            reset: false,
        }
    }

    /// Returns the transaction identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns all sections, oldest first; the last is the current one.
    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Returns the current (newest) section.
    #[must_use]
    pub fn current_section(&self) -> &Section {
        self.sections.last().expect("transaction has no section")
    }

    pub(crate) fn current_section_mut(&mut self) -> &mut Section {
        self.sections.last_mut().expect("transaction has no section")
    }

    /// Opens a fresh section after the current one.
    pub(crate) fn begin_new_section(&mut self) {
        let next = self.current_section().version() + 1;
        self.sections.push(Section::new(self.identifier.clone(), next));
    }

    /// True once any section of this transaction reached the adapter.
    #[must_use]
    pub fn persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    /// True after a successful commit.
    #[must_use]
    pub fn committed(&self) -> bool {
        self.committed
    }

    pub(crate) fn mark_committed(&mut self) {
        self.committed = true;
    }

    /// True after an explicit reset.
    #[must_use]
    pub fn reset(&self) -> bool {
        self.reset
    }

    /// Clears all in-memory sections, restarting at version 1.
    pub(crate) fn clear(&mut self) {
        self.sections = vec![Section::new(self.identifier.clone(), 1)];
        self.persisted = false;
        self.reset = true;
    }

    /// Iterates all entries in global order with their positions.
    pub fn entries(&self) -> impl Iterator<Item = (EntryPosition, &LogEntry)> {
        self.sections.iter().flat_map(|section| {
            let version = section.version();
            section
                .entries()
                .iter()
                .enumerate()
                .map(move |(index, entry)| ((version, index), entry))
        })
    }

    /// The newest entry matching a predicate, scanning newest first.
    fn latest_entry(
        &self,
        pred: impl Fn(&LogEntry) -> bool,
    ) -> Option<(EntryPosition, &LogEntry)> {
        for section in self.sections.iter().rev() {
            let version = section.version();
            for (index, entry) in section.entries().iter().enumerate().rev() {
                if pred(entry) {
                    return Some(((version, index), entry));
                }
            }
        }
        None
    }

    fn latest_of_kind(
        &self,
        key: &AttributeKey,
        matcher: impl Fn(&EntryKind) -> bool,
    ) -> Option<(EntryPosition, &LogEntry)> {
        self.latest_entry(|entry| {
            entry.attribute_key.as_ref() == Some(key) && matcher(&entry.kind)
        })
    }

    /// The newest written value for an attribute, across all sections.
    #[must_use]
    pub fn attribute_value(&self, key: &AttributeKey) -> Option<Value> {
        self.latest_of_kind(key, |k| matches!(k, EntryKind::AttributeChange { .. }))
            .map(|(_, entry)| match &entry.kind {
                EntryKind::AttributeChange { new_value, .. } => new_value.clone(),
                _ => unreachable!(),
            })
    }

    /// True iff the attribute has a written value that is not shadowed by
    /// a newer change veto.
    #[must_use]
    pub fn attribute_has_value(&self, key: &AttributeKey) -> bool {
        let Some((change_pos, _)) =
            self.latest_of_kind(key, |k| matches!(k, EntryKind::AttributeChange { .. }))
        else {
            return false;
        };
        match self.latest_of_kind(key, |k| matches!(k, EntryKind::AttributeChangeVeto { .. })) {
            Some((veto_pos, _)) => veto_pos < change_pos,
            None => true,
        }
    }

    /// The newest read value for an attribute, across all sections.
    #[must_use]
    pub fn read_attribute_value(&self, key: &AttributeKey) -> Option<Value> {
        self.latest_of_kind(key, |k| matches!(k, EntryKind::AttributeRead { .. }))
            .map(|(_, entry)| match &entry.kind {
                EntryKind::AttributeRead { value, .. } => value.clone(),
                _ => unreachable!(),
            })
    }

    /// The reader method recorded by the newest read of an attribute.
    #[must_use]
    pub fn latest_read_method(&self, key: &AttributeKey) -> Option<String> {
        self.latest_of_kind(key, |k| matches!(k, EntryKind::AttributeRead { .. }))
            .map(|(_, entry)| match &entry.kind {
                EntryKind::AttributeRead { method, .. } => method.clone(),
                _ => unreachable!(),
            })
    }

    /// True iff the newest integrity override is newer than the newest
    /// read and acknowledges exactly `external`.
    #[must_use]
    pub fn read_integrity_override(&self, key: &AttributeKey, external: &Value) -> bool {
        let Some((override_pos, entry)) =
            self.latest_of_kind(key, |k| matches!(k, EntryKind::ReadIntegrityOverride { .. }))
        else {
            return false;
        };
        let newer_than_read = match self
            .latest_of_kind(key, |k| matches!(k, EntryKind::AttributeRead { .. }))
        {
            Some((read_pos, _)) => override_pos > read_pos,
            None => true,
        };
        match &entry.kind {
            EntryKind::ReadIntegrityOverride { external_value } => {
                newer_than_read && external_value == external
            }
            _ => unreachable!(),
        }
    }

    /// True iff the newest veto is newer than the newest change.
    #[must_use]
    pub fn attribute_change_vetoed(&self, key: &AttributeKey) -> bool {
        let Some((veto_pos, _)) =
            self.latest_of_kind(key, |k| matches!(k, EntryKind::AttributeChangeVeto { .. }))
        else {
            return false;
        };
        match self.latest_of_kind(key, |k| matches!(k, EntryKind::AttributeChange { .. })) {
            Some((change_pos, _)) => veto_pos > change_pos,
            None => true,
        }
    }

    /// True iff the attribute was written at all in this transaction.
    #[must_use]
    pub fn attribute_changed(&self, key: &AttributeKey) -> bool {
        self.latest_of_kind(key, |k| matches!(k, EntryKind::AttributeChange { .. }))
            .is_some()
    }

    /// True iff a veto for the attribute exists after `position`.
    #[must_use]
    pub fn vetoed_after(&self, key: &AttributeKey, position: EntryPosition) -> bool {
        match self.latest_of_kind(key, |k| matches!(k, EntryKind::AttributeChangeVeto { .. })) {
            Some((veto_pos, _)) => veto_pos > position,
            None => false,
        }
    }

    /// Distinct objects matched by a predicate, in order of first
    /// appearance in the log.
    pub(crate) fn objects_where(
        &self,
        pred: impl Fn(&LogEntry) -> bool,
    ) -> Vec<ObjectKey> {
        let mut seen = Vec::new();
        for (_, entry) in self.entries() {
            if pred(entry) && !seen.contains(&entry.object_key) {
                seen.push(entry.object_key.clone());
            }
        }
        seen
    }

    /// All objects carrying entries that will be applied at commit, in
    /// order of first appearance.
    #[must_use]
    pub fn fateful_objects(&self) -> Vec<ObjectKey> {
        self.objects_where(LogEntry::persist_required)
    }

    /// The combined read set: every attribute this transaction observed.
    #[must_use]
    pub fn read_set_keys(&self) -> Vec<AttributeKey> {
        let mut keys = Vec::new();
        for (_, entry) in self.entries() {
            if matches!(entry.kind, EntryKind::AttributeRead { .. }) {
                if let Some(key) = &entry.attribute_key {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }
        keys
    }

    /// The effective write set across all sections: latest change per
    /// attribute, with vetoed writes removed.
    #[must_use]
    pub fn combined_write_set(&self) -> HashMap<AttributeKey, Value> {
        let mut set = HashMap::new();
        for (_, entry) in self.entries() {
            let Some(key) = &entry.attribute_key else { continue };
            match &entry.kind {
                EntryKind::AttributeChange { new_value, .. } => {
                    set.insert(key.clone(), new_value.clone());
                }
                EntryKind::AttributeChangeVeto { .. } => {
                    set.remove(key);
                }
                _ => {}
            }
        }
        set
    }

    /// The effective read set across all sections: latest read per
    /// attribute.
    #[must_use]
    pub fn combined_read_set(&self) -> HashMap<AttributeKey, Value> {
        let mut set = HashMap::new();
        for (_, entry) in self.entries() {
            if let (Some(key), EntryKind::AttributeRead { value, .. }) =
                (&entry.attribute_key, &entry.kind)
            {
                set.insert(key.clone(), value.clone());
            }
        }
        set
    }
}
