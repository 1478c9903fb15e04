//! Log entry model.
//!
//! Everything a transaction does to its objects is recorded as a tagged
//! log entry. Entries serialize to self-describing JSON records (the
//! `kind` field is the discriminator) which is exactly what the store
//! adapter persists and returns.
//!
//! Entries are ordered by `(savepoint_version, index within section)`;
//! that order is the definitive commit order.

use crate::keys::{AttributeKey, ObjectKey};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// The per-kind payload of a log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    /// An attribute value was observed.
    AttributeRead {
        /// The observed value.
        value: Value,
        /// Reader method that produced it.
        method: String,
    },

    /// An attribute was assigned a new value.
    AttributeChange {
        /// Value before the assignment, as this transaction saw it.
        old_value: Value,
        /// Assigned value.
        new_value: Value,
        /// Writer method to replay at commit.
        method: String,
    },

    /// A new object was born in this transaction.
    ObjectInitialization {
        /// The initializer method name.
        method: String,
    },

    /// A persistence method ran ("apply my changes").
    ObjectPersistence {
        /// The persistence method name.
        method: String,
        /// Arguments to replay at commit.
        args: Vec<Value>,
    },

    /// A destruction method ran.
    ObjectDestruction {
        /// The destruction method name.
        method: String,
    },

    /// The user acknowledged a specific external change as acceptable.
    ReadIntegrityOverride {
        /// The acknowledged external value.
        external_value: Value,
    },

    /// The user discarded this transaction's own changes to an attribute.
    AttributeChangeVeto {
        /// The external value adopted instead.
        external_value: Value,
    },
}

impl EntryKind {
    /// Returns true for kinds that are persisted unconditionally.
    ///
    /// Overrides and vetoes only arise from exceptional paths and must
    /// survive regardless of whether a persistence method ever runs.
    #[must_use]
    pub fn always_persisted(&self) -> bool {
        matches!(
            self,
            Self::ReadIntegrityOverride { .. } | Self::AttributeChangeVeto { .. }
        )
    }
}

/// One record in a transaction's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Savepoint name of the owning section, `<tx_id>/<version>`.
    pub savepoint: String,
    /// The owning transaction's identifier.
    pub transaction_id: String,
    /// Adapter-assigned identifier, set after the entry is persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<u64>,
    /// The object this entry concerns.
    pub object_key: ObjectKey,
    /// The attribute this entry concerns, for attribute-level kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_key: Option<AttributeKey>,
    /// Was the object born in this transaction?
    pub new_object: bool,
    /// Did a persistence method for this object run after this entry?
    pub object_persisted: bool,
    /// Has the owning transaction persisted this entry?
    pub transaction_persisted: bool,
    /// The tagged payload.
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl LogEntry {
    /// Creates an in-memory (not yet persisted) entry.
    #[must_use]
    pub fn new(
        savepoint: impl Into<String>,
        transaction_id: impl Into<String>,
        object_key: ObjectKey,
        attribute_key: Option<AttributeKey>,
        kind: EntryKind,
    ) -> Self {
        let new_object = object_key.is_new();
        Self {
            savepoint: savepoint.into(),
            transaction_id: transaction_id.into(),
            entry_id: None,
            object_key,
            attribute_key,
            new_object,
            object_persisted: false,
            transaction_persisted: false,
            kind,
        }
    }

    /// Returns true if this entry must reach durable storage on the next
    /// persist: it is covered by a persistence method, or its kind is
    /// always persisted.
    #[must_use]
    pub fn persist_required(&self) -> bool {
        self.object_persisted || self.kind.always_persisted()
    }

    /// Returns the attribute name, for attribute-level kinds.
    #[must_use]
    pub fn attribute(&self) -> Option<&str> {
        self.attribute_key.as_ref().map(AttributeKey::attribute)
    }

    /// Serializes the entry into the record form the adapter stores.
    pub fn to_record(&self) -> crate::error::EngineResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| {
            crate::error::EngineError::invalid_operation(format!("unserializable entry: {e}"))
        })
    }

    /// Rebuilds an entry from a persisted record, attaching the
    /// adapter-assigned identifier.
    pub fn from_record(
        record: serde_json::Value,
        entry_id: u64,
    ) -> crate::error::EngineResult<Self> {
        let mut entry: Self = serde_json::from_value(record).map_err(|e| {
            crate::error::EngineError::Persistence(tenax_store::StoreError::corrupt(format!(
                "bad log entry record: {e}"
            )))
        })?;
        entry.entry_id = Some(entry_id);
        Ok(entry)
    }
}
