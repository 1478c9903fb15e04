//! Proptest generators for engine data, plus the properties they drive.

use proptest::prelude::*;
use tenax_core::{AttributeKey, EntryKind, LogEntry, ObjectKey, Value};

/// Strategy for attribute values (flat, no nested arrays).
pub fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::text),
    ]
}

/// Strategy for attribute values, including small arrays of scalars.
pub fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        arb_scalar(),
        prop::collection::vec(arb_scalar(), 0..4).prop_map(Value::Array),
    ]
}

/// Strategy for attribute names.
pub fn arb_attribute() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,7}".prop_map(String::from)
}

/// Strategy for object keys over a small id space (so streams collide).
pub fn arb_object_key() -> impl Strategy<Value = ObjectKey> {
    ("[a-z]{1,6}", 1u32..6).prop_map(|(class, id)| ObjectKey::new(class, id.to_string()))
}

/// Strategy for attribute keys over a small key space.
pub fn arb_attribute_key() -> impl Strategy<Value = AttributeKey> {
    (arb_object_key(), arb_attribute()).prop_map(|(object, attr)| object.attribute(attr))
}

/// Strategy for a full log entry of any kind.
pub fn arb_log_entry() -> impl Strategy<Value = LogEntry> {
    (arb_attribute_key(), arb_entry_kind(), any::<bool>()).prop_map(|(key, kind, covered)| {
        let object = key.object().clone();
        let attribute_key = matches!(
            kind,
            EntryKind::AttributeRead { .. }
                | EntryKind::AttributeChange { .. }
                | EntryKind::ReadIntegrityOverride { .. }
                | EntryKind::AttributeChangeVeto { .. }
        )
        .then_some(key);
        let mut entry = LogEntry::new("tr1/1", "tr1", object, attribute_key, kind);
        entry.object_persisted = covered;
        entry
    })
}

/// Strategy for entry payloads of every kind.
pub fn arb_entry_kind() -> impl Strategy<Value = EntryKind> {
    prop_oneof![
        (arb_value(), arb_attribute()).prop_map(|(value, method)| EntryKind::AttributeRead {
            value,
            method
        }),
        (arb_value(), arb_value(), arb_attribute()).prop_map(|(old_value, new_value, attr)| {
            EntryKind::AttributeChange {
                old_value,
                new_value,
                method: format!("{attr}="),
            }
        }),
        Just(EntryKind::ObjectInitialization {
            method: "init".into()
        }),
        prop::collection::vec(arb_scalar(), 0..3).prop_map(|args| EntryKind::ObjectPersistence {
            method: "save".into(),
            args
        }),
        Just(EntryKind::ObjectDestruction {
            method: "destroy".into()
        }),
        arb_value().prop_map(|external_value| EntryKind::ReadIntegrityOverride { external_value }),
        arb_value().prop_map(|external_value| EntryKind::AttributeChangeVeto { external_value }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tenax_core::{Section, Transaction};

    proptest! {
        /// Entry records survive the store round trip byte-for-byte in
        /// meaning: kind, keys and flags all come back.
        #[test]
        fn entry_record_roundtrip(entry in arb_log_entry()) {
            let record = entry.to_record().unwrap();
            let back = LogEntry::from_record(record, 7).unwrap();
            prop_assert_eq!(back.kind, entry.kind);
            prop_assert_eq!(back.object_key, entry.object_key);
            prop_assert_eq!(back.attribute_key, entry.attribute_key);
            prop_assert_eq!(back.object_persisted, entry.object_persisted);
            prop_assert_eq!(back.entry_id, Some(7));
        }

        /// The section write set equals a straight fold over its entries:
        /// latest change wins, vetoes erase.
        #[test]
        fn write_set_matches_reference_fold(entries in prop::collection::vec(arb_log_entry(), 0..40)) {
            let mut reference: HashMap<AttributeKey, Value> = HashMap::new();
            for entry in &entries {
                match (&entry.attribute_key, &entry.kind) {
                    (Some(key), EntryKind::AttributeChange { new_value, .. }) => {
                        reference.insert(key.clone(), new_value.clone());
                    }
                    (Some(key), EntryKind::AttributeChangeVeto { .. }) => {
                        reference.remove(key);
                    }
                    _ => {}
                }
            }

            let section = Section::from_persisted("tr1", 1, entries);
            prop_assert_eq!(section.write_set().clone(), reference);
        }

        /// Rebuilding a section from its own entries yields the same
        /// derived sets (idempotent resumption, section level).
        #[test]
        fn from_persisted_is_idempotent(entries in prop::collection::vec(arb_log_entry(), 0..40)) {
            let section = Section::from_persisted("tr1", 1, entries);
            let rebuilt = Section::from_persisted("tr1", 1, section.entries().to_vec());
            prop_assert_eq!(rebuilt.read_set(), section.read_set());
            prop_assert_eq!(rebuilt.write_set(), section.write_set());
            prop_assert_eq!(rebuilt.integrity_overrides(), section.integrity_overrides());
            prop_assert_eq!(rebuilt.change_vetoes(), section.change_vetoes());
        }

        /// The transaction-level combined write set agrees with the
        /// veto-aware attribute queries.
        #[test]
        fn combined_write_set_agrees_with_queries(
            entries in prop::collection::vec(arb_log_entry(), 0..40),
        ) {
            let tx = transaction_with(entries);
            let combined = tx.combined_write_set();

            for (key, value) in &combined {
                prop_assert!(tx.attribute_has_value(key));
                let attr_value = tx.attribute_value(key);
                prop_assert_eq!(attr_value.as_ref(), Some(value));
            }
        }
    }

    fn transaction_with(entries: Vec<LogEntry>) -> Transaction {
        let section = Section::from_persisted("tr1", 1, entries);
        Transaction::resumed("tr1", vec![section])
    }
}
