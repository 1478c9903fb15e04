//! Integrity conflicts detected during verification.
//!
//! Both conflict types carry everything the host needs to decide a
//! resolution: override the read (`ignore` / `use_ours`), adopt the
//! external value (`use_theirs`), or give up and retry. Resolution goes
//! through the transaction handle; the conflict itself is plain data.

use crate::keys::ObjectKey;
use crate::value::Value;
use thiserror::Error;

/// A value this transaction read was changed externally in the meantime.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "read integrity failure on {object}/{attribute}: last read {last_read_value}, now {external_value}"
)]
pub struct ReadConflict {
    /// The affected object.
    pub object: ObjectKey,
    /// The affected attribute.
    pub attribute: String,
    /// What this transaction last read.
    pub last_read_value: Value,
    /// What the live object holds now.
    pub external_value: Value,
}

/// A value this transaction wrote was also changed externally.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "write clash on {object}/{attribute}: we wrote {our_value}, external change to {external_value}"
)]
pub struct WriteClash {
    /// The affected object.
    pub object: ObjectKey,
    /// The affected attribute.
    pub attribute: String,
    /// The value this transaction wants to commit.
    pub our_value: Value,
    /// What the live object holds now.
    pub external_value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_attribute_and_values() {
        let conflict = ReadConflict {
            object: ObjectKey::new("user", "17"),
            attribute: "first".into(),
            last_read_value: Value::text("Karl"),
            external_value: Value::text("Olaf"),
        };
        let message = format!("{conflict}");
        assert!(message.contains("user/17"));
        assert!(message.contains("Karl"));
        assert!(message.contains("Olaf"));

        let clash = WriteClash {
            object: ObjectKey::new("user", "17"),
            attribute: "first".into(),
            our_value: Value::text("Foo"),
            external_value: Value::text("Moo"),
        };
        let message = format!("{clash}");
        assert!(message.contains("Foo"));
        assert!(message.contains("Moo"));
    }
}
