//! Object and attribute keys.
//!
//! Log entries reference objects by string key, never by pointer; on
//! resumption proxies are rebuilt from these keys through the registry's
//! lookup methods.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Prefix of identifiers allocated to objects born inside a transaction.
pub const NEW_ID_PREFIX: &str = "new_";

/// Identifies one domain object: `<class_name>/<object_id>`.
///
/// Keys are totally ordered; commit-time object locks are acquired in key
/// order to prevent deadlocks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    class_name: String,
    object_id: String,
}

impl ObjectKey {
    /// Creates an object key.
    #[must_use]
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
        }
    }

    /// Returns the class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the object identifier.
    #[must_use]
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Returns true if the object was born inside a transaction
    /// (identifier of the form `new_NNNNN`).
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.object_id.starts_with(NEW_ID_PREFIX)
    }

    /// Returns the key of one of this object's attributes.
    #[must_use]
    pub fn attribute(&self, attribute: impl Into<String>) -> AttributeKey {
        AttributeKey {
            object: self.clone(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class_name, self.object_id)
    }
}

/// Error parsing an object or attribute key from its string form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParseError {
    raw: String,
}

impl fmt::Display for KeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed key: {:?}", self.raw)
    }
}

impl std::error::Error for KeyParseError {}

impl FromStr for ObjectKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((class_name, object_id)) if !class_name.is_empty() && !object_id.is_empty() => {
                Ok(Self::new(class_name, object_id))
            }
            _ => Err(KeyParseError { raw: s.to_string() }),
        }
    }
}

impl Serialize for ObjectKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Identifies one attribute of one object:
/// `<class_name>/<object_id>/<attribute_name>`.
///
/// Object identifiers must not contain `/`; the registry rejects such
/// identifiers, which keeps the string form unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeKey {
    object: ObjectKey,
    attribute: String,
}

impl AttributeKey {
    /// Creates an attribute key.
    #[must_use]
    pub fn new(object: ObjectKey, attribute: impl Into<String>) -> Self {
        Self {
            object,
            attribute: attribute.into(),
        }
    }

    /// Returns the owning object's key.
    #[must_use]
    pub fn object(&self) -> &ObjectKey {
        &self.object
    }

    /// Returns the attribute name.
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.object, self.attribute)
    }
}

impl FromStr for AttributeKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(class), Some(id), Some(attr))
                if !class.is_empty() && !id.is_empty() && !attr.is_empty() =>
            {
                Ok(Self::new(ObjectKey::new(class, id), attr))
            }
            _ => Err(KeyParseError { raw: s.to_string() }),
        }
    }
}

impl Serialize for AttributeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AttributeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Formats the `n`-th in-transaction object identifier, e.g. `new_00001`.
#[must_use]
pub fn new_object_id(index: u64) -> String {
    format!("{NEW_ID_PREFIX}{index:05}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse() {
        let key = ObjectKey::new("user", "17");
        assert_eq!(key.to_string(), "user/17");
        assert_eq!("user/17".parse::<ObjectKey>().unwrap(), key);

        let attr = key.attribute("first");
        assert_eq!(attr.to_string(), "user/17/first");
        assert_eq!("user/17/first".parse::<AttributeKey>().unwrap(), attr);
    }

    #[test]
    fn malformed_keys_fail() {
        assert!("user".parse::<ObjectKey>().is_err());
        assert!("/17".parse::<ObjectKey>().is_err());
        assert!("user/".parse::<ObjectKey>().is_err());
        assert!("user/17".parse::<AttributeKey>().is_err());
    }

    #[test]
    fn new_object_detection() {
        assert!(ObjectKey::new("user", new_object_id(1)).is_new());
        assert!(!ObjectKey::new("user", "17").is_new());
        assert_eq!(new_object_id(1), "new_00001");
        assert_eq!(new_object_id(12345), "new_12345");
    }

    #[test]
    fn ordering_is_by_class_then_id() {
        let a = ObjectKey::new("account", "9");
        let b = ObjectKey::new("user", "1");
        let c = ObjectKey::new("user", "2");
        assert!(a < b && b < c);
    }

    #[test]
    fn serde_as_string() {
        let key = ObjectKey::new("user", "17");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"user/17\"");
        let back: ObjectKey = serde_json::from_str("\"user/17\"").unwrap();
        assert_eq!(back, key);
    }
}
