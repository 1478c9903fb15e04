//! Method classification predicates.

use crate::error::{EngineError, EngineResult};
use crate::object::TxObject;
use crate::value::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Classifies method names for one concern (reader, writer, dynamic
/// reader, persistence, destruction).
///
/// A predicate may be a literal boolean, a set of method names, an
/// arbitrary callable, or the name of a method resolved against the
/// object itself (the object is asked whether it considers the method a
/// match).
#[derive(Clone)]
pub enum MethodPredicate {
    /// Matches everything or nothing.
    Always(bool),
    /// Matches an explicit set of method names.
    Names(HashSet<String>),
    /// Matches when the callable returns true.
    Callable(Arc<dyn Fn(&str) -> bool + Send + Sync>),
    /// Asks the object: `object.invoke(<name>, [method])` must return a
    /// boolean.
    Delegate(String),
}

impl MethodPredicate {
    /// Builds a name-set predicate.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// Builds a callable predicate.
    pub fn callable(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::Callable(Arc::new(f))
    }

    /// Evaluates the predicate for a method name.
    ///
    /// `object` is required for [`MethodPredicate::Delegate`]; passing
    /// `None` there is a configuration error, as is a delegate target
    /// returning anything but a boolean.
    pub fn evaluate(
        &self,
        method: &str,
        object: Option<&mut dyn TxObject>,
    ) -> EngineResult<bool> {
        match self {
            Self::Always(result) => Ok(*result),
            Self::Names(names) => Ok(names.contains(method)),
            Self::Callable(f) => Ok(f(method)),
            Self::Delegate(target) => {
                let object = object.ok_or_else(|| {
                    EngineError::configuration(format!(
                        "predicate delegate {target:?} needs an object instance"
                    ))
                })?;
                let result = object.invoke(target, &[Value::text(method)])?;
                result.as_bool().ok_or_else(|| {
                    EngineError::configuration(format!(
                        "predicate delegate {target:?} returned {result} instead of a boolean"
                    ))
                })
            }
        }
    }
}

impl fmt::Debug for MethodPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always(b) => write!(f, "Always({b})"),
            Self::Names(names) => f.debug_tuple("Names").field(names).finish(),
            Self::Callable(_) => write!(f, "Callable(..)"),
            Self::Delegate(name) => f.debug_tuple("Delegate").field(name).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl TxObject for Probe {
        fn class_name(&self) -> &str {
            "probe"
        }

        fn invoke(&mut self, method: &str, args: &[Value]) -> EngineResult<Value> {
            match method {
                "known_attribute" => {
                    let name = args[0].as_text().unwrap_or_default();
                    Ok(Value::Bool(name == "title"))
                }
                "broken" => Ok(Value::text("not a bool")),
                _ => Err(EngineError::domain("no such method")),
            }
        }
    }

    #[test]
    fn literal_and_names() {
        assert!(MethodPredicate::Always(true).evaluate("x", None).unwrap());
        assert!(!MethodPredicate::Always(false).evaluate("x", None).unwrap());

        let pred = MethodPredicate::names(["first", "last"]);
        assert!(pred.evaluate("first", None).unwrap());
        assert!(!pred.evaluate("title", None).unwrap());
    }

    #[test]
    fn callable() {
        let pred = MethodPredicate::callable(|m| m.ends_with('='));
        assert!(pred.evaluate("first=", None).unwrap());
        assert!(!pred.evaluate("first", None).unwrap());
    }

    #[test]
    fn delegate_resolves_against_object() {
        let pred = MethodPredicate::Delegate("known_attribute".into());
        let mut probe = Probe;
        assert!(pred.evaluate("title", Some(&mut probe)).unwrap());
        assert!(!pred.evaluate("other", Some(&mut probe)).unwrap());
    }

    #[test]
    fn delegate_without_object_is_configuration_error() {
        let pred = MethodPredicate::Delegate("known_attribute".into());
        let err = pred.evaluate("title", None).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn delegate_non_bool_is_configuration_error() {
        let pred = MethodPredicate::Delegate("broken".into());
        let mut probe = Probe;
        let err = pred.evaluate("title", Some(&mut probe)).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }
}
