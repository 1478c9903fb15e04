//! The domain object seam.
//!
//! The engine never defines domain classes; hosts adapt their objects to
//! [`TxObject`] and describe the method surface through the type
//! registry. Method dispatch is by name: readers take no arguments and
//! return the attribute value, writers are named `"<attribute>="` and
//! take the new value, persistence and destruction methods are invoked
//! verbatim.

use crate::error::EngineResult;
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;

/// A domain object participating in transactions.
pub trait TxObject: Send {
    /// The object's registered class name.
    fn class_name(&self) -> &str;

    /// Invokes a named method with positional arguments.
    ///
    /// This is the single dynamic entry point the proxy forwards through.
    /// Hosts typically implement it as a `match` over their method names
    /// and return [`EngineError::domain`] for unknown ones.
    ///
    /// [`EngineError::domain`]: crate::EngineError::domain
    fn invoke(&mut self, method: &str, args: &[Value]) -> EngineResult<Value>;
}

/// A shareable handle to a domain object.
///
/// Proxies borrow their underlying objects; they never own them. The
/// mutex makes a single instance safe to touch from the host and from a
/// committing transaction.
pub type SharedObject = Arc<Mutex<dyn TxObject>>;

/// Wraps a concrete object into a [`SharedObject`].
pub fn share<T: TxObject + 'static>(object: T) -> SharedObject {
    Arc::new(Mutex::new(object))
}
