//! Object and class proxies.
//!
//! A proxy is the transparent forwarder between application code and the
//! transaction: every method call is classified against the type
//! registry and routed through a queue of handlers that rewrite its
//! effect into log entries. Reads are served from the transaction's
//! write/read sets when possible; only genuinely new observations reach
//! the underlying object.

mod cache;

pub use cache::ObjectQueries;
pub(crate) use cache::ProxyCache;

use crate::error::{EngineError, EngineResult};
use crate::keys::ObjectKey;
use crate::object::SharedObject;
use crate::registry::{MethodPredicate, MethodRole};
use crate::transaction::context::TxContext;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// The handler kinds a method call can be routed to, in queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    Change,
    Read,
    DynamicRead,
    Persistence,
    Destruction,
}

/// A transactional stand-in for one domain object.
///
/// One proxy exists per `(transaction, object key)`; transaction code
/// always sees the same instance. Proxies borrow their underlying
/// objects and hold only a weak reference to the transaction context, so
/// nothing outlives the block.
pub struct ObjectProxy {
    ctx: Weak<TxContext>,
    key: ObjectKey,
    underlying: RefCell<Option<SharedObject>>,
}

impl ObjectProxy {
    pub(crate) fn new(
        ctx: Weak<TxContext>,
        key: ObjectKey,
        underlying: Option<SharedObject>,
    ) -> Self {
        Self {
            ctx,
            key,
            underlying: RefCell::new(underlying),
        }
    }

    /// Returns the proxied object's key.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Returns the proxied class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        self.key.class_name()
    }

    fn ctx(&self) -> EngineResult<Rc<TxContext>> {
        self.ctx.upgrade().ok_or_else(|| {
            EngineError::invalid_operation("the transaction block has already ended")
        })
    }

    pub(crate) fn attach_underlying(&self, object: SharedObject) {
        let mut slot = self.underlying.borrow_mut();
        if slot.is_none() {
            *slot = Some(object);
        }
    }

    /// Returns the underlying object, resolving it through the registry's
    /// lookup (existing objects) or init (new objects, on resumption) if
    /// it has not been seen yet.
    pub(crate) fn underlying(&self) -> EngineResult<SharedObject> {
        if let Some(object) = self.underlying.borrow().as_ref() {
            return Ok(Arc::clone(object));
        }
        let ctx = self.ctx()?;
        let object = ctx.resolve_underlying(&self.key)?;
        *self.underlying.borrow_mut() = Some(Arc::clone(&object));
        Ok(object)
    }

    /// Calls a method through the transactional machinery.
    ///
    /// The method is classified against the registry; matching handlers
    /// run in order and the first handler's result is the return value.
    /// Unclassified methods are forwarded to the underlying object
    /// unchanged.
    pub fn invoke(&self, method: &str, args: &[Value]) -> EngineResult<Value> {
        let ctx = self.ctx()?;
        let handlers = self.classify(&ctx, method)?;

        if handlers.is_empty() {
            let shared = self.underlying()?;
            let result = shared.lock().invoke(method, args);
            return result;
        }

        let mut first = None;
        for handler in handlers {
            let result = self.run_handler(&ctx, handler, method, args)?;
            if first.is_none() {
                first = Some(result);
            }
        }
        Ok(first.expect("handler queue was not empty"))
    }

    /// Reads an attribute (sugar for invoking its reader method).
    pub fn get(&self, attribute: &str) -> EngineResult<Value> {
        self.invoke(attribute, &[])
    }

    /// Writes an attribute (sugar for invoking `<attribute>=`).
    pub fn set(&self, attribute: &str, value: impl Into<Value>) -> EngineResult<Value> {
        self.invoke(&format!("{attribute}="), &[value.into()])
    }

    /// Invokes the conventional persistence method `save`.
    pub fn save(&self) -> EngineResult<Value> {
        self.invoke("save", &[])
    }

    /// Invokes the conventional destruction method `destroy`.
    pub fn destroy(&self) -> EngineResult<Value> {
        self.invoke("destroy", &[])
    }

    /// Builds the handler queue for a method.
    fn classify(&self, ctx: &Rc<TxContext>, method: &str) -> EngineResult<Vec<Handler>> {
        const ROLES: [(MethodRole, Handler); 5] = [
            (MethodRole::Writer, Handler::Change),
            (MethodRole::Reader, Handler::Read),
            (MethodRole::DynamicReader, Handler::DynamicRead),
            (MethodRole::Persistence, Handler::Persistence),
            (MethodRole::Destruction, Handler::Destruction),
        ];

        let mut handlers = Vec::new();
        for (role, handler) in ROLES {
            if self.matches_role(ctx, method, role)? {
                handlers.push(handler);
            }
        }
        Ok(handlers)
    }

    fn matches_role(
        &self,
        ctx: &Rc<TxContext>,
        method: &str,
        role: MethodRole,
    ) -> EngineResult<bool> {
        let predicate = ctx.registry.predicate(self.class_name(), role)?;
        match predicate {
            MethodPredicate::Delegate(_) => {
                // Delegates are resolved against the object itself.
                let shared = self.underlying()?;
                let mut guard = shared.lock();
                predicate.evaluate(method, Some(&mut *guard))
            }
            other => other.evaluate(method, None),
        }
    }

    fn run_handler(
        &self,
        ctx: &Rc<TxContext>,
        handler: Handler,
        method: &str,
        args: &[Value],
    ) -> EngineResult<Value> {
        match handler {
            Handler::Change => {
                let attribute = method.strip_suffix('=').unwrap_or(method).to_string();
                let new_value = args.first().cloned().unwrap_or(Value::Null);

                // The current value is observed through the regular read
                // path when a reader exists, so the old value lands in
                // the read set like any other observation.
                let has_reader = self.matches_role(ctx, &attribute, MethodRole::Reader)?;
                let old_value = if has_reader {
                    self.read_attribute(ctx, &attribute)?
                } else {
                    Value::Null
                };

                ctx.log_attribute_change(self, &attribute, old_value, new_value.clone(), method)?;
                Ok(new_value)
            }
            Handler::Read => self.read_attribute(ctx, method),
            Handler::DynamicRead => {
                let body = ctx.registry.dynamic_reader_fn(self.class_name(), method)?;
                body(self, args)
            }
            Handler::Persistence => {
                ctx.log_object_persistence(self, method, args.to_vec())?;
                Ok(Value::Bool(true))
            }
            Handler::Destruction => {
                ctx.log_object_destruction(self, method)?;
                Ok(Value::Bool(true))
            }
        }
    }

    /// The read path: write set first, then the read set, then the live
    /// object (logging the observation).
    fn read_attribute(&self, ctx: &Rc<TxContext>, attribute: &str) -> EngineResult<Value> {
        let key = self.key.attribute(attribute);
        let (has_written, prior_read) = {
            let tx = ctx.transaction.borrow();
            (
                tx.attribute_has_value(&key),
                tx.read_attribute_value(&key),
            )
        };

        if has_written {
            ctx.verify_attribute_integrity(self, attribute, false)?;
            let tx = ctx.transaction.borrow();
            return Ok(tx.attribute_value(&key).unwrap_or(Value::Null));
        }

        if let Some(value) = prior_read {
            ctx.verify_attribute_integrity(self, attribute, false)?;
            return Ok(value);
        }

        let shared = self.underlying()?;
        let live = shared.lock().invoke(attribute, &[])?;
        ctx.log_attribute_read(self, attribute, live.clone(), attribute)?;
        Ok(live)
    }
}

impl std::fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("key", &self.key)
            .field("resolved", &self.underlying.borrow().is_some())
            .finish()
    }
}

/// A class-level proxy: creates and looks up instances transactionally.
pub struct ClassProxy {
    ctx: Weak<TxContext>,
    class_name: String,
}

impl ClassProxy {
    pub(crate) fn new(ctx: Weak<TxContext>, class_name: String) -> Self {
        Self { ctx, class_name }
    }

    /// Returns the proxied class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    fn ctx(&self) -> EngineResult<Rc<TxContext>> {
        self.ctx.upgrade().ok_or_else(|| {
            EngineError::invalid_operation("the transaction block has already ended")
        })
    }

    /// Creates a fresh instance inside the transaction.
    ///
    /// The object receives an in-transaction identifier (`new_NNNNN`)
    /// and exists for the outside world only after commit.
    pub fn create(&self) -> EngineResult<Rc<ObjectProxy>> {
        self.ctx()?.create_instance(&self.class_name)
    }

    /// Looks an existing instance up by identifier and wraps it.
    pub fn lookup(&self, id: &str) -> EngineResult<Option<Rc<ObjectProxy>>> {
        self.ctx()?.lookup_instance(&self.class_name, id)
    }
}

impl std::fmt::Debug for ClassProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassProxy")
            .field("class_name", &self.class_name)
            .finish()
    }
}
