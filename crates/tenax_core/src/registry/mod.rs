//! Per-class type configuration.
//!
//! The registry tells the engine how to treat each domain class: how to
//! derive stable identifiers, how to look instances up and create fresh
//! ones, and which method names are readers, writers, dynamic readers,
//! persistence methods or destructors.
//!
//! ## Resolution protocol
//!
//! Resolving a setting for class `C` first checks `C` itself, then walks
//! the declared parent chain toward the root; the first custom value
//! wins, otherwise the system default applies. With
//! `mixin_module_proxies` enabled, each class in that walk is followed
//! by its declared mixin configs before its parent is consulted.

mod predicate;

pub use predicate::MethodPredicate;

use crate::error::{EngineError, EngineResult};
use crate::object::{SharedObject, TxObject};
use crate::proxy::ObjectProxy;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Retrieves an instance by identifier.
pub type LookupFn = Arc<dyn Fn(&str) -> EngineResult<Option<SharedObject>> + Send + Sync>;

/// Creates a fresh instance.
pub type InitFn = Arc<dyn Fn() -> EngineResult<SharedObject> + Send + Sync>;

/// Derives a stable identifier from an instance.
pub type IdFn = Arc<dyn Fn(&mut dyn TxObject) -> EngineResult<String> + Send + Sync>;

/// A dynamic reader body, taking the proxy as its receiver so attribute
/// reads performed inside it are intercepted.
pub type DynamicReaderFn = Arc<dyn Fn(&ObjectProxy, &[Value]) -> EngineResult<Value> + Send + Sync>;

/// How to derive an object's stable identifier.
#[derive(Clone)]
pub enum IdMethod {
    /// Invoke a named instance method that returns text.
    Named(String),
    /// Call an arbitrary function.
    Callable(IdFn),
}

impl fmt::Debug for IdMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Callable(_) => write!(f, "Callable(..)"),
        }
    }
}

/// Configuration of one domain class.
///
/// Built with consuming setters and handed to
/// [`TypeRegistry::register`].
#[derive(Clone, Default)]
pub struct TypeConfig {
    class_name: String,
    parent: Option<String>,
    mixins: Vec<String>,
    id_method: Option<IdMethod>,
    lookup: Option<LookupFn>,
    init: Option<InitFn>,
    attribute_reader: Option<MethodPredicate>,
    attribute_writer: Option<MethodPredicate>,
    dynamic_attribute_reader: Option<MethodPredicate>,
    persistence_method: Option<MethodPredicate>,
    destruction_method: Option<MethodPredicate>,
    dynamic_readers: HashMap<String, DynamicReaderFn>,
    proxy_instances: Option<bool>,
    mixin_module_proxies: Option<bool>,
    use_specialized_proxy: Option<bool>,
}

impl TypeConfig {
    /// Starts a configuration for `class_name`.
    #[must_use]
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Self::default()
        }
    }

    /// Returns the configured class name.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Declares the parent class consulted when a setting is absent here.
    #[must_use]
    pub fn parent(mut self, class_name: impl Into<String>) -> Self {
        self.parent = Some(class_name.into());
        self
    }

    /// Declares an additional config for this class.
    ///
    /// Declared mixins only participate in resolution when
    /// [`TypeConfig::mixin_module_proxies`] is enabled.
    #[must_use]
    pub fn mixin(mut self, config_name: impl Into<String>) -> Self {
        self.mixins.push(config_name.into());
        self
    }

    /// Sets the identifier derivation to a named instance method.
    #[must_use]
    pub fn id_method(mut self, method: impl Into<String>) -> Self {
        self.id_method = Some(IdMethod::Named(method.into()));
        self
    }

    /// Sets the identifier derivation to a callable.
    #[must_use]
    pub fn id_fn(
        mut self,
        f: impl Fn(&mut dyn TxObject) -> EngineResult<String> + Send + Sync + 'static,
    ) -> Self {
        self.id_method = Some(IdMethod::Callable(Arc::new(f)));
        self
    }

    /// Sets the instance lookup callable.
    #[must_use]
    pub fn lookup(
        mut self,
        f: impl Fn(&str) -> EngineResult<Option<SharedObject>> + Send + Sync + 'static,
    ) -> Self {
        self.lookup = Some(Arc::new(f));
        self
    }

    /// Sets the fresh-instance callable.
    #[must_use]
    pub fn init(mut self, f: impl Fn() -> EngineResult<SharedObject> + Send + Sync + 'static) -> Self {
        self.init = Some(Arc::new(f));
        self
    }

    /// Sets the attribute reader predicate.
    #[must_use]
    pub fn attribute_reader(mut self, predicate: MethodPredicate) -> Self {
        self.attribute_reader = Some(predicate);
        self
    }

    /// Declares reader method names (sugar for a name-set predicate).
    #[must_use]
    pub fn readers<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_reader(MethodPredicate::names(names))
    }

    /// Sets the attribute writer predicate.
    #[must_use]
    pub fn attribute_writer(mut self, predicate: MethodPredicate) -> Self {
        self.attribute_writer = Some(predicate);
        self
    }

    /// Declares writer method names (sugar for a name-set predicate).
    #[must_use]
    pub fn writers<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_writer(MethodPredicate::names(names))
    }

    /// Sets the dynamic attribute reader predicate.
    #[must_use]
    pub fn dynamic_attribute_reader(mut self, predicate: MethodPredicate) -> Self {
        self.dynamic_attribute_reader = Some(predicate);
        self
    }

    /// Registers a dynamic reader body and flags its name dynamic.
    #[must_use]
    pub fn dynamic_reader(
        mut self,
        method: impl Into<String>,
        f: impl Fn(&ObjectProxy, &[Value]) -> EngineResult<Value> + Send + Sync + 'static,
    ) -> Self {
        let method = method.into();
        let mut names = match self.dynamic_attribute_reader.take() {
            Some(MethodPredicate::Names(names)) => names,
            None => HashSet::new(),
            Some(other) => {
                // A custom predicate stays in charge; only record the body.
                self.dynamic_readers.insert(method, Arc::new(f));
                self.dynamic_attribute_reader = Some(other);
                return self;
            }
        };
        names.insert(method.clone());
        self.dynamic_attribute_reader = Some(MethodPredicate::Names(names));
        self.dynamic_readers.insert(method, Arc::new(f));
        self
    }

    /// Sets the persistence method predicate.
    #[must_use]
    pub fn persistence_method(mut self, predicate: MethodPredicate) -> Self {
        self.persistence_method = Some(predicate);
        self
    }

    /// Sets the destruction method predicate.
    #[must_use]
    pub fn destruction_method(mut self, predicate: MethodPredicate) -> Self {
        self.destruction_method = Some(predicate);
        self
    }

    /// Sets whether instances of this class may be wrapped at all.
    #[must_use]
    pub const fn proxy_instances(mut self, value: bool) -> Self {
        self.proxy_instances = Some(value);
        self
    }

    /// Sets whether the class's declared mixins are consulted during
    /// resolution.
    #[must_use]
    pub const fn mixin_module_proxies(mut self, value: bool) -> Self {
        self.mixin_module_proxies = Some(value);
        self
    }

    /// Sets whether classification ignores inherited predicates.
    #[must_use]
    pub const fn use_specialized_proxy(mut self, value: bool) -> Self {
        self.use_specialized_proxy = Some(value);
        self
    }
}

impl fmt::Debug for TypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeConfig")
            .field("class_name", &self.class_name)
            .field("parent", &self.parent)
            .field("mixins", &self.mixins)
            .field("dynamic_readers", &self.dynamic_readers.keys())
            .finish_non_exhaustive()
    }
}

/// The classification concerns a predicate can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MethodRole {
    Reader,
    Writer,
    DynamicReader,
    Persistence,
    Destruction,
}

/// Registry of all configured domain classes.
pub struct TypeRegistry {
    configs: RwLock<HashMap<String, TypeConfig>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) a class configuration.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error on an empty class name.
    pub fn register(&self, config: TypeConfig) -> EngineResult<()> {
        if config.class_name.is_empty() {
            return Err(EngineError::configuration("class name must not be empty"));
        }
        self.configs
            .write()
            .insert(config.class_name.clone(), config);
        Ok(())
    }

    /// Returns true if a class has its own configuration.
    #[must_use]
    pub fn configured(&self, class_name: &str) -> bool {
        self.configs.read().contains_key(class_name)
    }

    /// Computes the plain inheritance chain: the class, then its declared
    /// parents toward the root.
    fn parent_chain(&self, class_name: &str) -> EngineResult<Vec<String>> {
        let configs = self.configs.read();
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(class_name.to_string());

        while let Some(name) = current {
            if !visited.insert(name.clone()) {
                return Err(EngineError::configuration(format!(
                    "inheritance cycle through class {name:?}"
                )));
            }
            chain.push(name.clone());
            current = configs.get(&name).and_then(|config| config.parent.clone());
        }
        Ok(chain)
    }

    /// Computes the resolution chain for a class.
    ///
    /// Without `mixin_module_proxies` this is the plain inheritance
    /// chain. With the flag enabled, each class is followed by its
    /// declared mixins before its parent is consulted.
    fn chain(&self, class_name: &str) -> EngineResult<Vec<String>> {
        let with_mixins = self.mixin_module_proxies(class_name)?;
        if !with_mixins {
            return self.parent_chain(class_name);
        }

        let configs = self.configs.read();
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(class_name.to_string());

        while let Some(name) = current {
            if !visited.insert(name.clone()) {
                return Err(EngineError::configuration(format!(
                    "inheritance cycle through class {name:?}"
                )));
            }
            chain.push(name.clone());
            match configs.get(&name) {
                Some(config) => {
                    for mixin in &config.mixins {
                        if visited.insert(mixin.clone()) {
                            chain.push(mixin.clone());
                        }
                    }
                    current = config.parent.clone();
                }
                None => current = None,
            }
        }
        Ok(chain)
    }

    /// Resolves a setting along the chain; first custom value wins.
    fn resolve<T>(
        &self,
        class_name: &str,
        pick: impl Fn(&TypeConfig) -> Option<T>,
    ) -> EngineResult<Option<T>> {
        let chain = self.chain(class_name)?;
        let configs = self.configs.read();
        for name in chain {
            if let Some(config) = configs.get(&name) {
                if let Some(value) = pick(config) {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// Returns the classification predicate for a role.
    ///
    /// With `use_specialized_proxy` set, only the exact class config is
    /// consulted; inherited predicates are ignored.
    pub(crate) fn predicate(
        &self,
        class_name: &str,
        role: MethodRole,
    ) -> EngineResult<MethodPredicate> {
        let pick = |config: &TypeConfig| match role {
            MethodRole::Reader => config.attribute_reader.clone(),
            MethodRole::Writer => config.attribute_writer.clone(),
            MethodRole::DynamicReader => config.dynamic_attribute_reader.clone(),
            MethodRole::Persistence => config.persistence_method.clone(),
            MethodRole::Destruction => config.destruction_method.clone(),
        };

        let resolved = if self.use_specialized_proxy(class_name)? {
            self.configs.read().get(class_name).and_then(pick)
        } else {
            self.resolve(class_name, pick)?
        };
        Ok(resolved.unwrap_or(MethodPredicate::Always(false)))
    }

    /// Returns whether instances of a class may be wrapped. Default: false.
    pub fn proxy_instances(&self, class_name: &str) -> EngineResult<bool> {
        Ok(self
            .resolve(class_name, |c| c.proxy_instances)?
            .unwrap_or(false))
    }

    /// Returns whether classification is restricted to the exact class.
    /// Default: false.
    pub fn use_specialized_proxy(&self, class_name: &str) -> EngineResult<bool> {
        Ok(self
            .resolve(class_name, |c| c.use_specialized_proxy)?
            .unwrap_or(false))
    }

    /// Returns whether the class's declared mixins participate in
    /// resolution. Default: false.
    ///
    /// The flag itself resolves along the plain inheritance chain, so a
    /// mixin cannot switch its own visibility on.
    pub fn mixin_module_proxies(&self, class_name: &str) -> EngineResult<bool> {
        let chain = self.parent_chain(class_name)?;
        let configs = self.configs.read();
        for name in chain {
            if let Some(value) = configs.get(&name).and_then(|c| c.mixin_module_proxies) {
                return Ok(value);
            }
        }
        Ok(false)
    }

    /// Derives the stable identifier of an object.
    ///
    /// # Errors
    ///
    /// Configuration errors on a missing id method, a non-text result, or
    /// an identifier containing `/` (which would break key parsing).
    pub fn id_of(&self, class_name: &str, object: &mut dyn TxObject) -> EngineResult<String> {
        let id_method = self
            .resolve(class_name, |c| c.id_method.clone())?
            .ok_or_else(|| {
                EngineError::configuration(format!("class {class_name:?} has no id method"))
            })?;

        let id = match id_method {
            IdMethod::Named(method) => {
                let result = object.invoke(&method, &[])?;
                result
                    .as_text()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        EngineError::configuration(format!(
                            "id method {method:?} of {class_name:?} returned {result} instead of text"
                        ))
                    })?
            }
            IdMethod::Callable(f) => f(object)?,
        };

        if id.is_empty() || id.contains('/') {
            return Err(EngineError::configuration(format!(
                "invalid object identifier {id:?} for class {class_name:?}"
            )));
        }
        Ok(id)
    }

    /// Looks an instance up by identifier.
    pub fn lookup(&self, class_name: &str, id: &str) -> EngineResult<Option<SharedObject>> {
        let lookup = self.resolve(class_name, |c| c.lookup.clone())?.ok_or_else(|| {
            EngineError::configuration(format!("class {class_name:?} has no lookup method"))
        })?;
        lookup(id)
    }

    /// Creates a fresh instance.
    pub fn init(&self, class_name: &str) -> EngineResult<SharedObject> {
        let init = self.resolve(class_name, |c| c.init.clone())?.ok_or_else(|| {
            EngineError::configuration(format!("class {class_name:?} has no init method"))
        })?;
        init()
    }

    /// Returns the registered body of a dynamic reader.
    ///
    /// # Errors
    ///
    /// Configuration error when a method is flagged dynamic but no body
    /// was registered for it.
    pub fn dynamic_reader_fn(
        &self,
        class_name: &str,
        method: &str,
    ) -> EngineResult<DynamicReaderFn> {
        self.resolve(class_name, |c| c.dynamic_readers.get(method).cloned())?
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "no dynamic reader body registered for {class_name}::{method}"
                ))
            })
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let configs = self.configs.read();
        let mut names: Vec<_> = configs.keys().cloned().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("classes", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry
            .register(
                TypeConfig::new("record")
                    .readers(["id"])
                    .persistence_method(MethodPredicate::names(["save"]))
                    .proxy_instances(true),
            )
            .unwrap();
        registry
            .register(
                TypeConfig::new("user")
                    .parent("record")
                    .id_method("id")
                    .readers(["first", "last"])
                    .writers(["first=", "last="]),
            )
            .unwrap();
        registry
    }

    #[test]
    fn empty_class_name_rejected() {
        let registry = TypeRegistry::new();
        assert!(registry.register(TypeConfig::new("")).is_err());
    }

    #[test]
    fn own_value_wins_over_parent() {
        let registry = registry();
        let pred = registry.predicate("user", MethodRole::Reader).unwrap();
        assert!(pred.evaluate("first", None).unwrap());
        // The parent's reader set is shadowed, not merged.
        assert!(!pred.evaluate("id", None).unwrap());
    }

    #[test]
    fn absent_value_falls_back_to_parent() {
        let registry = registry();
        let pred = registry.predicate("user", MethodRole::Persistence).unwrap();
        assert!(pred.evaluate("save", None).unwrap());
        assert!(registry.proxy_instances("user").unwrap());
    }

    #[test]
    fn unconfigured_class_gets_defaults() {
        let registry = registry();
        let pred = registry.predicate("ghost", MethodRole::Writer).unwrap();
        assert!(!pred.evaluate("anything=", None).unwrap());
        assert!(!registry.proxy_instances("ghost").unwrap());
    }

    #[test]
    fn mixins_ignored_without_module_proxies_flag() {
        let registry = registry();
        registry
            .register(TypeConfig::new("timestamps").writers(["touched_at="]))
            .unwrap();
        registry
            .register(
                TypeConfig::new("post")
                    .parent("record")
                    .mixin("timestamps"),
            )
            .unwrap();

        assert!(!registry.mixin_module_proxies("post").unwrap());
        // Resolution stays on the plain inheritance chain.
        let pred = registry.predicate("post", MethodRole::Writer).unwrap();
        assert!(!pred.evaluate("touched_at=", None).unwrap());
        let pred = registry.predicate("post", MethodRole::Persistence).unwrap();
        assert!(pred.evaluate("save", None).unwrap());
    }

    #[test]
    fn mixin_module_proxies_enables_mixin_resolution() {
        let registry = registry();
        registry
            .register(TypeConfig::new("timestamps").writers(["touched_at="]))
            .unwrap();
        registry
            .register(
                TypeConfig::new("post")
                    .parent("record")
                    .mixin("timestamps")
                    .mixin_module_proxies(true),
            )
            .unwrap();

        assert!(registry.mixin_module_proxies("post").unwrap());
        // Mixins are consulted after the class, before the parent chain.
        let pred = registry.predicate("post", MethodRole::Writer).unwrap();
        assert!(pred.evaluate("touched_at=", None).unwrap());
        let pred = registry.predicate("post", MethodRole::Persistence).unwrap();
        assert!(pred.evaluate("save", None).unwrap());
    }

    #[test]
    fn own_value_wins_over_mixin() {
        let registry = TypeRegistry::new();
        registry
            .register(TypeConfig::new("timestamps").writers(["touched_at="]))
            .unwrap();
        registry
            .register(
                TypeConfig::new("post")
                    .writers(["title="])
                    .mixin("timestamps")
                    .mixin_module_proxies(true),
            )
            .unwrap();

        let pred = registry.predicate("post", MethodRole::Writer).unwrap();
        assert!(pred.evaluate("title=", None).unwrap());
        // The class's own writer set shadows the mixin's, not merges.
        assert!(!pred.evaluate("touched_at=", None).unwrap());
    }

    #[test]
    fn mixin_flag_inherited_along_parent_chain() {
        let registry = TypeRegistry::new();
        registry
            .register(TypeConfig::new("base").mixin_module_proxies(true))
            .unwrap();
        registry
            .register(TypeConfig::new("timestamps").writers(["touched_at="]))
            .unwrap();
        registry
            .register(
                TypeConfig::new("post")
                    .parent("base")
                    .mixin("timestamps"),
            )
            .unwrap();

        assert!(registry.mixin_module_proxies("post").unwrap());
        let pred = registry.predicate("post", MethodRole::Writer).unwrap();
        assert!(pred.evaluate("touched_at=", None).unwrap());
    }

    #[test]
    fn mixin_cannot_enable_its_own_visibility() {
        let registry = TypeRegistry::new();
        registry
            .register(
                TypeConfig::new("timestamps")
                    .writers(["touched_at="])
                    .mixin_module_proxies(true),
            )
            .unwrap();
        registry
            .register(TypeConfig::new("post").mixin("timestamps"))
            .unwrap();

        // The flag resolves along the inheritance chain only.
        assert!(!registry.mixin_module_proxies("post").unwrap());
        let pred = registry.predicate("post", MethodRole::Writer).unwrap();
        assert!(!pred.evaluate("touched_at=", None).unwrap());
    }

    #[test]
    fn specialized_proxy_ignores_inherited_predicates() {
        let registry = registry();
        registry
            .register(
                TypeConfig::new("admin")
                    .parent("user")
                    .use_specialized_proxy(true)
                    .writers(["role="]),
            )
            .unwrap();

        let writer = registry.predicate("admin", MethodRole::Writer).unwrap();
        assert!(writer.evaluate("role=", None).unwrap());
        // user's writers are not consulted.
        assert!(!writer.evaluate("first=", None).unwrap());
    }

    #[test]
    fn inheritance_cycle_detected() {
        let registry = TypeRegistry::new();
        registry
            .register(TypeConfig::new("a").parent("b"))
            .unwrap();
        registry
            .register(TypeConfig::new("b").parent("a"))
            .unwrap();

        let err = registry.predicate("a", MethodRole::Reader).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn id_of_validates_result() {
        use crate::object::share;

        struct Weird;
        impl TxObject for Weird {
            fn class_name(&self) -> &str {
                "weird"
            }
            fn invoke(&mut self, method: &str, _args: &[Value]) -> EngineResult<Value> {
                match method {
                    "id" => Ok(Value::text("a/b")),
                    "numeric_id" => Ok(Value::Integer(9)),
                    _ => Err(EngineError::domain("no such method")),
                }
            }
        }

        let registry = TypeRegistry::new();
        registry
            .register(TypeConfig::new("weird").id_method("id"))
            .unwrap();

        let shared = share(Weird);
        let err = registry.id_of("weird", &mut *shared.lock()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));

        registry
            .register(TypeConfig::new("weird").id_method("numeric_id"))
            .unwrap();
        let err = registry.id_of("weird", &mut *shared.lock()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn missing_dynamic_body_is_configuration_error() {
        let registry = registry();
        let err = match registry.dynamic_reader_fn("user", "full_name") {
            Ok(_) => panic!("expected dynamic_reader_fn to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, EngineError::Configuration { .. }));
    }
}
