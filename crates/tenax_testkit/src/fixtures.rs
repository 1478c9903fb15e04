//! Test fixtures: a small in-memory domain model and engine builders.
//!
//! The domain model is a `person` directory the way a host application
//! would own one: the engine never sees it except through the registry's
//! id/lookup/init methods and the `TxObject` seam.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tenax_core::{
    share, AdapterKind, Config, Engine, EngineError, EngineResult, MethodPredicate, SharedObject,
    TxObject, TypeConfig, TypeRegistry, Value,
};
use tenax_store::{FileAdapter, MemoryAdapter, PersistenceAdapter};

/// Installs a `tracing` subscriber honoring `RUST_LOG`, once.
///
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A person record, the host-side domain object.
///
/// Fields only change when a writer method is invoked — which, inside a
/// transaction, happens at commit time. A person is visible to the
/// outside world once its `save` method ran and no `destroy` followed;
/// the `saved?` probe exposes that.
pub struct Person {
    id: String,
    first: Value,
    last: Value,
    saved: bool,
    destroyed: bool,
}

impl Person {
    fn new(id: String, first: Value, last: Value, saved: bool) -> Self {
        Self {
            id,
            first,
            last,
            saved,
            destroyed: false,
        }
    }
}

impl TxObject for Person {
    fn class_name(&self) -> &str {
        "person"
    }

    fn invoke(&mut self, method: &str, args: &[Value]) -> EngineResult<Value> {
        match method {
            "id" => Ok(Value::text(self.id.clone())),
            "first" => Ok(self.first.clone()),
            "last" => Ok(self.last.clone()),
            "first=" => {
                self.first = args.first().cloned().unwrap_or(Value::Null);
                Ok(self.first.clone())
            }
            "last=" => {
                self.last = args.first().cloned().unwrap_or(Value::Null);
                Ok(self.last.clone())
            }
            "save" => {
                self.saved = true;
                Ok(Value::Bool(true))
            }
            "destroy" => {
                self.destroyed = true;
                Ok(Value::Bool(true))
            }
            "saved?" => Ok(Value::Bool(self.saved && !self.destroyed)),
            other => Err(EngineError::domain(format!("person has no method {other:?}"))),
        }
    }
}

#[derive(Default)]
struct DirectoryInner {
    handles: Mutex<HashMap<String, SharedObject>>,
    next_id: AtomicU64,
}

/// The application's person store.
///
/// Clones share state, so "the application" can be handed to multiple
/// engines and threads.
#[derive(Clone, Default)]
pub struct Directory {
    inner: Arc<DirectoryInner>,
}

impl Directory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self) -> String {
        (self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn probe(person: &SharedObject, method: &str) -> Value {
        person
            .lock()
            .invoke(method, &[])
            .expect("probe invocation failed")
    }

    fn is_visible(person: &SharedObject) -> bool {
        Self::probe(person, "saved?") == Value::Bool(true)
    }

    /// Creates and registers a saved person; returns its id and handle.
    pub fn insert(&self, first: &str, last: &str) -> (String, SharedObject) {
        let id = self.fresh_id();
        let person = share(Person::new(
            id.clone(),
            Value::text(first),
            Value::text(last),
            true,
        ));
        self.inner
            .handles
            .lock()
            .insert(id.clone(), Arc::clone(&person));
        (id, person)
    }

    /// Creates an unsaved person, invisible until its `save` runs.
    ///
    /// This is what the registry's init method calls: the instance exists
    /// for the transaction, not yet for the outside world.
    pub fn create_unsaved(&self) -> SharedObject {
        let id = self.fresh_id();
        let person = share(Person::new(id.clone(), Value::Null, Value::Null, false));
        self.inner.handles.lock().insert(id, Arc::clone(&person));
        person
    }

    /// Looks a visible person up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SharedObject> {
        let person = self.inner.handles.lock().get(id).cloned()?;
        Self::is_visible(&person).then_some(person)
    }

    /// True if a visible person with this id exists.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Reads an attribute of a person directly, as external code would.
    ///
    /// # Panics
    ///
    /// Panics if the person does not exist (test helper).
    #[must_use]
    pub fn read(&self, id: &str, attribute: &str) -> Value {
        let person = self
            .inner
            .handles
            .lock()
            .get(id)
            .cloned()
            .expect("no such person");
        Self::probe(&person, attribute)
    }

    /// Writes an attribute of a person directly — external interference.
    ///
    /// # Panics
    ///
    /// Panics if the person does not exist (test helper).
    pub fn write(&self, id: &str, attribute: &str, value: impl Into<Value>) {
        let person = self
            .inner
            .handles
            .lock()
            .get(id)
            .cloned()
            .expect("no such person");
        person
            .lock()
            .invoke(&format!("{attribute}="), &[value.into()])
            .expect("writer invocation failed");
    }

    /// Returns the id of a visible person whose attribute equals `value`.
    #[must_use]
    pub fn find_by(&self, attribute: &str, value: &Value) -> Option<String> {
        let handles: Vec<(String, SharedObject)> = self
            .inner
            .handles
            .lock()
            .iter()
            .map(|(id, person)| (id.clone(), Arc::clone(person)))
            .collect();
        handles
            .into_iter()
            .find(|(_, person)| {
                Self::is_visible(person) && Self::probe(person, attribute) == *value
            })
            .map(|(id, _)| id)
    }

    /// Number of visible persons.
    #[must_use]
    pub fn len(&self) -> usize {
        let handles: Vec<SharedObject> = self.inner.handles.lock().values().cloned().collect();
        handles.iter().filter(|p| Self::is_visible(p)).count()
    }

    /// True if no person is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the registry for the person model.
///
/// Readers and writers are name sets, `save`/`destroy` are the
/// persistence/destruction methods, and `full_name` is a dynamic reader
/// whose inner reads go through the proxy.
#[must_use]
pub fn person_registry(directory: &Directory) -> TypeRegistry {
    let registry = TypeRegistry::new();
    let lookup_dir = directory.clone();
    let init_dir = directory.clone();

    registry
        .register(
            TypeConfig::new("person")
                .id_method("id")
                .lookup(move |id| Ok(lookup_dir.get(id)))
                .init(move || Ok(init_dir.create_unsaved()))
                .readers(["first", "last"])
                .writers(["first=", "last="])
                .persistence_method(MethodPredicate::names(["save"]))
                .destruction_method(MethodPredicate::names(["destroy"]))
                .proxy_instances(true)
                .dynamic_reader("full_name", |proxy, _args| {
                    let first = proxy.get("first")?;
                    let last = proxy.get("last")?;
                    Ok(Value::text(format!(
                        "{} {}",
                        first.as_text().unwrap_or_default(),
                        last.as_text().unwrap_or_default()
                    )))
                }),
        )
        .expect("person registry is valid");
    registry
}

enum StoreKind {
    Memory(Arc<MemoryAdapter>),
    File(PathBuf),
}

/// An engine plus its application-side directory, with helpers to model
/// additional processes attached to the same store.
pub struct TestEngine {
    /// The engine under test.
    pub engine: Engine,
    /// The application's domain objects.
    pub directory: Directory,
    config: Config,
    store: StoreKind,
    _temp: Option<TempDir>,
}

impl TestEngine {
    fn build(config: Config, store: StoreKind, temp: Option<TempDir>) -> Self {
        let directory = Directory::new();
        let adapter: Arc<dyn PersistenceAdapter> = match &store {
            StoreKind::Memory(adapter) => Arc::new(adapter.handle()),
            StoreKind::File(path) => {
                Arc::new(FileAdapter::open(path).expect("file store opens"))
            }
        };
        let engine = Engine::with_adapter(config.clone(), person_registry(&directory), adapter);
        Self {
            engine,
            directory,
            config,
            store,
            _temp: temp,
        }
    }

    /// An engine over a fresh in-memory store.
    #[must_use]
    pub fn memory() -> Self {
        Self::memory_with(Config::new().adapter(AdapterKind::Memory))
    }

    /// An in-memory engine that verifies read integrity on every access.
    #[must_use]
    pub fn memory_instant_fail() -> Self {
        Self::memory_with(
            Config::new()
                .adapter(AdapterKind::Memory)
                .instant_read_integrity_fail(true),
        )
    }

    /// An in-memory engine with a caller-supplied configuration.
    #[must_use]
    pub fn memory_with(config: Config) -> Self {
        Self::build(config, StoreKind::Memory(Arc::new(MemoryAdapter::new())), None)
    }

    /// An engine over a file store in a temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn file() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("store");
        Self::build(Config::new().storage_dir(&path), StoreKind::File(path), Some(temp))
    }

    /// A second engine attached to the same store and directory — a
    /// fresh process resuming the same transactions.
    #[must_use]
    pub fn reopen(&self) -> Engine {
        let adapter: Arc<dyn PersistenceAdapter> = match &self.store {
            StoreKind::Memory(adapter) => Arc::new(adapter.handle()),
            StoreKind::File(path) => {
                Arc::new(FileAdapter::open(path).expect("file store reopens"))
            }
        };
        Engine::with_adapter(
            self.config.clone(),
            person_registry(&self.directory),
            adapter,
        )
    }
}
