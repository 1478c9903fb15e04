//! Engine facade.
//!
//! The engine ties a type registry, a persistence adapter and a
//! configuration together and hands out transaction blocks. It is cheap
//! to clone and safe to share across threads; each thread runs its own
//! transactions.

use crate::config::{AdapterKind, Config};
use crate::error::EngineResult;
use crate::manager::{Outcome, TransactionManager, TxHandle};
use crate::registry::TypeRegistry;
use std::sync::Arc;
use tenax_store::{FileAdapter, MemoryAdapter, PersistenceAdapter};

/// The engine: entry point for configuring and running transactions.
///
/// # Example
///
/// ```rust,ignore
/// let registry = TypeRegistry::new();
/// registry.register(TypeConfig::new("user").id_method("id") /* … */)?;
///
/// let engine = Engine::new(Config::new().storage_dir("tx_data"), registry)?;
/// let id = engine.transaction(None, |tx| {
///     let user = tx.wrap(my_user.clone())?;
///     user.set("first", "Foo")?;
///     user.save()?;
///     Ok(Outcome::Persist)
/// })?;
///
/// // Later — possibly from another process:
/// engine.transaction(Some(&id), |_| Ok(Outcome::Commit))?;
/// ```
#[derive(Clone)]
pub struct Engine {
    registry: Arc<TypeRegistry>,
    adapter: Arc<dyn PersistenceAdapter>,
    config: Config,
}

impl Engine {
    /// Builds an engine, constructing the adapter the configuration
    /// selects.
    pub fn new(config: Config, registry: TypeRegistry) -> EngineResult<Self> {
        let adapter: Arc<dyn PersistenceAdapter> = match config.adapter {
            AdapterKind::File => Arc::new(FileAdapter::open(&config.storage_dir)?),
            AdapterKind::Memory => Arc::new(MemoryAdapter::new()),
        };
        Ok(Self {
            registry: Arc::new(registry),
            adapter,
            config,
        })
    }

    /// Builds an engine around a caller-provided adapter.
    #[must_use]
    pub fn with_adapter(
        config: Config,
        registry: TypeRegistry,
        adapter: Arc<dyn PersistenceAdapter>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            adapter,
            config,
        }
    }

    /// Returns the type registry, e.g. for late class registration.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Returns the persistence adapter.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.adapter
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs a transaction block, creating or resuming `identifier`.
    ///
    /// Returns the transaction identifier (generated when absent).
    pub fn transaction<F>(&self, identifier: Option<&str>, block: F) -> EngineResult<String>
    where
        F: FnMut(&TxHandle) -> EngineResult<Outcome>,
    {
        TransactionManager::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.adapter),
            self.config.clone(),
        )
        .with_transaction(identifier, block)
    }

    /// Lists all transactions with persisted state.
    pub fn transaction_identifiers(&self) -> EngineResult<Vec<String>> {
        Ok(self.adapter.transaction_identifiers()?)
    }

    /// Removes all persisted state of a transaction without running it.
    pub fn discard_transaction(&self, identifier: &str) -> EngineResult<()> {
        Ok(self.adapter.reset_transaction(identifier)?)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
