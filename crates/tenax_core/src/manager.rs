//! Transaction manager: per-thread stack, control flow, resumption.
//!
//! Control-flow signals are a sum type, not errors: the block returns an
//! [`Outcome`] telling the manager how to leave (or re-enter) the
//! transaction. Integrity failures stay real errors carrying their
//! conflict payload; the host may resolve them inside the block through
//! the [`TxHandle`] and retry, or let them escape, which resets the
//! transaction and re-raises.

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::keys::{AttributeKey, ObjectKey};
use crate::object::SharedObject;
use crate::proxy::{ClassProxy, ObjectProxy, ObjectQueries};
use crate::registry::TypeRegistry;
use crate::transaction::conflict::{ReadConflict, WriteClash};
use crate::transaction::context::TxContext;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tenax_store::PersistenceAdapter;
use tracing::debug;
use uuid::Uuid;

thread_local! {
    /// Identifiers of the transactions stacked on this thread.
    static ACTIVE: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// How a transaction block asks to be left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Normal end: persist the current section so the transaction can be
    /// resumed later under the same identifier.
    Persist,
    /// Commit all accumulated mutations against the real objects.
    Commit,
    /// Discard the current section's work.
    Rollback,
    /// Discard the whole transaction, including persisted sections.
    Reset,
    /// Discard the current section and run the block again.
    Retry,
    /// Leave the block without persisting or discarding anything.
    Abort,
}

/// Generates a fleet-unique transaction identifier.
#[must_use]
pub fn generate_identifier() -> String {
    Uuid::new_v4().to_string()
}

/// Runs transaction blocks against a registry/adapter pair.
pub struct TransactionManager {
    registry: Arc<TypeRegistry>,
    adapter: Arc<dyn PersistenceAdapter>,
    config: Config,
}

impl TransactionManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(
        registry: Arc<TypeRegistry>,
        adapter: Arc<dyn PersistenceAdapter>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            adapter,
            config,
        }
    }

    /// Number of transactions currently stacked on this thread.
    #[must_use]
    pub fn active_depth() -> usize {
        ACTIVE.with(|stack| stack.borrow().len())
    }

    /// Identifier of the innermost active transaction on this thread.
    #[must_use]
    pub fn current_identifier() -> Option<String> {
        ACTIVE.with(|stack| stack.borrow().last().cloned())
    }

    /// Runs a transaction block, creating or resuming `identifier`.
    ///
    /// Returns the transaction identifier (generated when absent). The
    /// block may run more than once when it asks for [`Outcome::Retry`].
    pub fn with_transaction<F>(&self, identifier: Option<&str>, mut block: F) -> EngineResult<String>
    where
        F: FnMut(&TxHandle) -> EngineResult<Outcome>,
    {
        let identifier = identifier.map_or_else(generate_identifier, str::to_string);

        let nested = ACTIVE.with(|stack| stack.borrow().contains(&identifier));
        if nested {
            return Err(EngineError::invalid_operation(format!(
                "transaction {identifier} is already active on this thread"
            )));
        }
        ACTIVE.with(|stack| stack.borrow_mut().push(identifier.clone()));
        let _stack_guard = StackGuard {
            identifier: identifier.clone(),
        };

        loop {
            let ctx = TxContext::start(
                Arc::clone(&self.registry),
                Arc::clone(&self.adapter),
                self.config.clone(),
                &identifier,
            )?;
            let handle = TxHandle {
                ctx: Rc::clone(&ctx),
            };

            match block(&handle) {
                Ok(Outcome::Persist) => match ctx.persist_current() {
                    Ok(()) => break,
                    Err(err) => {
                        let _ = ctx.rollback_current();
                        return Err(err);
                    }
                },
                Ok(Outcome::Commit) => match ctx.commit() {
                    Ok(()) => break,
                    // A busy object lock leaves all state intact so the
                    // caller can back off and retry the commit.
                    Err(err) if err.is_lock() => return Err(err),
                    Err(err) => {
                        let _ = ctx.reset();
                        return Err(err);
                    }
                },
                Ok(Outcome::Rollback) => {
                    ctx.rollback_current()?;
                    break;
                }
                Ok(Outcome::Reset) => {
                    ctx.reset()?;
                    break;
                }
                Ok(Outcome::Retry) => {
                    debug!(transaction = %identifier, "retrying transaction block");
                    ctx.rollback_current()?;
                    continue;
                }
                Ok(Outcome::Abort) => break,
                Err(err) if err.is_lock() => return Err(err),
                Err(err) => {
                    // Integrity failures and everything else escaping the
                    // block: full reset, then re-raise.
                    let _ = ctx.reset();
                    return Err(err);
                }
            }
        }

        Ok(identifier)
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_depth", &Self::active_depth())
            .finish_non_exhaustive()
    }
}

struct StackGuard {
    identifier: String,
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(position) = stack.iter().rposition(|id| *id == self.identifier) {
                stack.remove(position);
            }
        });
    }
}

/// The per-block surface handed to transaction code.
pub struct TxHandle {
    ctx: Rc<TxContext>,
}

impl TxHandle {
    /// Returns the transaction identifier.
    #[must_use]
    pub fn identifier(&self) -> String {
        self.ctx.identifier()
    }

    /// Wraps an existing domain object into its transactional proxy.
    pub fn wrap(&self, object: SharedObject) -> EngineResult<Rc<ObjectProxy>> {
        self.ctx.wrap(object)
    }

    /// Returns a class-level proxy for creating and looking up instances.
    #[must_use]
    pub fn class_proxy(&self, class_name: &str) -> ClassProxy {
        self.ctx.class_proxy(class_name)
    }

    /// Accepts an external change over a value this transaction read.
    ///
    /// With `update_value`, the read set is refreshed so subsequent reads
    /// see the external value. The decision is persisted immediately and
    /// survives a retry.
    pub fn ignore(&self, conflict: &ReadConflict, update_value: bool) -> EngineResult<()> {
        self.ctx.resolve_ignore(conflict, update_value)
    }

    /// Keeps this transaction's written value despite the external
    /// change (alias of an override without a read refresh).
    pub fn use_ours(&self, clash: &WriteClash) -> EngineResult<()> {
        self.ctx.resolve_use_ours(clash)
    }

    /// Discards this transaction's written value and adopts the external
    /// one; the corresponding writer will not run at commit.
    pub fn use_theirs(&self, clash: &WriteClash) -> EngineResult<()> {
        self.ctx.resolve_use_theirs(clash)
    }

    /// True once any section of this transaction has been persisted.
    #[must_use]
    pub fn persisted(&self) -> bool {
        self.ctx.transaction.borrow().persisted()
    }

    /// The effective write set across all sections.
    #[must_use]
    pub fn write_set(&self) -> HashMap<AttributeKey, Value> {
        self.ctx.transaction.borrow().combined_write_set()
    }

    /// The effective read set across all sections.
    #[must_use]
    pub fn read_set(&self) -> HashMap<AttributeKey, Value> {
        self.ctx.transaction.borrow().combined_read_set()
    }

    /// Runs object-level queries over the transaction's log.
    pub fn objects<R>(&self, f: impl FnOnce(&ObjectQueries<'_>) -> R) -> R {
        let tx = self.ctx.transaction.borrow();
        f(&ObjectQueries::new(&tx))
    }

    /// Objects that will be touched at commit, in order of first
    /// appearance.
    #[must_use]
    pub fn fateful_objects(&self) -> Vec<ObjectKey> {
        self.objects(|q| q.fateful())
    }
}

impl std::fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle")
            .field("transaction", &self.identifier())
            .finish()
    }
}
