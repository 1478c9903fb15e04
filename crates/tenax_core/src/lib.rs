//! # Tenax Core
//!
//! A persisted, resumable, optimistic/pessimistic hybrid transaction
//! engine for in-memory application objects.
//!
//! Tenax lets an application mutate arbitrary domain objects inside a
//! transactional scope, hold those mutations in a durable log (not
//! applied to the objects), resume the same transaction later — possibly
//! from another process — and finally commit all accumulated mutations
//! atomically against the real objects while detecting external
//! interference.
//!
//! The moving parts:
//!
//! - [`TypeRegistry`] / [`TypeConfig`]: per-class configuration (identity,
//!   lookup, init, and which method names are readers, writers, dynamic
//!   readers, persistence methods or destructors).
//! - [`ObjectProxy`] / [`ClassProxy`]: transparent forwarders that rewrite
//!   method calls into transactional log entries.
//! - [`Transaction`] / [`Section`] / [`LogEntry`]: the write-set/read-set
//!   model, savepoints, and the tagged records the engine persists.
//! - [`TransactionManager`] / [`Outcome`]: block control flow (persist,
//!   commit, rollback, reset, retry, abort).
//! - [`Engine`]: the facade wiring registry, adapter and configuration
//!   together.
//!
//! Durability and locking live in the `tenax_store` crate; any
//! [`PersistenceAdapter`] implementation can back an engine.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod keys;
mod log;
mod manager;
mod object;
mod proxy;
mod registry;
mod section;
mod transaction;
mod value;

pub use config::{AdapterKind, Config};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use keys::{new_object_id, AttributeKey, KeyParseError, ObjectKey, NEW_ID_PREFIX};
pub use log::{EntryKind, LogEntry};
pub use manager::{generate_identifier, Outcome, TransactionManager, TxHandle};
pub use object::{share, SharedObject, TxObject};
pub use proxy::{ClassProxy, ObjectProxy, ObjectQueries};
pub use registry::{
    DynamicReaderFn, IdFn, IdMethod, InitFn, LookupFn, MethodPredicate, TypeConfig, TypeRegistry,
};
pub use section::Section;
pub use transaction::conflict::{ReadConflict, WriteClash};
pub use transaction::{EntryPosition, Transaction};
pub use value::Value;

// The store's lock vocabulary shows up in engine errors.
pub use tenax_store::{LockKind, PersistenceAdapter};
