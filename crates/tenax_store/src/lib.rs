//! # Tenax Store
//!
//! Durable section/entry storage and advisory locking for the tenax
//! transaction engine.
//!
//! This crate knows nothing about log entry semantics: entries are
//! self-describing JSON records, and the engine above decides what they
//! mean. What it does provide:
//!
//! - The [`PersistenceAdapter`] contract: queue and flush entry records
//!   per transaction section, enumerate persisted transactions and
//!   savepoints, reset a transaction, and take scoped advisory locks.
//! - [`FileAdapter`]: a filesystem store with `fs2` advisory locks, good
//!   for cooperating processes on one machine.
//! - [`MemoryAdapter`]: the same contract over shared memory, for tests
//!   and ephemeral engines.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod error;
mod file;
mod lock;
mod memory;

pub use adapter::{LockGuard, LockScope, PersistenceAdapter, SectionRef};
pub use error::{LockKind, StoreError, StoreResult};
pub use file::FileAdapter;
pub use memory::MemoryAdapter;
