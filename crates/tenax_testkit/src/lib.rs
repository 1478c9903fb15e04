//! # Tenax Testkit
//!
//! Fixtures and generators for testing the tenax transaction engine:
//!
//! - A small `person` domain model ([`Person`], [`Directory`]) wired into
//!   a ready-made registry ([`person_registry`]).
//! - Engine builders over memory and file stores ([`TestEngine`]), with
//!   [`TestEngine::reopen`] modelling a fresh process resuming the same
//!   transactions.
//! - Proptest strategies for values, keys and log entries
//!   ([`generators`]).
//!
//! The end-to-end scenario suite lives in this crate's `tests/`
//! directory.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, person_registry, Directory, Person, TestEngine};
