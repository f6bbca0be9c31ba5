//! Storage Layer
//!
//! This module contains all persistence-related functionality for the ledger
//! engine. It provides the foundation for durable storage, atomic multi-step
//! commits, and the per-row versioning that the OCC processor builds on.
//!
//! ## Architecture Overview
//!
//! The storage layer is designed around three core principles:
//! - **Durability**: every committed effect is flushed through sled's log
//! - **Atomicity**: a unit of work stages all of its writes and applies them
//!   in a single batch, or not at all
//! - **Versioning**: every row carries a store-maintained version; writes
//!   that expect a version fail loudly when the row moved underneath them
//!
//! ## Components
//!
//! ### Store (`store.rs`)
//! The sled-backed keyspace: one tree, prefixed keys per table, 8-byte
//! big-endian version prefix on every row, JSON payloads. Commits take a
//! short-lived lock, re-validate version expectations and unique inserts,
//! then apply one `sled::Batch`.
//!
//! ### Keys (`keys.rs`)
//! Key encoding for every table and index. All keys are UTF-8 paths so they
//! stay greppable in debugging sessions.
//!
//! ### Write sets (`write.rs`)
//! The staged mutation buffer a unit of work accumulates: unique inserts
//! (attributed to a named step for error mapping), versioned puts, blind
//! puts, and deletes.
//!
//! ### Multi (`multi.rs`)
//! The named-step unit-of-work runner: an ordered list of `Step`s sharing a
//! write set and a handler context, committed atomically at the end. The
//! first failing step's name travels with the error so failures can be
//! mapped back onto the input shape.
//!
//! ### Repositories
//! Typed access per table: `instances`, `accounts`, `transactions`,
//! `commands`, `journal`, `idempotency`, `pending`. Reads return
//! [`store::Versioned`] wrappers so callers always hold the version they
//! must present when writing back.

pub mod accounts;
pub mod commands;
pub mod idempotency;
pub mod instances;
pub mod journal;
pub mod keys;
pub mod multi;
pub mod pending;
pub mod store;
pub mod transactions;
pub mod write;

pub use multi::{Multi, MultiError, StepName};
pub use store::{Store, StoreError, Versioned};
pub use write::WriteSet;
