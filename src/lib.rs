/**
 * # Tally - Event-Sourced Double-Entry Ledger Engine
 *
 * Tally is the core transactional engine of a double-entry accounting
 * ledger: an event-sourced command pipeline that turns externally submitted
 * commands into durable, balanced ledger mutations with strict idempotency,
 * optimistic concurrency control, and at-least-once retry semantics.
 *
 * ## Data flow
 *
 * ```text
 * CommandMap ─validate─▶ enqueue (idempotency + command + queue item)
 *     │                       │
 *     │ no-save mode          ▼ worker claims
 *     ▼                  handler builds one atomic unit of work
 * validate-and-apply     (transform → balances → journal → processed)
 *     without persisting      │
 *     on failure              ▼
 *                 processed │ failed │ occ_timeout │ dead_letter
 * ```
 *
 * ## Module map
 *
 * - `command_map`: boundary DTOs, validation, input-shaped errors, response
 *   mapping
 * - `entities`: the persisted domain model (instances, accounts,
 *   transactions, commands, journal events)
 * - `storage`: versioned sled store, write sets, named-step multis,
 *   repositories
 * - `transformer`: address-based payload entries → id-based drafts with
 *   debit/credit classification
 * - `queue`: command lifecycle (enqueue, claim, retry, dead-letter,
 *   reclaim)
 * - `occ`: retry-and-rebuild loop around contended account writes
 * - `dispatcher` / `handlers`: action routing and the four command handlers
 * - `ledger`: the embedding facade
 * - `worker`: claim-process worker pool
 *
 * The library is embedded by the `tally` binary (see `main.rs`), which adds
 * config loading, logging and a worker runtime around it.
 */

pub mod audit;
pub mod command_map;
pub mod config;
pub mod dispatcher;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod ledger;
pub mod logging;
pub mod occ;
pub mod queue;
pub mod storage;
pub mod transformer;
pub mod worker;

// Re-export commonly used types
pub use audit::{AuditFinding, AuditReport};
pub use command_map::{AccountData, CommandMap, CommandMapErrors, EntryData, Payload, TransactionData};
pub use config::{load_config, Config};
pub use dispatcher::{NoSaveError, ProcessOutcome};
pub use entities::{
    Account, AccountType, BalancePair, Command, CommandAction, CommandQueueItem, Entry,
    EntryDirection, Instance, JournalEvent, NormalBalance, QueueStatus, Transaction,
    TransactionStatus,
};
pub use error::EngineError;
pub use ledger::{Ledger, SubmitError};
pub use queue::{CommandQueue, QueueError};
pub use storage::{Store, Versioned};
pub use worker::{spawn_workers, WorkerPool};
