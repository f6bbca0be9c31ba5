//! Entity Schemas
//!
//! This module contains the persisted domain model of the ledger engine. Every
//! struct here is a durable row shape: it derives `Serialize`/`Deserialize`
//! (rows are stored as JSON payloads) and owns its own validation helpers.
//!
//! ## Ownership
//!
//! - An `Instance` is the tenant boundary; it owns accounts, transactions and
//!   commands and is never deleted while it has children.
//! - A `Command` owns exactly one `CommandQueueItem`.
//! - A `Transaction` owns its entries; each entry application appends a
//!   `BalanceHistoryEntry` snapshot.
//! - `JournalEvent` rows (plus their account/transaction link rows) persist
//!   forever as the externally consumable record of every committed effect.
//!
//! ## Components
//!
//! ### Accounts (`account.rs`)
//! Balance-bearing ledger lines: the account type taxonomy, the derived normal
//! balance, posted/pending debit-credit pairs, and the balance mutation
//! helpers used by transaction posting.
//!
//! ### Transactions (`transaction.rs`)
//! Atomic balanced movements: status state machine (pending → posted |
//! archived), entry legs, and the per-currency double-entry balance check.
//!
//! ### Commands (`command.rs`)
//! The durable record of an external request and its processing sidecar: queue
//! status state machine, retry counters, and the append-only error log.
//!
//! ### Journal (`journal_event.rs`)
//! Immutable append-only event rows emitted per successful side effect,
//! carrying the verbatim command map and link rows to affected entities.

pub mod account;
pub mod balance_history;
pub mod command;
pub mod currency;
pub mod instance;
pub mod journal_event;
pub mod transaction;

pub use account::{Account, AccountType, BalancePair, NormalBalance};
pub use balance_history::BalanceHistoryEntry;
pub use command::{
    Command, CommandAction, CommandCategory, CommandQueueItem, ErrorEntry, QueueStatus,
};
pub use currency::supported_currency;
pub use instance::Instance;
pub use journal_event::{EventAccountLink, EventTransactionLink, JournalEvent};
pub use transaction::{Entry, EntryDirection, Transaction, TransactionStatus};

use uuid::Uuid;

pub type InstanceId = Uuid;
pub type AccountId = Uuid;
pub type TransactionId = Uuid;
pub type EntryId = Uuid;
pub type CommandId = Uuid;
pub type EventId = Uuid;
