//! Named-step units of work
//!
//! A `Multi` is an ordered list of named steps sharing one write set and one
//! handler-defined context. Steps run sequentially; the first failure aborts
//! the unit and travels upward as a [`MultiError`] carrying the step's name,
//! which the response layer uses to map the failure back onto the input
//! shape. Only if every step succeeds is the accumulated write set committed
//! atomically.
//!
//! Steps read the store directly (and re-read on every OCC attempt, since the
//! whole `Multi` is rebuilt per attempt); they never observe their own staged
//! writes. Handlers thread cross-step data through the context instead.

use std::fmt;
use thiserror::Error;

use crate::error::EngineError;

use super::store::{Store, StoreError};
use super::write::WriteSet;

/// Names for error attribution, one per logical step a handler can fail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepName {
    InputCommandMap,
    Instance,
    NewCommand,
    Idempotency,
    PendingTransactionLookup,
    GetCreateTransactionCommand,
    Transaction,
    Account,
    JournalEvent,
    QueueItem,
    /// Commit-time stale version; not tied to a single staged row.
    Commit,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::InputCommandMap => "input_command_map",
            StepName::Instance => "instance",
            StepName::NewCommand => "new_command",
            StepName::Idempotency => "idempotency",
            StepName::PendingTransactionLookup => "pending_transaction_lookup",
            StepName::GetCreateTransactionCommand => "get_create_transaction_command",
            StepName::Transaction => "transaction",
            StepName::Account => "account",
            StepName::JournalEvent => "journal_event",
            StepName::QueueItem => "queue_item",
            StepName::Commit => "commit",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit-of-work failure, attributed to the step that raised it.
#[derive(Debug, Error)]
#[error("step {step} failed: {error}")]
pub struct MultiError {
    pub step: StepName,
    pub error: EngineError,
}

type StepFn<C> = Box<dyn FnMut(&Store, &mut WriteSet, &mut C) -> Result<(), EngineError> + Send>;

struct Step<C> {
    name: StepName,
    run: StepFn<C>,
}

pub struct Multi<C> {
    steps: Vec<Step<C>>,
}

impl<C> Multi<C> {
    pub fn new() -> Self {
        Multi { steps: Vec::new() }
    }

    pub fn step<F>(mut self, name: StepName, run: F) -> Self
    where
        F: FnMut(&Store, &mut WriteSet, &mut C) -> Result<(), EngineError> + Send + 'static,
    {
        self.steps.push(Step {
            name,
            run: Box::new(run),
        });
        self
    }

    /// Run every step in order, then commit the accumulated write set.
    pub fn run(mut self, store: &Store, ctx: &mut C) -> Result<(), MultiError> {
        let mut writes = WriteSet::new();
        for step in &mut self.steps {
            (step.run)(store, &mut writes, ctx).map_err(|error| MultiError {
                step: step.name,
                error,
            })?;
        }
        store.commit(writes).map_err(|error| MultiError {
            step: commit_step(&error),
            error: error.into(),
        })
    }
}

impl<C> Default for Multi<C> {
    fn default() -> Self {
        Multi::new()
    }
}

// Unique violations know which step staged the row; stale versions belong to
// the commit itself
fn commit_step(error: &StoreError) -> StepName {
    match error {
        StoreError::UniqueViolation { step, .. } => *step,
        _ => StepName::Commit,
    }
}
