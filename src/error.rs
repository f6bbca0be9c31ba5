//! Engine-level error taxonomy
//!
//! Every failure a handler can hit while building or committing a unit of
//! work lands in [`EngineError`]. The queue decides what happens next from
//! the error's [`disposition`](EngineError::disposition): retry with backoff,
//! dead-letter immediately, or revert to pending without burning a retry
//! (create-predecessor not yet processed).
//!
//! OCC collisions are not a disposition of their own: they surface as
//! `Store(StaleVersion)` and are consumed by the OCC processor before the
//! queue ever sees them.

use thiserror::Error;

use crate::command_map::CommandMapErrors;
use crate::entities::command::QueueStatus;
use crate::entities::transaction::{Imbalance, TransactionStatus};
use crate::storage::store::StoreError;
use crate::transformer::TransformerError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid command map: {0}")]
    Invalid(CommandMapErrors),

    #[error("instance does not exist: {0}")]
    InstanceNotFound(String),

    /// Update-account target missing; permanent by design.
    #[error("Account does not exist")]
    AccountNotFound(String),

    #[error(transparent)]
    Transformer(#[from] TransformerError),

    #[error("unbalanced transaction for currency {}: debits {} != credits {}", .0.currency, .0.debits, .0.credits)]
    Unbalanced(Imbalance),

    #[error("invalid transaction status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("action not supported: {0}")]
    ActionNotSupported(String),

    /// No pending-transaction lookup row for the update's identity.
    #[error("create command not found for source {command_source} / source_idempk {source_idempk}")]
    CreateCommandNotFound {
        command_source: String,
        source_idempk: String,
    },

    /// The create predecessor exists but has not finished processing.
    #[error("create command not processed yet (status: {0})")]
    CreateCommandNotReady(QueueStatus),

    /// The create predecessor terminally failed; the update can never apply.
    #[error("create command was dead-lettered")]
    CreateCommandDeadLetter,

    /// Lookup row exists and is processed but the transaction row is missing;
    /// transient inconsistency, safe to retry.
    #[error("transaction for create command not yet recorded")]
    CreateTransactionMissing,

    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
}

/// What the queue should do with a command whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Transient or potentially self-healing: `failed` with backoff.
    Retry,
    /// Permanent: straight to `dead_letter`.
    DeadLetter,
    /// Dependency not ready: back to `pending`, no retry-count increment.
    RevertToPending,
}

impl EngineError {
    /// A stale-version commit failure, the OCC collision signal.
    pub fn is_occ_collision(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::StaleVersion { .. }))
    }

    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            EngineError::CreateCommandNotReady(_) => ErrorDisposition::RevertToPending,
            // Deterministic failures that no retry can repair
            EngineError::Invalid(_)
            | EngineError::AccountNotFound(_)
            | EngineError::InvalidStatusTransition { .. }
            | EngineError::ActionNotSupported(_)
            | EngineError::CreateCommandNotFound { .. }
            | EngineError::CreateCommandDeadLetter => ErrorDisposition::DeadLetter,
            // Everything else may heal: missing accounts can be created,
            // store hiccups pass, unbalanced maps get dead-lettered by the
            // retry budget instead
            EngineError::Store(_)
            | EngineError::InstanceNotFound(_)
            | EngineError::Transformer(_)
            | EngineError::Unbalanced(_)
            | EngineError::CreateTransactionMissing
            | EngineError::Queue(_) => ErrorDisposition::Retry,
        }
    }
}
