//! Commands and their processing sidecars
//!
//! A `Command` is the durable record of one external request: it stores the
//! verbatim validated command map plus the identity fields used for
//! idempotency. Processing state lives in the one-to-one `CommandQueueItem`
//! sidecar so the command row itself is written once and never churned.
//!
//! ## Queue status state machine
//!
//! ```text
//! pending ──claim──▶ processing ──success──▶ processed (terminal)
//!    ▲                   │
//!    │ dependency        ├──transient error──▶ failed ──claim──▶ processing
//!    │ pending           ├──OCC exhausted────▶ occ_timeout ──claim──▶ processing
//!    └───────────────────┤
//!                        └──permanent error──▶ dead_letter (terminal)
//! ```
//!
//! `failed` and `occ_timeout` are claimable again once `next_retry_after` has
//! elapsed. Reverting to `pending` (create predecessor not yet processed) does
//! not count against the retry budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::command_map::CommandMap;

use super::{CommandId, InstanceId};

/// The four supported external actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    CreateTransaction,
    UpdateTransaction,
    CreateAccount,
    UpdateAccount,
}

/// The entity family an action operates on; dispatch routes on
/// `(category, action)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCategory {
    Transaction,
    Account,
}

impl CommandAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create_transaction" => Some(CommandAction::CreateTransaction),
            "update_transaction" => Some(CommandAction::UpdateTransaction),
            "create_account" => Some(CommandAction::CreateAccount),
            "update_account" => Some(CommandAction::UpdateAccount),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::CreateTransaction => "create_transaction",
            CommandAction::UpdateTransaction => "update_transaction",
            CommandAction::CreateAccount => "create_account",
            CommandAction::UpdateAccount => "update_account",
        }
    }

    pub fn category(&self) -> CommandCategory {
        match self {
            CommandAction::CreateTransaction | CommandAction::UpdateTransaction => {
                CommandCategory::Transaction
            }
            CommandAction::CreateAccount | CommandAction::UpdateAccount => CommandCategory::Account,
        }
    }

    /// Update actions require `update_idempk` and key their idempotency hash
    /// over it as well.
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            CommandAction::UpdateTransaction | CommandAction::UpdateAccount
        )
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of an external request, written exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub id: CommandId,
    pub instance_id: InstanceId,
    pub action: CommandAction,
    pub source: String,
    pub source_idempk: String,
    #[serde(default)]
    pub update_idempk: Option<String>,
    #[serde(default)]
    pub update_source: Option<String>,
    /// The verbatim validated input, kept for journaling and replay.
    pub command_map: CommandMap,
    pub inserted_at: DateTime<Utc>,
}

impl Command {
    pub fn new(instance_id: InstanceId, action: CommandAction, command_map: CommandMap) -> Self {
        Command {
            id: Uuid::new_v4(),
            instance_id,
            action,
            source: command_map.source.clone(),
            source_idempk: command_map.source_idempk.clone(),
            update_idempk: command_map.update_idempk.clone(),
            update_source: command_map.update_source.clone(),
            command_map,
            inserted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    OccTimeout,
    DeadLetter,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Processed => "processed",
            QueueStatus::Failed => "failed",
            QueueStatus::OccTimeout => "occ_timeout",
            QueueStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Processed | QueueStatus::DeadLetter)
    }

    /// Statuses a worker may claim (subject to `next_retry_after`).
    pub fn is_claimable(&self) -> bool {
        matches!(
            self,
            QueueStatus::Pending | QueueStatus::Failed | QueueStatus::OccTimeout
        )
    }

    /// Legal edges of the queue state machine.
    pub fn can_transition_to(&self, to: QueueStatus) -> bool {
        match (self, to) {
            (QueueStatus::Pending, QueueStatus::Processing) => true,
            (QueueStatus::Failed, QueueStatus::Processing) => true,
            (QueueStatus::OccTimeout, QueueStatus::Processing) => true,
            // Stale-claim reclamation resets processing back to pending
            (QueueStatus::Processing, QueueStatus::Pending) => true,
            (QueueStatus::Processing, QueueStatus::Processed) => true,
            (QueueStatus::Processing, QueueStatus::Failed) => true,
            (QueueStatus::Processing, QueueStatus::OccTimeout) => true,
            (QueueStatus::Processing, QueueStatus::DeadLetter) => true,
            // Exhausted retry budgets promote without an intermediate claim
            (QueueStatus::Failed, QueueStatus::DeadLetter) => true,
            (QueueStatus::OccTimeout, QueueStatus::DeadLetter) => true,
            _ => false,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the append-only error log on a queue item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEntry {
    pub message: String,
    pub inserted_at: DateTime<Utc>,
}

/// Processing state for a command. The row's store version doubles as the
/// claim lock: every claim is a compare-and-set against it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandQueueItem {
    pub command_id: CommandId,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub occ_retry_count: u32,
    #[serde(default)]
    pub next_retry_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processor_id: Option<String>,
    #[serde(default)]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<ErrorEntry>,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommandQueueItem {
    pub fn new(command_id: CommandId) -> Self {
        let now = Utc::now();
        CommandQueueItem {
            command_id,
            status: QueueStatus::Pending,
            retry_count: 0,
            occ_retry_count: 0,
            next_retry_after: None,
            processor_id: None,
            processing_started_at: None,
            processing_completed_at: None,
            errors: Vec::new(),
            inserted_at: now,
            updated_at: now,
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(ErrorEntry {
            message: message.into(),
            inserted_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Whether a worker may claim this item at `now`.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable()
            && self.next_retry_after.map_or(true, |after| after <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_action_parse_round_trip() {
        for s in [
            "create_transaction",
            "update_transaction",
            "create_account",
            "update_account",
        ] {
            assert_eq!(CommandAction::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(CommandAction::parse("delete_account"), None);
    }

    #[test]
    fn test_category_routing() {
        assert_eq!(
            CommandAction::CreateTransaction.category(),
            CommandCategory::Transaction
        );
        assert_eq!(
            CommandAction::UpdateAccount.category(),
            CommandCategory::Account
        );
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        for to in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Processed,
            QueueStatus::Failed,
            QueueStatus::OccTimeout,
            QueueStatus::DeadLetter,
        ] {
            assert!(!QueueStatus::Processed.can_transition_to(to));
            assert!(!QueueStatus::DeadLetter.can_transition_to(to));
        }
    }

    #[test]
    fn test_retry_statuses_are_claimable() {
        assert!(QueueStatus::Pending.is_claimable());
        assert!(QueueStatus::Failed.is_claimable());
        assert!(QueueStatus::OccTimeout.is_claimable());
        assert!(!QueueStatus::Processing.is_claimable());
        assert!(!QueueStatus::Processed.is_claimable());
        assert!(!QueueStatus::DeadLetter.is_claimable());
    }

    #[test]
    fn test_claimable_respects_retry_delay() {
        let now = Utc::now();
        let mut item = CommandQueueItem::new(Uuid::new_v4());
        assert!(item.is_claimable_at(now));

        item.status = QueueStatus::Failed;
        item.next_retry_after = Some(now + Duration::seconds(30));
        assert!(!item.is_claimable_at(now));
        assert!(item.is_claimable_at(now + Duration::seconds(31)));
    }

    #[test]
    fn test_record_error_appends() {
        let mut item = CommandQueueItem::new(Uuid::new_v4());
        item.record_error("first");
        item.record_error("second");
        assert_eq!(item.errors.len(), 2);
        assert_eq!(item.errors[0].message, "first");
        assert_eq!(item.errors[1].message, "second");
    }
}
