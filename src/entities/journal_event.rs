//! Immutable journal events
//!
//! One event per successfully committed side effect, written in the same
//! atomic commit as the effect itself. Events carry the verbatim command map
//! so external consumers can replay or audit without joining back to the
//! commands table. Link rows connect an event to the accounts and
//! transactions it touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command_map::CommandMap;

use super::{AccountId, CommandAction, CommandId, EventId, InstanceId, TransactionId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEvent {
    pub id: EventId,
    pub instance_id: InstanceId,
    pub command_id: CommandId,
    pub action: CommandAction,
    pub command_map: CommandMap,
    pub inserted_at: DateTime<Utc>,
}

impl JournalEvent {
    pub fn new(
        instance_id: InstanceId,
        command_id: CommandId,
        action: CommandAction,
        command_map: CommandMap,
    ) -> Self {
        JournalEvent {
            id: Uuid::new_v4(),
            instance_id,
            command_id,
            action,
            command_map,
            inserted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventAccountLink {
    pub event_id: EventId,
    pub account_id: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventTransactionLink {
    pub event_id: EventId,
    pub transaction_id: TransactionId,
}
