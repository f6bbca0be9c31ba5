//! Key encoding
//!
//! Every table and index gets a UTF-8 key prefix. Index rows live under
//! `idx/` and map a natural key to the owning row's id. Balance history keys
//! embed a zero-padded nanosecond timestamp so a prefix scan returns rows in
//! application order.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{AccountId, CommandId, EventId, InstanceId, TransactionId};

pub fn instance(id: InstanceId) -> Vec<u8> {
    format!("instance/{}", id).into_bytes()
}

pub fn instance_address_index(address: &str) -> Vec<u8> {
    format!("idx/instance_address/{}", address).into_bytes()
}

pub fn account(instance_id: InstanceId, account_id: AccountId) -> Vec<u8> {
    format!("account/{}/{}", instance_id, account_id).into_bytes()
}

pub fn account_address_index(instance_id: InstanceId, address: &str) -> Vec<u8> {
    format!("idx/account_address/{}/{}", instance_id, address).into_bytes()
}

pub fn account_prefix(instance_id: InstanceId) -> Vec<u8> {
    format!("account/{}/", instance_id).into_bytes()
}

pub fn transaction(instance_id: InstanceId, transaction_id: TransactionId) -> Vec<u8> {
    format!("transaction/{}/{}", instance_id, transaction_id).into_bytes()
}

pub fn transaction_prefix(instance_id: InstanceId) -> Vec<u8> {
    format!("transaction/{}/", instance_id).into_bytes()
}

pub fn balance_history(account_id: AccountId, at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    // Nanosecond precision plus the row id breaks ties within one commit
    let nanos = at.timestamp_nanos_opt().unwrap_or(i64::MAX);
    format!("balance_history/{}/{:020}/{}", account_id, nanos, id).into_bytes()
}

pub fn balance_history_prefix(account_id: AccountId) -> Vec<u8> {
    format!("balance_history/{}/", account_id).into_bytes()
}

pub fn command(command_id: CommandId) -> Vec<u8> {
    format!("command/{}", command_id).into_bytes()
}

pub fn command_prefix() -> Vec<u8> {
    b"command/".to_vec()
}

pub fn queue_item(command_id: CommandId) -> Vec<u8> {
    format!("queue/{}", command_id).into_bytes()
}

pub fn queue_prefix() -> Vec<u8> {
    b"queue/".to_vec()
}

pub fn queue_runnable_index(command_id: CommandId) -> Vec<u8> {
    format!("idx/queue_runnable/{}", command_id).into_bytes()
}

pub fn queue_runnable_prefix() -> Vec<u8> {
    b"idx/queue_runnable/".to_vec()
}

pub fn journal_event(event_id: EventId) -> Vec<u8> {
    format!("journal/{}", event_id).into_bytes()
}

pub fn journal_prefix() -> Vec<u8> {
    b"journal/".to_vec()
}

pub fn event_account_link(account_id: AccountId, event_id: EventId) -> Vec<u8> {
    format!("idx/event_account/{}/{}", account_id, event_id).into_bytes()
}

pub fn event_account_link_prefix(account_id: AccountId) -> Vec<u8> {
    format!("idx/event_account/{}/", account_id).into_bytes()
}

pub fn event_transaction_link(transaction_id: TransactionId, event_id: EventId) -> Vec<u8> {
    format!("idx/event_transaction/{}/{}", transaction_id, event_id).into_bytes()
}

pub fn event_transaction_link_prefix(transaction_id: TransactionId) -> Vec<u8> {
    format!("idx/event_transaction/{}/", transaction_id).into_bytes()
}

pub fn idempotency_key(instance_id: InstanceId, key_hash_hex: &str) -> Vec<u8> {
    format!("idempotency/{}/{}", instance_id, key_hash_hex).into_bytes()
}

pub fn pending_lookup(instance_id: InstanceId, source: &str, source_idempk: &str) -> Vec<u8> {
    format!("pending_lookup/{}/{}/{}", instance_id, source, source_idempk).into_bytes()
}
