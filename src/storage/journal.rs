//! Journal repository
//!
//! Events and their link rows are written in the same commit as the side
//! effect they describe, and never mutated afterwards.

use crate::entities::{
    AccountId, EventAccountLink, EventId, EventTransactionLink, JournalEvent, TransactionId,
};

use super::keys;
use super::multi::StepName;
use super::store::{Result, Store, Versioned};
use super::write::WriteSet;

pub fn get(store: &Store, event_id: EventId) -> Result<Option<Versioned<JournalEvent>>> {
    store.get(&keys::journal_event(event_id))
}

/// Stage an event plus link rows to every entity it touched.
pub fn stage_event(
    writes: &mut WriteSet,
    event: &JournalEvent,
    account_ids: &[AccountId],
    transaction_ids: &[TransactionId],
) -> Result<()> {
    writes.insert_unique(StepName::JournalEvent, keys::journal_event(event.id), event)?;
    for account_id in account_ids {
        let link = EventAccountLink {
            event_id: event.id,
            account_id: *account_id,
        };
        writes.put(keys::event_account_link(*account_id, event.id), &link)?;
    }
    for transaction_id in transaction_ids {
        let link = EventTransactionLink {
            event_id: event.id,
            transaction_id: *transaction_id,
        };
        writes.put(keys::event_transaction_link(*transaction_id, event.id), &link)?;
    }
    Ok(())
}

/// Ids of every command of the instance that has at least one journal
/// event. Full scan; audit use only.
pub fn command_ids_with_events(
    store: &Store,
    instance_id: crate::entities::InstanceId,
) -> Result<std::collections::BTreeSet<crate::entities::CommandId>> {
    let rows: Vec<(Vec<u8>, Versioned<JournalEvent>)> =
        store.scan_prefix(&keys::journal_prefix())?;
    Ok(rows
        .into_iter()
        .map(|(_, event)| event.row)
        .filter(|event| event.instance_id == instance_id)
        .map(|event| event.command_id)
        .collect())
}

pub fn list_for_account(store: &Store, account_id: AccountId) -> Result<Vec<JournalEvent>> {
    let links: Vec<(Vec<u8>, Versioned<EventAccountLink>)> =
        store.scan_prefix(&keys::event_account_link_prefix(account_id))?;
    let mut events = Vec::new();
    for (_, link) in links {
        if let Some(event) = get(store, link.row.event_id)? {
            events.push(event.row);
        }
    }
    events.sort_by_key(|event| event.inserted_at);
    Ok(events)
}

pub fn list_for_transaction(
    store: &Store,
    transaction_id: TransactionId,
) -> Result<Vec<JournalEvent>> {
    let links: Vec<(Vec<u8>, Versioned<EventTransactionLink>)> =
        store.scan_prefix(&keys::event_transaction_link_prefix(transaction_id))?;
    let mut events = Vec::new();
    for (_, link) in links {
        if let Some(event) = get(store, link.row.event_id)? {
            events.push(event.row);
        }
    }
    events.sort_by_key(|event| event.inserted_at);
    Ok(events)
}
