//! Command and queue-item repository
//!
//! Commands are written once; their queue items churn through the lifecycle
//! state machine. A runnable index (one empty-ish row per claimable item,
//! keyed by command id) lets workers find work without scanning the whole
//! queue table; the index row is maintained by every staged queue-item write.

use chrono::{DateTime, Utc};

use crate::entities::{Command, CommandId, CommandQueueItem, QueueStatus};

use super::keys;
use super::multi::StepName;
use super::store::{Result, Store, Versioned};
use super::write::WriteSet;

pub fn get_command(store: &Store, command_id: CommandId) -> Result<Option<Versioned<Command>>> {
    store.get(&keys::command(command_id))
}

pub fn get_queue_item(
    store: &Store,
    command_id: CommandId,
) -> Result<Option<Versioned<CommandQueueItem>>> {
    store.get(&keys::queue_item(command_id))
}

/// Stage a brand-new command with its pending queue item.
pub fn stage_new_command(
    writes: &mut WriteSet,
    command: &Command,
    item: &CommandQueueItem,
) -> Result<()> {
    writes.insert_unique(StepName::NewCommand, keys::command(command.id), command)?;
    writes.insert_unique(StepName::NewCommand, keys::queue_item(command.id), item)?;
    stage_runnable_index(writes, item)
}

/// Stage a queue-item transition with a version check (the claim CAS and all
/// post-claim transitions go through here).
pub fn stage_queue_item_update(
    writes: &mut WriteSet,
    item: &CommandQueueItem,
    expected_version: u64,
) -> Result<()> {
    writes.put_versioned(keys::queue_item(item.command_id), item, expected_version)?;
    stage_runnable_index(writes, item)
}

/// Blind queue-item write for units of work that inserted the item earlier in
/// the same write set (the no-save-on-error success path).
pub fn stage_queue_item_put(writes: &mut WriteSet, item: &CommandQueueItem) -> Result<()> {
    writes.put(keys::queue_item(item.command_id), item)?;
    stage_runnable_index(writes, item)
}

fn stage_runnable_index(writes: &mut WriteSet, item: &CommandQueueItem) -> Result<()> {
    let key = keys::queue_runnable_index(item.command_id);
    if item.status.is_claimable() {
        writes.put(key, &item.command_id)
    } else {
        writes.delete(key);
        Ok(())
    }
}

/// Commands whose queue items may be claimed at `now`, oldest key first,
/// capped at `limit`.
pub fn list_runnable(store: &Store, now: DateTime<Utc>, limit: usize) -> Result<Vec<CommandId>> {
    let mut runnable = Vec::new();
    let rows: Vec<(Vec<u8>, Versioned<CommandId>)> =
        store.scan_prefix(&keys::queue_runnable_prefix())?;
    for (_, index) in rows {
        if runnable.len() >= limit {
            break;
        }
        if let Some(item) = get_queue_item(store, index.row)? {
            if item.row.is_claimable_at(now) {
                runnable.push(index.row);
            }
        }
    }
    Ok(runnable)
}

/// Every command of an instance. Commands are keyed by id alone, so this is
/// a full scan of the commands table; audit and tooling use only.
pub fn list_for_instance(
    store: &Store,
    instance_id: crate::entities::InstanceId,
) -> Result<Vec<Versioned<Command>>> {
    let rows: Vec<(Vec<u8>, Versioned<Command>)> = store.scan_prefix(&keys::command_prefix())?;
    Ok(rows
        .into_iter()
        .map(|(_, command)| command)
        .filter(|command| command.row.instance_id == instance_id)
        .collect())
}

pub fn list_with_status(store: &Store, status: QueueStatus) -> Result<Vec<Versioned<CommandQueueItem>>> {
    let rows: Vec<(Vec<u8>, Versioned<CommandQueueItem>)> =
        store.scan_prefix(&keys::queue_prefix())?;
    Ok(rows
        .into_iter()
        .map(|(_, item)| item)
        .filter(|item| item.row.status == status)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_map::{CommandMap, EntryData, Payload, TransactionData};
    use crate::entities::command::CommandAction;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn sample_map() -> CommandMap {
        CommandMap {
            action: "create_transaction".into(),
            instance_address: "acme".into(),
            source: "billing".into(),
            source_idempk: "inv-1".into(),
            update_idempk: None,
            update_source: None,
            payload: Payload::Transaction(TransactionData {
                status: Some("pending".into()),
                entries: vec![EntryData::default(), EntryData::default()],
            }),
        }
    }

    fn seed(store: &Store) -> Command {
        let command = Command::new(Uuid::new_v4(), CommandAction::CreateTransaction, sample_map());
        let item = CommandQueueItem::new(command.id);
        let mut writes = WriteSet::new();
        stage_new_command(&mut writes, &command, &item).unwrap();
        store.commit(writes).unwrap();
        command
    }

    #[test]
    fn test_new_command_is_runnable() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path()).unwrap();
        let command = seed(&store);

        let runnable = list_runnable(&store, Utc::now(), 10).unwrap();
        assert_eq!(runnable, vec![command.id]);
    }

    #[test]
    fn test_terminal_item_leaves_runnable_index() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path()).unwrap();
        let command = seed(&store);

        let mut item = get_queue_item(&store, command.id).unwrap().unwrap();
        item.row.status = QueueStatus::Processed;
        let mut writes = WriteSet::new();
        stage_queue_item_update(&mut writes, &item.row, item.row_version).unwrap();
        store.commit(writes).unwrap();

        assert!(list_runnable(&store, Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_retry_delay_filters_runnable() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path()).unwrap();
        let command = seed(&store);

        let mut item = get_queue_item(&store, command.id).unwrap().unwrap();
        item.row.status = QueueStatus::Failed;
        item.row.next_retry_after = Some(Utc::now() + chrono::Duration::minutes(5));
        let mut writes = WriteSet::new();
        stage_queue_item_update(&mut writes, &item.row, item.row_version).unwrap();
        store.commit(writes).unwrap();

        assert!(list_runnable(&store, Utc::now(), 10).unwrap().is_empty());
        let later = Utc::now() + chrono::Duration::minutes(6);
        assert_eq!(list_runnable(&store, later, 10).unwrap(), vec![command.id]);
    }

    #[test]
    fn test_duplicate_command_id_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path()).unwrap();
        let command = seed(&store);

        let item = CommandQueueItem::new(command.id);
        let mut writes = WriteSet::new();
        stage_new_command(&mut writes, &command, &item).unwrap();
        assert!(store.commit(writes).is_err());
    }
}
