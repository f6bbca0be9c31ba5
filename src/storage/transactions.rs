//! Transaction and balance-history repository

use crate::entities::{BalanceHistoryEntry, InstanceId, Transaction, TransactionId};

use super::keys;
use super::multi::StepName;
use super::store::{Result, Store, Versioned};
use super::write::WriteSet;

pub fn get(
    store: &Store,
    instance_id: InstanceId,
    transaction_id: TransactionId,
) -> Result<Option<Versioned<Transaction>>> {
    store.get(&keys::transaction(instance_id, transaction_id))
}

/// Every transaction of an instance, in key order.
pub fn list(store: &Store, instance_id: InstanceId) -> Result<Vec<Versioned<Transaction>>> {
    let rows: Vec<(Vec<u8>, Versioned<Transaction>)> =
        store.scan_prefix(&keys::transaction_prefix(instance_id))?;
    Ok(rows.into_iter().map(|(_, transaction)| transaction).collect())
}

pub fn stage_create(writes: &mut WriteSet, transaction: &Transaction) -> Result<()> {
    writes.insert_unique(
        StepName::Transaction,
        keys::transaction(transaction.instance_id, transaction.id),
        transaction,
    )
}

pub fn stage_update(
    writes: &mut WriteSet,
    transaction: &Transaction,
    expected_version: u64,
) -> Result<()> {
    writes.put_versioned(
        keys::transaction(transaction.instance_id, transaction.id),
        transaction,
        expected_version,
    )
}

/// Append a balance snapshot; history rows are insert-only.
pub fn stage_history(writes: &mut WriteSet, snapshot: &BalanceHistoryEntry) -> Result<()> {
    writes.insert_unique(
        StepName::Transaction,
        keys::balance_history(snapshot.account_id, snapshot.inserted_at, snapshot.id),
        snapshot,
    )
}

/// All history rows for an account, oldest first.
pub fn list_balance_history(
    store: &Store,
    account_id: crate::entities::AccountId,
) -> Result<Vec<BalanceHistoryEntry>> {
    let rows: Vec<(Vec<u8>, Versioned<BalanceHistoryEntry>)> =
        store.scan_prefix(&keys::balance_history_prefix(account_id))?;
    Ok(rows.into_iter().map(|(_, row)| row.row).collect())
}
