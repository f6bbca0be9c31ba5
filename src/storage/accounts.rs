//! Account repository
//!
//! Accounts are the contended rows of the whole engine: every balance
//! mutation is a versioned put, and the address index enforces uniqueness of
//! `(instance_id, address)` at commit time.

use std::collections::{BTreeMap, BTreeSet};

use crate::entities::{Account, AccountId, InstanceId};

use super::keys;
use super::multi::StepName;
use super::store::{Result, Store, Versioned};
use super::write::WriteSet;

pub fn get(
    store: &Store,
    instance_id: InstanceId,
    account_id: AccountId,
) -> Result<Option<Versioned<Account>>> {
    store.get(&keys::account(instance_id, account_id))
}

pub fn get_by_address(
    store: &Store,
    instance_id: InstanceId,
    address: &str,
) -> Result<Option<Versioned<Account>>> {
    match store.get::<AccountId>(&keys::account_address_index(instance_id, address))? {
        Some(index) => get(store, instance_id, index.row),
        None => Ok(None),
    }
}

/// Every account of an instance, in key order.
pub fn list(store: &Store, instance_id: InstanceId) -> Result<Vec<Versioned<Account>>> {
    let rows: Vec<(Vec<u8>, Versioned<Account>)> =
        store.scan_prefix(&keys::account_prefix(instance_id))?;
    Ok(rows.into_iter().map(|(_, account)| account).collect())
}

/// Batch-resolve addresses within an instance. Returns the accounts found
/// (keyed by address) and the addresses with no account, both ordered.
pub fn resolve_addresses(
    store: &Store,
    instance_id: InstanceId,
    addresses: &BTreeSet<String>,
) -> Result<(BTreeMap<String, Versioned<Account>>, Vec<String>)> {
    let mut found = BTreeMap::new();
    let mut missing = Vec::new();
    for address in addresses {
        match get_by_address(store, instance_id, address)? {
            Some(account) => {
                found.insert(address.clone(), account);
            }
            None => missing.push(address.clone()),
        }
    }
    Ok((found, missing))
}

/// Stage a new account plus its unique address index row.
pub fn stage_create(writes: &mut WriteSet, account: &Account) -> Result<()> {
    writes.insert_unique(
        StepName::Account,
        keys::account(account.instance_id, account.id),
        account,
    )?;
    writes.insert_unique(
        StepName::Account,
        keys::account_address_index(account.instance_id, &account.address),
        &account.id,
    )
}

/// Stage a balance or metadata update with a version check. The address
/// index is untouched: addresses are immutable.
pub fn stage_update(writes: &mut WriteSet, account: &Account, expected_version: u64) -> Result<()> {
    writes.put_versioned(
        keys::account(account.instance_id, account.id),
        account,
        expected_version,
    )
}
