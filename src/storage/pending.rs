//! Pending-transaction lookups
//!
//! Maps `(instance_id, source, source_idempk)` to the command that created a
//! pending transaction, so update commands can locate their predecessor. The
//! row is written at enqueue time with no transaction id; the create handler
//! fills the id in inside its own commit once the transaction exists.

use serde::{Deserialize, Serialize};

use crate::entities::{CommandId, InstanceId, TransactionId};

use super::keys;
use super::multi::StepName;
use super::store::{Result, Store, Versioned};
use super::write::WriteSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingTransactionLookup {
    pub instance_id: InstanceId,
    pub source: String,
    pub source_idempk: String,
    pub command_id: CommandId,
    /// Filled in by the create handler when the transaction commits.
    #[serde(default)]
    pub transaction_id: Option<TransactionId>,
}

pub fn get(
    store: &Store,
    instance_id: InstanceId,
    source: &str,
    source_idempk: &str,
) -> Result<Option<Versioned<PendingTransactionLookup>>> {
    store.get(&keys::pending_lookup(instance_id, source, source_idempk))
}

/// Stage the lookup row for a pending create; unique on its identity triple.
pub fn stage_insert(writes: &mut WriteSet, lookup: &PendingTransactionLookup) -> Result<()> {
    writes.insert_unique(
        StepName::PendingTransactionLookup,
        keys::pending_lookup(lookup.instance_id, &lookup.source, &lookup.source_idempk),
        lookup,
    )
}

/// Stage the transaction-id backfill (blind put: the row was inserted at
/// enqueue time and only the create handler ever writes it again).
pub fn stage_set_transaction(writes: &mut WriteSet, lookup: &PendingTransactionLookup) -> Result<()> {
    writes.put(
        keys::pending_lookup(lookup.instance_id, &lookup.source, &lookup.source_idempk),
        lookup,
    )
}
