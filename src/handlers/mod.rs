//! Command handlers
//!
//! One handler per supported action, each building a single atomic unit of
//! work from named steps. Handlers are rebuilt and re-run from scratch by
//! the OCC processor on every collision, so every step re-reads whatever it
//! needs from the store and nothing is cached across attempts.
//!
//! ## Two entry modes
//!
//! - **Claimed** (`persist_command == false`): the command and its queue item
//!   already exist (written at enqueue); the unit stages the side effects
//!   plus the `processing → processed` queue transition.
//! - **No-save-on-error** (`persist_command == true`): nothing has been
//!   persisted yet; the unit additionally stages the command row, queue
//!   item, idempotency key and (for pending creates) the pending lookup.
//!   A failure anywhere leaves no trace; success persists identically to
//!   the claimed path.
//!
//! ## Balance bookkeeping
//!
//! Transaction handlers mutate accounts through a [`BalanceBook`]: it loads
//! each account once (remembering the version it was read at), applies entry
//! operations in memory while capturing a balance-history snapshot per
//! application, and finally stages one versioned put per account. A stale
//! version at commit is the OCC collision the processor retries.

mod create_account;
mod create_transaction;
mod update_account;
mod update_transaction;

pub use create_account::CreateAccountHandler;
pub use create_transaction::CreateTransactionHandler;
pub use update_account::UpdateAccountHandler;
pub use update_transaction::UpdateTransactionHandler;

use chrono::Utc;
use std::collections::BTreeMap;

use crate::entities::account::Account;
use crate::entities::command::{Command, CommandAction, CommandQueueItem, QueueStatus};
use crate::entities::transaction::{Entry, EntryDirection};
use crate::entities::{
    AccountId, BalanceHistoryEntry, EventId, Instance, InstanceId, JournalEvent, TransactionId,
};
use crate::error::EngineError;
use crate::idempotency::derive_key_hash;
use crate::storage::pending::PendingTransactionLookup;
use crate::storage::{
    accounts, commands, idempotency, journal, pending, MultiError, Store, StoreError, Versioned,
    WriteSet,
};

/// Everything a handler needs to build its unit of work.
#[derive(Clone)]
pub struct ProcessEnv {
    pub command: Command,
    pub instance: Instance,
    /// No-save-on-error mode: the command rows are part of this unit.
    pub persist_command: bool,
    pub secret: Vec<u8>,
}

/// Entities a successful unit touched, for journaling and logging.
#[derive(Debug, Default, Clone)]
pub struct HandlerReport {
    pub transaction_ids: Vec<TransactionId>,
    pub account_ids: Vec<AccountId>,
}

pub trait CommandHandler: Send + Sync {
    /// Whether this action touches contended rows and needs the OCC loop.
    fn needs_occ(&self) -> bool {
        true
    }

    /// Build and run one attempt of the unit of work.
    fn execute_once(&self, store: &Store, env: &ProcessEnv) -> Result<HandlerReport, MultiError>;
}

/// The handler registry: routing by `(category, action)` collapses to a
/// match because the action enum already encodes its category.
pub fn handler_for(action: CommandAction) -> &'static dyn CommandHandler {
    match action {
        CommandAction::CreateTransaction => &CreateTransactionHandler,
        CommandAction::UpdateTransaction => &UpdateTransactionHandler,
        CommandAction::CreateAccount => &CreateAccountHandler,
        CommandAction::UpdateAccount => &UpdateAccountHandler,
    }
}

// ─── shared step bodies ────────────────────────────────────────────────────

/// Stage the command row plus its pending queue item (no-save mode only).
pub(crate) fn stage_new_command_rows(
    writes: &mut WriteSet,
    env: &ProcessEnv,
) -> Result<(), EngineError> {
    let item = CommandQueueItem::new(env.command.id);
    commands::stage_new_command(writes, &env.command, &item)?;
    Ok(())
}

/// Stage the idempotency uniqueness claim (no-save mode only).
pub(crate) fn stage_idempotency_row(
    writes: &mut WriteSet,
    env: &ProcessEnv,
) -> Result<(), EngineError> {
    let key_hash = derive_key_hash(
        &env.secret,
        env.command.action,
        &env.command.source,
        &env.command.source_idempk,
        env.command.update_idempk.as_deref(),
    );
    idempotency::stage_insert(writes, env.command.instance_id, &key_hash)?;
    Ok(())
}

/// Stage the pending-transaction lookup for a pending-payload create
/// (no-save mode only; the enqueue path writes it otherwise).
pub(crate) fn stage_pending_lookup_row(
    writes: &mut WriteSet,
    env: &ProcessEnv,
) -> Result<(), EngineError> {
    pending::stage_insert(
        writes,
        &PendingTransactionLookup {
            instance_id: env.command.instance_id,
            source: env.command.source.clone(),
            source_idempk: env.command.source_idempk.clone(),
            command_id: env.command.id,
            transaction_id: None,
        },
    )?;
    Ok(())
}

/// Stage the terminal `processed` transition for this command's queue item.
pub(crate) fn stage_queue_processed(
    store: &Store,
    writes: &mut WriteSet,
    env: &ProcessEnv,
) -> Result<(), EngineError> {
    let now = Utc::now();
    match commands::get_queue_item(store, env.command.id)? {
        Some(item) => {
            if !item.row.status.can_transition_to(QueueStatus::Processed) {
                return Err(EngineError::Queue(crate::queue::QueueError::IllegalTransition {
                    from: item.row.status,
                    to: QueueStatus::Processed,
                }));
            }
            let mut updated = item.row.clone();
            updated.status = QueueStatus::Processed;
            updated.next_retry_after = None;
            updated.processing_completed_at = Some(now);
            updated.updated_at = now;
            commands::stage_queue_item_update(writes, &updated, item.row_version)?;
        }
        None if env.persist_command => {
            // The pending item is staged earlier in this same write set
            let mut item = CommandQueueItem::new(env.command.id);
            item.status = QueueStatus::Processed;
            item.processing_completed_at = Some(now);
            commands::stage_queue_item_put(writes, &item)?;
        }
        None => {
            return Err(EngineError::Store(StoreError::Corrupt {
                key: format!("queue/{}", env.command.id),
                reason: "queue item missing for claimed command".into(),
            }))
        }
    }
    Ok(())
}

/// Stage the journal event plus link rows for a successful unit.
pub(crate) fn stage_journal_event(
    writes: &mut WriteSet,
    env: &ProcessEnv,
    report: &HandlerReport,
) -> Result<EventId, EngineError> {
    let event = JournalEvent::new(
        env.instance.id,
        env.command.id,
        env.command.action,
        env.command.command_map.clone(),
    );
    journal::stage_event(writes, &event, &report.account_ids, &report.transaction_ids)?;
    Ok(event.id)
}

/// Defensive error for payloads that slipped past validation with the wrong
/// shape for their action; unreachable in practice.
pub(crate) fn payload_mismatch() -> EngineError {
    let mut errors = crate::command_map::CommandMapErrors::default();
    errors.add("payload", "does not match the action");
    EngineError::Invalid(errors)
}

/// Parse the payload status of an already-validated transaction payload.
pub(crate) fn parse_status(
    status: Option<&str>,
) -> Result<crate::entities::TransactionStatus, EngineError> {
    status
        .and_then(crate::entities::TransactionStatus::parse)
        .ok_or_else(|| {
            let mut errors = crate::command_map::CommandMapErrors::default();
            errors
                .transaction_errors()
                .entry("status".into())
                .or_default()
                .push("is not a valid status".into());
            EngineError::Invalid(errors)
        })
}

// ─── balance bookkeeping ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BalanceOp {
    /// Reserve: a new pending entry.
    ApplyPending,
    /// Direct post: entry of a transaction created as `posted`.
    ApplyPosted,
    /// Undo a reservation: archive or entry rewrite.
    ReversePending,
    /// Finalize: move a pending entry into posted.
    PostFromPending,
}

/// In-memory view of every account a unit touches, with the versions they
/// were read at and the history snapshots accumulated along the way.
#[derive(Default)]
pub(crate) struct BalanceBook {
    accounts: BTreeMap<AccountId, Versioned<Account>>,
    history: Vec<BalanceHistoryEntry>,
}

impl BalanceBook {
    pub fn new() -> Self {
        BalanceBook::default()
    }

    /// Adopt an account already read elsewhere (transformer output).
    pub fn adopt(&mut self, account: Versioned<Account>) {
        self.accounts.entry(account.row.id).or_insert(account);
    }

    fn load(
        &mut self,
        store: &Store,
        instance_id: InstanceId,
        account_id: AccountId,
    ) -> Result<&mut Versioned<Account>, EngineError> {
        if !self.accounts.contains_key(&account_id) {
            let account = accounts::get(store, instance_id, account_id)?.ok_or_else(|| {
                // An entry references it, so its absence is store damage
                EngineError::Store(StoreError::Corrupt {
                    key: format!("account/{}/{}", instance_id, account_id),
                    reason: "account row missing for recorded entry".into(),
                })
            })?;
            self.accounts.insert(account_id, account);
        }
        Ok(self.accounts.get_mut(&account_id).expect("just inserted"))
    }

    /// Apply one entry to its account and capture the post-application
    /// snapshot.
    pub fn apply(
        &mut self,
        store: &Store,
        instance_id: InstanceId,
        entry: &Entry,
        op: BalanceOp,
    ) -> Result<(), EngineError> {
        let account = self.load(store, instance_id, entry.account_id)?;
        apply_op(&mut account.row, entry.direction, entry.value, op);
        let snapshot = BalanceHistoryEntry::capture(entry.id, &account.row);
        self.history.push(snapshot);
        Ok(())
    }

    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.keys().copied().collect()
    }

    /// Stage one versioned put per touched account plus every history row.
    pub fn stage(self, writes: &mut WriteSet) -> Result<(), EngineError> {
        for account in self.accounts.into_values() {
            accounts::stage_update(writes, &account.row, account.row_version)?;
        }
        for snapshot in &self.history {
            crate::storage::transactions::stage_history(writes, snapshot)?;
        }
        Ok(())
    }
}

fn apply_op(account: &mut Account, direction: EntryDirection, value: i64, op: BalanceOp) {
    match op {
        BalanceOp::ApplyPending => account.apply_pending(direction, value),
        BalanceOp::ApplyPosted => account.apply_posted(direction, value),
        BalanceOp::ReversePending => account.reverse_pending(direction, value),
        BalanceOp::PostFromPending => account.post_from_pending(direction, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::account::AccountType;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn open_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        (Store::open(temp_dir.path()).unwrap(), temp_dir)
    }

    fn seed_account(store: &Store, instance_id: InstanceId, address: &str) -> Account {
        let account = Account::new(instance_id, address, address, AccountType::Asset, "USD", None);
        let mut writes = WriteSet::new();
        accounts::stage_create(&mut writes, &account).unwrap();
        store.commit(writes).unwrap();
        account
    }

    #[test]
    fn test_balance_book_applies_and_snapshots() {
        let (store, _temp_dir) = open_store();
        let instance_id = Uuid::new_v4();
        let account = seed_account(&store, instance_id, "cash");

        let mut book = BalanceBook::new();
        let entry = Entry::new(Uuid::new_v4(), account.id, 100, "USD", EntryDirection::Debit);
        book.apply(&store, instance_id, &entry, BalanceOp::ApplyPending).unwrap();
        book.apply(&store, instance_id, &entry, BalanceOp::PostFromPending).unwrap();

        assert_eq!(book.account_ids(), vec![account.id]);

        let mut writes = WriteSet::new();
        book.stage(&mut writes).unwrap();
        store.commit(writes).unwrap();

        let stored = accounts::get(&store, instance_id, account.id).unwrap().unwrap();
        assert_eq!(stored.row.posted.debit, 100);
        assert!(stored.row.pending.is_zero());
        // One staged account write despite two applications
        assert_eq!(stored.row_version, 2);

        let history = crate::storage::transactions::list_balance_history(&store, account.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].pending.debit, 100);
        assert_eq!(history[1].posted.debit, 100);
    }

    #[test]
    fn test_balance_book_stages_the_read_version() {
        let (store, _temp_dir) = open_store();
        let instance_id = Uuid::new_v4();
        let account = seed_account(&store, instance_id, "cash");

        let mut book = BalanceBook::new();
        let entry = Entry::new(Uuid::new_v4(), account.id, 10, "USD", EntryDirection::Debit);
        book.apply(&store, instance_id, &entry, BalanceOp::ApplyPending).unwrap();

        // Contender moves the row after the book's read
        let contender = accounts::get(&store, instance_id, account.id).unwrap().unwrap();
        let mut writes = WriteSet::new();
        accounts::stage_update(&mut writes, &contender.row, contender.row_version).unwrap();
        store.commit(writes).unwrap();

        let mut writes = WriteSet::new();
        book.stage(&mut writes).unwrap();
        assert!(matches!(
            store.commit(writes),
            Err(StoreError::StaleVersion { .. })
        ));
    }

    #[test]
    fn test_balance_book_missing_account_is_corruption() {
        let (store, _temp_dir) = open_store();
        let mut book = BalanceBook::new();
        let entry = Entry::new(Uuid::new_v4(), Uuid::new_v4(), 10, "USD", EntryDirection::Debit);
        let err = book
            .apply(&store, Uuid::new_v4(), &entry, BalanceOp::ApplyPending)
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_adopt_keeps_first_read() {
        let (store, _temp_dir) = open_store();
        let instance_id = Uuid::new_v4();
        let account = seed_account(&store, instance_id, "cash");

        let read = accounts::get(&store, instance_id, account.id).unwrap().unwrap();
        let mut book = BalanceBook::new();
        book.adopt(read.clone());
        // Adopting again (e.g. the same account resolved twice) is a no-op
        book.adopt(read);
        assert_eq!(book.account_ids().len(), 1);
    }
}
