//! update_transaction handler
//!
//! Updates apply to a previously created, still-pending transaction located
//! through the pending-transaction lookup. Dependency resolution runs before
//! anything else touches the payload, so predecessor problems (not found,
//! not yet processed, dead-lettered) always win over balance problems:
//!
//! - lookup missing → dead letter (`create_command_not_found`)
//! - create queue item not `processed` → revert this update to `pending`
//!   without burning a retry
//! - create dead-lettered → dead letter this update too
//! - create processed → proceed against the recorded transaction
//!
//! Allowed transitions and their balance effects:
//! - `pending → posted` (no entries): move each reservation into posted
//! - `pending → posted` (with entries): reverse old reservations, post the
//!   freshly transformed entries directly
//! - `pending → pending` (with entries): reverse old, reserve new
//! - `pending → archived`: reverse old reservations; entries are ignored
//!   (the stored transaction knows what to undo)

use crate::entities::transaction::{check_balanced, Entry, Transaction, TransactionStatus};
use crate::entities::QueueStatus;
use crate::error::EngineError;
use crate::storage::{commands, pending, transactions, Multi, MultiError, StepName, Store, Versioned};
use crate::transformer::transform;

use super::{
    parse_status, payload_mismatch, stage_idempotency_row, stage_journal_event,
    stage_new_command_rows, stage_queue_processed, BalanceBook, BalanceOp, CommandHandler,
    HandlerReport, ProcessEnv,
};

pub struct UpdateTransactionHandler;

#[derive(Default)]
struct Ctx {
    report: HandlerReport,
    predecessor: Option<Versioned<Transaction>>,
}

impl CommandHandler for UpdateTransactionHandler {
    fn execute_once(&self, store: &Store, env: &ProcessEnv) -> Result<HandlerReport, MultiError> {
        let mut ctx = Ctx::default();
        let mut multi: Multi<Ctx> = Multi::new();

        if env.persist_command {
            let env_command = env.clone();
            multi = multi.step(StepName::NewCommand, move |_store, writes, _ctx: &mut Ctx| {
                stage_new_command_rows(writes, &env_command)
            });
            let env_idempotency = env.clone();
            multi = multi.step(StepName::Idempotency, move |_store, writes, _ctx: &mut Ctx| {
                stage_idempotency_row(writes, &env_idempotency)
            });
        }

        let env_lookup = env.clone();
        multi = multi.step(
            StepName::GetCreateTransactionCommand,
            move |store, _writes, ctx: &mut Ctx| {
                let command = &env_lookup.command;
                let lookup = pending::get(
                    store,
                    command.instance_id,
                    &command.source,
                    &command.source_idempk,
                )?
                .ok_or_else(|| EngineError::CreateCommandNotFound {
                    command_source: command.source.clone(),
                    source_idempk: command.source_idempk.clone(),
                })?;

                let create_item = commands::get_queue_item(store, lookup.row.command_id)?
                    .ok_or_else(|| EngineError::CreateCommandNotFound {
                        command_source: command.source.clone(),
                        source_idempk: command.source_idempk.clone(),
                    })?;
                match create_item.row.status {
                    QueueStatus::Processed => {}
                    QueueStatus::DeadLetter => return Err(EngineError::CreateCommandDeadLetter),
                    status => return Err(EngineError::CreateCommandNotReady(status)),
                }

                let transaction_id = lookup
                    .row
                    .transaction_id
                    .ok_or(EngineError::CreateTransactionMissing)?;
                let transaction = transactions::get(store, command.instance_id, transaction_id)?
                    .ok_or(EngineError::CreateTransactionMissing)?;
                ctx.predecessor = Some(transaction);
                Ok(())
            },
        );

        let env_transaction = env.clone();
        multi = multi.step(StepName::Transaction, move |store, writes, ctx: &mut Ctx| {
            let command = &env_transaction.command;
            let data = command
                .command_map
                .transaction_data()
                .ok_or_else(payload_mismatch)?;
            let target = parse_status(data.status.as_deref())?;

            let predecessor = ctx
                .predecessor
                .as_ref()
                .ok_or(EngineError::CreateTransactionMissing)?;
            let mut transaction = predecessor.row.clone();
            let read_version = predecessor.row_version;

            if !transaction.status.can_transition_to(target) {
                return Err(EngineError::InvalidStatusTransition {
                    from: transaction.status,
                    to: target,
                });
            }

            let mut book = BalanceBook::new();
            match (target, data.entries.is_empty()) {
                (TransactionStatus::Archived, _) => {
                    for entry in &transaction.entries {
                        book.apply(store, command.instance_id, entry, BalanceOp::ReversePending)?;
                    }
                }
                (TransactionStatus::Posted, true) => {
                    for entry in &transaction.entries {
                        book.apply(store, command.instance_id, entry, BalanceOp::PostFromPending)?;
                    }
                }
                (TransactionStatus::Posted, false) | (TransactionStatus::Pending, false) => {
                    let output =
                        transform(store, command.instance_id, target, &data.entries)?;
                    check_balanced(
                        output
                            .entries
                            .iter()
                            .map(|entry| (entry.currency.as_str(), entry.direction, entry.value)),
                    )
                    .map_err(EngineError::Unbalanced)?;

                    for account in output.accounts.values() {
                        book.adopt(account.clone());
                    }
                    for entry in &transaction.entries {
                        book.apply(store, command.instance_id, entry, BalanceOp::ReversePending)?;
                    }
                    let apply_op = match target {
                        TransactionStatus::Posted => BalanceOp::ApplyPosted,
                        _ => BalanceOp::ApplyPending,
                    };
                    let mut new_entries = Vec::with_capacity(output.entries.len());
                    for transformed in &output.entries {
                        let entry = Entry::new(
                            transaction.id,
                            transformed.account_id,
                            transformed.value,
                            transformed.currency.clone(),
                            transformed.direction,
                        );
                        book.apply(store, command.instance_id, &entry, apply_op)?;
                        new_entries.push(entry);
                    }
                    transaction.entries = new_entries;
                }
                (TransactionStatus::Pending, true) => {
                    // Validation requires entries for a pending rewrite
                    return Err(payload_mismatch());
                }
            }

            transaction.status = target;
            transaction.updated_at = chrono::Utc::now();
            transactions::stage_update(writes, &transaction, read_version)?;

            ctx.report.account_ids = book.account_ids();
            book.stage(writes)?;
            ctx.report.transaction_ids.push(transaction.id);
            Ok(())
        });

        let env_journal = env.clone();
        multi = multi.step(StepName::JournalEvent, move |_store, writes, ctx: &mut Ctx| {
            stage_journal_event(writes, &env_journal, &ctx.report)?;
            Ok(())
        });

        let env_queue = env.clone();
        multi = multi.step(StepName::QueueItem, move |store, writes, _ctx: &mut Ctx| {
            stage_queue_processed(store, writes, &env_queue)
        });

        multi.run(store, &mut ctx)?;
        Ok(ctx.report)
    }
}
