//! create_transaction handler
//!
//! One atomic unit: (no-save mode only: command + queue item + idempotency
//! key + pending lookup) → transform → balance check → transaction insert
//! with per-account balance application and history snapshots → pending
//! lookup backfill → journal event → queue item `processed`.
//!
//! A pending-payload create reserves balance space (`pending` pair); a
//! posted-payload create applies straight to the `posted` pair. Either way
//! every account write carries the version resolution read, so concurrent
//! creates against the same accounts collide at commit and get retried by
//! the OCC processor.

use crate::entities::transaction::{check_balanced, Entry, Transaction, TransactionStatus};
use crate::error::EngineError;
use crate::storage::pending::PendingTransactionLookup;
use crate::storage::{pending, transactions, Multi, MultiError, StepName, Store};
use crate::transformer::transform;

use super::{
    parse_status, payload_mismatch, stage_idempotency_row, stage_journal_event,
    stage_new_command_rows, stage_pending_lookup_row, stage_queue_processed, BalanceBook,
    BalanceOp, CommandHandler, HandlerReport, ProcessEnv,
};

pub struct CreateTransactionHandler;

#[derive(Default)]
struct Ctx {
    report: HandlerReport,
}

impl CommandHandler for CreateTransactionHandler {
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
            if pending_payload(env) {
                let env_lookup = env.clone();
                multi = multi.step(
                    StepName::PendingTransactionLookup,
                    move |_store, writes, _ctx: &mut Ctx| {
                        stage_pending_lookup_row(writes, &env_lookup)
                    },
                );
            }
        }

        let env_transaction = env.clone();
        multi = multi.step(StepName::Transaction, move |store, writes, ctx: &mut Ctx| {
            let command = &env_transaction.command;
            let data = command
                .command_map
                .transaction_data()
                .ok_or_else(payload_mismatch)?;
            let status = parse_status(data.status.as_deref())?;

            let output = transform(store, command.instance_id, status, &data.entries)?;
            check_balanced(
                output
                    .entries
                    .iter()
                    .map(|entry| (entry.currency.as_str(), entry.direction, entry.value)),
            )
            .map_err(EngineError::Unbalanced)?;

            let mut transaction = Transaction::new(command.instance_id, status);
            let mut book = BalanceBook::new();
            for account in output.accounts.values() {
                book.adopt(account.clone());
            }

            let op = match status {
                TransactionStatus::Pending => BalanceOp::ApplyPending,
                TransactionStatus::Posted => BalanceOp::ApplyPosted,
                // Validation rejects archived creates; transform returned no
                // entries so the loop below is empty anyway
                TransactionStatus::Archived => BalanceOp::ApplyPending,
            };
            for transformed in &output.entries {
                let entry = Entry::new(
                    transaction.id,
                    transformed.account_id,
                    transformed.value,
                    transformed.currency.clone(),
                    transformed.direction,
                );
                book.apply(store, command.instance_id, &entry, op)?;
                transaction.entries.push(entry);
            }

            transactions::stage_create(writes, &transaction)?;
            ctx.report.account_ids = book.account_ids();
            book.stage(writes)?;

            // Point the lookup row at the transaction so updates can find it
            if status == TransactionStatus::Pending {
                pending::stage_set_transaction(
                    writes,
                    &PendingTransactionLookup {
                        instance_id: command.instance_id,
                        source: command.source.clone(),
                        source_idempk: command.source_idempk.clone(),
                        command_id: command.id,
                        transaction_id: Some(transaction.id),
                    },
                )?;
            }

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

fn pending_payload(env: &ProcessEnv) -> bool {
    env.command
        .command_map
        .transaction_data()
        .and_then(|data| data.status.as_deref())
        == Some("pending")
}
