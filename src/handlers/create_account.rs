//! create_account handler
//!
//! Inserts the account (unique on `(instance_id, address)` via the address
//! index), journals the event, and marks the queue item processed. No OCC
//! loop: a brand-new row has no version to go stale, and the only conflict
//! (duplicate address) is a terminal unique violation, not a retryable
//! collision.

use crate::entities::account::{Account, AccountType};
use crate::storage::{accounts, Multi, MultiError, StepName, Store};

use super::{
    payload_mismatch, stage_idempotency_row, stage_journal_event, stage_new_command_rows,
    stage_queue_processed, CommandHandler, HandlerReport, ProcessEnv,
};

pub struct CreateAccountHandler;

#[derive(Default)]
struct Ctx {
    report: HandlerReport,
}

impl CommandHandler for CreateAccountHandler {
    fn needs_occ(&self) -> bool {
        false
    }

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

        let env_account = env.clone();
        multi = multi.step(StepName::Account, move |_store, writes, ctx: &mut Ctx| {
            let command = &env_account.command;
            let data = command
                .command_map
                .account_data()
                .ok_or_else(payload_mismatch)?;

            // All present and well-formed after map validation
            let address = data.address.clone().ok_or_else(payload_mismatch)?;
            let name = data.name.clone().ok_or_else(payload_mismatch)?;
            let account_type = data
                .account_type
                .as_deref()
                .and_then(AccountType::parse)
                .ok_or_else(payload_mismatch)?;
            let currency = data.currency.clone().ok_or_else(payload_mismatch)?;

            let account = Account::new(
                command.instance_id,
                address,
                name,
                account_type,
                currency,
                data.description.clone(),
            );
            accounts::stage_create(writes, &account)?;
            ctx.report.account_ids.push(account.id);
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
