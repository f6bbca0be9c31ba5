//! update_account handler
//!
//! Resolves the target by `(instance, account_address)` and applies the
//! mutable fields only: name and description. Type, currency, address and
//! normal balance are immutable after creation (the map validator already
//! rejects attempts to send them). A missing account dead-letters the
//! command; there is nothing a retry could change about an address that was
//! never created.

use chrono::Utc;

use crate::error::EngineError;
use crate::storage::{accounts, Multi, MultiError, StepName, Store};

use super::{
    payload_mismatch, stage_idempotency_row, stage_journal_event, stage_new_command_rows,
    stage_queue_processed, CommandHandler, HandlerReport, ProcessEnv,
};

pub struct UpdateAccountHandler;

#[derive(Default)]
struct Ctx {
    report: HandlerReport,
}

impl CommandHandler for UpdateAccountHandler {
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
        multi = multi.step(StepName::Account, move |store, writes, ctx: &mut Ctx| {
            let command = &env_account.command;
            let data = command
                .command_map
                .account_data()
                .ok_or_else(payload_mismatch)?;
            let address = data.address.clone().ok_or_else(payload_mismatch)?;

            let account = accounts::get_by_address(store, command.instance_id, &address)?
                .ok_or(EngineError::AccountNotFound(address))?;

            let mut updated = account.row.clone();
            if let Some(name) = &data.name {
                updated.name = name.clone();
            }
            if let Some(description) = &data.description {
                updated.description = Some(description.clone());
            }
            updated.updated_at = Utc::now();

            accounts::stage_update(writes, &updated, account.row_version)?;
            ctx.report.account_ids.push(updated.id);
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
