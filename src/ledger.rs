//! Ledger engine facade
//!
//! `Ledger` wires the store, command queue and dispatcher together and is the
//! one type embedders touch. The surface mirrors the engine's two entry
//! modes plus the read operations operators and tests need:
//!
//! - `submit`: validate + persist a command for asynchronous processing
//!   (workers claim it later)
//! - `execute_no_save`: synchronous validate-and-apply that persists nothing
//!   on failure
//! - `process_next` / `process_command`: claim one runnable command and
//!   drive it through its handler (the worker loop body)
//! - `reclaim_stale` / `recover`: reset abandoned `processing` claims — the
//!   bare mechanism for external schedulers, and the logged startup pass the
//!   binary runs before spawning workers
//! - reads: accounts, transactions, commands, queue items, balance history,
//!   journal events

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::command_map::{response, CommandMap, CommandMapErrors, ADDRESS_RE};
use crate::config::Config;
use crate::dispatcher::{is_internal, Dispatcher, NoSaveError, ProcessOutcome};
use crate::entities::{
    Account, AccountId, BalanceHistoryEntry, Command, CommandId, CommandQueueItem, Instance,
    InstanceId, JournalEvent, QueueStatus, Transaction, TransactionId,
};
use crate::error::EngineError;
use crate::handlers::HandlerReport;
use crate::queue::{CommandQueue, QueueError};
use crate::storage::{accounts, commands, instances, journal, transactions, Store, Versioned};

#[derive(Error, Debug)]
pub enum SubmitError {
    /// Input-shaped rejection: validation, unknown instance, idempotency.
    #[error("command rejected: {0}")]
    Rejected(CommandMapErrors),

    #[error(transparent)]
    Internal(#[from] EngineError),
}

pub struct Ledger {
    store: Arc<Store>,
    config: Config,
    queue: Arc<CommandQueue>,
    dispatcher: Dispatcher,
}

impl Ledger {
    pub fn open(config: Config) -> Result<Self, EngineError> {
        let store = Arc::new(Store::open(&config.ledger.data_dir)?);
        let secret = config.ledger.idempotency_secret.as_bytes().to_vec();
        let queue = Arc::new(CommandQueue::new(
            store.clone(),
            config.queue.clone(),
            secret.clone(),
        ));
        let dispatcher = Dispatcher::new(store.clone(), queue.clone(), config.occ.clone(), secret);
        info!("📒 Ledger opened at {}", config.ledger.data_dir);
        Ok(Ledger {
            store,
            config,
            queue,
            dispatcher,
        })
    }

    /// The tenant bootstrap operation; everything else requires an instance.
    pub fn create_instance(&self, address: &str) -> Result<Instance, SubmitError> {
        if !ADDRESS_RE.is_match(address) {
            let mut errors = CommandMapErrors::default();
            errors.add("instance_address", "has invalid format");
            return Err(SubmitError::Rejected(errors));
        }
        match instances::create(&self.store, address) {
            Ok(instance) => {
                info!("🏷️ Created instance {} ({})", instance.address, instance.id);
                Ok(instance)
            }
            Err(crate::storage::StoreError::UniqueViolation { .. }) => {
                let mut errors = CommandMapErrors::default();
                errors.add("instance_address", "already exists");
                Err(SubmitError::Rejected(errors))
            }
            Err(err) => Err(SubmitError::Internal(err.into())),
        }
    }

    /// Persist a command for asynchronous processing. Save-on-error mode:
    /// rejected input never creates a queue item, but once enqueued every
    /// failure is recorded durably on the item.
    pub fn submit(&self, map: CommandMap) -> Result<Command, SubmitError> {
        let map_for_errors = map.clone();
        match self.queue.enqueue(map) {
            Ok(command) => Ok(command),
            Err(multi_error) => {
                if is_internal(&multi_error.error) {
                    Err(SubmitError::Internal(multi_error.error))
                } else {
                    Err(SubmitError::Rejected(response::map_error(
                        &map_for_errors,
                        &multi_error,
                    )))
                }
            }
        }
    }

    /// Synchronous validate-and-apply; persists nothing on failure.
    pub async fn execute_no_save(
        &self,
        map: CommandMap,
    ) -> Result<(Command, HandlerReport), NoSaveError> {
        self.dispatcher.execute_no_save(map).await
    }

    /// Claim and process the oldest runnable command, if any.
    pub async fn process_next(
        &self,
        processor_id: &str,
    ) -> Result<Option<(CommandId, ProcessOutcome)>, EngineError> {
        let runnable = self
            .queue
            .list_runnable(Utc::now(), self.config.worker.claim_batch_size)?;
        for command_id in runnable {
            match self.queue.claim(command_id, processor_id) {
                Ok(claimed) => {
                    let outcome = self.dispatcher.process_claimed(claimed).await?;
                    return Ok(Some((command_id, outcome)));
                }
                // Raced with another worker; try the next candidate
                Err(QueueError::AlreadyClaimed) | Err(QueueError::NotClaimable(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    /// Claim and process one specific command (test and tooling path).
    pub async fn process_command(
        &self,
        command_id: CommandId,
        processor_id: &str,
    ) -> Result<ProcessOutcome, EngineError> {
        let claimed = self.queue.claim(command_id, processor_id)?;
        self.dispatcher.process_claimed(claimed).await
    }

    /// Reset `processing` claims started at or before `older_than`; policy
    /// belongs to the external scheduler calling this.
    pub fn reclaim_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<CommandId>, EngineError> {
        Ok(self.queue.reclaim_stale(older_than)?)
    }

    /// Startup recovery pass: reset abandoned `processing` claims so the
    /// worker pool can pick them up again. The cutoff still comes from the
    /// caller (a restarting single-process deployment passes "now"; shared
    /// data directories pass whatever lease their scheduler enforces).
    pub fn recover(&self, older_than: DateTime<Utc>) -> Result<Vec<CommandId>, EngineError> {
        let recovered = self.queue.reclaim_stale(older_than)?;
        if recovered.is_empty() {
            info!("♻️ Recovery: no abandoned claims found");
        } else {
            info!(
                "♻️ Recovery: reset {} abandoned claim(s) to pending",
                recovered.len()
            );
            for command_id in &recovered {
                info!("♻️ Recovered command {}", command_id);
            }
        }
        Ok(recovered)
    }

    // ─── reads ─────────────────────────────────────────────────────────────

    pub fn get_instance(&self, address: &str) -> Result<Option<Instance>, EngineError> {
        Ok(instances::get_by_address(&self.store, address)?.map(|found| found.row))
    }

    pub fn get_account(
        &self,
        instance_id: InstanceId,
        address: &str,
    ) -> Result<Option<Versioned<Account>>, EngineError> {
        Ok(accounts::get_by_address(&self.store, instance_id, address)?)
    }

    pub fn get_transaction(
        &self,
        instance_id: InstanceId,
        transaction_id: TransactionId,
    ) -> Result<Option<Versioned<Transaction>>, EngineError> {
        Ok(transactions::get(&self.store, instance_id, transaction_id)?)
    }

    pub fn get_command(&self, command_id: CommandId) -> Result<Option<Command>, EngineError> {
        Ok(commands::get_command(&self.store, command_id)?.map(|found| found.row))
    }

    pub fn get_queue_item(
        &self,
        command_id: CommandId,
    ) -> Result<Option<CommandQueueItem>, EngineError> {
        Ok(commands::get_queue_item(&self.store, command_id)?.map(|found| found.row))
    }

    pub fn list_runnable(&self, limit: usize) -> Result<Vec<CommandId>, EngineError> {
        Ok(self.queue.list_runnable(Utc::now(), limit)?)
    }

    pub fn list_dead_letters(&self) -> Result<Vec<CommandQueueItem>, EngineError> {
        Ok(commands::list_with_status(&self.store, QueueStatus::DeadLetter)?
            .into_iter()
            .map(|item| item.row)
            .collect())
    }

    pub fn balance_history(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<BalanceHistoryEntry>, EngineError> {
        Ok(transactions::list_balance_history(&self.store, account_id)?)
    }

    pub fn events_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<JournalEvent>, EngineError> {
        Ok(journal::list_for_account(&self.store, account_id)?)
    }

    pub fn events_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<JournalEvent>, EngineError> {
        Ok(journal::list_for_transaction(&self.store, transaction_id)?)
    }

    /// Recompute the core invariants for one instance (see [`crate::audit`]).
    pub fn audit(&self, instance_id: InstanceId) -> Result<crate::audit::AuditReport, EngineError> {
        Ok(crate::audit::audit_instance(&self.store, instance_id)?)
    }

    pub fn flush(&self) -> Result<(), EngineError> {
        Ok(self.store.flush()?)
    }

    /// Direct store access for tooling and tests (e.g. injecting version
    /// contention); production paths go through the typed operations above.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Direct queue access for tooling (manual claims, lifecycle surgery).
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
