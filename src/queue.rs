//! Command Queue: durable lifecycle for external requests
//!
//! Every accepted command is persisted exactly once (enqueue), handed to one
//! worker at a time (claim), and driven to a terminal state (processed or
//! dead_letter). This module owns the full lifecycle:
//!
//! ```text
//! enqueue ─▶ pending ─claim─▶ processing ─▶ processed
//!               ▲                 │
//!               │ revert          ├─▶ failed ──────┐ (claim after
//!               └─────────────────┤                │  next_retry_after)
//!                                 ├─▶ occ_timeout ─┘
//!                                 └─▶ dead_letter
//! ```
//!
//! ## Enqueue
//!
//! One atomic unit of work: validate the command map, resolve the instance,
//! claim the idempotency key (duplicates rejected by the unique index),
//! insert the command with its pending queue item, and for pending-payload
//! transaction creates insert the pending-transaction lookup. Either all of
//! it commits or none.
//!
//! ## Claim
//!
//! A compare-and-set on the queue item's row version: load, check that the
//! status is claimable and the retry delay has elapsed, then write the
//! `processing` row expecting the loaded version. A concurrent claimer loses
//! the CAS and gets `AlreadyClaimed`. A claim is a logical lease with no
//! expiry; `reclaim_stale` exists for external schedulers to reset items
//! whose worker died.
//!
//! ## Retry accounting
//!
//! `mark_failed` increments `retry_count` for handler failures and promotes
//! to `dead_letter` once `max_retries` is reached. OCC collisions are logged
//! per attempt (incrementing `occ_retry_count` without a status change); only
//! OCC exhaustion transitions the item, to `occ_timeout`, which is claimable
//! again after backoff and shares the same `retry_count` budget. Reverting to
//! `pending` (create predecessor not yet processed) never touches either
//! counter.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command_map::CommandMap;
use crate::config::QueueConfig;
use crate::entities::command::{Command, CommandAction, CommandQueueItem, QueueStatus};
use crate::entities::{CommandId, InstanceId};
use crate::error::EngineError;
use crate::idempotency::derive_key_hash;
use crate::storage::pending::PendingTransactionLookup;
use crate::storage::{
    commands, idempotency, instances, pending, Multi, MultiError, StepName, Store, StoreError,
    Versioned,
};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("command not found: {0}")]
    CommandNotFound(CommandId),

    #[error("queue item is not claimable (status: {0})")]
    NotClaimable(QueueStatus),

    #[error("queue item already claimed by another processor")]
    AlreadyClaimed,

    #[error("illegal queue transition: {from} -> {to}")]
    IllegalTransition {
        from: QueueStatus,
        to: QueueStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which retry-eligible failure state a handler error maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Failed,
    OccTimeout,
}

/// A successfully claimed command: the worker owns it until it transitions
/// the queue item again.
#[derive(Debug, Clone)]
pub struct Claimed {
    pub command: Versioned<Command>,
    pub queue_item: Versioned<CommandQueueItem>,
}

pub struct CommandQueue {
    store: Arc<Store>,
    config: QueueConfig,
    secret: Vec<u8>,
}

struct EnqueueCtx {
    map: CommandMap,
    action: Option<CommandAction>,
    instance_id: Option<InstanceId>,
    command: Option<Command>,
}

impl CommandQueue {
    pub fn new(store: Arc<Store>, config: QueueConfig, secret: Vec<u8>) -> Self {
        CommandQueue {
            store,
            config,
            secret,
        }
    }

    /// Persist one external request atomically. Returns the stored command,
    /// or the failing step (validation, unknown instance, idempotency
    /// duplicate) with nothing written.
    pub fn enqueue(&self, map: CommandMap) -> Result<Command, MultiError> {
        let mut ctx = EnqueueCtx {
            map,
            action: None,
            instance_id: None,
            command: None,
        };
        let secret = self.secret.clone();

        Multi::new()
            .step(StepName::InputCommandMap, |_store, _writes, ctx: &mut EnqueueCtx| {
                ctx.action = Some(ctx.map.validate().map_err(EngineError::Invalid)?);
                Ok(())
            })
            .step(StepName::Instance, |store, _writes, ctx: &mut EnqueueCtx| {
                let instance = instances::get_by_address(store, &ctx.map.instance_address)?
                    .ok_or_else(|| {
                        EngineError::InstanceNotFound(ctx.map.instance_address.clone())
                    })?;
                ctx.instance_id = Some(instance.row.id);
                Ok(())
            })
            .step(StepName::Idempotency, move |_store, writes, ctx: &mut EnqueueCtx| {
                let action = ctx.action.expect("set by input_command_map step");
                let instance_id = ctx.instance_id.expect("set by instance step");
                let key_hash = derive_key_hash(
                    &secret,
                    action,
                    &ctx.map.source,
                    &ctx.map.source_idempk,
                    ctx.map.update_idempk.as_deref(),
                );
                idempotency::stage_insert(writes, instance_id, &key_hash)?;
                Ok(())
            })
            .step(StepName::NewCommand, |_store, writes, ctx: &mut EnqueueCtx| {
                let action = ctx.action.expect("set by input_command_map step");
                let instance_id = ctx.instance_id.expect("set by instance step");
                let command = Command::new(instance_id, action, ctx.map.clone());
                let item = CommandQueueItem::new(command.id);
                commands::stage_new_command(writes, &command, &item)?;
                ctx.command = Some(command);
                Ok(())
            })
            .step(
                StepName::PendingTransactionLookup,
                |_store, writes, ctx: &mut EnqueueCtx| {
                    let command = ctx.command.as_ref().expect("set by new_command step");
                    if command.action == CommandAction::CreateTransaction
                        && pending_payload(&ctx.map)
                    {
                        pending::stage_insert(
                            writes,
                            &PendingTransactionLookup {
                                instance_id: command.instance_id,
                                source: command.source.clone(),
                                source_idempk: command.source_idempk.clone(),
                                command_id: command.id,
                                transaction_id: None,
                            },
                        )?;
                    }
                    Ok(())
                },
            )
            .run(&self.store, &mut ctx)?;

        let command = ctx.command.expect("enqueue multi succeeded");
        info!(
            "📥 Enqueued {} command {} ({}:{})",
            command.action, command.id, command.source, command.source_idempk
        );
        Ok(command)
    }

    /// Atomically move a claimable queue item to `processing`.
    pub fn claim(&self, command_id: CommandId, processor_id: &str) -> Result<Claimed, QueueError> {
        self.claim_at(command_id, processor_id, Utc::now())
    }

    pub fn claim_at(
        &self,
        command_id: CommandId,
        processor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Claimed, QueueError> {
        let item = commands::get_queue_item(&self.store, command_id)?
            .ok_or(QueueError::CommandNotFound(command_id))?;

        if !item.row.status.is_claimable() {
            return Err(QueueError::NotClaimable(item.row.status));
        }
        if !item.row.is_claimable_at(now) {
            return Err(QueueError::NotClaimable(item.row.status));
        }

        let mut claimed_item = item.row.clone();
        claimed_item.status = QueueStatus::Processing;
        claimed_item.processor_id = Some(processor_id.to_string());
        claimed_item.processing_started_at = Some(now);
        claimed_item.updated_at = now;

        let mut writes = crate::storage::WriteSet::new();
        commands::stage_queue_item_update(&mut writes, &claimed_item, item.row_version)?;
        match self.store.commit(writes) {
            Ok(()) => {}
            Err(StoreError::StaleVersion { .. }) => return Err(QueueError::AlreadyClaimed),
            Err(err) => return Err(err.into()),
        }

        let command = commands::get_command(&self.store, command_id)?
            .ok_or(QueueError::CommandNotFound(command_id))?;
        debug!("🔒 Claimed command {} for {}", command_id, processor_id);

        Ok(Claimed {
            command,
            queue_item: Versioned {
                row_version: item.row_version + 1,
                row: claimed_item,
            },
        })
    }

    /// Record a handler failure: append the reason, bump `retry_count`, and
    /// either schedule a retry (`failed` / `occ_timeout`) or promote to
    /// `dead_letter` once the budget is spent.
    pub fn mark_failed(
        &self,
        command_id: CommandId,
        reason: &str,
        kind: FailureKind,
    ) -> Result<CommandQueueItem, QueueError> {
        let now = Utc::now();
        self.transition(command_id, |item| {
            item.record_error(reason);
            item.retry_count += 1;
            if item.retry_count >= self.config.max_retries {
                item.status = QueueStatus::DeadLetter;
                item.next_retry_after = None;
                item.processing_completed_at = Some(now);
                warn!(
                    "Command {} dead-lettered after {} retries: {}",
                    command_id, item.retry_count, reason
                );
            } else {
                item.status = match kind {
                    FailureKind::Failed => QueueStatus::Failed,
                    FailureKind::OccTimeout => QueueStatus::OccTimeout,
                };
                item.next_retry_after = Some(now + self.retry_backoff(item.retry_count));
                debug!(
                    "Command {} marked {} (retry {} of {}): {}",
                    command_id, item.status, item.retry_count, self.config.max_retries, reason
                );
            }
            Ok(())
        })
    }

    /// Terminal failure with no retry budget consulted.
    pub fn mark_dead_letter(
        &self,
        command_id: CommandId,
        reason: &str,
    ) -> Result<CommandQueueItem, QueueError> {
        let now = Utc::now();
        self.transition(command_id, |item| {
            item.record_error(reason);
            item.status = QueueStatus::DeadLetter;
            item.next_retry_after = None;
            item.processing_completed_at = Some(now);
            warn!("Command {} dead-lettered: {}", command_id, reason);
            Ok(())
        })
    }

    /// Put an update command back to `pending` because its create
    /// predecessor has not finished. Does not count against `retry_count`.
    pub fn revert_to_pending(
        &self,
        command_id: CommandId,
        reason: &str,
    ) -> Result<CommandQueueItem, QueueError> {
        let now = Utc::now();
        self.transition(command_id, |item| {
            item.record_error(reason);
            item.status = QueueStatus::Pending;
            // Give the predecessor one retry interval to make progress
            item.next_retry_after =
                Some(now + Duration::milliseconds(self.config.retry_interval_ms as i64));
            item.processor_id = None;
            item.processing_started_at = None;
            debug!("Command {} reverted to pending: {}", command_id, reason);
            Ok(())
        })
    }

    /// Per-attempt OCC collision record: append the error and count the
    /// attempt, without transitioning the status.
    pub fn record_occ_attempt(
        &self,
        command_id: CommandId,
        attempt: u32,
        reason: &str,
    ) -> Result<CommandQueueItem, QueueError> {
        let item = commands::get_queue_item(&self.store, command_id)?
            .ok_or(QueueError::CommandNotFound(command_id))?;
        let mut updated = item.row.clone();
        updated.record_error(format!("OCC conflict on attempt {}: {}", attempt, reason));
        updated.occ_retry_count += 1;

        let mut writes = crate::storage::WriteSet::new();
        commands::stage_queue_item_update(&mut writes, &updated, item.row_version)?;
        self.store.commit(writes)?;
        Ok(updated)
    }

    /// Mark a claimed command fully processed.
    pub fn mark_processed(&self, command_id: CommandId) -> Result<CommandQueueItem, QueueError> {
        let now = Utc::now();
        self.transition(command_id, |item| {
            item.status = QueueStatus::Processed;
            item.next_retry_after = None;
            item.processing_completed_at = Some(now);
            Ok(())
        })
    }

    /// Reset `processing` items whose claim started at or before
    /// `older_than`. Policy (lease length, scheduling) belongs to the
    /// caller; this is only the mechanism. Returns the affected command ids.
    pub fn reclaim_stale(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<CommandId>, QueueError> {
        let mut reclaimed = Vec::new();
        for item in commands::list_with_status(&self.store, QueueStatus::Processing)? {
            let started_at = match item.row.processing_started_at {
                Some(started_at) if started_at <= older_than => started_at,
                _ => continue,
            };
            let command_id = item.row.command_id;
            let mut updated = item.row.clone();
            updated.record_error(format!(
                "reclaimed stale claim held by {} since {}",
                updated.processor_id.as_deref().unwrap_or("unknown"),
                started_at
            ));
            updated.status = QueueStatus::Pending;
            updated.next_retry_after = None;
            updated.processor_id = None;
            updated.processing_started_at = None;

            let mut writes = crate::storage::WriteSet::new();
            commands::stage_queue_item_update(&mut writes, &updated, item.row_version)?;
            match self.store.commit(writes) {
                Ok(()) => {
                    warn!("Reclaimed stale processing claim on command {}", command_id);
                    reclaimed.push(command_id);
                }
                // Lost a race with the worker actually finishing; leave it be
                Err(StoreError::StaleVersion { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(reclaimed)
    }

    /// Commands whose queue items may be claimed right now.
    pub fn list_runnable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CommandId>, QueueError> {
        Ok(commands::list_runnable(&self.store, now, limit)?)
    }

    /// Exponential backoff with jitter: `base * 2^retry_count`, capped, plus
    /// up to 25% random spread so retries from one incident fan out.
    fn retry_backoff(&self, retry_count: u32) -> Duration {
        let base = self.config.retry_interval_ms;
        let exponential = base.saturating_mul(1u64 << retry_count.min(20));
        let capped = exponential.min(self.config.retry_backoff_cap_ms);
        let jitter = if capped == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=capped / 4)
        };
        Duration::milliseconds((capped + jitter) as i64)
    }

    fn transition<F>(
        &self,
        command_id: CommandId,
        mutate: F,
    ) -> Result<CommandQueueItem, QueueError>
    where
        F: FnOnce(&mut CommandQueueItem) -> Result<(), QueueError>,
    {
        let item = commands::get_queue_item(&self.store, command_id)?
            .ok_or(QueueError::CommandNotFound(command_id))?;
        let from = item.row.status;
        let mut updated = item.row.clone();
        mutate(&mut updated)?;
        updated.updated_at = Utc::now();

        if updated.status != from && !from.can_transition_to(updated.status) {
            return Err(QueueError::IllegalTransition {
                from,
                to: updated.status,
            });
        }

        let mut writes = crate::storage::WriteSet::new();
        commands::stage_queue_item_update(&mut writes, &updated, item.row_version)?;
        self.store.commit(writes)?;
        Ok(updated)
    }
}

fn pending_payload(map: &CommandMap) -> bool {
    map.transaction_data()
        .and_then(|data| data.status.as_deref())
        == Some("pending")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_map::{EntryData, Payload, TransactionData};
    use crate::entities::account::{Account, AccountType};
    use crate::storage::accounts;
    use tempfile::TempDir;

    fn sample_map(source_idempk: &str) -> CommandMap {
        CommandMap {
            action: "create_transaction".into(),
            instance_address: "acme".into(),
            source: "billing".into(),
            source_idempk: source_idempk.into(),
            update_idempk: None,
            update_source: None,
            payload: Payload::Transaction(TransactionData {
                status: Some("pending".into()),
                entries: vec![
                    EntryData {
                        account_address: Some("cash".into()),
                        amount: Some(100),
                        currency: Some("USD".into()),
                    },
                    EntryData {
                        account_address: Some("revenue".into()),
                        amount: Some(100),
                        currency: Some("USD".into()),
                    },
                ],
            }),
        }
    }

    fn setup() -> (CommandQueue, Arc<Store>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(temp_dir.path()).unwrap());
        let instance = instances::create(&store, "acme").unwrap();
        for (address, account_type) in [("cash", AccountType::Asset), ("revenue", AccountType::Revenue)] {
            let account = Account::new(instance.id, address, address, account_type, "USD", None);
            let mut writes = crate::storage::WriteSet::new();
            accounts::stage_create(&mut writes, &account).unwrap();
            store.commit(writes).unwrap();
        }
        let config = QueueConfig {
            max_retries: 3,
            retry_interval_ms: 0,
            retry_backoff_cap_ms: 0,
        };
        let queue = CommandQueue::new(store.clone(), config, b"test-secret".to_vec());
        (queue, store, temp_dir)
    }

    #[test]
    fn test_enqueue_persists_command_and_lookup() {
        let (queue, store, _temp_dir) = setup();
        let command = queue.enqueue(sample_map("inv-1")).unwrap();

        let stored = commands::get_command(&store, command.id).unwrap().unwrap();
        assert_eq!(stored.row.source_idempk, "inv-1");

        let item = commands::get_queue_item(&store, command.id).unwrap().unwrap();
        assert_eq!(item.row.status, QueueStatus::Pending);

        let lookup = pending::get(&store, command.instance_id, "billing", "inv-1")
            .unwrap()
            .unwrap();
        assert_eq!(lookup.row.command_id, command.id);
        assert_eq!(lookup.row.transaction_id, None);
    }

    #[test]
    fn test_enqueue_duplicate_fails_on_idempotency_step() {
        let (queue, _store, _temp_dir) = setup();
        queue.enqueue(sample_map("inv-1")).unwrap();
        let err = queue.enqueue(sample_map("inv-1")).unwrap_err();
        assert_eq!(err.step, StepName::Idempotency);
    }

    #[test]
    fn test_enqueue_unknown_instance() {
        let (queue, _store, _temp_dir) = setup();
        let mut map = sample_map("inv-1");
        map.instance_address = "ghost".into();
        let err = queue.enqueue(map).unwrap_err();
        assert_eq!(err.step, StepName::Instance);
        assert!(matches!(err.error, EngineError::InstanceNotFound(_)));
    }

    #[test]
    fn test_enqueue_invalid_map_writes_nothing() {
        let (queue, store, _temp_dir) = setup();
        let mut map = sample_map("inv-1");
        map.action = "mint_money".into();
        let err = queue.enqueue(map).unwrap_err();
        assert_eq!(err.step, StepName::InputCommandMap);
        assert!(commands::list_runnable(&store, Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_claim_then_second_claim_rejected() {
        let (queue, _store, _temp_dir) = setup();
        let command = queue.enqueue(sample_map("inv-1")).unwrap();

        let claimed = queue.claim(command.id, "worker-1").unwrap();
        assert_eq!(claimed.queue_item.row.status, QueueStatus::Processing);
        assert_eq!(claimed.queue_item.row.processor_id.as_deref(), Some("worker-1"));

        match queue.claim(command.id, "worker-2") {
            Err(QueueError::NotClaimable(QueueStatus::Processing)) => {}
            other => panic!("expected not claimable, got {:?}", other),
        }
    }

    #[test]
    fn test_mark_failed_until_dead_letter() {
        let (queue, _store, _temp_dir) = setup();
        let command = queue.enqueue(sample_map("inv-1")).unwrap();

        for expected_retry in 1..=2u32 {
            queue.claim(command.id, "worker-1").unwrap();
            let item = queue
                .mark_failed(command.id, "some_accounts_not_found: ghost", FailureKind::Failed)
                .unwrap();
            assert_eq!(item.retry_count, expected_retry);
            assert_eq!(item.status, QueueStatus::Failed);
            assert!(item.next_retry_after.is_some());
        }

        queue.claim(command.id, "worker-1").unwrap();
        let item = queue
            .mark_failed(command.id, "some_accounts_not_found: ghost", FailureKind::Failed)
            .unwrap();
        assert_eq!(item.retry_count, 3);
        assert_eq!(item.status, QueueStatus::DeadLetter);
        assert_eq!(item.next_retry_after, None);
        assert_eq!(item.errors.len(), 3);

        // Terminal: no more claims
        assert!(matches!(
            queue.claim(command.id, "worker-1"),
            Err(QueueError::NotClaimable(QueueStatus::DeadLetter))
        ));
    }

    #[test]
    fn test_revert_to_pending_preserves_retry_count() {
        let (queue, _store, _temp_dir) = setup();
        let command = queue.enqueue(sample_map("inv-1")).unwrap();
        queue.claim(command.id, "worker-1").unwrap();

        let item = queue
            .revert_to_pending(command.id, "create command not processed yet")
            .unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.errors.len(), 1);
        assert!(item.next_retry_after.is_some());
    }

    #[test]
    fn test_occ_attempts_count_without_transition() {
        let (queue, _store, _temp_dir) = setup();
        let command = queue.enqueue(sample_map("inv-1")).unwrap();
        queue.claim(command.id, "worker-1").unwrap();

        for attempt in 1..=3u32 {
            let item = queue
                .record_occ_attempt(command.id, attempt, "stale row version on account/x")
                .unwrap();
            assert_eq!(item.status, QueueStatus::Processing);
            assert_eq!(item.occ_retry_count, attempt);
        }

        let item = queue
            .mark_failed(
                command.id,
                "OCC conflict: Max number of 3 retries reached",
                FailureKind::OccTimeout,
            )
            .unwrap();
        assert_eq!(item.status, QueueStatus::OccTimeout);
        assert_eq!(item.occ_retry_count, 3);
        assert_eq!(item.retry_count, 1);
    }

    #[test]
    fn test_reclaim_stale_resets_old_claims_only() {
        let (queue, _store, _temp_dir) = setup();
        let command = queue.enqueue(sample_map("inv-1")).unwrap();
        queue.claim(command.id, "worker-1").unwrap();

        // Claim just started: a cutoff in the past reclaims nothing
        let reclaimed = queue.reclaim_stale(Utc::now() - Duration::minutes(5)).unwrap();
        assert!(reclaimed.is_empty());

        let reclaimed = queue.reclaim_stale(Utc::now()).unwrap();
        assert_eq!(reclaimed, vec![command.id]);

        let claimed = queue.claim(command.id, "worker-2").unwrap();
        assert_eq!(claimed.queue_item.row.retry_count, 0);
    }

    #[test]
    fn test_concurrent_claims_one_winner() {
        let (queue, _store, _temp_dir) = setup();
        let command = queue.enqueue(sample_map("inv-1")).unwrap();
        let queue = Arc::new(queue);

        let mut handles = Vec::new();
        for worker in 0..8 {
            let queue = queue.clone();
            let command_id = command.id;
            handles.push(std::thread::spawn(move || {
                queue.claim(command_id, &format!("worker-{}", worker)).is_ok()
            }));
        }
        let wins: usize = handles
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_posted_create_skips_pending_lookup() {
        let (queue, store, _temp_dir) = setup();
        let mut map = sample_map("inv-posted");
        if let Payload::Transaction(data) = &mut map.payload {
            data.status = Some("posted".into());
        }
        let command = queue.enqueue(map).unwrap();
        assert!(pending::get(&store, command.instance_id, "billing", "inv-posted")
            .unwrap()
            .is_none());
    }
}
