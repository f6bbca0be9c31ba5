//! Command dispatcher
//!
//! Routes a command to its handler and supervises the attempt: the OCC loop
//! around contended units, the per-attempt collision records, and the queue
//! transition that every outcome ends in.
//!
//! ## Save-on-error (the worker path)
//!
//! The command is already durable; whatever happens is recorded on its queue
//! item. Success marks it `processed` inside the handler's own commit.
//! Failures are mapped through the error's disposition: transient → `failed`
//! with backoff, permanent → `dead_letter`, create-predecessor not ready →
//! back to `pending` without burning a retry. OCC exhaustion lands as
//! `occ_timeout` with the canonical conflict message in the error log.
//!
//! ## No-save-on-error (the synchronous validation path)
//!
//! Nothing is persisted until the handler's unit commits; a failure returns
//! an input-shaped validation result and leaves no trace. The success path
//! persists the command, queue item (already `processed`), idempotency key
//! and side effects in one commit, identical to what the worker path would
//! have produced.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::command_map::{response, CommandMap, CommandMapErrors};
use crate::config::OccConfig;
use crate::entities::command::{Command, QueueStatus};
use crate::error::{EngineError, ErrorDisposition};
use crate::handlers::{handler_for, HandlerReport, ProcessEnv};
use crate::occ::{OccError, OccProcessor};
use crate::queue::{Claimed, CommandQueue, FailureKind};
use crate::storage::{instances, Store, StoreError};

/// Where a claimed command ended up after one processing round.
#[derive(Debug)]
pub enum ProcessOutcome {
    Processed(HandlerReport),
    /// `failed` or `occ_timeout`, claimable again after backoff.
    Retrying(QueueStatus),
    /// Create predecessor not ready; back to `pending`, retry not counted.
    RevertedToPending,
    DeadLettered,
}

#[derive(Error, Debug)]
pub enum NoSaveError {
    /// Input-shaped rejection; nothing was persisted.
    #[error("command rejected: {0}")]
    Rejected(CommandMapErrors),

    #[error(transparent)]
    Internal(EngineError),
}

pub struct Dispatcher {
    store: Arc<Store>,
    queue: Arc<CommandQueue>,
    occ: OccProcessor,
    secret: Vec<u8>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        queue: Arc<CommandQueue>,
        occ_config: OccConfig,
        secret: Vec<u8>,
    ) -> Self {
        Dispatcher {
            store,
            queue,
            occ: OccProcessor::new(occ_config),
            secret,
        }
    }

    /// Process a claimed command to a terminal-or-retryable queue state.
    pub async fn process_claimed(&self, claimed: Claimed) -> Result<ProcessOutcome, EngineError> {
        let command = claimed.command.row;
        let command_id = command.id;

        let instance = match instances::get(&self.store, command.instance_id)? {
            Some(instance) => instance.row,
            None => {
                // The tenant row vanished; transient as far as we can know
                let item = self.queue.mark_failed(
                    command_id,
                    &format!("instance {} does not exist", command.instance_id),
                    FailureKind::Failed,
                )?;
                return Ok(retry_outcome(item.status));
            }
        };

        let env = ProcessEnv {
            command,
            instance,
            persist_command: false,
            secret: self.secret.clone(),
        };
        let handler = handler_for(env.command.action);

        let mut report = None;
        let attempt = || {
            handler.execute_once(&self.store, &env).map(|out| {
                report = Some(out);
            })
        };

        let result = if handler.needs_occ() {
            self.occ
                .execute(attempt, |attempt_number, multi_error| {
                    if let Err(record_error) = self.queue.record_occ_attempt(
                        command_id,
                        attempt_number,
                        &multi_error.error.to_string(),
                    ) {
                        error!(
                            "Failed to record OCC attempt on command {}: {}",
                            command_id, record_error
                        );
                    }
                })
                .await
        } else {
            self.occ.execute_once(attempt)
        };

        match result {
            Ok(()) => {
                let report = report.unwrap_or_default();
                info!(
                    "💸 Processed {} command {} ({} transaction(s), {} account(s))",
                    env.command.action,
                    command_id,
                    report.transaction_ids.len(),
                    report.account_ids.len()
                );
                Ok(ProcessOutcome::Processed(report))
            }
            Err(OccError::Exhausted { attempts }) => {
                let message = OccError::Exhausted { attempts }.to_string();
                let item =
                    self.queue
                        .mark_failed(command_id, &message, FailureKind::OccTimeout)?;
                Ok(retry_outcome(item.status))
            }
            Err(OccError::Failed(multi_error)) => {
                match multi_error.error.disposition() {
                    ErrorDisposition::Retry => {
                        let item = self.queue.mark_failed(
                            command_id,
                            &multi_error.to_string(),
                            FailureKind::Failed,
                        )?;
                        Ok(retry_outcome(item.status))
                    }
                    ErrorDisposition::DeadLetter => {
                        self.queue
                            .mark_dead_letter(command_id, &multi_error.error.to_string())?;
                        Ok(ProcessOutcome::DeadLettered)
                    }
                    ErrorDisposition::RevertToPending => {
                        self.queue
                            .revert_to_pending(command_id, &multi_error.error.to_string())?;
                        Ok(ProcessOutcome::RevertedToPending)
                    }
                }
            }
        }
    }

    /// Validate-and-apply without persisting on failure.
    pub async fn execute_no_save(
        &self,
        map: CommandMap,
    ) -> Result<(Command, HandlerReport), NoSaveError> {
        let action = map.validate().map_err(NoSaveError::Rejected)?;

        let instance = instances::get_by_address(&self.store, &map.instance_address)
            .map_err(|err| NoSaveError::Internal(err.into()))?
            .ok_or_else(|| {
                let mut errors = CommandMapErrors::default();
                errors.add("instance_address", "does not exist");
                NoSaveError::Rejected(errors)
            })?;

        let command = Command::new(instance.row.id, action, map);
        let env = ProcessEnv {
            command: command.clone(),
            instance: instance.row,
            persist_command: true,
            secret: self.secret.clone(),
        };
        let handler = handler_for(action);

        let mut report = None;
        let attempt = || {
            handler.execute_once(&self.store, &env).map(|out| {
                report = Some(out);
            })
        };

        let result = if handler.needs_occ() {
            self.occ
                .execute(attempt, |attempt_number, _multi_error| {
                    // No queue item exists yet; the collision only gets a log line
                    debug!(
                        "OCC collision on attempt {} of no-save {} command",
                        attempt_number, action
                    );
                })
                .await
        } else {
            self.occ.execute_once(attempt)
        };

        match result {
            Ok(()) => {
                info!("💸 Executed {} command {} (no-save mode)", action, command.id);
                Ok((command, report.unwrap_or_default()))
            }
            Err(OccError::Exhausted { attempts }) => {
                Err(NoSaveError::Rejected(response::occ_exhausted(attempts)))
            }
            Err(OccError::Failed(multi_error)) => {
                if is_internal(&multi_error.error) {
                    Err(NoSaveError::Internal(multi_error.error))
                } else {
                    Err(NoSaveError::Rejected(response::map_error(
                        &env.command.command_map,
                        &multi_error,
                    )))
                }
            }
        }
    }
}

fn retry_outcome(status: QueueStatus) -> ProcessOutcome {
    match status {
        QueueStatus::DeadLetter => ProcessOutcome::DeadLettered,
        status => ProcessOutcome::Retrying(status),
    }
}

/// Infrastructure failures should not masquerade as input problems.
pub(crate) fn is_internal(error: &EngineError) -> bool {
    matches!(
        error,
        EngineError::Store(StoreError::Sled(_))
            | EngineError::Store(StoreError::Serialization(_))
            | EngineError::Store(StoreError::Corrupt { .. })
            | EngineError::Queue(_)
    )
}
