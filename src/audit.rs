//! Consistency audit
//!
//! Recomputes the engine's core invariants from durable state and reports
//! every violation found. Meant for operators (periodic verification, post-
//! incident checks) and for tests that want to assert "the books are
//! coherent" without enumerating every row themselves.
//!
//! Checked invariants:
//! 1. Every transaction balances per currency (Σ debit values = Σ credit
//!    values for each currency across its entries).
//! 2. An account's live posted/pending pairs equal the last balance-history
//!    snapshot taken for it (history and balances never drift apart, since
//!    they are written in the same commit).
//! 3. Every balance-history snapshot's `available` agrees with its own
//!    posted pair under the account's normal balance.
//! 4. Every `processed` command of the instance has at least one journal
//!    event (side effects and their audit record commit together).
//!
//! The audit is read-only and tolerant of concurrent writers: it reads each
//! row once and never blocks the commit path. Under active load a transient
//! mismatch between two independently read rows is possible; run it on a
//! quiet instance when exactness matters.

use serde::Serialize;
use tracing::{debug, warn};

use crate::entities::account::NormalBalance;
use crate::entities::transaction::check_balanced;
use crate::entities::{AccountId, CommandId, InstanceId, QueueStatus, TransactionId};
use crate::storage::store::Result;
use crate::storage::{accounts, commands, journal, transactions, Store};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum AuditFinding {
    /// A transaction whose entries do not balance for `currency`.
    UnbalancedTransaction {
        transaction_id: TransactionId,
        currency: String,
        debits: i64,
        credits: i64,
    },
    /// Live account balances disagree with the latest history snapshot.
    HistoryDrift {
        account_id: AccountId,
        field: &'static str,
        live: i64,
        snapshot: i64,
    },
    /// A history snapshot whose `available` does not follow from its posted
    /// pair and the account's normal balance.
    SnapshotAvailableMismatch {
        account_id: AccountId,
        recorded: i64,
        recomputed: i64,
    },
    /// A processed command with no journal event.
    ProcessedCommandWithoutEvent { command_id: CommandId },
}

#[derive(Debug, Default, Serialize)]
pub struct AuditReport {
    pub accounts_checked: usize,
    pub transactions_checked: usize,
    pub commands_checked: usize,
    pub findings: Vec<AuditFinding>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Audit one instance's books.
pub fn audit_instance(store: &Store, instance_id: InstanceId) -> Result<AuditReport> {
    let mut report = AuditReport::default();

    for transaction in transactions::list(store, instance_id)? {
        report.transactions_checked += 1;
        let entries = transaction
            .row
            .entries
            .iter()
            .map(|entry| (entry.currency.as_str(), entry.direction, entry.value));
        if let Err(imbalance) = check_balanced(entries) {
            report.findings.push(AuditFinding::UnbalancedTransaction {
                transaction_id: transaction.row.id,
                currency: imbalance.currency,
                debits: imbalance.debits,
                credits: imbalance.credits,
            });
        }
    }

    for account in accounts::list(store, instance_id)? {
        report.accounts_checked += 1;
        let history = transactions::list_balance_history(store, account.row.id)?;

        for snapshot in &history {
            let recomputed = match account.row.normal_balance {
                NormalBalance::Debit => snapshot.posted.debit - snapshot.posted.credit,
                NormalBalance::Credit => snapshot.posted.credit - snapshot.posted.debit,
            };
            if snapshot.available != recomputed {
                report.findings.push(AuditFinding::SnapshotAvailableMismatch {
                    account_id: account.row.id,
                    recorded: snapshot.available,
                    recomputed,
                });
            }
        }

        if let Some(last) = history.last() {
            for (field, live, snapshot) in [
                ("posted.debit", account.row.posted.debit, last.posted.debit),
                ("posted.credit", account.row.posted.credit, last.posted.credit),
                ("pending.debit", account.row.pending.debit, last.pending.debit),
                ("pending.credit", account.row.pending.credit, last.pending.credit),
            ] {
                if live != snapshot {
                    report.findings.push(AuditFinding::HistoryDrift {
                        account_id: account.row.id,
                        field,
                        live,
                        snapshot,
                    });
                }
            }
        }
    }

    let journaled = journal::command_ids_with_events(store, instance_id)?;
    for command in commands::list_for_instance(store, instance_id)? {
        report.commands_checked += 1;
        let item = match commands::get_queue_item(store, command.row.id)? {
            Some(item) => item,
            None => continue,
        };
        if item.row.status == QueueStatus::Processed && !journaled.contains(&command.row.id) {
            report.findings.push(AuditFinding::ProcessedCommandWithoutEvent {
                command_id: command.row.id,
            });
        }
    }

    if report.is_clean() {
        debug!(
            "🔍 Audit clean: {} account(s), {} transaction(s), {} command(s)",
            report.accounts_checked, report.transactions_checked, report.commands_checked
        );
    } else {
        warn!(
            "Audit found {} violation(s) on instance {}",
            report.findings.len(),
            instance_id
        );
    }
    Ok(report)
}
