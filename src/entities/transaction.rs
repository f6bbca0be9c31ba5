//! Transactions: atomic balanced movements
//!
//! A transaction groups at least two entries that must balance per currency:
//! the sum of debit values equals the sum of credit values for every currency
//! appearing across its entries. The status state machine is deliberately
//! small: `pending` may move to `posted` (finalize), `archived` (cancel), or
//! back to `pending` with rewritten entries; `posted` and `archived` are
//! terminal and a transaction in either state is never mutated again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::{AccountId, EntryId, InstanceId, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Posted,
    Archived,
}

impl TransactionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "posted" => Some(TransactionStatus::Posted),
            "archived" => Some(TransactionStatus::Archived),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Posted => "posted",
            TransactionStatus::Archived => "archived",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Posted | TransactionStatus::Archived)
    }

    /// Legal edges of the transaction state machine.
    pub fn can_transition_to(&self, to: TransactionStatus) -> bool {
        match (self, to) {
            // A pending transaction may finalize, cancel, or rewrite its entries
            (TransactionStatus::Pending, TransactionStatus::Posted) => true,
            (TransactionStatus::Pending, TransactionStatus::Archived) => true,
            (TransactionStatus::Pending, TransactionStatus::Pending) => true,
            // posted and archived are terminal
            _ => false,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the ledger an entry hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryDirection::Debit => "debit",
            EntryDirection::Credit => "credit",
        }
    }
}

/// A single leg of a transaction. Created with its transaction and never
/// mutated after the transaction leaves `pending`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    /// Non-negative value in minor units; the sign of the submitted amount is
    /// folded into `direction` during transformation.
    pub value: i64,
    pub currency: String,
    #[serde(rename = "type")]
    pub direction: EntryDirection,
}

impl Entry {
    pub fn new(
        transaction_id: TransactionId,
        account_id: AccountId,
        value: i64,
        currency: impl Into<String>,
        direction: EntryDirection,
    ) -> Self {
        Entry {
            id: Uuid::new_v4(),
            transaction_id,
            account_id,
            value,
            currency: currency.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub instance_id: InstanceId,
    pub status: TransactionStatus,
    pub entries: Vec<Entry>,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(instance_id: InstanceId, status: TransactionStatus) -> Self {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            instance_id,
            status,
            entries: Vec::new(),
            inserted_at: now,
            updated_at: now,
        }
    }
}

/// Per-currency imbalance found by [`check_balanced`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imbalance {
    pub currency: String,
    pub debits: i64,
    pub credits: i64,
}

/// Double-entry invariant: for every currency, Σ debit values = Σ credit
/// values. Returns the first offending currency.
pub fn check_balanced<'a, I>(entries: I) -> Result<(), Imbalance>
where
    I: IntoIterator<Item = (&'a str, EntryDirection, i64)>,
{
    let mut sums: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
    for (currency, direction, value) in entries {
        let slot = sums.entry(currency).or_default();
        match direction {
            EntryDirection::Debit => slot.0 += value,
            EntryDirection::Credit => slot.1 += value,
        }
    }
    for (currency, (debits, credits)) in sums {
        if debits != credits {
            return Err(Imbalance {
                currency: currency.to_string(),
                debits,
                credits,
            });
        }
    }
    Ok(())
}
