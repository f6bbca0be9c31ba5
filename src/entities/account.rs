//! Accounts: balance-bearing ledger lines
//!
//! An account accumulates value on two sides (debit and credit) in two buckets
//! (posted and pending). Which side a "positive" balance sits on is the
//! account's normal balance, derived from its type: assets and expenses are
//! debit-normal, liabilities, equity and revenue are credit-normal.
//!
//! Balances are only ever mutated through the helpers here, which are in turn
//! only called from transaction handlers inside an atomic commit with a
//! version check on the account row. The helpers keep both sides as plain
//! running sums; `available()` derives the signed net from the posted pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transaction::EntryDirection;
use super::{AccountId, InstanceId};

/// The five ledger account types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asset" => Some(AccountType::Asset),
            "liability" => Some(AccountType::Liability),
            "equity" => Some(AccountType::Equity),
            "revenue" => Some(AccountType::Revenue),
            "expense" => Some(AccountType::Expense),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Equity => "equity",
            AccountType::Revenue => "revenue",
            AccountType::Expense => "expense",
        }
    }

    /// Which side a positive balance of this account type sits on.
    pub fn normal_balance(&self) -> NormalBalance {
        match self {
            AccountType::Asset | AccountType::Expense => NormalBalance::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => {
                NormalBalance::Credit
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalBalance {
    Debit,
    Credit,
}

/// A debit/credit pair of running sums, in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancePair {
    pub debit: i64,
    pub credit: i64,
}

impl BalancePair {
    pub fn is_zero(&self) -> bool {
        self.debit == 0 && self.credit == 0
    }

    fn add(&mut self, direction: EntryDirection, value: i64) {
        match direction {
            EntryDirection::Debit => self.debit += value,
            EntryDirection::Credit => self.credit += value,
        }
    }

    fn subtract(&mut self, direction: EntryDirection, value: i64) {
        match direction {
            EntryDirection::Debit => self.debit -= value,
            EntryDirection::Credit => self.credit -= value,
        }
    }
}

/// A balance-bearing ledger line, unique on `(instance_id, address)`.
///
/// Type, currency, address and normal balance are immutable after creation;
/// only `name` and `description` may change through `update_account`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub instance_id: InstanceId,
    /// Unique within the instance, e.g. `"assets:cash"`.
    pub address: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    pub normal_balance: NormalBalance,
    pub posted: BalancePair,
    pub pending: BalancePair,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        instance_id: InstanceId,
        address: impl Into<String>,
        name: impl Into<String>,
        account_type: AccountType,
        currency: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            instance_id,
            address: address.into(),
            name: name.into(),
            account_type,
            currency: currency.into(),
            description,
            normal_balance: account_type.normal_balance(),
            posted: BalancePair::default(),
            pending: BalancePair::default(),
            inserted_at: now,
            updated_at: now,
        }
    }

    /// Signed net of the posted pair, seen from the account's normal side.
    pub fn available(&self) -> i64 {
        match self.normal_balance {
            NormalBalance::Debit => self.posted.debit - self.posted.credit,
            NormalBalance::Credit => self.posted.credit - self.posted.debit,
        }
    }

    /// Reserve balance space for a pending entry.
    pub fn apply_pending(&mut self, direction: EntryDirection, value: i64) {
        self.pending.add(direction, value);
        self.updated_at = Utc::now();
    }

    /// Undo a previous pending reservation (archive or entry rewrite).
    pub fn reverse_pending(&mut self, direction: EntryDirection, value: i64) {
        self.pending.subtract(direction, value);
        self.updated_at = Utc::now();
    }

    /// Apply an entry directly to the posted pair (posted-on-create path).
    pub fn apply_posted(&mut self, direction: EntryDirection, value: i64) {
        self.posted.add(direction, value);
        self.updated_at = Utc::now();
    }

    /// Finalize a pending entry: move its value from pending into posted.
    pub fn post_from_pending(&mut self, direction: EntryDirection, value: i64) {
        self.pending.subtract(direction, value);
        self.posted.add(direction, value);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn cash() -> Account {
        Account::new(Uuid::new_v4(), "assets:cash", "Cash", AccountType::Asset, "USD", None)
    }

    fn revenue() -> Account {
        Account::new(Uuid::new_v4(), "revenue", "Revenue", AccountType::Revenue, "USD", None)
    }

    #[test]
    fn test_normal_balance_derivation() {
        assert_eq!(AccountType::Asset.normal_balance(), NormalBalance::Debit);
        assert_eq!(AccountType::Expense.normal_balance(), NormalBalance::Debit);
        assert_eq!(AccountType::Liability.normal_balance(), NormalBalance::Credit);
        assert_eq!(AccountType::Equity.normal_balance(), NormalBalance::Credit);
        assert_eq!(AccountType::Revenue.normal_balance(), NormalBalance::Credit);
    }

    #[test]
    fn test_available_debit_normal() {
        let mut account = cash();
        account.apply_posted(EntryDirection::Debit, 500);
        account.apply_posted(EntryDirection::Credit, 120);
        assert_eq!(account.available(), 380);
    }

    #[test]
    fn test_available_credit_normal() {
        let mut account = revenue();
        account.apply_posted(EntryDirection::Credit, 500);
        account.apply_posted(EntryDirection::Debit, 120);
        assert_eq!(account.available(), 380);
    }

    #[test]
    fn test_pending_lifecycle() {
        let mut account = cash();
        account.apply_pending(EntryDirection::Debit, 100);
        assert_eq!(account.pending.debit, 100);
        assert_eq!(account.available(), 0); // pending never affects available

        account.post_from_pending(EntryDirection::Debit, 100);
        assert_eq!(account.pending.debit, 0);
        assert_eq!(account.posted.debit, 100);
        assert_eq!(account.available(), 100);
    }

    #[test]
    fn test_reverse_pending() {
        let mut account = cash();
        account.apply_pending(EntryDirection::Credit, 42);
        account.reverse_pending(EntryDirection::Credit, 42);
        assert!(account.pending.is_zero());
    }

    #[test]
    fn test_account_type_parse_round_trip() {
        for s in ["asset", "liability", "equity", "revenue", "expense"] {
            let parsed = AccountType::parse(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert_eq!(AccountType::parse("crypto"), None);
    }
}
