//! Append-only balance snapshots
//!
//! One row per entry application: whenever an entry changes an account's
//! balances (reservation, posting, reversal), the post-application state is
//! captured here. The history is never rewritten; invariant checks recompute
//! an account's balances by folding its history forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::{Account, BalancePair};
use super::{AccountId, EntryId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceHistoryEntry {
    pub id: Uuid,
    pub entry_id: EntryId,
    pub account_id: AccountId,
    pub posted: BalancePair,
    pub pending: BalancePair,
    pub available: i64,
    pub inserted_at: DateTime<Utc>,
}

impl BalanceHistoryEntry {
    /// Snapshot `account` immediately after applying `entry_id`.
    pub fn capture(entry_id: EntryId, account: &Account) -> Self {
        BalanceHistoryEntry {
            id: Uuid::new_v4(),
            entry_id,
            account_id: account.id,
            posted: account.posted,
            pending: account.pending,
            available: account.available(),
            inserted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::account::AccountType;
    use crate::entities::transaction::EntryDirection;

    #[test]
    fn test_capture_matches_account_state() {
        let mut account = Account::new(
            Uuid::new_v4(),
            "assets:cash",
            "Cash",
            AccountType::Asset,
            "USD",
            None,
        );
        account.apply_pending(EntryDirection::Debit, 250);

        let entry_id = Uuid::new_v4();
        let snapshot = BalanceHistoryEntry::capture(entry_id, &account);

        assert_eq!(snapshot.entry_id, entry_id);
        assert_eq!(snapshot.account_id, account.id);
        assert_eq!(snapshot.pending.debit, 250);
        assert_eq!(snapshot.posted, BalancePair::default());
        assert_eq!(snapshot.available, account.available());
    }
}
