//! Transaction transformer
//!
//! Converts a validated transaction payload (entries referring to accounts by
//! address, amounts signed) into a store-ready draft (entries referring to
//! accounts by id, with a non-negative value and an explicit debit/credit
//! direction). Resolution happens against the submitting instance only.
//!
//! ## Direction classification
//!
//! The sign of a submitted amount is interpreted relative to the account's
//! normal balance:
//! - debit-normal account: positive → debit, negative → credit
//! - credit-normal account: positive → credit, negative → debit
//!
//! so a positive amount always moves the account toward its natural side.
//! The emitted value is `|amount|`.
//!
//! Double-entry balance is deliberately not checked here; that belongs to
//! the transaction validator applied downstream, after the draft exists.
//!
//! ## Status-only shortcut
//!
//! An empty entry list, or any archived target, skips validation and
//! resolution entirely and yields a draft with no entries. Archive semantics
//! never need the submitted entries; the stored transaction knows what to
//! reverse.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::command_map::errors::FieldErrorMap;
use crate::command_map::{EntryData, ADDRESS_RE};
use crate::entities::account::Account;
use crate::entities::currency::supported_currency;
use crate::entities::transaction::{EntryDirection, TransactionStatus};
use crate::entities::{AccountId, InstanceId, NormalBalance};
use crate::error::EngineError;
use crate::storage::{accounts, Store, Versioned};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformerError {
    #[error("invalid_entry_data: {0:?}")]
    InvalidEntryData(BTreeMap<usize, FieldErrorMap>),

    #[error("no_accounts_found")]
    NoAccountsFound,

    #[error("some_accounts_not_found: {}", missing.join(", "))]
    SomeAccountsNotFound { missing: Vec<String> },

    #[error("no_accounts_and_or_entries_provided")]
    NoAccountsAndOrEntriesProvided,

    #[error("account_entries_mismatch")]
    AccountEntriesMismatch,

    #[error("missing_entry_for_account: {address}")]
    MissingEntryForAccount { address: String },
}

/// One resolved entry leg, still keyed by address for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedEntry {
    pub account_address: String,
    pub account_id: AccountId,
    pub value: i64,
    pub currency: String,
    pub direction: EntryDirection,
}

/// A store-ready transaction draft plus the account rows (with versions)
/// that resolution read, so the handler can mutate balances against the
/// exact versions the draft was built from.
#[derive(Debug)]
pub struct TransformOutput {
    pub instance_id: InstanceId,
    pub status: TransactionStatus,
    pub entries: Vec<TransformedEntry>,
    pub accounts: BTreeMap<String, Versioned<Account>>,
}

pub fn transform(
    store: &Store,
    instance_id: InstanceId,
    status: TransactionStatus,
    entries: &[EntryData],
) -> Result<TransformOutput, EngineError> {
    // Status-only path: nothing to resolve
    if entries.is_empty() || status == TransactionStatus::Archived {
        return Ok(TransformOutput {
            instance_id,
            status,
            entries: Vec::new(),
            accounts: BTreeMap::new(),
        });
    }

    validate_entries(entries)?;

    let addresses: BTreeSet<String> = entries
        .iter()
        .filter_map(|entry| entry.account_address.clone())
        .collect();
    if addresses.is_empty() {
        return Err(TransformerError::NoAccountsAndOrEntriesProvided.into());
    }

    let (found, missing) = accounts::resolve_addresses(store, instance_id, &addresses)?;
    if found.is_empty() {
        return Err(TransformerError::NoAccountsFound.into());
    }
    if !missing.is_empty() {
        return Err(TransformerError::SomeAccountsNotFound { missing }.into());
    }
    if found.len() != addresses.len() {
        return Err(TransformerError::AccountEntriesMismatch.into());
    }
    for address in found.keys() {
        if !addresses.contains(address) {
            return Err(TransformerError::MissingEntryForAccount {
                address: address.clone(),
            }
            .into());
        }
    }

    let mut transformed = Vec::with_capacity(entries.len());
    let mut currency_errors: BTreeMap<usize, FieldErrorMap> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        let (address, amount, currency) = match (&entry.account_address, entry.amount, &entry.currency) {
            (Some(address), Some(amount), Some(currency)) => (address, amount, currency),
            // validate_entries already rejected anything incomplete
            _ => return Err(TransformerError::AccountEntriesMismatch.into()),
        };
        let account = match found.get(address) {
            Some(account) => account,
            None => {
                return Err(TransformerError::MissingEntryForAccount {
                    address: address.clone(),
                }
                .into())
            }
        };
        if *currency != account.row.currency {
            currency_errors
                .entry(index)
                .or_default()
                .entry("currency".into())
                .or_default()
                .push("does not match the account currency".into());
            continue;
        }
        transformed.push(TransformedEntry {
            account_address: address.clone(),
            account_id: account.row.id,
            value: amount.abs(),
            currency: currency.clone(),
            direction: classify(account.row.normal_balance, amount),
        });
    }
    if !currency_errors.is_empty() {
        return Err(TransformerError::InvalidEntryData(currency_errors).into());
    }

    Ok(TransformOutput {
        instance_id,
        status,
        entries: transformed,
        accounts: found,
    })
}

fn classify(normal_balance: NormalBalance, amount: i64) -> EntryDirection {
    match (normal_balance, amount >= 0) {
        (NormalBalance::Debit, true) | (NormalBalance::Credit, false) => EntryDirection::Debit,
        (NormalBalance::Debit, false) | (NormalBalance::Credit, true) => EntryDirection::Credit,
    }
}

fn validate_entries(entries: &[EntryData]) -> Result<(), TransformerError> {
    let mut errors: BTreeMap<usize, FieldErrorMap> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        let mut fields = FieldErrorMap::new();
        match &entry.account_address {
            Some(address) if ADDRESS_RE.is_match(address) => {}
            Some(_) => {
                fields.entry("account_address".into()).or_default().push("has invalid format".into())
            }
            None => fields.entry("account_address".into()).or_default().push("is required".into()),
        }
        match entry.amount {
            Some(0) => {
                fields.entry("amount".into()).or_default().push("must be a non-zero integer".into())
            }
            Some(_) => {}
            None => fields.entry("amount".into()).or_default().push("is required".into()),
        }
        match &entry.currency {
            Some(currency) if supported_currency(currency) => {}
            Some(_) => fields
                .entry("currency".into())
                .or_default()
                .push("is not a supported currency".into()),
            None => fields.entry("currency".into()).or_default().push("is required".into()),
        }
        if !fields.is_empty() {
            errors.insert(index, fields);
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TransformerError::InvalidEntryData(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::account::AccountType;
    use crate::storage::WriteSet;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn entry(address: &str, amount: i64, currency: &str) -> EntryData {
        EntryData {
            account_address: Some(address.into()),
            amount: Some(amount),
            currency: Some(currency.into()),
        }
    }

    fn seed_account(
        store: &Store,
        instance_id: InstanceId,
        address: &str,
        account_type: AccountType,
        currency: &str,
    ) {
        let account = Account::new(instance_id, address, address, account_type, currency, None);
        let mut writes = WriteSet::new();
        accounts::stage_create(&mut writes, &account).unwrap();
        store.commit(writes).unwrap();
    }

    fn setup() -> (Store, TempDir, InstanceId) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path()).unwrap();
        let instance_id = Uuid::new_v4();
        seed_account(&store, instance_id, "cash", AccountType::Asset, "USD");
        seed_account(&store, instance_id, "revenue", AccountType::Revenue, "USD");
        (store, temp_dir, instance_id)
    }

    #[test]
    fn test_classification_by_normal_balance() {
        let (store, _temp_dir, instance_id) = setup();
        let output = transform(
            &store,
            instance_id,
            TransactionStatus::Pending,
            &[entry("cash", 100, "USD"), entry("revenue", 100, "USD")],
        )
        .unwrap();

        assert_eq!(output.entries.len(), 2);
        let cash = &output.entries[0];
        assert_eq!(cash.account_address, "cash");
        assert_eq!(cash.direction, EntryDirection::Debit);
        assert_eq!(cash.value, 100);
        let revenue = &output.entries[1];
        assert_eq!(revenue.direction, EntryDirection::Credit);
    }

    #[test]
    fn test_negative_amounts_flip_direction_and_emit_abs() {
        let (store, _temp_dir, instance_id) = setup();
        let output = transform(
            &store,
            instance_id,
            TransactionStatus::Pending,
            &[entry("cash", -100, "USD"), entry("revenue", -100, "USD")],
        )
        .unwrap();

        assert_eq!(output.entries[0].direction, EntryDirection::Credit);
        assert_eq!(output.entries[0].value, 100);
        assert_eq!(output.entries[1].direction, EntryDirection::Debit);
    }

    #[test]
    fn test_status_only_paths_skip_resolution() {
        let (store, _temp_dir, instance_id) = setup();
        let output =
            transform(&store, instance_id, TransactionStatus::Posted, &[]).unwrap();
        assert!(output.entries.is_empty());

        // Archived ignores entries entirely, even broken ones
        let output = transform(
            &store,
            instance_id,
            TransactionStatus::Archived,
            &[entry("ghost", 0, "DOGE")],
        )
        .unwrap();
        assert!(output.entries.is_empty());
    }

    #[test]
    fn test_some_accounts_not_found() {
        let (store, _temp_dir, instance_id) = setup();
        let err = transform(
            &store,
            instance_id,
            TransactionStatus::Pending,
            &[entry("cash", 100, "USD"), entry("ghost:account", 100, "USD")],
        )
        .unwrap_err();
        match err {
            EngineError::Transformer(TransformerError::SomeAccountsNotFound { missing }) => {
                assert_eq!(missing, vec!["ghost:account".to_string()]);
            }
            other => panic!("expected some_accounts_not_found, got {:?}", other),
        }
    }

    #[test]
    fn test_no_accounts_found() {
        let (store, _temp_dir, instance_id) = setup();
        let err = transform(
            &store,
            instance_id,
            TransactionStatus::Pending,
            &[entry("ghost:a", 100, "USD"), entry("ghost:b", 100, "USD")],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Transformer(TransformerError::NoAccountsFound)
        ));
    }

    #[test]
    fn test_invalid_entry_data_is_indexed() {
        let (store, _temp_dir, instance_id) = setup();
        let err = transform(
            &store,
            instance_id,
            TransactionStatus::Pending,
            &[entry("cash", 100, "USD"), entry("revenue", 0, "DOGE")],
        )
        .unwrap_err();
        match err {
            EngineError::Transformer(TransformerError::InvalidEntryData(errors)) => {
                assert!(!errors.contains_key(&0));
                let fields = &errors[&1];
                assert!(fields.contains_key("amount"));
                assert!(fields.contains_key("currency"));
            }
            other => panic!("expected invalid_entry_data, got {:?}", other),
        }
    }

    #[test]
    fn test_currency_mismatch_with_account() {
        let (store, _temp_dir, instance_id) = setup();
        seed_account(&store, instance_id, "eur:cash", AccountType::Asset, "EUR");
        let err = transform(
            &store,
            instance_id,
            TransactionStatus::Pending,
            &[entry("eur:cash", 100, "USD"), entry("revenue", 100, "USD")],
        )
        .unwrap_err();
        match err {
            EngineError::Transformer(TransformerError::InvalidEntryData(errors)) => {
                assert!(errors[&0].contains_key("currency"));
            }
            other => panic!("expected invalid_entry_data, got {:?}", other),
        }
    }

    #[test]
    fn test_resolution_is_instance_scoped() {
        let (store, _temp_dir, instance_id) = setup();
        let other_instance = Uuid::new_v4();
        let err = transform(
            &store,
            other_instance,
            TransactionStatus::Pending,
            &[entry("cash", 100, "USD"), entry("revenue", 100, "USD")],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Transformer(TransformerError::NoAccountsFound)
        ));
    }
}
