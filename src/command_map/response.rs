//! Response handlers: step errors back onto the input shape
//!
//! When a unit of work fails, the failure carries the name of the step that
//! raised it plus a typed engine error. Clients never see either directly:
//! the category-specific response handler here converts them into a
//! [`CommandMapErrors`] shaped like the submitted command map, with
//! command-level failures on top-level fields, payload failures on the
//! embedded account or transaction data, and entry failures indexed by the
//! entry's position in the submitted list.
//!
//! Idempotency violations use fixed literal messages, part of the external
//! contract:
//! - `source_idempk`: `"already exists for this instance"`
//! - `update_idempk`: `"already exists for this source_idempk"`

use crate::entities::command::CommandCategory;
use crate::error::EngineError;
use crate::storage::{MultiError, StepName, StoreError};
use crate::transformer::TransformerError;

use super::{CommandMap, CommandMapErrors};

/// Map a failed step back onto the shape of the submitted map.
pub fn map_error(map: &CommandMap, error: &MultiError) -> CommandMapErrors {
    // Command-level outcomes first; they are category-independent
    if let Some(errors) = map_command_level(map, error) {
        return errors;
    }

    match map.parsed_action().map(|action| action.category()) {
        Some(CommandCategory::Transaction) => map_transaction_error(map, error),
        Some(CommandCategory::Account) => map_account_error(error),
        None => {
            let mut errors = CommandMapErrors::default();
            errors.add("action", "is not a supported action");
            errors
        }
    }
}

/// The validation result for OCC exhaustion in no-save-on-error mode.
pub fn occ_exhausted(attempts: u32) -> CommandMapErrors {
    let mut errors = CommandMapErrors::default();
    errors.add(
        "base",
        format!("OCC conflict: Max number of {} retries reached", attempts),
    );
    errors
}

fn map_command_level(map: &CommandMap, error: &MultiError) -> Option<CommandMapErrors> {
    let mut errors = CommandMapErrors::default();
    match &error.error {
        EngineError::Invalid(invalid) => return Some(invalid.clone()),
        EngineError::InstanceNotFound(_) => errors.add("instance_address", "does not exist"),
        EngineError::ActionNotSupported(_) => errors.add("action", "is not a supported action"),
        EngineError::Store(StoreError::UniqueViolation { .. })
            if error.step == StepName::Idempotency =>
        {
            match map.parsed_action() {
                Some(action) if action.is_update() => {
                    errors.add("update_idempk", "already exists for this source_idempk")
                }
                _ => errors.add("source_idempk", "already exists for this instance"),
            }
        }
        EngineError::Store(StoreError::UniqueViolation { .. })
            if error.step == StepName::PendingTransactionLookup =>
        {
            errors.add("source_idempk", "already exists for this instance")
        }
        // Unique violations on other steps are category-specific (e.g. an
        // account address) and handled by the payload mappers below
        EngineError::Store(StoreError::UniqueViolation { .. }) => return None,
        EngineError::CreateCommandNotFound { .. } => {
            errors.add("source_idempk", "no transaction create command found")
        }
        EngineError::CreateCommandNotReady(status) => errors.add(
            "source_idempk",
            format!("create command has not been processed yet (status: {})", status),
        ),
        EngineError::CreateCommandDeadLetter => {
            errors.add("source_idempk", "create command was dead-lettered")
        }
        EngineError::CreateTransactionMissing => {
            errors.add("source_idempk", "created transaction is not available yet")
        }
        EngineError::Store(_) => errors.add("base", "internal storage error"),
        _ => return None,
    }
    Some(errors)
}

fn map_transaction_error(map: &CommandMap, error: &MultiError) -> CommandMapErrors {
    let mut errors = CommandMapErrors::default();
    match &error.error {
        EngineError::Transformer(transformer) => match transformer {
            TransformerError::InvalidEntryData(entry_errors) => {
                for (index, fields) in entry_errors {
                    for (field, messages) in fields {
                        for message in messages {
                            errors.add_entry_error(*index, field.clone(), message.clone());
                        }
                    }
                }
            }
            TransformerError::SomeAccountsNotFound { missing } => {
                mark_missing_entries(map, missing, &mut errors);
            }
            TransformerError::NoAccountsFound => {
                let all: Vec<String> = submitted_addresses(map);
                mark_missing_entries(map, &all, &mut errors);
            }
            TransformerError::NoAccountsAndOrEntriesProvided => {
                errors
                    .transaction_errors()
                    .entry("entries".into())
                    .or_default()
                    .push("no accounts and/or entries provided".into());
            }
            TransformerError::AccountEntriesMismatch => {
                errors
                    .transaction_errors()
                    .entry("entries".into())
                    .or_default()
                    .push("do not match the resolved accounts".into());
            }
            TransformerError::MissingEntryForAccount { address } => {
                errors
                    .transaction_errors()
                    .entry("entries".into())
                    .or_default()
                    .push(format!("missing entry for account {}", address));
            }
        },
        EngineError::Unbalanced(imbalance) => {
            errors.transaction_errors().entry("entries".into()).or_default().push(format!(
                "must balance per currency ({}: debits {} != credits {})",
                imbalance.currency, imbalance.debits, imbalance.credits
            ));
        }
        EngineError::InvalidStatusTransition { from, to } => {
            errors
                .transaction_errors()
                .entry("status".into())
                .or_default()
                .push(format!("cannot transition from {} to {}", from, to));
        }
        other => {
            errors.add("base", other.to_string());
        }
    }
    errors
}

fn map_account_error(error: &MultiError) -> CommandMapErrors {
    let mut errors = CommandMapErrors::default();
    match &error.error {
        EngineError::AccountNotFound(_) => {
            errors.account_errors().entry("address".into()).or_default().push("does not exist".into());
        }
        EngineError::Store(StoreError::UniqueViolation { .. })
            if error.step == StepName::Account =>
        {
            errors
                .account_errors()
                .entry("address".into())
                .or_default()
                .push("already exists for this instance".into());
        }
        other => {
            errors.add("base", other.to_string());
        }
    }
    errors
}

fn submitted_addresses(map: &CommandMap) -> Vec<String> {
    map.transaction_data()
        .map(|data| {
            data.entries
                .iter()
                .filter_map(|entry| entry.account_address.clone())
                .collect()
        })
        .unwrap_or_default()
}

// Attribute missing accounts to the entries that referenced them
fn mark_missing_entries(map: &CommandMap, missing: &[String], errors: &mut CommandMapErrors) {
    let mut marked = false;
    if let Some(data) = map.transaction_data() {
        for (index, entry) in data.entries.iter().enumerate() {
            if let Some(address) = &entry.account_address {
                if missing.iter().any(|m| m == address) {
                    errors.add_entry_error(index, "account_address", "does not exist");
                    marked = true;
                }
            }
        }
    }
    if !marked {
        errors
            .transaction_errors()
            .entry("entries".into())
            .or_default()
            .push("referenced accounts do not exist".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_map::{EntryData, Payload, TransactionData};

    fn update_map() -> CommandMap {
        CommandMap {
            action: "update_transaction".into(),
            instance_address: "acme".into(),
            source: "billing".into(),
            source_idempk: "inv-1".into(),
            update_idempk: Some("upd-1".into()),
            update_source: None,
            payload: Payload::Transaction(TransactionData {
                status: Some("posted".into()),
                entries: vec![],
            }),
        }
    }

    fn create_map() -> CommandMap {
        CommandMap {
            action: "create_transaction".into(),
            update_idempk: None,
            payload: Payload::Transaction(TransactionData {
                status: Some("pending".into()),
                entries: vec![
                    EntryData {
                        account_address: Some("cash".into()),
                        amount: Some(100),
                        currency: Some("USD".into()),
                    },
                    EntryData {
                        account_address: Some("ghost:account".into()),
                        amount: Some(100),
                        currency: Some("USD".into()),
                    },
                ],
            }),
            ..update_map()
        }
    }

    fn unique_violation(step: StepName) -> MultiError {
        MultiError {
            step,
            error: EngineError::Store(StoreError::UniqueViolation {
                key: "whatever".into(),
                step,
            }),
        }
    }

    #[test]
    fn test_idempotency_violation_on_create_hits_source_idempk() {
        let errors = map_error(&create_map(), &unique_violation(StepName::Idempotency));
        assert_eq!(
            errors.errors["source_idempk"],
            vec!["already exists for this instance".to_string()]
        );
    }

    #[test]
    fn test_idempotency_violation_on_update_hits_update_idempk() {
        let errors = map_error(&update_map(), &unique_violation(StepName::Idempotency));
        assert_eq!(
            errors.errors["update_idempk"],
            vec!["already exists for this source_idempk".to_string()]
        );
    }

    #[test]
    fn test_missing_accounts_marked_on_their_entries() {
        let error = MultiError {
            step: StepName::Transaction,
            error: EngineError::Transformer(TransformerError::SomeAccountsNotFound {
                missing: vec!["ghost:account".into()],
            }),
        };
        let errors = map_error(&create_map(), &error);
        let payload = errors.transaction_payload().unwrap();
        assert_eq!(
            payload.entries[&1]["account_address"],
            vec!["does not exist".to_string()]
        );
        assert!(!payload.entries.contains_key(&0));
    }

    #[test]
    fn test_unbalanced_lands_on_entries() {
        let error = MultiError {
            step: StepName::Transaction,
            error: EngineError::Unbalanced(crate::entities::transaction::Imbalance {
                currency: "USD".into(),
                debits: 100,
                credits: 90,
            }),
        };
        let errors = map_error(&create_map(), &error);
        let payload = errors.transaction_payload().unwrap();
        assert!(payload.errors["entries"][0].contains("USD"));
    }

    #[test]
    fn test_account_unique_violation_lands_on_address() {
        let map = CommandMap {
            action: "create_account".into(),
            payload: Payload::Account(crate::command_map::AccountData::default()),
            ..update_map()
        };
        let errors = map_error(&map, &unique_violation(StepName::Account));
        let payload = errors.account_payload().unwrap();
        assert_eq!(
            payload.errors["address"],
            vec!["already exists for this instance".to_string()]
        );
    }

    #[test]
    fn test_instance_not_found_is_top_level() {
        let error = MultiError {
            step: StepName::Instance,
            error: EngineError::InstanceNotFound("ghost".into()),
        };
        let errors = map_error(&create_map(), &error);
        assert_eq!(errors.errors["instance_address"], vec!["does not exist".to_string()]);
    }

    #[test]
    fn test_occ_exhausted_shape() {
        let errors = occ_exhausted(5);
        assert_eq!(
            errors.errors["base"],
            vec!["OCC conflict: Max number of 5 retries reached".to_string()]
        );
    }
}
