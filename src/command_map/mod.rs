//! Command intake DTOs and validation
//!
//! A `CommandMap` is the boundary contract for every external request: the
//! action, the tenant address, the idempotency identity (`source`,
//! `source_idempk`, optionally `update_idempk`), and a payload that is either
//! account data or transaction data. The payload is a tagged union in the type
//! system and untagged on the wire; `deny_unknown_fields` on both variants
//! keeps deserialization unambiguous.
//!
//! Validation is input-shaped: failures come back as a [`CommandMapErrors`]
//! mirroring the submitted structure (top-level fields, payload fields, and
//! per-entry-index fields), so API layers can render them against the original
//! request without any translation.
//!
//! ## Field patterns
//!
//! - `source`: `^[a-z0-9][a-z0-9_-]{1,29}$`
//! - `source_idempk` / `update_idempk`: `^[A-Za-z0-9][A-Za-z0-9._:-]{0,127}$`
//! - account / instance addresses: `^[A-Za-z0-9_]+(:[A-Za-z0-9_]+)*$`
//!
//! Unknown action strings are rejected here with a field error; nothing
//! downstream ever sees an unparsed action.

pub mod errors;
pub mod response;

pub use errors::{CommandMapErrors, FieldErrorMap, PayloadErrors};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entities::command::CommandAction;
use crate::entities::currency::supported_currency;
use crate::entities::transaction::TransactionStatus;

pub static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+(:[A-Za-z0-9_]+)*$").expect("static regex"));

static SOURCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{1,29}$").expect("static regex"));

static IDEMPK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]{0,127}$").expect("static regex"));

/// The boundary record for one external request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommandMap {
    pub action: String,
    pub instance_address: String,
    pub source: String,
    pub source_idempk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_idempk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_source: Option<String>,
    pub payload: Payload,
}

/// Tagged payload union; the wire shape is untagged and disambiguated by
/// field names (`deny_unknown_fields` on both variants).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    Transaction(TransactionData),
    Account(AccountData),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AccountData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TransactionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub entries: Vec<EntryData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EntryData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Payload-level validation, dispatched on the already-parsed action.
pub trait PayloadValidator {
    fn validate(&self, action: CommandAction, out: &mut CommandMapErrors);
}

impl CommandMap {
    /// Validate the whole map. On success returns the parsed action; on
    /// failure an input-shaped error set. Instance existence and idempotency
    /// are checked later, inside the enqueue commit.
    pub fn validate(&self) -> Result<CommandAction, CommandMapErrors> {
        let mut out = CommandMapErrors::default();

        let action = match CommandAction::parse(&self.action) {
            Some(action) => Some(action),
            None => {
                out.add("action", "is not a supported action");
                None
            }
        };

        if self.instance_address.is_empty() {
            out.add("instance_address", "is required");
        } else if !ADDRESS_RE.is_match(&self.instance_address) {
            out.add("instance_address", "has invalid format");
        }

        if !SOURCE_RE.is_match(&self.source) {
            out.add("source", "has invalid format");
        }

        if !IDEMPK_RE.is_match(&self.source_idempk) {
            out.add("source_idempk", "has invalid format");
        }

        if let Some(action) = action {
            match &self.update_idempk {
                Some(update_idempk) => {
                    if !IDEMPK_RE.is_match(update_idempk) {
                        out.add("update_idempk", "has invalid format");
                    }
                }
                None if action.is_update() => {
                    out.add("update_idempk", "is required for update actions");
                }
                None => {}
            }

            match (&self.payload, action.category()) {
                (Payload::Account(data), crate::entities::command::CommandCategory::Account) => {
                    data.validate(action, &mut out);
                }
                (
                    Payload::Transaction(data),
                    crate::entities::command::CommandCategory::Transaction,
                ) => {
                    data.validate(action, &mut out);
                }
                _ => {
                    out.add("payload", "does not match the action");
                }
            }
        }

        match (out.is_empty(), action) {
            (true, Some(action)) => Ok(action),
            _ => Err(out),
        }
    }

    /// Parsed action for maps that already passed [`validate`].
    pub fn parsed_action(&self) -> Option<CommandAction> {
        CommandAction::parse(&self.action)
    }

    pub fn account_data(&self) -> Option<&AccountData> {
        match &self.payload {
            Payload::Account(data) => Some(data),
            Payload::Transaction(_) => None,
        }
    }

    pub fn transaction_data(&self) -> Option<&TransactionData> {
        match &self.payload {
            Payload::Transaction(data) => Some(data),
            Payload::Account(_) => None,
        }
    }
}

impl PayloadValidator for AccountData {
    fn validate(&self, action: CommandAction, out: &mut CommandMapErrors) {
        let errors = out.account_errors();

        // The address locates the account on update and names it on create
        match &self.address {
            Some(address) if ADDRESS_RE.is_match(address) => {}
            Some(_) => errors.entry("address".into()).or_default().push("has invalid format".into()),
            None => errors.entry("address".into()).or_default().push("is required".into()),
        }

        if action == CommandAction::CreateAccount {
            match &self.name {
                Some(name) if !name.trim().is_empty() => {}
                _ => errors.entry("name".into()).or_default().push("is required".into()),
            }
            match &self.account_type {
                Some(account_type) => {
                    if crate::entities::account::AccountType::parse(account_type).is_none() {
                        errors
                            .entry("type".into())
                            .or_default()
                            .push("is not a supported account type".into());
                    }
                }
                None => errors.entry("type".into()).or_default().push("is required".into()),
            }
            match &self.currency {
                Some(currency) => {
                    if !supported_currency(currency) {
                        errors
                            .entry("currency".into())
                            .or_default()
                            .push("is not a supported currency".into());
                    }
                }
                None => errors.entry("currency".into()).or_default().push("is required".into()),
            }
        } else {
            // Immutable after creation; an update naming them is a client bug
            if self.account_type.is_some() {
                errors
                    .entry("type".into())
                    .or_default()
                    .push("cannot be changed after creation".into());
            }
            if self.currency.is_some() {
                errors
                    .entry("currency".into())
                    .or_default()
                    .push("cannot be changed after creation".into());
            }
        }
    }
}

impl PayloadValidator for TransactionData {
    fn validate(&self, action: CommandAction, out: &mut CommandMapErrors) {
        let status = match &self.status {
            Some(status) => match TransactionStatus::parse(status) {
                Some(status) => Some(status),
                None => {
                    out.transaction_errors()
                        .entry("status".into())
                        .or_default()
                        .push("is not a valid status".into());
                    None
                }
            },
            None => {
                out.transaction_errors()
                    .entry("status".into())
                    .or_default()
                    .push("is required".into());
                None
            }
        };

        let Some(status) = status else { return };

        if action == CommandAction::CreateTransaction && status == TransactionStatus::Archived {
            out.transaction_errors()
                .entry("status".into())
                .or_default()
                .push("must be pending or posted on create".into());
            return;
        }

        // Status-only paths: update to posted with no entries, or any archived
        let entries_required = match (action, status) {
            (CommandAction::CreateTransaction, _) => true,
            (_, TransactionStatus::Pending) => true,
            (_, TransactionStatus::Posted) => !self.entries.is_empty(),
            (_, TransactionStatus::Archived) => false,
        };

        if !entries_required {
            return;
        }

        if self.entries.len() < 2 {
            out.transaction_errors()
                .entry("entries".into())
                .or_default()
                .push("must contain at least 2 entries".into());
        }

        let mut seen = std::collections::BTreeSet::new();
        let mut duplicate = false;
        for (index, entry) in self.entries.iter().enumerate() {
            entry.validate_at(index, out);
            if let Some(address) = &entry.account_address {
                if !seen.insert(address.clone()) {
                    duplicate = true;
                }
            }
        }
        if duplicate {
            out.transaction_errors()
                .entry("entries".into())
                .or_default()
                .push("must reference distinct account addresses".into());
        }
    }
}

impl EntryData {
    fn validate_at(&self, index: usize, out: &mut CommandMapErrors) {
        match &self.account_address {
            Some(address) if ADDRESS_RE.is_match(address) => {}
            Some(_) => out.add_entry_error(index, "account_address", "has invalid format"),
            None => out.add_entry_error(index, "account_address", "is required"),
        }
        match self.amount {
            Some(0) => out.add_entry_error(index, "amount", "must be a non-zero integer"),
            Some(_) => {}
            None => out.add_entry_error(index, "amount", "is required"),
        }
        match &self.currency {
            Some(currency) if supported_currency(currency) => {}
            Some(_) => out.add_entry_error(index, "currency", "is not a supported currency"),
            None => out.add_entry_error(index, "currency", "is required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_create_transaction() -> CommandMap {
        CommandMap {
            action: "create_transaction".into(),
            instance_address: "acme".into(),
            source: "billing".into(),
            source_idempk: "inv-001".into(),
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

    #[test]
    fn test_valid_map_passes() {
        assert_eq!(
            valid_create_transaction().validate().unwrap(),
            CommandAction::CreateTransaction
        );
    }

    #[test]
    fn test_unknown_action_rejected() {
        let mut map = valid_create_transaction();
        map.action = "transfer_funds".into();
        let errors = map.validate().unwrap_err();
        assert_eq!(
            errors.errors["action"],
            vec!["is not a supported action".to_string()]
        );
    }

    #[test]
    fn test_source_pattern() {
        let mut map = valid_create_transaction();
        map.source = "Billing".into(); // uppercase not allowed
        assert!(map.validate().unwrap_err().errors.contains_key("source"));

        map.source = "b".into(); // too short
        assert!(map.validate().unwrap_err().errors.contains_key("source"));
    }

    #[test]
    fn test_update_requires_update_idempk() {
        let mut map = valid_create_transaction();
        map.action = "update_transaction".into();
        map.payload = Payload::Transaction(TransactionData {
            status: Some("posted".into()),
            entries: vec![],
        });
        let errors = map.validate().unwrap_err();
        assert!(errors.errors.contains_key("update_idempk"));

        map.update_idempk = Some("upd-1".into());
        assert!(map.validate().is_ok());
    }

    #[test]
    fn test_create_needs_two_distinct_entries() {
        let mut map = valid_create_transaction();
        if let Payload::Transaction(data) = &mut map.payload {
            data.entries.truncate(1);
        }
        let errors = map.validate().unwrap_err();
        let payload = errors.transaction_payload().unwrap();
        assert!(payload.errors.contains_key("entries"));

        let mut map = valid_create_transaction();
        if let Payload::Transaction(data) = &mut map.payload {
            data.entries[1].account_address = Some("cash".into());
        }
        let errors = map.validate().unwrap_err();
        let payload = errors.transaction_payload().unwrap();
        assert_eq!(
            payload.errors["entries"],
            vec!["must reference distinct account addresses".to_string()]
        );
    }

    #[test]
    fn test_entry_errors_are_indexed() {
        let mut map = valid_create_transaction();
        if let Payload::Transaction(data) = &mut map.payload {
            data.entries[1].amount = Some(0);
            data.entries[1].currency = Some("DOGE".into());
        }
        let errors = map.validate().unwrap_err();
        let payload = errors.transaction_payload().unwrap();
        let entry_errors = &payload.entries[&1];
        assert_eq!(entry_errors["amount"], vec!["must be a non-zero integer".to_string()]);
        assert_eq!(
            entry_errors["currency"],
            vec!["is not a supported currency".to_string()]
        );
        assert!(!payload.entries.contains_key(&0));
    }

    #[test]
    fn test_archived_create_rejected() {
        let mut map = valid_create_transaction();
        if let Payload::Transaction(data) = &mut map.payload {
            data.status = Some("archived".into());
        }
        let errors = map.validate().unwrap_err();
        let payload = errors.transaction_payload().unwrap();
        assert_eq!(
            payload.errors["status"],
            vec!["must be pending or posted on create".to_string()]
        );
    }

    #[test]
    fn test_status_only_update_allows_empty_entries() {
        let map = CommandMap {
            action: "update_transaction".into(),
            instance_address: "acme".into(),
            source: "billing".into(),
            source_idempk: "inv-001".into(),
            update_idempk: Some("upd-1".into()),
            update_source: None,
            payload: Payload::Transaction(TransactionData {
                status: Some("archived".into()),
                entries: vec![],
            }),
        };
        assert!(map.validate().is_ok());
    }

    #[test]
    fn test_account_create_validation() {
        let map = CommandMap {
            action: "create_account".into(),
            instance_address: "acme".into(),
            source: "onboarding".into(),
            source_idempk: "acct-1".into(),
            update_idempk: None,
            update_source: None,
            payload: Payload::Account(AccountData {
                name: None,
                address: Some("assets cash".into()),
                account_type: Some("crypto".into()),
                currency: Some("DOGE".into()),
                description: None,
            }),
        };
        let errors = map.validate().unwrap_err();
        let payload = errors.account_payload().unwrap();
        assert!(payload.errors.contains_key("name"));
        assert_eq!(payload.errors["address"], vec!["has invalid format".to_string()]);
        assert!(payload.errors.contains_key("type"));
        assert!(payload.errors.contains_key("currency"));
    }

    #[test]
    fn test_account_update_rejects_immutable_fields() {
        let map = CommandMap {
            action: "update_account".into(),
            instance_address: "acme".into(),
            source: "onboarding".into(),
            source_idempk: "acct-1".into(),
            update_idempk: Some("upd-1".into()),
            update_source: None,
            payload: Payload::Account(AccountData {
                name: Some("Cash drawer".into()),
                address: Some("assets:cash".into()),
                account_type: Some("asset".into()),
                currency: None,
                description: None,
            }),
        };
        let errors = map.validate().unwrap_err();
        let payload = errors.account_payload().unwrap();
        assert_eq!(
            payload.errors["type"],
            vec!["cannot be changed after creation".to_string()]
        );
    }

    #[test]
    fn test_payload_category_mismatch() {
        let mut map = valid_create_transaction();
        map.payload = Payload::Account(AccountData::default());
        let errors = map.validate().unwrap_err();
        assert!(errors.errors.contains_key("payload"));
    }

    #[test]
    fn test_wire_round_trip() {
        let map = valid_create_transaction();
        let json = serde_json::to_string(&map).unwrap();
        let back: CommandMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn test_untagged_payload_disambiguation() {
        let json = r#"{
            "action": "create_account",
            "instance_address": "acme",
            "source": "onboarding",
            "source_idempk": "acct-1",
            "payload": {"name": "Cash", "address": "cash", "type": "asset", "currency": "USD"}
        }"#;
        let map: CommandMap = serde_json::from_str(json).unwrap();
        assert!(matches!(map.payload, Payload::Account(_)));
    }
}
