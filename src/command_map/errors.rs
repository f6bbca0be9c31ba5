//! Input-shaped validation errors
//!
//! Mirrors the structure of a submitted [`CommandMap`](super::CommandMap):
//! top-level field errors, payload field errors, and per-entry-index errors
//! for transaction payloads. Serializes to the same nesting the client sent,
//! so an API layer can echo it back verbatim.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// `field → messages`, ordered for stable serialization.
pub type FieldErrorMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandMapErrors {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: FieldErrorMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadErrors>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PayloadErrors {
    Account(AccountPayloadErrors),
    Transaction(TransactionPayloadErrors),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountPayloadErrors {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: FieldErrorMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionPayloadErrors {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: FieldErrorMap,
    /// Errors on individual entries, keyed by their index in the submitted list.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub entries: BTreeMap<usize, FieldErrorMap>,
}

impl PayloadErrors {
    fn is_empty(&self) -> bool {
        match self {
            PayloadErrors::Account(account) => account.errors.is_empty(),
            PayloadErrors::Transaction(transaction) => {
                transaction.errors.is_empty() && transaction.entries.is_empty()
            }
        }
    }
}

impl CommandMapErrors {
    /// Add a top-level field error.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_default().push(message.into());
    }

    /// Field-error map of the account payload, creating it when absent.
    pub fn account_errors(&mut self) -> &mut FieldErrorMap {
        if !matches!(self.payload, Some(PayloadErrors::Account(_))) {
            self.payload = Some(PayloadErrors::Account(AccountPayloadErrors::default()));
        }
        match self.payload.as_mut() {
            Some(PayloadErrors::Account(account)) => &mut account.errors,
            _ => unreachable!("account payload errors just installed"),
        }
    }

    /// Field-error map of the transaction payload, creating it when absent.
    pub fn transaction_errors(&mut self) -> &mut FieldErrorMap {
        &mut self.transaction_payload_mut().errors
    }

    /// Add an error to the entry at `index` of a transaction payload.
    pub fn add_entry_error(
        &mut self,
        index: usize,
        field: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.transaction_payload_mut()
            .entries
            .entry(index)
            .or_default()
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    fn transaction_payload_mut(&mut self) -> &mut TransactionPayloadErrors {
        if !matches!(self.payload, Some(PayloadErrors::Transaction(_))) {
            self.payload = Some(PayloadErrors::Transaction(TransactionPayloadErrors::default()));
        }
        match self.payload.as_mut() {
            Some(PayloadErrors::Transaction(transaction)) => transaction,
            _ => unreachable!("transaction payload errors just installed"),
        }
    }

    pub fn account_payload(&self) -> Option<&AccountPayloadErrors> {
        match self.payload.as_ref()? {
            PayloadErrors::Account(account) => Some(account),
            PayloadErrors::Transaction(_) => None,
        }
    }

    pub fn transaction_payload(&self) -> Option<&TransactionPayloadErrors> {
        match self.payload.as_ref()? {
            PayloadErrors::Transaction(transaction) => Some(transaction),
            PayloadErrors::Account(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.payload.as_ref().map_or(true, PayloadErrors::is_empty)
    }
}

// Queue error logs store the rendered form
impl fmt::Display for CommandMapErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}
