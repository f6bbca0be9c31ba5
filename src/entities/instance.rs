//! Ledger tenant boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::InstanceId;

/// A ledger tenant. Owns accounts, transactions and commands; never deleted
/// while it has children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    /// Unique human-readable address, e.g. `"acme"`.
    pub address: String,
    pub inserted_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(address: impl Into<String>) -> Self {
        Instance {
            id: Uuid::new_v4(),
            address: address.into(),
            inserted_at: Utc::now(),
        }
    }
}
