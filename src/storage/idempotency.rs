//! Idempotency key rows
//!
//! One row per accepted external request, unique on
//! `(instance_id, key_hash)`. The hash itself is derived in the
//! [`idempotency`](crate::idempotency) module; this repository only stores
//! and checks it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::InstanceId;

use super::keys;
use super::multi::StepName;
use super::store::{Result, Store};
use super::write::WriteSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdempotencyKey {
    pub instance_id: InstanceId,
    /// Hex-encoded HMAC-SHA256 digest.
    pub key_hash: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Stage the uniqueness claim for a request identity. A duplicate surfaces
/// as a unique violation attributed to the idempotency step.
pub fn stage_insert(writes: &mut WriteSet, instance_id: InstanceId, key_hash: &str) -> Result<()> {
    let row = IdempotencyKey {
        instance_id,
        key_hash: key_hash.to_string(),
        first_seen_at: Utc::now(),
    };
    writes.insert_unique(
        StepName::Idempotency,
        keys::idempotency_key(instance_id, key_hash),
        &row,
    )
}

pub fn exists(store: &Store, instance_id: InstanceId, key_hash: &str) -> Result<bool> {
    store.contains_key(&keys::idempotency_key(instance_id, key_hash))
}
