//! Versioned sled store
//!
//! A single sled tree holds every table, with key prefixes standing in for
//! table names (see `keys.rs`). Rows are stored as an 8-byte big-endian
//! version followed by a JSON payload. The version is owned by the store:
//! callers read a [`Versioned<T>`] and must hand the version back when they
//! want compare-and-set semantics on the write.
//!
//! ## Commit protocol
//!
//! `commit` is the only mutation path. Under a short lock it walks the staged
//! operations in order, tracking an overlay of rows the same write set
//! already touched (a unit of work may insert a queue item and transition it
//! in a later step), and validates:
//! - unique inserts against both the overlay and the tree
//! - versioned puts against the current row version
//!
//! Only when every operation validates does it apply a single `sled::Batch`.
//! A `StaleVersion` here is the OCC collision signal consumed by the OCC
//! processor; nothing is partially applied.
//!
//! Reads deliberately happen outside the commit lock. Two workers may both
//! read version N of an account and race to commit; the loser gets
//! `StaleVersion` and rebuilds. That is the intended concurrency model, not
//! a bug.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

use super::multi::StepName;
use super::write::{WriteOp, WriteSet};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compare-and-set failure on a versioned put; the OCC collision signal.
    #[error("stale row version on {key}: expected {expected}, found {found}")]
    StaleVersion {
        key: String,
        expected: u64,
        found: u64,
    },

    /// Unique insert hit an existing row; attributed to the staging step.
    #[error("unique constraint violated on {key}")]
    UniqueViolation { key: String, step: StepName },

    #[error("corrupt row at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A row together with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub row_version: u64,
    pub row: T,
}

pub struct Store {
    db: sled::Db,
    tree: sled::Tree,
    commit_lock: Mutex<()>,
}

const VERSION_PREFIX_LEN: usize = 8;

fn encode_row(version: u64, payload: &[u8]) -> Vec<u8> {
    let mut row = Vec::with_capacity(VERSION_PREFIX_LEN + payload.len());
    row.extend_from_slice(&version.to_be_bytes());
    row.extend_from_slice(payload);
    row
}

fn split_row(key: &[u8], row: &[u8]) -> Result<(u64, Vec<u8>)> {
    if row.len() < VERSION_PREFIX_LEN {
        return Err(StoreError::Corrupt {
            key: display_key(key),
            reason: format!("row shorter than version prefix ({} bytes)", row.len()),
        });
    }
    let mut version_bytes = [0u8; VERSION_PREFIX_LEN];
    version_bytes.copy_from_slice(&row[..VERSION_PREFIX_LEN]);
    Ok((u64::from_be_bytes(version_bytes), row[VERSION_PREFIX_LEN..].to_vec()))
}

pub(crate) fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("📒 Opening ledger store at: {:?}", path.as_ref());

        let config = sled::Config::new()
            .path(path)
            .flush_every_ms(Some(100)) // Frequent durability
            .cache_capacity(64 * 1024 * 1024) // 64MB cache
            .mode(sled::Mode::HighThroughput);

        let db = config.open()?;
        let tree = db.open_tree("ledger")?;

        Ok(Store {
            db,
            tree,
            commit_lock: Mutex::new(()),
        })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<Versioned<T>>> {
        match self.tree.get(key)? {
            Some(bytes) => {
                let (row_version, payload) = split_row(key, &bytes)?;
                Ok(Some(Versioned {
                    row_version,
                    row: serde_json::from_slice(&payload)?,
                }))
            }
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.tree.contains_key(key)?)
    }

    pub fn current_version(&self, key: &[u8]) -> Result<Option<u64>> {
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(split_row(key, &bytes)?.0)),
            None => Ok(None),
        }
    }

    /// All rows under `prefix`, in key order.
    pub fn scan_prefix<T: DeserializeOwned>(
        &self,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Versioned<T>)>> {
        let mut rows = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, bytes) = item?;
            let (row_version, payload) = split_row(&key, &bytes)?;
            rows.push((
                key.to_vec(),
                Versioned {
                    row_version,
                    row: serde_json::from_slice(&payload)?,
                },
            ));
        }
        Ok(rows)
    }

    /// Validate and atomically apply a staged write set.
    pub fn commit(&self, writes: WriteSet) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let _guard = self.commit_lock.lock().expect("commit lock poisoned");

        // Overlay of rows this write set already produced: version, or None
        // for a staged delete
        let mut staged: BTreeMap<Vec<u8>, Option<(u64, Vec<u8>)>> = BTreeMap::new();

        for op in writes.ops() {
            match op {
                WriteOp::Insert { step, key, value } => {
                    let exists = match staged.get(key.as_slice()) {
                        Some(entry) => entry.is_some(),
                        None => self.tree.contains_key(key)?,
                    };
                    if exists {
                        return Err(StoreError::UniqueViolation {
                            key: display_key(key),
                            step: *step,
                        });
                    }
                    staged.insert(key.clone(), Some((1, value.clone())));
                }
                WriteOp::Put { key, value, expected } => {
                    let current = match staged.get(key.as_slice()) {
                        Some(entry) => entry.as_ref().map(|(version, _)| *version),
                        None => self.current_version(key)?,
                    };
                    let next = match expected {
                        Some(expected) => {
                            let found = current.unwrap_or(0);
                            if found != *expected {
                                return Err(StoreError::StaleVersion {
                                    key: display_key(key),
                                    expected: *expected,
                                    found,
                                });
                            }
                            expected + 1
                        }
                        None => current.unwrap_or(0) + 1,
                    };
                    staged.insert(key.clone(), Some((next, value.clone())));
                }
                WriteOp::Delete { key } => {
                    staged.insert(key.clone(), None);
                }
            }
        }

        let mut batch = sled::Batch::default();
        for (key, entry) in staged {
            match entry {
                Some((version, payload)) => batch.insert(key, encode_row(version, &payload)),
                None => batch.remove(key),
            }
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
