//! Staged write sets
//!
//! A `WriteSet` is the mutation buffer a unit of work accumulates while its
//! steps run. Nothing touches the store until `Store::commit` validates the
//! whole set; a failed step simply drops the buffer.
//!
//! Three operation flavors:
//! - `insert_unique`: the row must not exist yet; carries the staging step's
//!   name so unique-index violations can be attributed (idempotency key vs.
//!   account address, etc.)
//! - `put_versioned`: compare-and-set against the version the caller read
//! - `put`: blind upsert, for index rows and rows created earlier in the
//!   same set

use serde::Serialize;

use super::multi::StepName;
use super::store::Result;

#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert {
        step: StepName,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        expected: Option<u64>,
    },
    Delete {
        key: Vec<u8>,
    },
}

#[derive(Debug, Default)]
pub struct WriteSet {
    ops: Vec<WriteOp>,
}

impl WriteSet {
    pub fn new() -> Self {
        WriteSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Stage a row that must not exist yet.
    pub fn insert_unique<T: Serialize>(
        &mut self,
        step: StepName,
        key: Vec<u8>,
        value: &T,
    ) -> Result<()> {
        self.ops.push(WriteOp::Insert {
            step,
            key,
            value: serde_json::to_vec(value)?,
        });
        Ok(())
    }

    /// Stage a compare-and-set write against the version the row was read at.
    pub fn put_versioned<T: Serialize>(
        &mut self,
        key: Vec<u8>,
        value: &T,
        expected: u64,
    ) -> Result<()> {
        self.ops.push(WriteOp::Put {
            key,
            value: serde_json::to_vec(value)?,
            expected: Some(expected),
        });
        Ok(())
    }

    /// Stage a blind upsert.
    pub fn put<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<()> {
        self.ops.push(WriteOp::Put {
            key,
            value: serde_json::to_vec(value)?,
            expected: None,
        });
        Ok(())
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(WriteOp::Delete { key });
    }
}
