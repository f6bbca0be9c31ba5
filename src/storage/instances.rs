//! Instance repository

use crate::entities::{Instance, InstanceId};

use super::keys;
use super::multi::StepName;
use super::store::{Result, Store, Versioned};
use super::write::WriteSet;

pub fn get(store: &Store, id: InstanceId) -> Result<Option<Versioned<Instance>>> {
    store.get(&keys::instance(id))
}

pub fn get_by_address(store: &Store, address: &str) -> Result<Option<Versioned<Instance>>> {
    match store.get::<InstanceId>(&keys::instance_address_index(address))? {
        Some(index) => get(store, index.row),
        None => Ok(None),
    }
}

/// Create a tenant. Admin-path operation: commits directly rather than
/// joining a command's unit of work.
pub fn create(store: &Store, address: &str) -> Result<Instance> {
    let instance = Instance::new(address);
    let mut writes = WriteSet::new();
    writes.insert_unique(StepName::Instance, keys::instance(instance.id), &instance)?;
    writes.insert_unique(
        StepName::Instance,
        keys::instance_address_index(address),
        &instance.id,
    )?;
    store.commit(writes)?;
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::StoreError;
    use tempfile::TempDir;

    fn open_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        (Store::open(temp_dir.path()).unwrap(), temp_dir)
    }

    #[test]
    fn test_create_and_lookup() {
        let (store, _temp_dir) = open_store();
        let instance = create(&store, "acme").unwrap();

        let by_id = get(&store, instance.id).unwrap().unwrap();
        assert_eq!(by_id.row, instance);

        let by_address = get_by_address(&store, "acme").unwrap().unwrap();
        assert_eq!(by_address.row.id, instance.id);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let (store, _temp_dir) = open_store();
        create(&store, "acme").unwrap();
        match create(&store, "acme") {
            Err(StoreError::UniqueViolation { step, .. }) => assert_eq!(step, StepName::Instance),
            other => panic!("expected unique violation, got {:?}", other),
        }
    }
}
