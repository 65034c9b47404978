//! Constructing backends from store specs.

use std::sync::Arc;

use xun_core::config::StoreSpec;

use crate::disk::DiskStore;
use crate::error::StoreError;
use crate::layered::LayeredStore;
use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::traits::Store;

/// Builds the store a spec describes.
pub fn from_spec(spec: &StoreSpec) -> Result<Arc<dyn Store>, StoreError> {
    Ok(match spec {
        StoreSpec::Memory => Arc::new(MemoryStore::new()),
        StoreSpec::Disk { root } => Arc::new(DiskStore::new(root.clone())?),
        StoreSpec::Sqlite { path } => Arc::new(SqliteStore::new(path.clone())?),
        StoreSpec::Layered { layers } => {
            let layers = layers
                .iter()
                .map(from_spec)
                .collect::<Result<Vec<_>, _>>()?;
            Arc::new(LayeredStore::new(layers)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_spec_builds_a_store_without_a_spec() {
        let store = from_spec(&StoreSpec::Memory).unwrap();
        assert!(store.spec().is_none());
    }

    #[test]
    fn disk_spec_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let spec = StoreSpec::Disk {
            root: dir.path().to_path_buf(),
        };
        let store = from_spec(&spec).unwrap();
        assert_eq!(store.spec(), Some(spec));
    }
}
