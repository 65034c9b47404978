//! On-disk store backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/keys/<64-hex>     serialized StoreKey
//! <root>/values/<64-hex>   serialized value
//! <root>/tags/<64-hex>     serialized tag record
//! ```
//!
//! `<64-hex>` is the hex SHA-256 of the canonical key encoding. Files are
//! written to a temporary name and renamed into place, tags before values
//! before keys, so a reader that sees the key file sees a complete entry.
//! Missing directories are created at startup with mode `0o700`.

use std::fs;
use std::path::{Path, PathBuf};

use xun_core::config::StoreSpec;
use xun_core::Value;

use crate::error::StoreError;
use crate::key::StoreKey;
use crate::query::TagCondition;
use crate::retry::with_backoff;
use crate::traits::{Store, Tags};

#[derive(Debug)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Opens a disk store, creating its directories if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<DiskStore, StoreError> {
        let root = root.into();
        for sub in ["keys", "values", "tags"] {
            create_private_dir(&root.join(sub))?;
        }
        Ok(DiskStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, kind: &str, key: &StoreKey) -> PathBuf {
        self.root.join(kind).join(key.content_hash())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        with_backoff("disk write", || {
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, path)?;
            Ok(())
        })
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::DirBuilderExt;
    if path.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder.create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(path)?;
    Ok(())
}

impl Store for DiskStore {
    fn contains(&self, key: &StoreKey) -> Result<bool, StoreError> {
        Ok(self.path("keys", key).is_file())
    }

    fn store(&self, key: &StoreKey, value: &Value, tags: &Tags) -> Result<(), StoreError> {
        let tag_bytes = serde_json::to_vec(tags)?;
        let value_bytes = serde_json::to_vec(value)?;
        let key_bytes = serde_json::to_vec(key)?;

        self.write_atomic(&self.path("tags", key), &tag_bytes)?;
        self.write_atomic(&self.path("values", key), &value_bytes)?;
        self.write_atomic(&self.path("keys", key), &key_bytes)?;
        tracing::debug!(key = %key, "stored entry on disk");
        Ok(())
    }

    fn load(&self, key: &StoreKey) -> Result<Value, StoreError> {
        if !self.contains(key)? {
            return Err(StoreError::not_found(key));
        }
        let bytes = with_backoff("disk read", || {
            Ok(fs::read(self.path("values", key))?)
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
        if !self.contains(key)? {
            return Err(StoreError::not_found(key));
        }
        // Key file first, so a concurrent reader never sees a key whose
        // value is already gone.
        fs::remove_file(self.path("keys", key))?;
        let _ = fs::remove_file(self.path("values", key));
        let _ = fs::remove_file(self.path("tags", key));
        Ok(())
    }

    fn tags(&self, key: &StoreKey) -> Result<Tags, StoreError> {
        if !self.contains(key)? {
            return Err(StoreError::not_found(key));
        }
        let bytes = with_backoff("disk read", || {
            Ok(fs::read(self.path("tags", key))?)
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn query(&self, conditions: &[TagCondition]) -> Result<Vec<StoreKey>, StoreError> {
        let mut matches = Vec::new();
        for entry in fs::read_dir(self.root.join("keys"))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if Path::new(&name).extension().is_some() {
                // In-flight temporary file.
                continue;
            }
            let tags_path = self.root.join("tags").join(&name);
            let tags: Tags = match fs::read(&tags_path) {
                Ok(bytes) => serde_json::from_slice(&bytes)?,
                // An entry written by an older layout may lack tags;
                // treat it as untagged.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tags::new(),
                Err(e) => return Err(e.into()),
            };
            if conditions.iter().all(|c| c.matches(&tags)) {
                let bytes = fs::read(entry.path())?;
                matches.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(matches)
    }

    fn spec(&self) -> Option<StoreSpec> {
        Some(StoreSpec::Disk {
            root: self.root.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xun_core::node::{CallNode, FunctionHash};

    fn key(arg: i64) -> StoreKey {
        StoreKey::result(&CallNode::new(
            "f",
            FunctionHash::from("h"),
            vec![Value::Int(arg)],
            vec![],
        ))
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn round_trip_and_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path()).unwrap();
        let k = key(1);
        store
            .store(&k, &Value::Str("hello".into()), &tags(&[("f", "1")]))
            .unwrap();

        let hash = k.content_hash();
        assert!(dir.path().join("keys").join(&hash).is_file());
        assert!(dir.path().join("values").join(&hash).is_file());
        assert!(dir.path().join("tags").join(&hash).is_file());

        assert_eq!(store.load(&k).unwrap(), Value::Str("hello".into()));
        assert_eq!(store.tags(&k).unwrap(), tags(&[("f", "1")]));
    }

    #[test]
    fn a_second_store_instance_sees_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let k = key(2);
        DiskStore::new(dir.path())
            .unwrap()
            .store(&k, &Value::Int(2), &Tags::new())
            .unwrap();
        let reopened = DiskStore::new(dir.path()).unwrap();
        assert_eq!(reopened.load(&k).unwrap(), Value::Int(2));
    }

    #[test]
    fn remove_deletes_all_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path()).unwrap();
        let k = key(3);
        store.store(&k, &Value::Int(3), &Tags::new()).unwrap();
        store.remove(&k).unwrap();
        let hash = k.content_hash();
        for sub in ["keys", "values", "tags"] {
            assert!(!dir.path().join(sub).join(&hash).exists());
        }
        assert!(matches!(
            store.remove(&k),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn query_filters_by_tags() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path()).unwrap();
        store
            .store(&key(1), &Value::Int(1), &tags(&[("kind", "a")]))
            .unwrap();
        store
            .store(&key(2), &Value::Int(2), &tags(&[("kind", "b")]))
            .unwrap();

        let hits = store
            .query(&[TagCondition::compare(
                "kind",
                crate::query::TagOp::Eq,
                "a",
            )])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0], key(1));
    }

    #[cfg(unix)]
    #[test]
    fn directories_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        DiskStore::new(dir.path()).unwrap();
        let mode = std::fs::metadata(dir.path().join("keys"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
