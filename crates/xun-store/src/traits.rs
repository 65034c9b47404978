//! The [`Store`] trait defining the storage contract.
//!
//! All backends implement this trait, making them fully swappable without
//! changing engine logic. The trait is object-safe; drivers hold stores
//! as `Arc<dyn Store>`.
//!
//! # Invariants
//!
//! - For every key present, its tag record is present.
//! - Removing a key removes its tag record.
//! - Concurrent writes to the same key are linearized; the last committed
//!   write wins and is atomically visible, tags included. Readers never
//!   observe a value with a missing or stale tag set.

use std::collections::BTreeMap;

use xun_core::config::StoreSpec;
use xun_core::Value;

use crate::error::StoreError;
use crate::key::StoreKey;
use crate::query::TagCondition;

/// Flat name-to-string attributes written atomically with a value.
/// Queryable, but not part of the key.
pub type Tags = BTreeMap<String, String>;

/// The storage contract for computed results.
pub trait Store: Send + Sync {
    /// True iff some value is recorded under `key`.
    fn contains(&self, key: &StoreKey) -> Result<bool, StoreError>;

    /// Writes `value` under `key`. Re-writes are allowed; tags are
    /// replaced atomically with the value.
    fn store(&self, key: &StoreKey, value: &Value, tags: &Tags) -> Result<(), StoreError>;

    /// Returns the value under `key`, or [`StoreError::NotFound`].
    fn load(&self, key: &StoreKey) -> Result<Value, StoreError>;

    /// Deletes the entry, or [`StoreError::NotFound`] if absent.
    fn remove(&self, key: &StoreKey) -> Result<(), StoreError>;

    /// The tag record for `key`.
    fn tags(&self, key: &StoreKey) -> Result<Tags, StoreError>;

    /// The set of keys whose tags match every condition. Backends
    /// without tag support fail with [`StoreError::Unsupported`].
    fn query(&self, conditions: &[TagCondition]) -> Result<Vec<StoreKey>, StoreError>;

    /// A serializable description of this store, or `None` when the
    /// store cannot leave the host process (in-memory).
    fn spec(&self) -> Option<StoreSpec>;
}
