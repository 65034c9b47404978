//! In-memory store backend.
//!
//! [`MemoryStore`] is a first-class backend for tests, single-process
//! runs, and the top layer of layered stores. It lives in process memory
//! and therefore has no [`StoreSpec`]: it cannot cross a driver boundary,
//! and the planner rejects attempts to transport it.

use std::collections::HashMap;
use std::sync::Mutex;

use xun_core::config::StoreSpec;
use xun_core::Value;

use crate::error::StoreError;
use crate::key::StoreKey;
use crate::query::TagCondition;
use crate::traits::{Store, Tags};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, (Value, Tags)>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<StoreKey, (Value, Tags)>> {
        // A poisoned lock means a writer panicked mid-insert; the map
        // itself is still a consistent HashMap.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for MemoryStore {
    fn contains(&self, key: &StoreKey) -> Result<bool, StoreError> {
        Ok(self.lock().contains_key(key))
    }

    fn store(&self, key: &StoreKey, value: &Value, tags: &Tags) -> Result<(), StoreError> {
        self.lock()
            .insert(key.clone(), (value.clone(), tags.clone()));
        Ok(())
    }

    fn load(&self, key: &StoreKey) -> Result<Value, StoreError> {
        self.lock()
            .get(key)
            .map(|(value, _)| value.clone())
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
        self.lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn tags(&self, key: &StoreKey) -> Result<Tags, StoreError> {
        self.lock()
            .get(key)
            .map(|(_, tags)| tags.clone())
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn query(&self, conditions: &[TagCondition]) -> Result<Vec<StoreKey>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|(_, (_, tags))| conditions.iter().all(|c| c.matches(tags)))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn spec(&self) -> Option<StoreSpec> {
        None
    }
}
