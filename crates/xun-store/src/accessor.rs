//! Result-oriented view over a store.
//!
//! [`StoreAccessor`] knows how call results are laid out: one result slot
//! per `(call, function_hash)` pair plus a latest pointer per call. The
//! engine talks to the accessor; only backends see raw [`StoreKey`]s.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use xun_core::node::{CallNode, FunctionHash};
use xun_core::{CoreError, Value};

use crate::error::StoreError;
use crate::key::StoreKey;
use crate::traits::{Store, Tags};

/// Tag names written on every result entry.
pub const TAG_FUNCTION_NAME: &str = "function_name";
pub const TAG_FUNCTION_HASH: &str = "function_hash";

#[derive(Clone)]
pub struct StoreAccessor {
    store: Arc<dyn Store>,
}

impl StoreAccessor {
    pub fn new(store: Arc<dyn Store>) -> StoreAccessor {
        StoreAccessor { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// True iff the call's result is committed under the call's own
    /// function hash.
    pub fn completed(&self, call: &CallNode) -> Result<bool, StoreError> {
        self.store.contains(&StoreKey::result(call))
    }

    /// Commits a result for `call` and advances the latest pointer to the
    /// call's function hash.
    pub fn store_result(&self, call: &CallNode, result: &Value) -> Result<(), StoreError> {
        tracing::debug!(call = %call, "storing result");
        let mut tags = Tags::new();
        tags.insert(TAG_FUNCTION_NAME.to_string(), call.function_name.clone());
        tags.insert(
            TAG_FUNCTION_HASH.to_string(),
            call.function_hash.to_string(),
        );
        self.store.store(&StoreKey::result(call), result, &tags)?;
        self.store.store(
            &StoreKey::latest(call),
            &Value::Str(call.function_hash.to_string()),
            &Tags::new(),
        )
    }

    /// Loads the result a node stands for, applying the node's subscript
    /// chain to the stored value.
    ///
    /// Fails with `FingerprintMismatch` if the entry's recorded function
    /// hash disagrees with the hash the node was looked up under.
    pub fn load_result(&self, node: &CallNode) -> Result<Value, StoreError> {
        let key = StoreKey::result(node);
        let value = self.store.load(&key)?;

        let tags = self.store.tags(&key)?;
        if let Some(stored) = tags.get(TAG_FUNCTION_HASH) {
            if stored != node.function_hash.as_str() {
                return Err(CoreError::FingerprintMismatch {
                    call: node.base(),
                    expected: node.function_hash.to_string(),
                    stored: stored.clone(),
                }
                .into());
            }
        }

        let mut out = value;
        for key in &node.subscript {
            out = out.index(key).map_err(StoreError::from)?;
        }
        Ok(out)
    }

    /// The function hash the latest pointer targets, if any result was
    /// ever stored for this call.
    pub fn latest_hash(&self, call: &CallNode) -> Result<Option<FunctionHash>, StoreError> {
        let key = StoreKey::latest(call);
        if !self.store.contains(&key)? {
            return Ok(None);
        }
        match self.store.load(&key)? {
            Value::Str(hash) => Ok(Some(FunctionHash(hash))),
            other => Err(StoreError::Query {
                message: format!("latest pointer holds a {}", other.type_name()),
            }),
        }
    }

    /// Moves the call's current result aside under a distorted hash so
    /// the next run recomputes it. The old value stays loadable through
    /// the latest pointer.
    pub fn invalidate(&self, call: &CallNode) -> Result<(), StoreError> {
        if !self.completed(call)? {
            return Ok(());
        }
        let key = StoreKey::result(call);
        let value = self.store.load(&key)?;

        let distorted = distort(&call.function_hash);
        let mut distorted_call = call.base();
        distorted_call.function_hash = distorted.clone();

        let mut tags = Tags::new();
        tags.insert(TAG_FUNCTION_NAME.to_string(), call.function_name.clone());
        tags.insert(TAG_FUNCTION_HASH.to_string(), distorted.to_string());
        self.store
            .store(&StoreKey::result(&distorted_call), &value, &tags)?;
        self.store.remove(&key)?;

        if self.latest_hash(call)?.as_ref() == Some(&call.function_hash) {
            self.store.store(
                &StoreKey::latest(call),
                &Value::Str(distorted.to_string()),
                &Tags::new(),
            )?;
        }
        Ok(())
    }
}

/// A hash that is deterministic in nothing: the original hash salted
/// with fresh randomness.
fn distort(hash: &FunctionHash) -> FunctionHash {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;

    let salt: [u8; 32] = rand::random();
    let mut hasher = Sha256::new();
    hasher.update(hash.as_str().as_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();
    FunctionHash(URL_SAFE_NO_PAD.encode(&digest[..12]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use xun_core::SubscriptKey;

    fn accessor() -> StoreAccessor {
        StoreAccessor::new(Arc::new(MemoryStore::new()))
    }

    fn call(arg: i64) -> CallNode {
        CallNode::new(
            "f",
            FunctionHash::from("v1hash"),
            vec![Value::Int(arg)],
            vec![],
        )
    }

    #[test]
    fn store_then_load_round_trips() {
        let accessor = accessor();
        let node = call(1);
        accessor
            .store_result(&node, &Value::Tuple(vec![Value::Int(7), Value::Int(8)]))
            .unwrap();
        assert!(accessor.completed(&node).unwrap());
        assert_eq!(
            accessor.load_result(&node).unwrap(),
            Value::Tuple(vec![Value::Int(7), Value::Int(8)])
        );
    }

    #[test]
    fn subscripts_select_into_the_stored_value() {
        let accessor = accessor();
        let node = call(1);
        accessor
            .store_result(&node, &Value::Tuple(vec![Value::Int(7), Value::Int(8)]))
            .unwrap();
        let indexed = node.index(SubscriptKey::Int(1));
        assert_eq!(accessor.load_result(&indexed).unwrap(), Value::Int(8));
    }

    #[test]
    fn new_code_version_supersedes_but_retains_the_old_entry() {
        let accessor = accessor();
        let old = call(1);
        accessor.store_result(&old, &Value::Int(10)).unwrap();

        let mut new = call(1);
        new.function_hash = FunctionHash::from("v2hash");
        accessor.store_result(&new, &Value::Int(20)).unwrap();

        // Both entries remain loadable; latest targets the new hash.
        assert_eq!(accessor.load_result(&old).unwrap(), Value::Int(10));
        assert_eq!(accessor.load_result(&new).unwrap(), Value::Int(20));
        assert_eq!(
            accessor.latest_hash(&old).unwrap(),
            Some(FunctionHash::from("v2hash"))
        );
    }

    #[test]
    fn invalidate_forces_recomputation() {
        let accessor = accessor();
        let node = call(1);
        accessor.store_result(&node, &Value::Int(10)).unwrap();
        accessor.invalidate(&node).unwrap();
        assert!(!accessor.completed(&node).unwrap());
        // The value still exists under the distorted hash via latest.
        let latest = accessor.latest_hash(&node).unwrap().unwrap();
        assert_ne!(latest, node.function_hash);
    }

    #[test]
    fn fingerprint_mismatch_is_detected() {
        let accessor = accessor();
        let node = call(1);
        // Hand-write an entry whose tag disagrees with its slot.
        let mut tags = Tags::new();
        tags.insert(TAG_FUNCTION_HASH.to_string(), "other".to_string());
        accessor
            .store()
            .store(&StoreKey::result(&node), &Value::Int(1), &tags)
            .unwrap();

        let err = accessor.load_result(&node).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Core(CoreError::FingerprintMismatch { .. })
        ));
    }
}
