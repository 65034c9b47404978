//! Layered store backend.
//!
//! Composes other stores: reads hit the first layer that contains the
//! key, writes and removes always go to the top layer. Tag queries
//! delegate to the first layer that supports them.

use std::sync::Arc;

use xun_core::config::StoreSpec;
use xun_core::Value;

use crate::error::StoreError;
use crate::key::StoreKey;
use crate::query::TagCondition;
use crate::traits::{Store, Tags};

pub struct LayeredStore {
    layers: Vec<Arc<dyn Store>>,
}

impl LayeredStore {
    /// Builds a layered store; `layers[0]` is the write layer.
    pub fn new(layers: Vec<Arc<dyn Store>>) -> Result<LayeredStore, StoreError> {
        if layers.is_empty() {
            return Err(StoreError::Unsupported {
                operation: "a layered store with no layers",
            });
        }
        Ok(LayeredStore { layers })
    }

    fn containing(&self, key: &StoreKey) -> Result<Option<&Arc<dyn Store>>, StoreError> {
        for layer in &self.layers {
            if layer.contains(key)? {
                return Ok(Some(layer));
            }
        }
        Ok(None)
    }
}

impl Store for LayeredStore {
    fn contains(&self, key: &StoreKey) -> Result<bool, StoreError> {
        Ok(self.containing(key)?.is_some())
    }

    fn store(&self, key: &StoreKey, value: &Value, tags: &Tags) -> Result<(), StoreError> {
        self.layers[0].store(key, value, tags)
    }

    fn load(&self, key: &StoreKey) -> Result<Value, StoreError> {
        match self.containing(key)? {
            Some(layer) => layer.load(key),
            None => Err(StoreError::not_found(key)),
        }
    }

    fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
        self.layers[0].remove(key)
    }

    fn tags(&self, key: &StoreKey) -> Result<Tags, StoreError> {
        match self.containing(key)? {
            Some(layer) => layer.tags(key),
            None => Err(StoreError::not_found(key)),
        }
    }

    fn query(&self, conditions: &[TagCondition]) -> Result<Vec<StoreKey>, StoreError> {
        for layer in &self.layers {
            match layer.query(conditions) {
                Err(StoreError::Unsupported { .. }) => continue,
                other => return other,
            }
        }
        Err(StoreError::Unsupported {
            operation: "tag queries (no layer supports them)",
        })
    }

    fn spec(&self) -> Option<StoreSpec> {
        let layers: Option<Vec<StoreSpec>> =
            self.layers.iter().map(|layer| layer.spec()).collect();
        layers.map(|layers| StoreSpec::Layered { layers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use xun_core::node::{CallNode, FunctionHash};

    fn key(arg: i64) -> StoreKey {
        StoreKey::result(&CallNode::new(
            "f",
            FunctionHash::from("h"),
            vec![Value::Int(arg)],
            vec![],
        ))
    }

    #[test]
    fn writes_go_to_the_top_layer_only() {
        let top = Arc::new(MemoryStore::new());
        let bottom = Arc::new(MemoryStore::new());
        let layered = LayeredStore::new(vec![top.clone(), bottom.clone()]).unwrap();

        let k = key(3);
        layered.store(&k, &Value::Int(6), &Tags::new()).unwrap();

        assert!(top.contains(&k).unwrap());
        assert!(!bottom.contains(&k).unwrap());
        assert!(layered.contains(&k).unwrap());
    }

    #[test]
    fn reads_fall_through_to_lower_layers() {
        let top = Arc::new(MemoryStore::new());
        let bottom = Arc::new(MemoryStore::new());
        let k = key(2);
        bottom.store(&k, &Value::Int(4), &Tags::new()).unwrap();

        let layered = LayeredStore::new(vec![top.clone(), bottom]).unwrap();
        assert_eq!(layered.load(&k).unwrap(), Value::Int(4));
        assert!(!top.contains(&k).unwrap());
    }

    #[test]
    fn the_first_containing_layer_wins() {
        let top = Arc::new(MemoryStore::new());
        let bottom = Arc::new(MemoryStore::new());
        let k = key(1);
        top.store(&k, &Value::Int(10), &Tags::new()).unwrap();
        bottom.store(&k, &Value::Int(20), &Tags::new()).unwrap();

        let layered = LayeredStore::new(vec![top, bottom]).unwrap();
        assert_eq!(layered.load(&k).unwrap(), Value::Int(10));
    }

    #[test]
    fn spec_is_none_when_any_layer_is_memory() {
        let layered =
            LayeredStore::new(vec![Arc::new(MemoryStore::new()) as Arc<dyn Store>])
                .unwrap();
        assert!(layered.spec().is_none());
    }

    #[test]
    fn zero_layers_is_rejected() {
        assert!(LayeredStore::new(vec![]).is_err());
    }
}
