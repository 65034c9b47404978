//! Store key space.
//!
//! Results are stored once per `(CallNode, function_hash)` pair. Writing
//! the same call under a new function hash retains the old entry and
//! advances a per-call latest pointer, which is keyed by the call with
//! its hash cleared (a call node embeds the hash of the code that
//! created it).

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use xun_core::fingerprint::call_hash;
use xun_core::node::{CallNode, FunctionHash};

/// A key in the result store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKey {
    /// The result of `call` as computed by the code version
    /// `function_hash`.
    Result {
        call: CallNode,
        function_hash: FunctionHash,
    },
    /// The per-call pointer to the function hash that most recently
    /// produced a result.
    Latest { call: CallNode },
}

impl StoreKey {
    /// The result slot for a call, under the hash the call carries.
    pub fn result(call: &CallNode) -> StoreKey {
        StoreKey::Result {
            call: call.base(),
            function_hash: call.function_hash.clone(),
        }
    }

    /// The result slot for a call under an explicit hash.
    pub fn result_under(call: &CallNode, function_hash: FunctionHash) -> StoreKey {
        StoreKey::Result {
            call: call.base(),
            function_hash,
        }
    }

    /// The latest pointer for a call, across code versions.
    pub fn latest(call: &CallNode) -> StoreKey {
        StoreKey::Latest {
            call: call.unversioned(),
        }
    }

    pub fn call(&self) -> &CallNode {
        match self {
            StoreKey::Result { call, .. } | StoreKey::Latest { call } => call,
        }
    }

    pub fn function_name(&self) -> &str {
        &self.call().function_name
    }

    /// The function hash for result slots; latest pointers span versions.
    pub fn function_hash(&self) -> Option<&FunctionHash> {
        match self {
            StoreKey::Result { function_hash, .. } => Some(function_hash),
            StoreKey::Latest { .. } => None,
        }
    }

    /// Hex SHA-256 identity of this key, used for on-disk file names and
    /// database key columns.
    pub fn content_hash(&self) -> String {
        match self {
            StoreKey::Result {
                call,
                function_hash,
            } => {
                let mut keyed = call.clone();
                keyed.function_hash = function_hash.clone();
                call_hash(&keyed).0
            }
            StoreKey::Latest { call } => {
                // Tagged re-hash so a latest pointer can never collide
                // with a result slot.
                let mut hasher = Sha256::new();
                hasher.update(b"latest:");
                hasher.update(call_hash(call).0.as_bytes());
                let digest = hasher.finalize();
                let mut out = String::with_capacity(64);
                for byte in digest {
                    out.push_str(&format!("{:02x}", byte));
                }
                out
            }
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::Result {
                call,
                function_hash,
            } => write!(f, "{} @ {}", call, function_hash),
            StoreKey::Latest { call } => write!(f, "{} @ latest", call),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xun_core::Value;

    fn call(arg: i64) -> CallNode {
        CallNode::new(
            "f",
            FunctionHash::from("abcd"),
            vec![Value::Int(arg)],
            vec![],
        )
    }

    #[test]
    fn result_keys_differ_per_function_hash() {
        let node = call(1);
        let a = StoreKey::result(&node);
        let b = StoreKey::result_under(&node, FunctionHash::from("other"));
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn latest_keys_span_code_versions() {
        let a = StoreKey::latest(&call(1));
        let mut other = call(1);
        other.function_hash = FunctionHash::from("other");
        let b = StoreKey::latest(&other);
        assert_eq!(a, b);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn latest_never_collides_with_a_result_slot() {
        let node = call(1);
        let latest = StoreKey::latest(&node);
        let unversioned_result =
            StoreKey::result_under(&node.unversioned(), FunctionHash::none());
        assert_ne!(latest.content_hash(), unversioned_result.content_hash());
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        let hash = StoreKey::result(&call(2)).content_hash();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn subscripts_do_not_change_the_key() {
        let node = call(3);
        let indexed = node.index(xun_core::SubscriptKey::Int(0));
        assert_eq!(
            StoreKey::result(&node).content_hash(),
            StoreKey::result(&indexed).content_hash()
        );
    }
}
