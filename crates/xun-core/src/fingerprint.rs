//! Deterministic content fingerprints for sources, calls, and values.
//!
//! Three hashes are defined:
//!
//! - [`source_hash`]: identity of a function image. SHA-256 over the
//!   original source text followed by the sorted fingerprints of the
//!   function's dependencies, truncated to 12 bytes and base64url-encoded.
//! - [`call_hash`]: identity of a call. SHA-256 over the call's name,
//!   function hash, subscript chain, and canonical argument encodings,
//!   hex-encoded. Used as the store key identity and for on-disk file
//!   names.
//! - [`value_hash`]: deterministic content identifier for a value.
//!
//! # Determinism
//!
//! Values are fed to the hasher through an explicit canonical walk: every
//! variant is tagged, strings and collections are length-prefixed, floats
//! hash by bit pattern. Maps and sets are already sorted by construction
//! (see [`crate::value`]), so no hash ever depends on iteration order.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::node::{CallNode, FunctionHash, SubscriptKey};
use crate::value::Value;

/// Hex-encoded SHA-256 identity of one call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallHash(pub String);

impl CallHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computes the fingerprint of a function image from its source text and
/// the fingerprints of its dependencies. Dependencies are hashed in sorted
/// order; a function's own hash is excluded by the caller (recursion would
/// otherwise be circular).
pub fn source_hash<'a, I>(source: &str, dependency_hashes: I) -> FunctionHash
where
    I: IntoIterator<Item = &'a FunctionHash>,
{
    let mut deps: Vec<&FunctionHash> = dependency_hashes.into_iter().collect();
    deps.sort();
    deps.dedup();

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    for dep in deps {
        hasher.update(dep.as_str().as_bytes());
    }
    let digest = hasher.finalize();
    FunctionHash(URL_SAFE_NO_PAD.encode(&digest[..12]))
}

/// Computes the store-key identity of a call.
pub fn call_hash(node: &CallNode) -> CallHash {
    let mut hasher = Sha256::new();
    update_node(&mut hasher, node);
    CallHash(hex(&hasher.finalize()))
}

/// Deterministic content identifier for a value.
pub fn value_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    update_value(&mut hasher, value);
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn update_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn update_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_le_bytes());
}

fn update_node(hasher: &mut Sha256, node: &CallNode) {
    update_str(hasher, &node.function_name);
    update_str(hasher, node.function_hash.as_str());
    update_len(hasher, node.subscript.len());
    for key in &node.subscript {
        match key {
            SubscriptKey::Int(i) => {
                hasher.update([0x01]);
                hasher.update(i.to_le_bytes());
            }
            SubscriptKey::Str(s) => {
                hasher.update([0x02]);
                update_str(hasher, s);
            }
        }
    }
    update_len(hasher, node.args.len());
    for arg in &node.args {
        update_value(hasher, arg);
    }
    update_len(hasher, node.kwargs.len());
    for (name, value) in &node.kwargs {
        update_str(hasher, name);
        update_value(hasher, value);
    }
}

fn update_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::None => hasher.update([0x00]),
        Value::Bool(b) => {
            hasher.update([0x01]);
            hasher.update([*b as u8]);
        }
        Value::Int(i) => {
            hasher.update([0x02]);
            hasher.update(i.to_le_bytes());
        }
        Value::Float(f) => {
            hasher.update([0x03]);
            hasher.update(f.to_bits().to_le_bytes());
        }
        Value::Str(s) => {
            hasher.update([0x04]);
            update_str(hasher, s);
        }
        Value::Tuple(items) => {
            hasher.update([0x05]);
            update_seq(hasher, items);
        }
        Value::List(items) => {
            hasher.update([0x06]);
            update_seq(hasher, items);
        }
        Value::Set(items) => {
            hasher.update([0x07]);
            update_seq(hasher, items);
        }
        Value::Map(pairs) => {
            hasher.update([0x08]);
            update_len(hasher, pairs.len());
            for (k, v) in pairs {
                update_value(hasher, k);
                update_value(hasher, v);
            }
        }
        Value::Node(node) => {
            hasher.update([0x09]);
            update_node(hasher, node);
        }
    }
}

fn update_seq(hasher: &mut Sha256, items: &[Value]) {
    update_len(hasher, items.len());
    for item in items {
        update_value(hasher, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(args: Vec<Value>) -> CallNode {
        CallNode::new("f", FunctionHash::from("h"), args, vec![])
    }

    #[test]
    fn source_hash_is_sixteen_base64url_chars() {
        let hash = source_hash("def f():\n    return 1\n", []);
        assert_eq!(hash.as_str().len(), 16);
        assert!(hash
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn source_hash_changes_with_source_and_dependencies() {
        let a = source_hash("src a", []);
        let b = source_hash("src b", []);
        assert_ne!(a, b);

        let dep = FunctionHash::from("dep");
        let with_dep = source_hash("src a", [&dep]);
        assert_ne!(a, with_dep);
    }

    #[test]
    fn source_hash_ignores_dependency_order() {
        let d1 = FunctionHash::from("one");
        let d2 = FunctionHash::from("two");
        assert_eq!(
            source_hash("src", [&d1, &d2]),
            source_hash("src", [&d2, &d1])
        );
    }

    #[test]
    fn call_hash_is_hex_sha256() {
        let hash = call_hash(&node(vec![Value::Int(1)]));
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn call_hash_distinguishes_arguments_and_subscripts() {
        let base = node(vec![Value::Int(1)]);
        assert_ne!(call_hash(&base), call_hash(&node(vec![Value::Int(2)])));
        assert_ne!(
            call_hash(&base),
            call_hash(&base.index(crate::node::SubscriptKey::Int(0)))
        );
    }

    #[test]
    fn normalized_containers_hash_alike() {
        // Lists normalize to tuples at CallNode construction, so a call
        // made with a list equals one made with the same tuple.
        let with_list = node(vec![Value::List(vec![Value::Int(1)])]);
        let with_tuple = node(vec![Value::Tuple(vec![Value::Int(1)])]);
        assert_eq!(call_hash(&with_list), call_hash(&with_tuple));
    }

    #[test]
    fn value_hash_is_stable_across_calls() {
        let value = Value::Map(vec![(Value::Str("k".into()), Value::Float(2.5))]);
        assert_eq!(value_hash(&value), value_hash(&value));
    }
}
