//! The runtime value domain shared by the evaluator and the store.
//!
//! [`Value`] is the dynamic counterpart of everything a procedure can
//! compute: scalars, containers, and symbolic [`CallNode`] handles standing
//! for results that have not been computed yet.
//!
//! # Ordering and hashing
//!
//! Store keys and call fingerprints require a total order and a structural
//! hash over values. Floats are compared with `total_cmp` and hashed by
//! their bit pattern, so every value (NaN included) participates in the
//! order. Containers compare lexicographically after a variant-rank
//! comparison.
//!
//! # Hashable normalization
//!
//! Argument lists and stored results are normalized before they are hashed:
//! lists collapse to tuples, sets and maps are kept sorted, and the
//! normalization recurses through containers. Symbolic nodes are preserved
//! as-is.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::{CallNode, SubscriptKey};

/// A runtime value produced or consumed by procedure evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    /// Kept sorted and deduplicated; see [`Value::set_of`].
    Set(Vec<Value>),
    /// Key-value pairs kept sorted by key; see [`Value::map_of`].
    Map(Vec<(Value, Value)>),
    /// Symbolic handle to a result that is not known yet.
    Node(CallNode),
}

impl Value {
    /// Builds a set value: sorted, duplicates removed.
    pub fn set_of(mut items: Vec<Value>) -> Value {
        items.sort();
        items.dedup();
        Value::Set(items)
    }

    /// Builds a map value: sorted by key, later entries win on key clashes.
    pub fn map_of(pairs: Vec<(Value, Value)>) -> Value {
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            match out.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => out.push((key, value)),
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Map(out)
    }

    /// Returns a human-readable description of the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "dict",
            Value::Node(_) => "CallNode",
        }
    }

    /// Python truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(v) | Value::List(v) | Value::Set(v) => !v.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Node(_) => true,
        }
    }

    /// Collapses the value to its hashable normal form: lists become
    /// tuples, sets and maps are re-sorted, recursively. Nodes pass
    /// through untouched.
    pub fn normalized(self) -> Value {
        match self {
            Value::Tuple(items) | Value::List(items) => {
                Value::Tuple(items.into_iter().map(Value::normalized).collect())
            }
            Value::Set(items) => {
                Value::set_of(items.into_iter().map(Value::normalized).collect())
            }
            Value::Map(pairs) => Value::map_of(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.normalized(), v.normalized()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Semantic deep copy realizing pass-by-value.
    ///
    /// Fails with [`CoreError::Copy`] if the value embeds a symbolic node
    /// at any depth: the result a node stands for is not known yet, so user
    /// code reached through a constant block must never duplicate it.
    pub fn deep_copy(&self) -> Result<Value, CoreError> {
        match self {
            Value::Node(node) => Err(CoreError::Copy {
                what: format!("symbolic value {}", node),
            }),
            Value::Tuple(items) => Ok(Value::Tuple(deep_copy_all(items)?)),
            Value::List(items) => Ok(Value::List(deep_copy_all(items)?)),
            Value::Set(items) => Ok(Value::Set(deep_copy_all(items)?)),
            Value::Map(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    out.push((k.deep_copy()?, v.deep_copy()?));
                }
                Ok(Value::Map(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Visits every symbolic node embedded in the value, at any depth
    /// (including nodes inside the arguments of other nodes).
    pub fn visit_nodes<'a>(&'a self, visit: &mut dyn FnMut(&'a CallNode)) {
        match self {
            Value::Node(node) => {
                visit(node);
                for arg in &node.args {
                    arg.visit_nodes(visit);
                }
                for (_, value) in &node.kwargs {
                    value.visit_nodes(visit);
                }
            }
            Value::Tuple(items) | Value::List(items) | Value::Set(items) => {
                for item in items {
                    item.visit_nodes(visit);
                }
            }
            Value::Map(pairs) => {
                for (k, v) in pairs {
                    k.visit_nodes(visit);
                    v.visit_nodes(visit);
                }
            }
            _ => {}
        }
    }

    /// True if any symbolic node is embedded in the value.
    pub fn contains_node(&self) -> bool {
        let mut found = false;
        self.visit_nodes(&mut |_| found = true);
        found
    }

    /// Applies a single subscript to a concrete value. Negative integer
    /// indices count from the end as in Python.
    pub fn index(&self, key: &SubscriptKey) -> Result<Value, CoreError> {
        let err = || CoreError::Subscript {
            type_name: self.type_name(),
            key: key.to_string(),
        };
        match (self, key) {
            (Value::Tuple(items), SubscriptKey::Int(i))
            | (Value::List(items), SubscriptKey::Int(i)) => {
                let idx = resolve_index(*i, items.len()).ok_or_else(err)?;
                Ok(items[idx].clone())
            }
            (Value::Str(s), SubscriptKey::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let idx = resolve_index(*i, chars.len()).ok_or_else(err)?;
                Ok(Value::Str(chars[idx].to_string()))
            }
            (Value::Map(pairs), SubscriptKey::Str(k)) => pairs
                .iter()
                .find(|(key, _)| matches!(key, Value::Str(s) if s == k))
                .map(|(_, v)| v.clone())
                .ok_or_else(err),
            (Value::Map(pairs), SubscriptKey::Int(i)) => pairs
                .iter()
                .find(|(key, _)| matches!(key, Value::Int(n) if n == i))
                .map(|(_, v)| v.clone())
                .ok_or_else(err),
            _ => Err(err()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::None => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Str(_) => 4,
            Value::Tuple(_) => 5,
            Value::List(_) => 6,
            Value::Set(_) => 7,
            Value::Map(_) => 8,
            Value::Node(_) => 9,
        }
    }
}

fn deep_copy_all(items: &[Value]) -> Result<Vec<Value>, CoreError> {
    items.iter().map(Value::deep_copy).collect()
}

/// Resolves a possibly negative index against a length.
pub(crate) fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx as usize >= len {
        None
    } else {
        Some(idx as usize)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::None, Value::None) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b))
            | (Value::List(a), Value::List(b))
            | (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Node(a), Value::Node(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            Value::None => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Tuple(v) | Value::List(v) | Value::Set(v) => v.hash(state),
            Value::Map(m) => m.hash(state),
            Value::Node(n) => n.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Tuple(items) => {
                write!(f, "(")?;
                write_joined(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::List(items) => {
                write!(f, "[")?;
                write_joined(f, items)?;
                write!(f, "]")
            }
            Value::Set(items) => {
                if items.is_empty() {
                    return write!(f, "set()");
                }
                write!(f, "{{")?;
                write_joined(f, items)?;
                write!(f, "}}")
            }
            Value::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Node(node) => write!(f, "{}", node),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::None),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1e9f64..1e9f64).prop_map(Value::Float),
            "[a-z]{0,8}".prop_map(Value::Str),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Tuple),
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::set_of),
                proptest::collection::vec((inner.clone(), inner), 0..3)
                    .prop_map(Value::map_of),
            ]
        })
    }

    proptest! {
        #[test]
        fn serde_round_trip(value in value_strategy()) {
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, value);
        }

        #[test]
        fn normalization_is_idempotent(value in value_strategy()) {
            let once = value.clone().normalized();
            prop_assert_eq!(once.clone().normalized(), once);
        }

        #[test]
        fn deep_copy_of_node_free_values_is_identity(value in value_strategy()) {
            prop_assert_eq!(value.deep_copy().unwrap(), value);
        }
    }
}
