//! Symbolic call handles.
//!
//! A [`CallNode`] identifies one call to a xun function with concrete
//! (normalized) arguments. CallNodes are the vertices of the call graph and
//! the identity under which results are stored. They are immutable:
//! indexing produces a new node with an extended subscript chain, the base
//! node is never touched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shape::Shape;
use crate::value::Value;

/// Truncated, base64url-encoded SHA-256 identity of a function image.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct FunctionHash(pub String);

impl FunctionHash {
    /// The empty hash used by unversioned latest-pointer keys.
    pub fn none() -> FunctionHash {
        FunctionHash(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FunctionHash {
    fn from(s: &str) -> Self {
        FunctionHash(s.to_string())
    }
}

impl fmt::Display for FunctionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One element of a subscript chain: an integer or string index.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SubscriptKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for SubscriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptKey::Int(i) => write!(f, "{}", i),
            SubscriptKey::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Immutable symbolic representation of a call that is to be executed.
///
/// CallNodes are used as sentinel values during scheduling: the value a
/// node represents is not known until execution, so semantic copies of
/// values embedding one fail (see [`Value::deep_copy`]).
///
/// Equality, ordering, and hashing are structural over all five fields.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CallNode {
    pub function_name: String,
    pub function_hash: FunctionHash,
    pub subscript: Vec<SubscriptKey>,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

impl CallNode {
    /// Creates a call node, normalizing arguments to their hashable form
    /// and sorting keyword arguments by name.
    pub fn new(
        function_name: impl Into<String>,
        function_hash: FunctionHash,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> CallNode {
        let mut kwargs: Vec<(String, Value)> = kwargs
            .into_iter()
            .map(|(name, value)| (name, value.normalized()))
            .collect();
        kwargs.sort_by(|a, b| a.0.cmp(&b.0));
        CallNode {
            function_name: function_name.into(),
            function_hash,
            subscript: Vec::new(),
            args: args.into_iter().map(Value::normalized).collect(),
            kwargs,
        }
    }

    /// Returns a new node with the subscript chain extended by `key`.
    pub fn index(&self, key: SubscriptKey) -> CallNode {
        let mut node = self.clone();
        node.subscript.push(key);
        node
    }

    /// The node with its subscript chain cleared. Execution and storage
    /// happen on base nodes; subscripted nodes only select into a result.
    pub fn base(&self) -> CallNode {
        let mut node = self.clone();
        node.subscript.clear();
        node
    }

    pub fn is_base(&self) -> bool {
        self.subscript.is_empty()
    }

    /// The node with its function hash cleared, keying entries that span
    /// code versions (the latest pointer).
    pub fn unversioned(&self) -> CallNode {
        let mut node = self.base();
        node.function_hash = FunctionHash::none();
        node
    }

    /// Unpacks this node into a tuple tree of subscripted nodes with the
    /// given shape. The result is not known yet, so each leaf is a new
    /// node selecting one element of it.
    pub fn unpack(&self, shape: &Shape) -> Value {
        crate::shape::unpack_node(self, shape, &self.subscript)
    }
}

impl fmt::Display for CallNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.function_name)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", arg)?;
        }
        for (name, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")?;
        for key in &self.subscript {
            write!(f, "[{}]", key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Vec<Value>, kwargs: Vec<(String, Value)>) -> CallNode {
        CallNode::new("f", FunctionHash::from("h"), args, kwargs)
    }

    #[test]
    fn arguments_are_normalized_on_construction() {
        let node = call(vec![Value::List(vec![Value::Int(1)])], vec![]);
        assert_eq!(node.args[0], Value::Tuple(vec![Value::Int(1)]));
    }

    #[test]
    fn kwargs_are_sorted_by_name() {
        let node = call(
            vec![],
            vec![
                ("b".to_string(), Value::Int(2)),
                ("a".to_string(), Value::Int(1)),
            ],
        );
        assert_eq!(node.kwargs[0].0, "a");
        assert_eq!(node.kwargs[1].0, "b");
    }

    #[test]
    fn equality_is_structural() {
        let a = call(vec![Value::Int(1)], vec![]);
        let b = call(vec![Value::List(vec![])], vec![]);
        assert_eq!(a, call(vec![Value::Int(1)], vec![]));
        assert_ne!(a, b);
    }

    #[test]
    fn indexing_extends_subscript_and_base_strips_it() {
        let node = call(vec![], vec![]);
        let indexed = node.index(SubscriptKey::Int(2));
        assert!(node.is_base());
        assert_eq!(indexed.subscript, vec![SubscriptKey::Int(2)]);
        assert_eq!(indexed.base(), node);
    }

    #[test]
    fn display_includes_subscripts() {
        let node = call(vec![Value::Int(1)], vec![("k".into(), Value::Int(2))]);
        let indexed = node.index(SubscriptKey::Int(0));
        assert_eq!(format!("{}", indexed), "f(1, k=2)[0]");
    }

    #[test]
    fn unversioned_clears_hash_and_subscript() {
        let node = call(vec![], vec![]).index(SubscriptKey::Int(0));
        let unversioned = node.unversioned();
        assert_eq!(unversioned.function_hash, FunctionHash::none());
        assert!(unversioned.is_base());
    }
}
