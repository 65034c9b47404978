//! Core error types for xun-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the value domain, call nodes, and the call graph.

use thiserror::Error;

use crate::node::CallNode;

/// Core errors produced by the xun-core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Something that must not be duplicated or transported was: a
    /// symbolic value whose result is not known yet, or a process-local
    /// store crossing a driver boundary.
    #[error("cannot copy {what}")]
    Copy { what: String },

    /// A graph that must be acyclic contains a cycle.
    #[error("graph is not a directed acyclic graph")]
    NotDag,

    /// A stored result does not carry the function hash it was looked up
    /// under.
    #[error("fingerprint mismatch for {call}: expected {expected}, stored {stored}")]
    FingerprintMismatch {
        call: CallNode,
        expected: String,
        stored: String,
    },

    /// A subscript was applied to a value that does not support it, or the
    /// index was out of range.
    #[error("cannot index {type_name} value with {key}")]
    Subscript { type_name: &'static str, key: String },

    /// A value could not be destructured into the requested shape.
    #[error("cannot unpack {type_name} value of length {len} into {expected} targets")]
    Unpack {
        type_name: &'static str,
        len: usize,
        expected: usize,
    },
}
