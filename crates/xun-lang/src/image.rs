//! Frozen snapshots of decorated functions.
//!
//! A [`FunctionImage`] is everything needed to re-execute a xun function
//! deterministically: its compiled procedure, the module bindings it
//! closes over, its declared resources, and a fingerprint over its source
//! text and dependency fingerprints. Images are immutable once built.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use xun_core::node::{CallNode, FunctionHash};
use xun_core::Value;

use crate::interp::ModuleEnv;
use crate::procedure::Procedure;

/// Name-indexed table of function images, in decoration order.
pub type Images = IndexMap<String, FunctionImage>;

/// A frozen, serializable snapshot of one xun function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionImage {
    pub name: String,
    /// Identifier of the module the function was decorated in.
    pub module: String,
    /// The exact decorated source text; the first fingerprint input.
    pub source: String,
    pub hash: FunctionHash,
    /// Named resource tokens a call to this function holds while running,
    /// e.g. `GPU -> 2`.
    pub resources: BTreeMap<String, u64>,
    /// Names of the xun functions the constant block references. Contains
    /// the function's own name when it is recursive; the back-reference is
    /// by name, never by ownership.
    pub dependencies: Vec<String>,
    pub procedure: Procedure,
    /// Module constants and helper functions the procedure closes over.
    pub module_env: ModuleEnv,
}

impl FunctionImage {
    /// A call node invoking this image with the given arguments.
    pub fn callnode(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> CallNode {
        CallNode::new(&self.name, self.hash.clone(), args, kwargs)
    }
}
