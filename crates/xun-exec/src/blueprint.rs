//! Blueprint planning: function discovery and call-graph composition.
//!
//! A blueprint is built in three steps: breadth-first discovery of every
//! xun function reachable from the entry function's static dependencies,
//! breadth-first composition of the global call graph starting at the
//! entry call, and an acyclicity check. Everything is done before any
//! driver runs, so planning failures are synchronous.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use xun_core::node::CallNode;
use xun_core::{CallGraph, CoreError, Value};
use xun_lang::program::build_graph;
use xun_lang::Images;
use xun_store::{Store, StoreAccessor};

use crate::driver::Driver;
use crate::error::ExecError;

/// A prepared call to a xun function: the call, the images of every
/// reachable function, and the DAG over their calls. Immutable; running
/// it requires only a driver and a store.
#[derive(Debug)]
pub struct Blueprint {
    pub call: CallNode,
    pub functions: Images,
    pub graph: CallGraph,
}

impl Blueprint {
    /// Plans a call to `entry` with concrete arguments.
    pub fn new(
        module_functions: &Images,
        entry: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Blueprint, ExecError> {
        let functions = discover_functions(module_functions, entry)?;
        let image = functions
            .get(entry)
            .expect("discovery starts at the entry function");
        let call = image.callnode(args, kwargs);
        let graph = build_call_graph(&functions, &call)?;
        Ok(Blueprint {
            call,
            functions,
            graph,
        })
    }

    /// Executes the blueprint. Before anything reaches the driver, the
    /// plan is checked to be transportable when the driver needs it:
    /// a process-local store cannot cross a driver boundary.
    pub fn run(&self, driver: &dyn Driver, store: Arc<dyn Store>) -> Result<Value, ExecError> {
        if driver.requires_transport() && store.spec().is_none() {
            return Err(CoreError::Copy {
                what: "process-local store across a driver boundary".to_string(),
            }
            .into());
        }
        let accessor = StoreAccessor::new(store);
        driver.exec(&self.graph, &self.call, &self.functions, &accessor)
    }
}

/// Breadth-first search over static dependencies; each function appears
/// at most once by name.
pub fn discover_functions(
    module_functions: &Images,
    entry: &str,
) -> Result<Images, ExecError> {
    let mut discovered = Images::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(entry.to_string());

    while let Some(name) = queue.pop_front() {
        if discovered.contains_key(&name) {
            continue;
        }
        let image = module_functions
            .get(&name)
            .ok_or_else(|| ExecError::UnknownFunction { name: name.clone() })?;
        discovered.insert(name, image.clone());
        for dependency in &image.dependencies {
            queue.push_back(dependency.clone());
        }
    }
    Ok(discovered)
}

/// Breadth-first composition of the global graph from the entry call.
pub fn build_call_graph(
    functions: &Images,
    entry_call: &CallNode,
) -> Result<CallGraph, ExecError> {
    let mut graph = CallGraph::new();
    let mut visited: HashSet<CallNode> = HashSet::new();
    let mut queue: VecDeque<CallNode> = VecDeque::new();
    queue.push_back(entry_call.clone());

    while let Some(call) = queue.pop_front() {
        if !visited.insert(call.clone()) {
            continue;
        }
        let image = functions
            .get(&call.function_name)
            .ok_or_else(|| ExecError::UnknownFunction {
                name: call.function_name.clone(),
            })?;
        let (local, dependencies) = build_graph(image, functions, &call)?;
        graph.merge(&local);
        for dependency in dependencies {
            queue.push_back(dependency);
        }
    }

    graph.ensure_acyclic()?;
    Ok(graph)
}
