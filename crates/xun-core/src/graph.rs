//! The call graph: a directed acyclic graph over [`CallNode`]s.
//!
//! [`CallGraph`] wraps a petgraph `DiGraph` together with a node-to-index
//! map so calls can be looked up structurally. An edge `a -> b` means the
//! result of `a` is needed to evaluate `b`. All mutation goes through
//! `CallGraph` methods so the index map stays consistent with the graph.

use std::collections::HashMap;
use std::fmt::Write as _;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::CoreError;
use crate::fingerprint::call_hash;
use crate::node::CallNode;

/// A directed graph of calls with structural node identity.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    graph: DiGraph<CallNode, ()>,
    index: HashMap<CallNode, NodeIndex>,
}

impl CallGraph {
    pub fn new() -> CallGraph {
        CallGraph::default()
    }

    /// Adds a call if not present; returns its index either way.
    pub fn add_call(&mut self, call: CallNode) -> NodeIndex {
        if let Some(&idx) = self.index.get(&call) {
            return idx;
        }
        let idx = self.graph.add_node(call.clone());
        self.index.insert(call, idx);
        idx
    }

    /// Adds the edge `from -> to`, inserting missing endpoints. Parallel
    /// edges are collapsed.
    pub fn add_dependency(&mut self, from: &CallNode, to: &CallNode) {
        let a = self.add_call(from.clone());
        let b = self.add_call(to.clone());
        if !self.graph.contains_edge(a, b) {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn contains(&self, call: &CallNode) -> bool {
        self.index.contains_key(call)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All calls in the graph, in insertion order.
    pub fn calls(&self) -> impl Iterator<Item = &CallNode> {
        self.graph.node_indices().map(move |i| &self.graph[i])
    }

    /// Nodes with no outgoing edges.
    pub fn sinks(&self) -> Vec<&CallNode> {
        self.graph
            .externals(Direction::Outgoing)
            .map(|i| &self.graph[i])
            .collect()
    }

    /// Nodes with no incoming edges.
    pub fn sources(&self) -> Vec<&CallNode> {
        self.graph
            .externals(Direction::Incoming)
            .map(|i| &self.graph[i])
            .collect()
    }

    pub fn predecessors(&self, call: &CallNode) -> Vec<&CallNode> {
        self.neighbors(call, Direction::Incoming)
    }

    pub fn successors(&self, call: &CallNode) -> Vec<&CallNode> {
        self.neighbors(call, Direction::Outgoing)
    }

    fn neighbors(&self, call: &CallNode, dir: Direction) -> Vec<&CallNode> {
        match self.index.get(call) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, dir)
                .map(|i| &self.graph[i])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Unions another graph into this one.
    pub fn merge(&mut self, other: &CallGraph) {
        for call in other.calls() {
            self.add_call(call.clone());
        }
        for edge in other.graph.edge_indices() {
            if let Some((a, b)) = other.graph.edge_endpoints(edge) {
                self.add_dependency(&other.graph[a], &other.graph[b]);
            }
        }
    }

    /// Fails with [`CoreError::NotDag`] if the graph contains a cycle.
    pub fn ensure_acyclic(&self) -> Result<(), CoreError> {
        if petgraph::algo::is_cyclic_directed(&self.graph) {
            Err(CoreError::NotDag)
        } else {
            Ok(())
        }
    }

    /// Topological order with a deterministic tie-break: among calls whose
    /// predecessors are all scheduled, the one with the lexicographically
    /// smallest call fingerprint runs first.
    pub fn toposort(&self) -> Result<Vec<CallNode>, CoreError> {
        let mut indegree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|i| {
                (
                    i,
                    self.graph.neighbors_directed(i, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut ready: std::collections::BTreeSet<(String, usize)> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&i, _)| (call_hash(&self.graph[i]).0, i.index()))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(entry) = ready.iter().next().cloned() {
            ready.remove(&entry);
            let idx = NodeIndex::new(entry.1);
            order.push(self.graph[idx].clone());
            for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let deg = indegree
                    .get_mut(&succ)
                    .expect("every graph node has an indegree entry");
                *deg -= 1;
                if *deg == 0 {
                    ready.insert((call_hash(&self.graph[succ]).0, succ.index()));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(CoreError::NotDag);
        }
        Ok(order)
    }

    /// Renders the graph in Graphviz dot format.
    pub fn dot(&self) -> String {
        let mut out = String::from("digraph calls {\n");
        for idx in self.graph.node_indices() {
            let label = format!("{}", self.graph[idx])
                .replace('\\', "\\\\")
                .replace('"', "\\\"");
            let _ = writeln!(out, "    {} [ label = \"{}\" ]", idx.index(), label);
        }
        for edge in self.graph.edge_indices() {
            if let Some((a, b)) = self.graph.edge_endpoints(edge) {
                let _ = writeln!(out, "    {} -> {}", a.index(), b.index());
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FunctionHash;
    use crate::value::Value;

    fn call(name: &str, arg: i64) -> CallNode {
        CallNode::new(
            name,
            FunctionHash::from("h"),
            vec![Value::Int(arg)],
            vec![],
        )
    }

    #[test]
    fn adding_the_same_call_twice_is_idempotent() {
        let mut graph = CallGraph::new();
        let a = graph.add_call(call("f", 1));
        let b = graph.add_call(call("f", 1));
        assert_eq!(a, b);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn sinks_and_sources() {
        let mut graph = CallGraph::new();
        graph.add_dependency(&call("a", 0), &call("b", 0));
        graph.add_dependency(&call("b", 0), &call("c", 0));
        assert_eq!(graph.sources(), vec![&call("a", 0)]);
        assert_eq!(graph.sinks(), vec![&call("c", 0)]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut graph = CallGraph::new();
        graph.add_dependency(&call("a", 0), &call("b", 0));
        graph.add_dependency(&call("b", 0), &call("a", 0));
        assert!(matches!(graph.ensure_acyclic(), Err(CoreError::NotDag)));
        assert!(graph.toposort().is_err());
    }

    #[test]
    fn toposort_respects_edges() {
        let mut graph = CallGraph::new();
        // Diamond: a -> b, a -> c, b -> d, c -> d
        graph.add_dependency(&call("a", 0), &call("b", 0));
        graph.add_dependency(&call("a", 0), &call("c", 0));
        graph.add_dependency(&call("b", 0), &call("d", 0));
        graph.add_dependency(&call("c", 0), &call("d", 0));

        let order = graph.toposort().unwrap();
        let pos = |name: &str| {
            order
                .iter()
                .position(|c| c.function_name == name)
                .unwrap()
        };
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn toposort_is_deterministic_for_unordered_peers() {
        let build = |flip: bool| {
            let mut graph = CallGraph::new();
            let (x, y) = (call("x", 1), call("y", 2));
            if flip {
                graph.add_call(y.clone());
                graph.add_call(x.clone());
            } else {
                graph.add_call(x.clone());
                graph.add_call(y.clone());
            }
            graph.toposort().unwrap()
        };
        assert_eq!(build(false), build(true));
    }

    #[test]
    fn merge_unions_nodes_and_edges() {
        let mut left = CallGraph::new();
        left.add_dependency(&call("a", 0), &call("b", 0));
        let mut right = CallGraph::new();
        right.add_dependency(&call("b", 0), &call("c", 0));
        left.merge(&right);
        assert_eq!(left.node_count(), 3);
        assert_eq!(left.edge_count(), 2);
    }

    #[test]
    fn dot_output_names_calls() {
        let mut graph = CallGraph::new();
        graph.add_call(call("f", 7));
        assert!(graph.dot().contains("f(7)"));
    }
}
