//! The two derived programs of a procedure.
//!
//! Both programs evaluate the same compiled constant statements; they
//! differ only in how a call to a xun function behaves:
//!
//! - the **graph program** ([`build_graph`]) records a call node into a
//!   local graph and hands back the node as a sentinel value;
//! - the **task program** ([`run_task`]) replaces the call by a load of
//!   its stored result and then runs the procedure body.

use xun_core::node::{CallNode, FunctionHash};
use xun_core::{CallGraph, Value};

use crate::error::LangError;
use crate::image::{FunctionImage, Images};
use crate::interp::{bind_params, Interp, XunCalls};

/// Where the task program finds the results of its dependencies.
pub trait ResultResolver {
    fn load_result(&self, node: &CallNode) -> Result<Value, LangError>;
}

/// Hash lookup restricted to the image's declared dependencies, so the
/// set of names recognized as xun calls is fixed at decoration time.
fn dependency_hash(
    image: &FunctionImage,
    images: &Images,
    name: &str,
) -> Option<FunctionHash> {
    if !image.dependencies.iter().any(|dep| dep == name) {
        return None;
    }
    images.get(name).map(|dep| dep.hash.clone())
}

struct Register<'a> {
    image: &'a FunctionImage,
    images: &'a Images,
    graph: CallGraph,
}

impl XunCalls for Register<'_> {
    fn lookup(&self, name: &str) -> Option<FunctionHash> {
        dependency_hash(self.image, self.images, name)
    }

    fn call(&mut self, node: CallNode) -> Result<Value, LangError> {
        self.graph.add_call(node.clone());
        let mut embedded = Vec::new();
        for arg in &node.args {
            top_level_nodes(arg, &mut embedded);
        }
        for (_, value) in &node.kwargs {
            top_level_nodes(value, &mut embedded);
        }
        for dep in embedded {
            self.graph.add_dependency(&dep.base(), &node);
        }
        Ok(Value::Node(node))
    }
}

/// Collects nodes embedded in a value without descending into the
/// arguments of the nodes themselves; those edges belong to the fragment
/// that registered them.
fn top_level_nodes(value: &Value, out: &mut Vec<CallNode>) {
    match value {
        Value::Node(node) => out.push(node.clone()),
        Value::Tuple(items) | Value::List(items) | Value::Set(items) => {
            for item in items {
                top_level_nodes(item, out);
            }
        }
        Value::Map(pairs) => {
            for (k, v) in pairs {
                top_level_nodes(k, out);
                top_level_nodes(v, out);
            }
        }
        _ => {}
    }
}

/// Runs the graph program of `image` for `call`, producing the local call
/// graph connected to `call` and the calls it depends on.
pub fn build_graph(
    image: &FunctionImage,
    images: &Images,
    call: &CallNode,
) -> Result<(CallGraph, Vec<CallNode>), LangError> {
    let frame = bind_params(&image.procedure.params, &call.args, &call.kwargs, &image.name)?;

    let mut register = Register {
        image,
        images,
        graph: CallGraph::new(),
    };
    {
        let mut interp = Interp::new(&image.module_env, &mut register);
        for (name, value) in frame {
            interp.bind(name, value);
        }
        interp.run_constants(&image.procedure.constants)?;
    }
    let mut graph = register.graph;

    // Connect the fragment to the call it computes.
    graph.add_call(call.clone());
    let dangling: Vec<CallNode> = graph
        .sinks()
        .into_iter()
        .filter(|sink| *sink != call)
        .cloned()
        .collect();
    for sink in dangling {
        graph.add_dependency(&sink, call);
    }

    let dependencies = graph
        .calls()
        .filter(|node| *node != call)
        .cloned()
        .collect();
    Ok((graph, dependencies))
}

struct Load<'a> {
    image: &'a FunctionImage,
    images: &'a Images,
    resolver: &'a dyn ResultResolver,
}

impl XunCalls for Load<'_> {
    fn lookup(&self, name: &str) -> Option<FunctionHash> {
        dependency_hash(self.image, self.images, name)
    }

    fn call(&mut self, node: CallNode) -> Result<Value, LangError> {
        self.resolver.load_result(&node)
    }
}

/// Runs the task program of `image` with already-resolved arguments,
/// loading dependency results through `resolver`. The returned value is
/// normalized to its hashable form.
pub fn run_task(
    image: &FunctionImage,
    images: &Images,
    args: &[Value],
    kwargs: &[(String, Value)],
    resolver: &dyn ResultResolver,
) -> Result<Value, LangError> {
    let frame = bind_params(&image.procedure.params, args, kwargs, &image.name)?;

    let mut load = Load {
        image,
        images,
        resolver,
    };
    let mut interp = Interp::new(&image.module_env, &mut load);
    for (name, value) in frame {
        interp.bind(name, value);
    }
    interp.run_constants(&image.procedure.constants)?;
    let result = interp.run_body(&image.procedure.body)?;
    Ok(result.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::load_source;

    fn images_for(source: &str) -> Images {
        load_source(source, std::path::Path::new("<test>"))
            .unwrap()
            .functions
    }

    const MODULE: &str = "\
import xun

ctx = xun.context(driver=xun.Sequential(), store=xun.Memory())

@ctx.function()
def leaf(n):
    return n * 10

@ctx.function()
def pair(n):
    return a + b
    with ...:
        a = leaf(n)
        b = leaf(n + 1)
";

    #[test]
    fn graph_program_registers_constant_calls() {
        let images = images_for(MODULE);
        let image = &images["pair"];
        let call = image.callnode(vec![Value::Int(1)], vec![]);
        let (graph, deps) = build_graph(image, &images, &call).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(deps.len(), 2);
        // Both leaves point at the pair call.
        assert_eq!(graph.sinks(), vec![&call]);
        for dep in &deps {
            assert_eq!(dep.function_name, "leaf");
            assert_eq!(graph.successors(dep), vec![&call]);
        }
    }

    #[test]
    fn graph_program_without_constants_is_a_single_node() {
        let images = images_for(MODULE);
        let image = &images["leaf"];
        let call = image.callnode(vec![Value::Int(4)], vec![]);
        let (graph, deps) = build_graph(image, &images, &call).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert!(deps.is_empty());
    }

    #[test]
    fn task_program_loads_dependencies_and_runs_the_body() {
        let images = images_for(MODULE);
        let image = &images["pair"];

        struct Canned;
        impl ResultResolver for Canned {
            fn load_result(&self, node: &CallNode) -> Result<Value, LangError> {
                let Value::Int(n) = node.args[0] else {
                    panic!("leaf takes an int");
                };
                Ok(Value::Int(n * 10))
            }
        }

        let result =
            run_task(image, &images, &[Value::Int(1)], &[], &Canned).unwrap();
        // leaf(1) + leaf(2) with the canned resolver.
        assert_eq!(result, Value::Int(30));
    }

    #[test]
    fn nested_calls_create_edges_between_dependencies() {
        let source = "\
import xun

ctx = xun.context(driver=xun.Sequential(), store=xun.Memory())

@ctx.function()
def inner():
    return 1

@ctx.function()
def outer(x):
    return x

@ctx.function()
def chained():
    return r
    with ...:
        r = outer(inner())
";
        let images = images_for(source);
        let image = &images["chained"];
        let call = image.callnode(vec![], vec![]);
        let (graph, deps) = build_graph(image, &images, &call).unwrap();

        assert_eq!(deps.len(), 2);
        let inner = deps
            .iter()
            .find(|d| d.function_name == "inner")
            .unwrap();
        let outer = deps
            .iter()
            .find(|d| d.function_name == "outer")
            .unwrap();
        assert!(graph.successors(inner).contains(&outer));
    }
}
