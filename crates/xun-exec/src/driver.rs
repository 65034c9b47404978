//! The driver contract and the sequential driver.

use xun_core::config::DriverSpec;
use xun_core::node::CallNode;
use xun_core::{CallGraph, Value};
use xun_lang::Images;
use xun_store::StoreAccessor;

use crate::error::ExecError;
use crate::parallel::Parallel;
use crate::runtime::execute_call;

/// Graph execution strategy.
///
/// A driver must honor every directed edge of the graph: a node may only
/// run once every predecessor's result is committed to the store. The
/// returned value is the one stored under the root call.
pub trait Driver: Send + Sync {
    fn exec(
        &self,
        graph: &CallGraph,
        root: &CallNode,
        images: &Images,
        accessor: &StoreAccessor,
    ) -> Result<Value, ExecError>;

    /// True when execution leaves the submitting process, in which case
    /// everything handed to the driver must be transportable.
    fn requires_transport(&self) -> bool {
        false
    }
}

/// Builds the driver a spec describes.
pub fn driver_from_spec(spec: &DriverSpec) -> Box<dyn Driver> {
    match spec {
        DriverSpec::Sequential => Box::new(Sequential),
        DriverSpec::Parallel {
            workers,
            resources,
            timeout_secs,
        } => {
            let mut driver = Parallel::new(*workers).with_resources(resources.clone());
            if let Some(seconds) = timeout_secs {
                driver =
                    driver.with_timeout(std::time::Duration::from_secs_f64(*seconds));
            }
            Box::new(driver)
        }
    }
}

/// Single-threaded driver: executes calls in topological order with a
/// deterministic tie-break (lexicographic on call fingerprint).
pub struct Sequential;

impl Driver for Sequential {
    fn exec(
        &self,
        graph: &CallGraph,
        root: &CallNode,
        images: &Images,
        accessor: &StoreAccessor,
    ) -> Result<Value, ExecError> {
        let schedule = graph.toposort()?;
        for call in &schedule {
            if accessor.completed(call)? {
                tracing::debug!(call = %call, "already completed");
                continue;
            }
            execute_call(call, images, accessor)?;
        }
        Ok(accessor.load_result(root)?)
    }
}
