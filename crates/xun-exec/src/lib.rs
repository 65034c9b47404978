//! Blueprint planning and graph execution.
//!
//! A [`Blueprint`] is the immutable plan for one entry call: the global
//! call DAG, the images of every reachable xun function, and the root
//! call. Drivers execute blueprints against a store, honoring every edge
//! of the graph and committing each call's result exactly once per
//! function fingerprint.

pub mod blueprint;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod parallel;
pub mod resource;
pub mod runtime;

pub use blueprint::Blueprint;
pub use coordinator::{CallStatus, Coordinator, ProcessLedger};
pub use driver::{driver_from_spec, Driver, Sequential};
pub use error::ExecError;
pub use parallel::Parallel;
pub use resource::ResourcePool;
