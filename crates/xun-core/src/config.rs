//! Serializable descriptions of drivers and stores.
//!
//! A context binds a driver and a store by *description*; the concrete
//! backend objects are constructed from these specs by the crates that own
//! them. Keeping the specs in the shared data model lets the script
//! frontend produce them and the store/executor crates consume them
//! without depending on each other.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Description of a store backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreSpec {
    Memory,
    Disk { root: PathBuf },
    Sqlite { path: PathBuf },
    Layered { layers: Vec<StoreSpec> },
}

impl StoreSpec {
    /// True if a store built from this spec can cross a process boundary.
    /// In-memory layers pin the store to the host process.
    pub fn transportable(&self) -> bool {
        match self {
            StoreSpec::Memory => false,
            StoreSpec::Disk { .. } | StoreSpec::Sqlite { .. } => true,
            StoreSpec::Layered { layers } => layers.iter().all(StoreSpec::transportable),
        }
    }
}

/// Description of a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriverSpec {
    Sequential,
    Parallel {
        workers: usize,
        /// Cluster capacity per named resource, e.g. `GPU -> 2`.
        resources: BTreeMap<String, u64>,
        /// Top-level run timeout in seconds.
        timeout_secs: Option<f64>,
    },
}
