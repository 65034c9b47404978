//! The parallel driver: a worker pool over a shared task DAG.
//!
//! Scheduling is a scheduler loop plus condition variables; no
//! language-level coroutines. Three disjoint node sets are tracked under
//! one lock: `ready` (all predecessors committed, not dispatched),
//! in-flight (dispatched), and done (committed). Workers pull the
//! lexicographically smallest ready fingerprint, check the store for an
//! already-committed result, acquire declared resource tokens, execute,
//! commit, and promote successors.
//!
//! On the first error (or timeout) no further ready nodes are promoted
//! or dispatched; calls already in flight run to completion and their
//! results are committed so a re-run can reuse them; then the captured
//! error is raised. No cancellation is pushed into running calls.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use xun_core::fingerprint::call_hash;
use xun_core::node::CallNode;
use xun_core::{CallGraph, Value};
use xun_lang::Images;
use xun_store::StoreAccessor;

use crate::coordinator::{CallStatus, Coordinator, ProcessLedger};
use crate::driver::Driver;
use crate::error::ExecError;
use crate::resource::ResourcePool;
use crate::runtime::execute_call;

pub struct Parallel {
    workers: usize,
    resources: std::collections::BTreeMap<String, u64>,
    timeout: Option<Duration>,
    coordinator: Option<Arc<dyn Coordinator>>,
}

impl Parallel {
    pub fn new(workers: usize) -> Parallel {
        Parallel {
            workers: workers.max(1),
            resources: Default::default(),
            timeout: None,
            coordinator: None,
        }
    }

    /// Sets the cluster capacity per named resource.
    pub fn with_resources(
        mut self,
        resources: std::collections::BTreeMap<String, u64>,
    ) -> Parallel {
        self.resources = resources;
        self
    }

    /// Sets the top-level run timeout. Expiry behaves like a first
    /// error: drain in flight, then raise.
    pub fn with_timeout(mut self, timeout: Duration) -> Parallel {
        self.timeout = Some(timeout);
        self
    }

    /// Uses an external assignment record instead of the in-process
    /// ledger; required when several processes share one store.
    pub fn with_coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Parallel {
        self.coordinator = Some(coordinator);
        self
    }
}

struct SchedState {
    /// (call fingerprint, node index); the BTreeSet ordering gives the
    /// deterministic dispatch tie-break.
    ready: BTreeSet<(String, usize)>,
    /// Remaining uncommitted predecessors per node.
    pending: Vec<usize>,
    in_flight: usize,
    completed: usize,
    error: Option<ExecError>,
}

struct Scheduler<'a> {
    state: Mutex<SchedState>,
    wakeup: Condvar,
    nodes: Vec<CallNode>,
    hashes: Vec<String>,
    successors: Vec<Vec<usize>>,
    images: &'a Images,
    accessor: &'a StoreAccessor,
    pool: ResourcePool,
    ledger: Arc<dyn Coordinator>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl<'a> Scheduler<'a> {
    fn lock(&self) -> MutexGuard<'_, SchedState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn worker(&self) {
        loop {
            let Some(idx) = self.next_task() else {
                return;
            };
            let outcome = self.process(idx);
            self.commit(idx, outcome);
        }
    }

    /// Blocks until a node is ready, the run is finished, or the run has
    /// failed. Marks the returned node in flight.
    fn next_task(&self) -> Option<usize> {
        let total = self.nodes.len();
        let mut state = self.lock();
        loop {
            if state.error.is_some() || state.completed == total {
                return None;
            }
            if let Some(entry) = state.ready.iter().next().cloned() {
                state.ready.remove(&entry);
                state.in_flight += 1;
                return Some(entry.1);
            }
            state = match self.deadline {
                None => self
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.error = Some(ExecError::Timeout {
                            seconds: self
                                .timeout
                                .map(|t| t.as_secs_f64())
                                .unwrap_or_default(),
                        });
                        self.wakeup.notify_all();
                        return None;
                    }
                    self.wakeup
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    fn process(&self, idx: usize) -> Result<(), ExecError> {
        let call = &self.nodes[idx];
        if self.accessor.completed(call)? {
            tracing::debug!(call = %call, "already completed");
            return Ok(());
        }

        let call_id = &self.hashes[idx];
        if self.ledger.assign(call_id)? {
            let image = self.images.get(&call.function_name).ok_or_else(|| {
                ExecError::UnknownFunction {
                    name: call.function_name.clone(),
                }
            })?;
            let outcome = self
                .pool
                .acquire(&image.resources)
                .and_then(|_tokens| execute_call(call, self.images, self.accessor).map(|_| ()));
            let status = if outcome.is_ok() {
                CallStatus::Done
            } else {
                CallStatus::Failed
            };
            let reported = self.ledger.done(call_id, status);
            outcome.and(reported)
        } else {
            match self.ledger.await_done(call_id)? {
                CallStatus::Done => Ok(()),
                CallStatus::Failed => Err(ExecError::Coordination {
                    message: format!("assigned execution of {} failed", call),
                }),
            }
        }
    }

    fn commit(&self, idx: usize, outcome: Result<(), ExecError>) {
        let mut state = self.lock();
        state.in_flight -= 1;
        match outcome {
            Ok(()) => {
                state.completed += 1;
                for &succ in &self.successors[idx] {
                    state.pending[succ] -= 1;
                    if state.pending[succ] == 0 && state.error.is_none() {
                        state.ready.insert((self.hashes[succ].clone(), succ));
                    }
                }
            }
            Err(error) => {
                tracing::warn!(call = %self.nodes[idx], %error, "call failed");
                if state.error.is_none() {
                    state.error = Some(error);
                }
            }
        }
        self.wakeup.notify_all();
    }
}

impl Driver for Parallel {
    fn exec(
        &self,
        graph: &CallGraph,
        root: &CallNode,
        images: &Images,
        accessor: &StoreAccessor,
    ) -> Result<Value, ExecError> {
        graph.ensure_acyclic()?;

        let nodes: Vec<CallNode> = graph.calls().cloned().collect();
        let index: HashMap<&CallNode, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();
        let hashes: Vec<String> = nodes.iter().map(|n| call_hash(n).0).collect();
        let successors: Vec<Vec<usize>> = nodes
            .iter()
            .map(|node| {
                graph
                    .successors(node)
                    .into_iter()
                    .map(|succ| index[succ])
                    .collect()
            })
            .collect();
        let pending: Vec<usize> = nodes
            .iter()
            .map(|node| graph.predecessors(node).len())
            .collect();
        let ready: BTreeSet<(String, usize)> = pending
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| (hashes[i].clone(), i))
            .collect();

        let scheduler = Scheduler {
            state: Mutex::new(SchedState {
                ready,
                pending,
                in_flight: 0,
                completed: 0,
                error: None,
            }),
            wakeup: Condvar::new(),
            nodes,
            hashes,
            successors,
            images,
            accessor,
            pool: ResourcePool::new(self.resources.clone()),
            ledger: self
                .coordinator
                .clone()
                .unwrap_or_else(|| Arc::new(ProcessLedger::new())),
            deadline: self.timeout.map(|t| Instant::now() + t),
            timeout: self.timeout,
        };

        std::thread::scope(|scope| {
            for _ in 0..self.workers {
                scope.spawn(|| scheduler.worker());
            }
        });

        let mut state = scheduler.lock();
        if let Some(error) = state.error.take() {
            return Err(error);
        }
        drop(state);
        Ok(accessor.load_result(root)?)
    }

    fn requires_transport(&self) -> bool {
        self.coordinator.is_some()
    }
}
