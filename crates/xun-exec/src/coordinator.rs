//! At-most-once call assignment.
//!
//! When two schedulable calls share a `(CallNode, function_hash)`
//! identity, only one invocation may happen; the others wait for the
//! winner's terminal status and then observe the committed result. The
//! [`Coordinator`] trait is that assignment record. The in-process
//! [`ProcessLedger`] covers single-machine drivers; distributed
//! deployments put the record outside process memory behind the same
//! trait (see the coordination server crate).

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

use crate::error::ExecError;

/// Terminal status of an assigned call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Done,
    Failed,
}

/// The assignment record. `call_id` is the call's content hash.
pub trait Coordinator: Send + Sync {
    /// First requester sees `true` and must eventually call
    /// [`Coordinator::done`]; everyone else sees `false` and must await.
    fn assign(&self, call_id: &str) -> Result<bool, ExecError>;

    /// Blocks until the winner reports a terminal status.
    fn await_done(&self, call_id: &str) -> Result<CallStatus, ExecError>;

    /// Reports the winner's terminal status, waking every waiter. Must be
    /// called exactly once per assignment.
    fn done(&self, call_id: &str, status: CallStatus) -> Result<(), ExecError>;
}

#[derive(Debug, Default)]
struct LedgerEntry {
    status: Option<CallStatus>,
}

/// Single-process assignment ledger: a map under one lock, waiters on a
/// condition variable.
#[derive(Default)]
pub struct ProcessLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    completed: Condvar,
}

impl ProcessLedger {
    pub fn new() -> ProcessLedger {
        ProcessLedger::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LedgerEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Coordinator for ProcessLedger {
    fn assign(&self, call_id: &str) -> Result<bool, ExecError> {
        let mut entries = self.lock();
        if entries.contains_key(call_id) {
            return Ok(false);
        }
        entries.insert(call_id.to_string(), LedgerEntry::default());
        Ok(true)
    }

    fn await_done(&self, call_id: &str) -> Result<CallStatus, ExecError> {
        let mut entries = self.lock();
        loop {
            match entries.get(call_id) {
                Some(LedgerEntry {
                    status: Some(status),
                }) => return Ok(*status),
                Some(_) => {}
                None => {
                    return Err(ExecError::Coordination {
                        message: format!("awaiting unassigned call {}", call_id),
                    })
                }
            }
            entries = self
                .completed
                .wait(entries)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn done(&self, call_id: &str, status: CallStatus) -> Result<(), ExecError> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(call_id) else {
            return Err(ExecError::Coordination {
                message: format!("done for unassigned call {}", call_id),
            });
        };
        if entry.status.is_some() {
            return Err(ExecError::Coordination {
                message: format!("duplicate done for call {}", call_id),
            });
        }
        entry.status = Some(status);
        self.completed.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_assign_wins_subsequent_lose() {
        let ledger = ProcessLedger::new();
        assert!(ledger.assign("c1").unwrap());
        assert!(!ledger.assign("c1").unwrap());
        assert!(ledger.assign("c2").unwrap());
    }

    #[test]
    fn done_wakes_waiters_with_the_status() {
        let ledger = Arc::new(ProcessLedger::new());
        assert!(ledger.assign("c1").unwrap());

        let waiter = {
            let ledger = ledger.clone();
            std::thread::spawn(move || ledger.await_done("c1").unwrap())
        };
        // Give the waiter a chance to block.
        std::thread::sleep(std::time::Duration::from_millis(20));
        ledger.done("c1", CallStatus::Failed).unwrap();
        assert_eq!(waiter.join().unwrap(), CallStatus::Failed);
    }

    #[test]
    fn duplicate_done_is_an_error() {
        let ledger = ProcessLedger::new();
        ledger.assign("c1").unwrap();
        ledger.done("c1", CallStatus::Done).unwrap();
        assert!(ledger.done("c1", CallStatus::Done).is_err());
    }

    #[test]
    fn awaiting_an_unassigned_call_is_an_error() {
        let ledger = ProcessLedger::new();
        assert!(ledger.await_done("never").is_err());
    }
}
