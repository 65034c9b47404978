//! The shared assignment ledger behind the HTTP surface.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Terminal status of an assigned call, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireStatus {
    Done,
    Failed,
}

/// Ledger errors, mapped to HTTP statuses by the handlers.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// `done` or `await` for a call id nobody was assigned.
    #[error("call {0} was never assigned")]
    NeverAssigned(String),

    /// A second `done` for the same call id.
    #[error("call {0} already has a terminal status")]
    AlreadyDone(String),
}

#[derive(Debug, Default)]
struct Entry {
    status: Option<WireStatus>,
}

/// Async assignment ledger: a map under a lock plus a notifier for
/// long-polling waiters. The mutex is never held across an await.
#[derive(Default)]
pub struct AsyncLedger {
    entries: Mutex<HashMap<String, Entry>>,
    completed: Notify,
}

impl AsyncLedger {
    pub fn new() -> AsyncLedger {
        AsyncLedger::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True for the first requester of `call_id` only.
    pub fn assign(&self, call_id: &str) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(call_id) {
            return false;
        }
        entries.insert(call_id.to_string(), Entry::default());
        true
    }

    /// Waits until the winner reports, then returns the status.
    pub async fn await_done(&self, call_id: &str) -> Result<WireStatus, LedgerError> {
        loop {
            // Register for wakeups before checking, so a report landing
            // between the check and the await is not missed.
            let notified = self.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let entries = self.lock();
                match entries.get(call_id) {
                    Some(Entry {
                        status: Some(status),
                    }) => return Ok(*status),
                    Some(_) => {}
                    None => return Err(LedgerError::NeverAssigned(call_id.to_string())),
                }
            }
            notified.await;
        }
    }

    /// Records the winner's terminal status and wakes every waiter.
    pub fn done(&self, call_id: &str, status: WireStatus) -> Result<(), LedgerError> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(call_id) else {
            return Err(LedgerError::NeverAssigned(call_id.to_string()));
        };
        if entry.status.is_some() {
            return Err(LedgerError::AlreadyDone(call_id.to_string()));
        }
        entry.status = Some(status);
        drop(entries);
        self.completed.notify_waiters();
        Ok(())
    }
}
