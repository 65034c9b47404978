//! Named resource token pools.
//!
//! One counting semaphore per declared resource name, initialized to the
//! configured capacity. A call acquires every token it declares in one
//! atomic step (no partial holds, so token acquisition cannot deadlock)
//! and releases them when its guard drops.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};

use crate::error::ExecError;

#[derive(Debug)]
pub struct ResourcePool {
    capacity: BTreeMap<String, u64>,
    available: Mutex<BTreeMap<String, u64>>,
    released: Condvar,
}

impl ResourcePool {
    pub fn new(capacity: BTreeMap<String, u64>) -> ResourcePool {
        ResourcePool {
            available: Mutex::new(capacity.clone()),
            capacity,
            released: Condvar::new(),
        }
    }

    /// Acquires all requested tokens, blocking until they are free.
    /// Fails fast with `ResourceExhausted` when a request can never be
    /// satisfied.
    pub fn acquire<'a, 'b>(
        &'a self,
        needs: &'b BTreeMap<String, u64>,
    ) -> Result<ResourceGuard<'a, 'b>, ExecError> {
        for (name, &needed) in needs {
            let capacity = self.capacity.get(name).copied().unwrap_or(0);
            if needed > capacity {
                return Err(ExecError::ResourceExhausted {
                    resource: name.clone(),
                    needed,
                    capacity,
                });
            }
        }

        let mut available = self
            .available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            let satisfied = needs
                .iter()
                .all(|(name, needed)| available.get(name).copied().unwrap_or(0) >= *needed);
            if satisfied {
                for (name, needed) in needs {
                    *available.get_mut(name).expect("checked against capacity") -= needed;
                }
                return Ok(ResourceGuard { pool: self, needs });
            }
            available = self
                .released
                .wait(available)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn release(&self, needs: &BTreeMap<String, u64>) {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (name, needed) in needs {
            if let Some(slot) = available.get_mut(name) {
                *slot += needed;
            }
        }
        self.released.notify_all();
    }
}

/// Holds acquired tokens; dropping releases them.
#[derive(Debug)]
pub struct ResourceGuard<'a, 'b> {
    pool: &'a ResourcePool,
    needs: &'b BTreeMap<String, u64>,
}

impl Drop for ResourceGuard<'_, '_> {
    fn drop(&mut self) {
        self.pool.release(self.needs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn tokens(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn over_capacity_requests_fail_fast() {
        let pool = ResourcePool::new(tokens(&[("GPU", 2)]));
        let err = pool.acquire(&tokens(&[("GPU", 3)])).unwrap_err();
        assert!(matches!(err, ExecError::ResourceExhausted { .. }));
    }

    #[test]
    fn undeclared_resources_have_zero_capacity() {
        let pool = ResourcePool::new(tokens(&[]));
        assert!(pool.acquire(&tokens(&[("GPU", 1)])).is_err());
    }

    #[test]
    fn tokens_are_released_on_drop() {
        let pool = ResourcePool::new(tokens(&[("GPU", 2)]));
        let needs = tokens(&[("GPU", 2)]);
        drop(pool.acquire(&needs).unwrap());
        assert!(pool.acquire(&needs).is_ok());
    }

    #[test]
    fn full_pool_serializes_holders() {
        let pool = Arc::new(ResourcePool::new(tokens(&[("GPU", 2)])));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let concurrent = concurrent.clone();
                let peak = peak.clone();
                std::thread::spawn(move || {
                    let needs = tokens(&[("GPU", 2)]);
                    let _guard = pool.acquire(&needs).unwrap();
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
