//! Global Execution Lock
//!
//! One process-wide lock that lock-sharing strategies hold for the duration of
//! each item, the same way an interpreter lock serializes bytecode execution.
//! The contention probe competes for the same lock to estimate how much time
//! workers spend waiting on it.

use std::sync::{Mutex, MutexGuard};

/// Mutual-exclusion lock shared by every worker of one strategy.
#[derive(Debug, Default)]
pub struct ExecutionLock {
    inner: Mutex<()>,
}

/// Held while a worker executes.
pub struct ExecutionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl ExecutionLock {
    /// New, unheld lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is acquired.
    ///
    /// Poisoning is ignored: the lock protects no data, and worker panics are
    /// caught and reported before the guard is released.
    pub fn acquire(&self) -> ExecutionGuard<'_> {
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ExecutionGuard { _guard: guard }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lock_serializes_holders() {
        let lock = Arc::new(ExecutionLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..4 {
                let (lock, inside, max_inside) = (&lock, &inside, &max_inside);
                s.spawn(move || {
                    for _ in 0..50 {
                        let _guard = lock.acquire();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_acquire_after_poison() {
        let lock = Arc::new(ExecutionLock::new());
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        drop(lock.acquire());
    }
}
