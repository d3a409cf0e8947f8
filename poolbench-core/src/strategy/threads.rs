//! Thread-pool strategies backed by rayon.
//!
//! `thread` mode holds the shared [`ExecutionLock`] around every item, so the
//! pool's threads take turns the way interpreter threads take turns on a
//! global lock. `nogil` mode runs the same pool without the lock.

use super::{ExecutionStrategy, StrategyError, StrategyMode, apply_guarded, check_workers};
use crate::lock::ExecutionLock;
use crate::workload::ComputeFn;
use crate::Value;
use rayon::prelude::*;
use std::sync::Arc;

/// Fixed-size rayon pool, built fresh for each `map` call.
#[derive(Debug)]
pub struct ThreadPool {
    workers: usize,
    lock: Option<Arc<ExecutionLock>>,
}

impl ThreadPool {
    /// Pool whose workers serialize on a shared execution lock.
    pub fn new(workers: usize) -> Result<Self, StrategyError> {
        Ok(Self {
            workers: check_workers(workers)?,
            lock: Some(Arc::new(ExecutionLock::new())),
        })
    }

    /// Pool whose workers run in parallel without any shared lock.
    pub fn free_threaded(workers: usize) -> Result<Self, StrategyError> {
        Ok(Self {
            workers: check_workers(workers)?,
            lock: None,
        })
    }
}

impl ExecutionStrategy for ThreadPool {
    fn mode(&self) -> StrategyMode {
        if self.lock.is_some() {
            StrategyMode::Thread
        } else {
            StrategyMode::NoGil
        }
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn execution_lock(&self) -> Option<Arc<ExecutionLock>> {
        self.lock.clone()
    }

    fn map(&self, compute: &ComputeFn, inputs: Vec<Value>) -> Result<Vec<Value>, StrategyError> {
        let mode = self.mode();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(move |i| format!("poolbench-{mode}-{i}"))
            .build()
            .map_err(|e| StrategyError::Startup {
                mode,
                message: e.to_string(),
            })?;

        let lock = self.lock.as_deref();
        tracing::debug!(%mode, workers = self.workers, items = inputs.len(), "mapping on thread pool");

        // One item per task so that the pool hands work out item by item
        pool.install(|| {
            inputs
                .par_iter()
                .with_max_len(1)
                .enumerate()
                .map(|(index, input)| {
                    let _guard = lock.map(ExecutionLock::acquire);
                    apply_guarded(compute, index, input)
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::*;
    use crate::workload::ComputeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static INSIDE: AtomicUsize = AtomicUsize::new(0);
    static MAX_INSIDE: AtomicUsize = AtomicUsize::new(0);

    fn occupancy(input: &Value) -> Result<Value, ComputeError> {
        let now = INSIDE.fetch_add(1, Ordering::SeqCst) + 1;
        MAX_INSIDE.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(2));
        INSIDE.fetch_sub(1, Ordering::SeqCst);
        Ok(input.clone())
    }

    #[test]
    fn test_thread_mode_preserves_order() {
        let pool = ThreadPool::new(4).unwrap();
        let outputs = pool.map(&mixed_fn(), tagged_inputs(40)).unwrap();
        assert_in_order(&outputs, 40);
    }

    #[test]
    fn test_nogil_mode_preserves_order() {
        let pool = ThreadPool::free_threaded(4).unwrap();
        assert_eq!(pool.mode(), StrategyMode::NoGil);
        assert!(pool.execution_lock().is_none());
        let outputs = pool.map(&mixed_fn(), tagged_inputs(40)).unwrap();
        assert_in_order(&outputs, 40);
    }

    #[test]
    fn test_lock_serializes_items() {
        let pool = ThreadPool::new(4).unwrap();
        let compute = ComputeFn {
            workload: "occupancy",
            func: occupancy,
        };
        let inputs = (0..16).map(Value::Int).collect();
        let outputs = pool.map(&compute, inputs).unwrap();
        assert_eq!(outputs.len(), 16);
        assert_eq!(MAX_INSIDE.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_reported_with_index() {
        let pool = ThreadPool::free_threaded(3).unwrap();
        let inputs = (0..20).map(Value::Int).collect();
        match pool.map(&flaky_fn(), inputs) {
            Err(StrategyError::WorkerFailure { index, message }) => {
                assert_eq!(index, 13);
                assert!(message.contains("unlucky"));
            }
            other => panic!("expected worker failure, got {other:?}"),
        }
    }

    #[test]
    fn test_single_worker() {
        let pool = ThreadPool::new(1).unwrap();
        let outputs = pool.map(&mixed_fn(), tagged_inputs(5)).unwrap();
        assert_in_order(&outputs, 5);
    }
}
