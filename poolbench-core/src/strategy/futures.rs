//! Submit/wait/collect executor.
//!
//! Every item is submitted up front as a blocking task on a tokio runtime
//! whose blocking pool is capped at the worker count. The executor then waits
//! for all of them to settle and collects results in submission order. Tasks
//! hold the shared execution lock while they run, like `thread` mode.

use super::{ExecutionStrategy, StrategyError, StrategyMode, apply_guarded, check_workers};
use crate::lock::ExecutionLock;
use crate::workload::ComputeFn;
use crate::Value;
use std::sync::Arc;

/// Futures-style executor with a bounded blocking pool.
#[derive(Debug)]
pub struct FutureExecutor {
    workers: usize,
    lock: Arc<ExecutionLock>,
}

impl FutureExecutor {
    pub fn new(workers: usize) -> Result<Self, StrategyError> {
        Ok(Self {
            workers: check_workers(workers)?,
            lock: Arc::new(ExecutionLock::new()),
        })
    }
}

impl ExecutionStrategy for FutureExecutor {
    fn mode(&self) -> StrategyMode {
        StrategyMode::Futures
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn execution_lock(&self) -> Option<Arc<ExecutionLock>> {
        Some(Arc::clone(&self.lock))
    }

    fn map(&self, compute: &ComputeFn, inputs: Vec<Value>) -> Result<Vec<Value>, StrategyError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(self.workers)
            .thread_name("poolbench-futures")
            .build()
            .map_err(|e| StrategyError::Startup {
                mode: StrategyMode::Futures,
                message: e.to_string(),
            })?;

        // submit
        let handles: Vec<_> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let lock = Arc::clone(&self.lock);
                let compute = *compute;
                runtime.spawn_blocking(move || {
                    let _guard = lock.acquire();
                    apply_guarded(&compute, index, &input)
                })
            })
            .collect();

        // wait
        let settled = runtime.block_on(async move {
            let mut settled = Vec::with_capacity(handles.len());
            for handle in handles {
                settled.push(handle.await);
            }
            settled
        });

        // Dropping the runtime joins its blocking threads
        drop(runtime);

        // collect
        settled
            .into_iter()
            .enumerate()
            .map(|(index, joined)| match joined {
                Ok(result) => result,
                Err(e) => Err(StrategyError::WorkerFailure {
                    index,
                    message: e.to_string(),
                }),
            })
            .collect()
    }
}
