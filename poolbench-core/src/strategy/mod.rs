//! Execution Strategies
//!
//! Every concurrency model implements [`ExecutionStrategy`]: apply one compute
//! function to every input and hand back the outputs in input order.
//!
//! ```text
//!              ┌──────────────┐
//!  inputs ───▶ │   strategy   │ ───▶ outputs (same order)
//!              └──────┬───────┘
//!      ┌─────────┬────┴────┬──────────┬──────────────┐
//!  sequential  thread/   futures   subprocess   interp/interp2/interp3
//!              nogil    (tokio)   (processes)      (isolates)
//!             (rayon)
//! ```
//!
//! Strategies own whatever pool they create for exactly one `map` call and
//! release it on every exit path.

mod futures;
mod isolate;
mod process;
mod sequential;
mod threads;

pub use futures::FutureExecutor;
pub use isolate::{CopyIsolatePool, MoveIsolatePool, SLOT_BYTES, SlotIsolatePool};
pub use process::{ProcessPool, WorkerHandle, WorkerSpawnError};
pub use sequential::Sequential;
pub use threads::ThreadPool;

use crate::lock::ExecutionLock;
use crate::workload::{ComputeFn, WorkloadDef};
use crate::Value;
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Concurrency model selector. The string forms are the mode keys used on
/// the command line and in the metrics document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyMode {
    /// In order, on the calling thread
    Sequential,
    /// Thread pool whose workers share the global execution lock
    Thread,
    /// Thread pool without any shared lock
    NoGil,
    /// Submit/wait/collect executor sharing the global execution lock
    Futures,
    /// Pool of worker processes
    Subprocess,
    /// Isolates exchanging serialized copies
    Interp,
    /// Isolates exchanging ownership of values
    Interp2,
    /// Isolates exchanging values through fixed-size slots
    Interp3,
}

impl StrategyMode {
    /// Every mode, in declaration order.
    pub const ALL: [StrategyMode; 8] = [
        StrategyMode::Sequential,
        StrategyMode::Thread,
        StrategyMode::NoGil,
        StrategyMode::Futures,
        StrategyMode::Subprocess,
        StrategyMode::Interp,
        StrategyMode::Interp2,
        StrategyMode::Interp3,
    ];

    /// Modes the driver attempts when none are requested.
    pub const DRIVER_DEFAULT: [StrategyMode; 7] = [
        StrategyMode::Interp,
        StrategyMode::Interp2,
        StrategyMode::Interp3,
        StrategyMode::Thread,
        StrategyMode::NoGil,
        StrategyMode::Sequential,
        StrategyMode::Subprocess,
    ];

    /// Mode key.
    pub fn name(self) -> &'static str {
        match self {
            StrategyMode::Sequential => "sequential",
            StrategyMode::Thread => "thread",
            StrategyMode::NoGil => "nogil",
            StrategyMode::Futures => "futures",
            StrategyMode::Subprocess => "subprocess",
            StrategyMode::Interp => "interp",
            StrategyMode::Interp2 => "interp2",
            StrategyMode::Interp3 => "interp3",
        }
    }

    /// Whether workers of this mode share the global execution lock.
    pub fn shares_lock(self) -> bool {
        matches!(self, StrategyMode::Thread | StrategyMode::Futures)
    }
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        StrategyMode::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = StrategyMode::ALL.iter().map(|m| m.name()).collect();
                format!("unknown mode '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// Failure inside a strategy's `map`.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("worker count must be a positive integer, got {0}")]
    InvalidWorkerCount(usize),

    #[error("worker failed on input {index}: {message}")]
    WorkerFailure { index: usize, message: String },

    #[error("failed to start {mode} workers: {message}")]
    Startup { mode: StrategyMode, message: String },

    #[error("worker protocol error: {0}")]
    Protocol(String),
}

/// A mode cannot run a workload: the backend is missing or the pair is
/// structurally incompatible. Callers skip the mode instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{mode} cannot run {workload}: {reason}")]
pub struct StrategyUnavailable {
    /// Mode that was requested
    pub mode: StrategyMode,
    /// Workload that was requested
    pub workload: String,
    /// Why the pair cannot run
    pub reason: String,
}

/// Apply a compute function across a dataset under one concurrency model.
pub trait ExecutionStrategy: Send + Sync {
    /// Which mode this is.
    fn mode(&self) -> StrategyMode;

    /// Number of workers `map` runs with.
    fn workers(&self) -> usize;

    /// The lock shared by this strategy's workers, if any.
    fn execution_lock(&self) -> Option<Arc<ExecutionLock>> {
        None
    }

    /// Reject workloads this strategy cannot carry across its boundary.
    fn check_compatible(&self, _workload: &WorkloadDef) -> Result<(), StrategyUnavailable> {
        Ok(())
    }

    /// Apply `compute` to every input. Output `i` belongs to input `i`.
    fn map(&self, compute: &ComputeFn, inputs: Vec<Value>) -> Result<Vec<Value>, StrategyError>;
}

/// Settings that only some strategies consult.
#[derive(Debug, Clone, Default)]
pub struct StrategyOptions {
    /// Binary re-executed as a process-pool worker (defaults to the current
    /// executable)
    pub worker_binary: Option<PathBuf>,
}

/// Construct the strategy for `mode` with `workers` workers.
pub fn build_strategy(
    mode: StrategyMode,
    workers: usize,
    options: &StrategyOptions,
) -> Result<Box<dyn ExecutionStrategy>, StrategyError> {
    let strategy: Box<dyn ExecutionStrategy> = match mode {
        StrategyMode::Sequential => {
            check_workers(workers)?;
            Box::new(Sequential::new())
        }
        StrategyMode::Thread => Box::new(ThreadPool::new(workers)?),
        StrategyMode::NoGil => Box::new(ThreadPool::free_threaded(workers)?),
        StrategyMode::Futures => Box::new(FutureExecutor::new(workers)?),
        StrategyMode::Subprocess => {
            let pool = ProcessPool::new(workers)?;
            match &options.worker_binary {
                Some(binary) => Box::new(pool.with_binary(binary.clone())),
                None => Box::new(pool),
            }
        }
        StrategyMode::Interp => Box::new(CopyIsolatePool::new(workers)?),
        StrategyMode::Interp2 => Box::new(MoveIsolatePool::new(workers)?),
        StrategyMode::Interp3 => Box::new(SlotIsolatePool::new(workers)?),
    };
    Ok(strategy)
}

pub(crate) fn check_workers(workers: usize) -> Result<usize, StrategyError> {
    if workers == 0 {
        Err(StrategyError::InvalidWorkerCount(workers))
    } else {
        Ok(workers)
    }
}

/// Run one item, converting compute errors and panics into a
/// [`StrategyError::WorkerFailure`] that names the input.
pub(crate) fn apply_guarded(
    compute: &ComputeFn,
    index: usize,
    input: &Value,
) -> Result<Value, StrategyError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| compute.call(input))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StrategyError::WorkerFailure {
            index,
            message: e.to_string(),
        }),
        Err(panic) => Err(StrategyError::WorkerFailure {
            index,
            message: format!("panicked: {}", panic_message(panic.as_ref())),
        }),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::workload::ComputeError;

    /// Panics on input 13, doubles everything else.
    pub fn flaky(input: &Value) -> Result<Value, ComputeError> {
        match input.as_int() {
            Some(13) => panic!("unlucky input"),
            Some(n) => Ok(Value::Int(n * 2)),
            None => Err(ComputeError::unexpected("flaky", "int", input)),
        }
    }

    pub fn flaky_fn() -> ComputeFn {
        ComputeFn {
            workload: "flaky",
            func: flaky,
        }
    }

    /// Inputs tagged with their own position, with uneven sizes so that
    /// completion order differs from submission order.
    pub fn tagged_inputs(n: u64) -> Vec<Value> {
        (0..n)
            .map(|tag| Value::Tagged {
                tag,
                value: if tag % 3 == 0 { 20 } else { 5 },
            })
            .collect()
    }

    pub fn assert_in_order(outputs: &[Value], n: u64) {
        assert_eq!(outputs.len() as u64, n);
        for (i, out) in outputs.iter().enumerate() {
            let (tag, _) = out.as_tagged().expect("tagged output");
            assert_eq!(tag, i as u64, "output {i} carries tag {tag}");
        }
    }

    pub fn mixed_fn() -> ComputeFn {
        crate::workload::lookup("fib_mixed")
            .expect("fib_mixed registered")
            .compute_fn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names_roundtrip() {
        for mode in StrategyMode::ALL {
            assert_eq!(mode.name().parse::<StrategyMode>().unwrap(), mode);
            assert_eq!(mode.to_string(), mode.name());
        }
        assert_eq!(" Thread ".parse::<StrategyMode>().unwrap(), StrategyMode::Thread);
        assert!("process".parse::<StrategyMode>().is_err());
    }

    #[test]
    fn test_only_thread_modes_share_lock() {
        let sharing: Vec<_> = StrategyMode::ALL
            .into_iter()
            .filter(|m| m.shares_lock())
            .collect();
        assert_eq!(sharing, vec![StrategyMode::Thread, StrategyMode::Futures]);
    }

    #[test]
    fn test_build_rejects_zero_workers() {
        for mode in StrategyMode::ALL {
            let result = build_strategy(mode, 0, &StrategyOptions::default());
            assert!(
                matches!(result, Err(StrategyError::InvalidWorkerCount(0))),
                "{mode} accepted zero workers"
            );
        }
    }

    #[test]
    fn test_built_strategy_reports_mode_and_lock() {
        for mode in StrategyMode::ALL {
            let strategy = build_strategy(mode, 2, &StrategyOptions::default()).unwrap();
            assert_eq!(strategy.mode(), mode);
            assert_eq!(strategy.execution_lock().is_some(), mode.shares_lock());
        }
    }

    #[test]
    fn test_apply_guarded_reports_index() {
        let compute = test_support::flaky_fn();
        assert_eq!(
            apply_guarded(&compute, 0, &Value::Int(2)).unwrap(),
            Value::Int(4)
        );
        match apply_guarded(&compute, 9, &Value::Int(13)) {
            Err(StrategyError::WorkerFailure { index, message }) => {
                assert_eq!(index, 9);
                assert!(message.contains("unlucky input"), "{message}");
            }
            other => panic!("expected worker failure, got {other:?}"),
        }
        assert!(matches!(
            apply_guarded(&compute, 4, &Value::Float(1.0)),
            Err(StrategyError::WorkerFailure { index: 4, .. })
        ));
    }
}
