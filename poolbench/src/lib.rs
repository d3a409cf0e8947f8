#![warn(missing_docs)]
//! # poolbench
//!
//! Compare how parallel execution strategies perform on the same
//! CPU-bound workloads.
//!
//! - **Strategies**: sequential, a thread pool that shares one execution
//!   lock, a lock-free thread pool, a futures executor, a process pool and
//!   three isolate pools that differ in how data crosses the boundary
//! - **Contention probe**: samples how much of a run the shared lock was held
//! - **Driver**: one child run per mode under a timing and memory monitor,
//!   all results stored together in `<benchmark>.json`
//!
//! ## Quick Start
//!
//! ```text
//! poolbench list
//! poolbench bench fib --modes thread,nogil,sequential --workers 8
//! poolbench show fib.json
//! ```
//!
//! ## Library Use
//!
//! ```ignore
//! use poolbench::{StrategyMode, StrategyOptions, build_strategy, execute_run, lookup};
//!
//! let workload = lookup("fib").unwrap();
//! let strategy = build_strategy(StrategyMode::Thread, 4, &StrategyOptions::default())?;
//! let outcome = execute_run(workload, strategy.as_ref(), poolbench::DEFAULT_PROBE_INTERVAL)?;
//! println!("contention: {:?}", outcome.contention);
//! ```

// Re-export core types
pub use poolbench_core::{
    ComputeError, ComputeFn, ContentionProbe, DEFAULT_PROBE_INTERVAL, ExecutionLock,
    ExecutionStrategy, RunError, RunOutcome, StrategyError, StrategyMode, StrategyOptions,
    StrategyUnavailable, ValidationError, Value, WorkloadDef, build_strategy, execute_run, lookup,
    select_probe, workloads,
};

// Re-export strategy implementations
pub use poolbench_core::strategy;

// Re-export report types
pub use poolbench_report::{
    BenchmarkResult, DocumentError, RunMetrics, format_summary, load_document, write_document,
};

// Re-export CLI
pub use poolbench_cli::{
    Cli, Commands, DriverOptions, DriverReport, Launcher, PoolConfig, RunExit, RunRequest,
    SubprocessLauncher, collect, drive, run, run_with_cli,
};
