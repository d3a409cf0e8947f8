//! poolbench Core - Strategies and Workloads
//!
//! This crate provides everything that runs inside one measured run:
//! - The workload registry and the built-in workloads
//! - `ExecutionStrategy` and its sequential, thread, futures, process and
//!   isolate implementations
//! - The global execution lock and the contention probe that watches it
//! - The process-pool worker entry point

mod lock;
mod probe;
mod run;
pub mod strategy;
mod worker;
mod workload;
pub mod workloads;

pub use lock::{ExecutionGuard, ExecutionLock};
pub use poolbench_ipc::Value;
pub use probe::{ContentionProbe, DEFAULT_PROBE_INTERVAL, KnockerProbe, NoopProbe, select_probe};
pub use run::{RunError, RunOutcome, execute_run};
pub use strategy::{
    ExecutionStrategy, StrategyError, StrategyMode, StrategyOptions, StrategyUnavailable,
    build_strategy,
};
pub use worker::{WorkerMain, shutdown_requested};
pub use workload::{
    ComputeError, ComputeFn, ComputeFnPtr, REGISTRY_ANCHOR, ValidationError, WorkloadDef,
    expect_len, lookup, workloads,
};
