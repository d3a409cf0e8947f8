//! One measured run: generate, probe start, map, probe stop, validate.

use crate::probe::select_probe;
use crate::strategy::{ExecutionStrategy, StrategyError, StrategyUnavailable};
use crate::workload::{ValidationError, WorkloadDef};
use crate::Value;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a run did not produce validated outputs.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Unavailable(#[from] StrategyUnavailable),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Outputs and probe reading of a successful run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Outputs in input order
    pub outputs: Vec<Value>,
    /// Contention fraction, when the strategy shares an execution lock
    pub contention: Option<f64>,
    /// Time spent inside `map`
    pub elapsed: Duration,
}

/// Run `workload` once under `strategy`.
///
/// The probe only covers `map`: dataset generation happens before it starts
/// and validation after it stops.
pub fn execute_run(
    workload: &WorkloadDef,
    strategy: &dyn ExecutionStrategy,
    probe_interval: Duration,
) -> Result<RunOutcome, RunError> {
    strategy.check_compatible(workload)?;

    let inputs = (workload.generate)();
    let items = inputs.len();
    let mut probe = select_probe(strategy.execution_lock(), probe_interval);
    tracing::debug!(
        workload = workload.name,
        mode = %strategy.mode(),
        workers = strategy.workers(),
        items,
        "starting run"
    );

    probe.start();
    let started = Instant::now();
    let mapped = strategy.map(&workload.compute_fn(), inputs);
    let elapsed = started.elapsed();
    let contention = probe.stop();
    let outputs = mapped?;
    (workload.validate)(&outputs)?;

    tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, ?contention, "run complete");
    Ok(RunOutcome {
        outputs,
        contention,
        elapsed,
    })
}
