//! In-order execution on the calling thread. The baseline every other mode is
//! compared against.

use super::{ExecutionStrategy, StrategyError, StrategyMode, apply_guarded};
use crate::workload::ComputeFn;
use crate::Value;

/// Applies the compute function to each input in turn.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sequential;

impl Sequential {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionStrategy for Sequential {
    fn mode(&self) -> StrategyMode {
        StrategyMode::Sequential
    }

    fn workers(&self) -> usize {
        1
    }

    fn map(&self, compute: &ComputeFn, inputs: Vec<Value>) -> Result<Vec<Value>, StrategyError> {
        inputs
            .iter()
            .enumerate()
            .map(|(index, input)| apply_guarded(compute, index, input))
            .collect()
    }
}
