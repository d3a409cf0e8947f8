//! Workload Definitions and Registry
//!
//! A workload is a named triple of dataset generator, per-item compute function
//! and result validator. Workloads register themselves with `inventory`; the
//! name-keyed lookup table is built once on first access.

use crate::Value;
use fxhash::FxHashMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Error returned by a workload's compute function for a single item.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    #[error("{workload} expects a {expected} input, got {got}")]
    UnexpectedInput {
        workload: &'static str,
        expected: &'static str,
        got: &'static str,
    },
}

impl ComputeError {
    /// Shorthand for an input of the wrong [`Value`] variant.
    pub fn unexpected(workload: &'static str, expected: &'static str, got: &Value) -> Self {
        ComputeError::UnexpectedInput {
            workload,
            expected,
            got: got.kind(),
        }
    }
}

/// A run's outputs failed the workload's expected shape or value check.
///
/// Always fatal: it indicates a correctness bug in a strategy or workload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{workload}: expected {expected} outputs, got {got}")]
    Length {
        workload: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{workload}: output {index} is wrong: {reason}")]
    Item {
        workload: &'static str,
        index: usize,
        reason: String,
    },
}

/// Compute function signature shared by every workload.
pub type ComputeFnPtr = fn(&Value) -> Result<Value, ComputeError>;

/// Static description of a workload, registered via `inventory::submit!`.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadDef {
    /// Registry key and document name
    pub name: &'static str,
    /// One-line description for `poolbench list`
    pub description: &'static str,
    /// Upper bound on the archived size of a single output, in bytes
    pub output_bytes: usize,
    /// Deterministic dataset generator
    pub generate: fn() -> Vec<Value>,
    /// Pure per-item computation
    pub compute: ComputeFnPtr,
    /// Checks the complete, ordered output sequence
    pub validate: fn(&[Value]) -> Result<(), ValidationError>,
}

impl WorkloadDef {
    /// Relocatable handle to this workload's compute function.
    pub fn compute_fn(&self) -> ComputeFn {
        ComputeFn {
            workload: self.name,
            func: self.compute,
        }
    }
}

/// A compute function together with the registry name that resolves to it.
///
/// Strategies that cannot move a function pointer across their isolation
/// boundary (worker processes, byte-copying isolates) send the name instead
/// and resolve it on the far side.
#[derive(Debug, Clone, Copy)]
pub struct ComputeFn {
    /// Registered workload name
    pub workload: &'static str,
    /// The function itself
    pub func: ComputeFnPtr,
}

impl ComputeFn {
    /// Apply the function to one input.
    #[inline]
    pub fn call(&self, input: &Value) -> Result<Value, ComputeError> {
        (self.func)(input)
    }
}

inventory::collect!(WorkloadDef);

static REGISTRY: LazyLock<FxHashMap<&'static str, &'static WorkloadDef>> = LazyLock::new(|| {
    let mut map = FxHashMap::default();
    for def in inventory::iter::<WorkloadDef> {
        if map.insert(def.name, def).is_some() {
            tracing::warn!(workload = def.name, "duplicate workload registration ignored");
        }
    }
    map
});

/// Look up a registered workload by name.
pub fn lookup(name: &str) -> Option<&'static WorkloadDef> {
    REGISTRY.get(name).copied()
}

/// All registered workloads, sorted by name.
pub fn workloads() -> Vec<&'static WorkloadDef> {
    let mut all: Vec<_> = REGISTRY.values().copied().collect();
    all.sort_by_key(|def| def.name);
    all
}

/// Anchor to prevent LTO from stripping inventory entries
#[used]
#[doc(hidden)]
pub static REGISTRY_ANCHOR: fn() = || {
    for _ in inventory::iter::<WorkloadDef> {}
};

/// Check that `outputs` has exactly `expected` items.
pub fn expect_len(
    workload: &'static str,
    outputs: &[Value],
    expected: usize,
) -> Result<(), ValidationError> {
    if outputs.len() == expected {
        Ok(())
    } else {
        Err(ValidationError::Length {
            workload,
            expected,
            got: outputs.len(),
        })
    }
}
