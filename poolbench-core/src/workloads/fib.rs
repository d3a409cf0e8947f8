//! Recursive Fibonacci Workloads
//!
//! Three variants of the same doubly-recursive recurrence
//! `f(0) = f(1) = 1, f(n) = f(n-1) + f(n-2)`:
//!
//! - `fib`: plain recursion, no state at all.
//! - `fib2`: every recursive call goes through a freshly constructed
//!   [`Fibonacci`] instance whose counter field is bumped on each call. The
//!   instance is never shared, the field write is the thing being measured.
//! - `fib_mixed`: position-tagged inputs of varying size, so a strategy that
//!   reorders its results fails validation.

use crate::workload::{ComputeError, ValidationError, WorkloadDef, expect_len};
use crate::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Argument used by the uniform datasets
pub const FIB_N: u64 = 28;

/// Items in the uniform datasets
pub const FIB_ITEMS: usize = 64;

const MIXED_SEED: u64 = 0x5eed_f1b0;
const MIXED_MIN_N: u64 = 12;
const MIXED_MAX_N: u64 = 24;

/// Doubly-recursive fibonacci.
pub fn fib(n: u64) -> u64 {
    if n < 2 {
        return 1;
    }
    fib(n - 1) + fib(n - 2)
}

/// Closed-form value of the recurrence, computed iteratively.
pub fn fib_closed(n: u64) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 1..n {
        let next = a + b;
        a = b;
        b = next;
    }
    b
}

/// Carrier for the stateful variant.
pub struct Fibonacci {
    calls: u64,
}

impl Fibonacci {
    /// New instance with its counter at `start`.
    pub fn new(start: u64) -> Self {
        Self { calls: start }
    }

    /// Same recursion as [`fib`], bumping `calls` on every invocation.
    #[inline(never)]
    pub fn calculate(&mut self, n: u64) -> u64 {
        // Not needed for the result; the per-call field write is the point.
        self.calls += 1;

        if n < 2 {
            return 1;
        }
        self.calculate(n - 1) + self.calculate(n - 2)
    }

    /// Number of `calculate` invocations so far, plus the starting value.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

fn uniform_data() -> Vec<Value> {
    vec![Value::Int(FIB_N); FIB_ITEMS]
}

fn validate_uniform(workload: &'static str, outputs: &[Value]) -> Result<(), ValidationError> {
    expect_len(workload, outputs, FIB_ITEMS)?;
    let expected = fib_closed(FIB_N);
    for (index, output) in outputs.iter().enumerate() {
        if output.as_int() != Some(expected) {
            return Err(ValidationError::Item {
                workload,
                index,
                reason: format!("expected {expected}, got {output:?}"),
            });
        }
    }
    Ok(())
}

fn compute_fib(input: &Value) -> Result<Value, ComputeError> {
    let n = input
        .as_int()
        .ok_or_else(|| ComputeError::unexpected("fib", "int", input))?;
    Ok(Value::Int(fib(n)))
}

fn validate_fib(outputs: &[Value]) -> Result<(), ValidationError> {
    validate_uniform("fib", outputs)
}

fn compute_fib2(input: &Value) -> Result<Value, ComputeError> {
    let n = input
        .as_int()
        .ok_or_else(|| ComputeError::unexpected("fib2", "int", input))?;
    let mut f = Fibonacci::new(1);
    let result = f.calculate(n);
    std::hint::black_box(f.calls());
    Ok(Value::Int(result))
}

fn validate_fib2(outputs: &[Value]) -> Result<(), ValidationError> {
    validate_uniform("fib2", outputs)
}

fn mixed_data() -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(MIXED_SEED);
    (0..FIB_ITEMS as u64)
        .map(|tag| Value::Tagged {
            tag,
            value: rng.gen_range(MIXED_MIN_N..=MIXED_MAX_N),
        })
        .collect()
}

fn compute_mixed(input: &Value) -> Result<Value, ComputeError> {
    let (tag, n) = input
        .as_tagged()
        .ok_or_else(|| ComputeError::unexpected("fib_mixed", "tagged", input))?;
    Ok(Value::Tagged { tag, value: fib(n) })
}

fn validate_mixed(outputs: &[Value]) -> Result<(), ValidationError> {
    let inputs = mixed_data();
    expect_len("fib_mixed", outputs, inputs.len())?;
    for (index, (input, output)) in inputs.iter().zip(outputs).enumerate() {
        let Some((_, n)) = input.as_tagged() else {
            unreachable!("mixed dataset only contains tagged values");
        };
        let expected = Value::Tagged {
            tag: index as u64,
            value: fib_closed(n),
        };
        if *output != expected {
            return Err(ValidationError::Item {
                workload: "fib_mixed",
                index,
                reason: format!("expected {expected:?}, got {output:?}"),
            });
        }
    }
    Ok(())
}

inventory::submit! {
    WorkloadDef {
        name: "fib",
        description: "recursive fibonacci(28) x 64, no shared state",
        output_bytes: 64,
        generate: uniform_data,
        compute: compute_fib,
        validate: validate_fib,
    }
}

inventory::submit! {
    WorkloadDef {
        name: "fib2",
        description: "recursive fibonacci(28) x 64 through a per-call instance with a mutated field",
        output_bytes: 64,
        generate: uniform_data,
        compute: compute_fib2,
        validate: validate_fib2,
    }
}

inventory::submit! {
    WorkloadDef {
        name: "fib_mixed",
        description: "position-tagged fibonacci of mixed sizes, detects result reordering",
        output_bytes: 64,
        generate: mixed_data,
        compute: compute_mixed,
        validate: validate_mixed,
    }
}
