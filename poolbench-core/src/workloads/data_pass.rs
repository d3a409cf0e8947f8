//! Data-pass workload: cheap compute, large outputs.
//!
//! Each item returns a freshly allocated 64Ki-element vector, so the cost is
//! dominated by moving results across whatever boundary the strategy has.

use crate::workload::{ComputeError, ValidationError, WorkloadDef, expect_len};
use crate::Value;

/// Number of inputs in the dataset
pub const DATA_PASS_ITEMS: usize = 1 << 10;

/// Length of every output vector
pub const DATA_PASS_LEN: usize = 1 << 16;

const FILL: f64 = 1000.0;

fn generate() -> Vec<Value> {
    vec![Value::Float(FILL); DATA_PASS_ITEMS]
}

fn compute(_input: &Value) -> Result<Value, ComputeError> {
    Ok(Value::Floats(vec![FILL; DATA_PASS_LEN]))
}

fn validate(outputs: &[Value]) -> Result<(), ValidationError> {
    expect_len("data_pass", outputs, DATA_PASS_ITEMS)?;
    for (index, output) in outputs.iter().enumerate() {
        match output.as_floats() {
            Some(xs) if xs.len() == DATA_PASS_LEN => {}
            Some(xs) => {
                return Err(ValidationError::Item {
                    workload: "data_pass",
                    index,
                    reason: format!("expected {DATA_PASS_LEN} elements, got {}", xs.len()),
                });
            }
            None => {
                return Err(ValidationError::Item {
                    workload: "data_pass",
                    index,
                    reason: format!("expected a float sequence, got {}", output.kind()),
                });
            }
        }
    }
    Ok(())
}

inventory::submit! {
    WorkloadDef {
        name: "data_pass",
        description: "1024 items each returning a 65536-element vector",
        output_bytes: DATA_PASS_LEN * std::mem::size_of::<f64>() + 64,
        generate,
        compute,
        validate,
    }
}
