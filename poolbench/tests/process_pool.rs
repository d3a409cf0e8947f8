//! Process pool failure handling against real worker processes
//!
//! Kept in its own test binary: it asserts on this process's children, so no
//! other test may be spawning workers at the same time.

#![cfg(target_os = "linux")]

use poolbench::strategy::ProcessPool;
use poolbench::{ExecutionStrategy, StrategyError, Value, lookup};

/// Pids of live or unreaped children of this process.
fn children() -> Vec<u32> {
    let me = std::process::id();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok()?.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            std::fs::read_to_string(format!("/proc/{pid}/stat"))
                .ok()
                .and_then(|stat| {
                    // fields after the parenthesized command: state ppid ...
                    let rest = &stat[stat.rfind(')')? + 1..];
                    rest.split_whitespace().nth(1)?.parse::<u32>().ok()
                })
                == Some(me)
        })
        .collect()
}

#[test]
fn test_worker_failure_names_index_and_reaps_workers() {
    let pool = ProcessPool::new(3)
        .unwrap()
        .with_binary(env!("CARGO_BIN_EXE_poolbench"));
    let compute = lookup("fib").unwrap().compute_fn();

    // Healthy run first: every worker is shut down and reaped
    let outputs = pool.map(&compute, vec![Value::Int(20); 9]).unwrap();
    assert_eq!(outputs, vec![Value::Int(10946); 9]);
    assert!(children().is_empty(), "leftover workers: {:?}", children());

    // fib rejects non-integer inputs, so item 7 fails inside the worker
    let mut inputs = vec![Value::Int(15); 12];
    inputs[7] = Value::Float(15.0);
    match pool.map(&compute, inputs) {
        Err(StrategyError::WorkerFailure { index, message }) => {
            assert_eq!(index, 7);
            assert!(message.contains("fib"), "{message}");
        }
        other => panic!("expected worker failure, got {other:?}"),
    }
    assert!(children().is_empty(), "leftover workers: {:?}", children());
}
