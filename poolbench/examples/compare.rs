//! Compare strategies in-process
//!
//! Runs one workload under every mode from a single process and prints the
//! time spent in `map` and the contention reading. Unlike `poolbench bench`,
//! there is no per-run process, so memory and CPU are not measured.
//!
//! Run with:
//!   cargo run --release --example compare               # fib_mixed, 4 workers
//!   cargo run --release --example compare -- nbody 8    # workload, workers

use poolbench::{DEFAULT_PROBE_INTERVAL, RunError, StrategyMode, StrategyOptions};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let benchmark = args.next().unwrap_or_else(|| "fib_mixed".to_string());
    let workers: usize = args.next().map(|w| w.parse()).transpose()?.unwrap_or(4);

    let workload = poolbench::lookup(&benchmark)
        .ok_or_else(|| anyhow::anyhow!("unknown benchmark '{benchmark}'"))?;

    println!("{benchmark} with {workers} workers");
    for mode in StrategyMode::ALL {
        // The process pool re-executes this example, which has no worker mode
        if mode == StrategyMode::Subprocess {
            continue;
        }
        let strategy = poolbench::build_strategy(mode, workers, &StrategyOptions::default())?;
        match poolbench::execute_run(workload, strategy.as_ref(), DEFAULT_PROBE_INTERVAL) {
            Ok(outcome) => {
                let contention = outcome
                    .contention
                    .map(|c| format!("{:.1}%", c * 100.0))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<10} {:>9.3}s  contention {contention}",
                    mode.name(),
                    outcome.elapsed.as_secs_f64()
                );
            }
            Err(RunError::Unavailable(e)) => println!("  {:<10} skipped: {}", mode.name(), e.reason),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
