#![warn(missing_docs)]
//! poolbench CLI Library
//!
//! Command-line front end for the `poolbench` binary:
//!
//! - `poolbench run <mode> <benchmark>` performs one measured run in this
//!   process and reports through its exit status.
//! - `poolbench bench <benchmark>` drives one child run per mode, collects
//!   their metrics and writes `<benchmark>.json`.
//! - `poolbench list` and `poolbench show <file>` inspect workloads and
//!   stored results.
//!
//! The same binary doubles as the process-pool worker when started with the
//! hidden worker flag.

mod collector;
mod config;
mod driver;
mod monitor;

pub use collector::{
    CONTENTION_KEY, CPU_KEY, Collected, ParseIssue, VMPEAK_KEY, WALL_CLOCK_KEY, collect,
    reported_items,
};
pub use config::*;
pub use driver::{DriverError, DriverOptions, DriverReport, UNAVAILABLE_KEY, drive};
pub use monitor::{
    EXIT_UNAVAILABLE, EXIT_VALIDATION, Launcher, ProcessTreeSampler, RunExit, RunRequest,
    SubprocessLauncher, Transcript,
};

use clap::{Parser, Subcommand};
use poolbench_core::{
    RunError, StrategyMode, StrategyOptions, WorkerMain, build_strategy, execute_run, lookup,
    workloads,
};
use poolbench_report::{format_summary, load_document};
use std::path::PathBuf;

/// Exit status of a run that succeeded
pub const EXIT_OK: i32 = 0;
/// Exit status of anything else that went wrong
pub const EXIT_FAILURE: i32 = 1;

/// poolbench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "poolbench")]
#[command(author, version, about = "poolbench - compare parallel execution strategies")]
pub struct Cli {
    /// Subcommand; prints help when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Internal: Run as process-pool worker
    #[arg(long, hide = true)]
    pub pool_worker: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Perform one measured run in this process
    Run {
        /// Strategy mode (sequential, thread, nogil, futures, subprocess, interp, interp2, interp3)
        mode: StrategyMode,
        /// Registered workload name
        benchmark: String,
        /// Workers per strategy
        #[arg(long, short = 'w', default_value = "16")]
        workers: usize,
    },
    /// Run a benchmark under every mode and write <benchmark>.json
    Bench {
        /// Registered workload name
        benchmark: String,
        /// Comma-separated modes, in order (defaults to poolbench.toml)
        #[arg(long, value_delimiter = ',')]
        modes: Option<Vec<String>>,
        /// Workers per strategy (defaults to poolbench.toml)
        #[arg(long, short = 'w')]
        workers: Option<usize>,
        /// Directory for the results document (defaults to poolbench.toml)
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,
    },
    /// List registered workloads and modes
    List,
    /// Summarize a stored results document
    Show {
        /// Path to a <benchmark>.json document
        file: PathBuf,
    },
    /// Print a default poolbench.toml
    Init,
}

/// Run the poolbench CLI and return the process exit status.
pub fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the poolbench CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<i32> {
    // Handle worker mode first (before any other initialization)
    if cli.pool_worker {
        run_worker_mode()?;
        return Ok(EXIT_OK);
    }

    // Logs go to stderr: stdout of `run` is the transcript
    let filter = if cli.verbose {
        "poolbench=debug"
    } else {
        "poolbench=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = PoolConfig::discover().unwrap_or_default();

    match cli.command {
        Some(Commands::Run {
            mode,
            ref benchmark,
            workers,
        }) => Ok(run_single(&config, mode, benchmark, workers)),
        Some(Commands::Bench {
            ref benchmark,
            ref modes,
            workers,
            ref output_dir,
        }) => {
            run_bench(&config, benchmark, modes.as_deref(), workers, output_dir.clone(), cli.verbose)?;
            Ok(EXIT_OK)
        }
        Some(Commands::List) => {
            list_workloads();
            Ok(EXIT_OK)
        }
        Some(Commands::Show { ref file }) => {
            show_document(file)?;
            Ok(EXIT_OK)
        }
        Some(Commands::Init) => {
            print!("{}", PoolConfig::default_toml());
            Ok(EXIT_OK)
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            Ok(EXIT_OK)
        }
    }
}

/// Run as a worker process (IPC mode)
fn run_worker_mode() -> anyhow::Result<()> {
    let mut worker = WorkerMain::new();
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

/// One measured run. Everything the collector reads goes to stdout; the exit
/// status says how the run ended.
fn run_single(config: &PoolConfig, mode: StrategyMode, benchmark: &str, workers: usize) -> i32 {
    let Some(workload) = lookup(benchmark) else {
        tracing::error!("unknown benchmark '{benchmark}'");
        return EXIT_FAILURE;
    };
    let strategy = match build_strategy(mode, workers, &StrategyOptions::default()) {
        Ok(strategy) => strategy,
        Err(e) => {
            tracing::error!("{e}");
            return EXIT_FAILURE;
        }
    };

    match execute_run(workload, strategy.as_ref(), config.probe_interval()) {
        Ok(outcome) => {
            println!("items: {}", outcome.outputs.len());
            if let Some(fraction) = outcome.contention {
                println!("{CONTENTION_KEY}: {fraction:.4}");
            }
            EXIT_OK
        }
        Err(RunError::Unavailable(e)) => {
            println!("{UNAVAILABLE_KEY} {e}");
            EXIT_UNAVAILABLE
        }
        Err(RunError::Validation(e)) => {
            tracing::error!("{mode} run of {benchmark} failed validation: {e}");
            EXIT_VALIDATION
        }
        Err(RunError::Strategy(e)) => {
            tracing::error!("{mode} run of {benchmark} failed: {e}");
            EXIT_FAILURE
        }
    }
}

fn run_bench(
    config: &PoolConfig,
    benchmark: &str,
    modes: Option<&[String]>,
    workers: Option<usize>,
    output_dir: Option<PathBuf>,
    verbose: bool,
) -> anyhow::Result<()> {
    let modes = match modes {
        Some(names) => parse_modes(names.iter().map(String::as_str))?,
        None => config.modes()?,
    };
    let options = DriverOptions {
        benchmark: benchmark.to_string(),
        modes,
        workers: workers.unwrap_or(config.driver.workers),
        output_dir: output_dir.unwrap_or_else(|| config.driver.output_dir.clone()),
        progress: !verbose,
    };

    let binary = std::env::current_exe()?;
    let launcher = SubprocessLauncher::new(
        binary,
        config.monitor.wrapper.clone(),
        config.memory_sample_interval(),
    );
    let report = drive(&launcher, &options)?;

    println!("{}", format_summary(benchmark, &report.result, available_cores()));
    for (mode, reason) in &report.skipped {
        println!("skipped {mode}: {reason}");
    }
    println!("results written to {}", report.path.display());
    Ok(())
}

fn list_workloads() {
    println!("Workloads:");
    for def in workloads() {
        println!("  {:<12} {}", def.name, def.description);
    }
    println!();
    println!("Modes:");
    for mode in StrategyMode::ALL {
        println!("  {mode}");
    }
}

fn show_document(path: &std::path::Path) -> anyhow::Result<()> {
    let result = load_document(path)?;
    let benchmark = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    println!("{}", format_summary(&benchmark, &result, available_cores()));
    Ok(())
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from(["poolbench", "run", "thread", "fib", "--workers", "4"]).unwrap();
        match cli.command {
            Some(Commands::Run {
                mode,
                benchmark,
                workers,
            }) => {
                assert_eq!(mode, StrategyMode::Thread);
                assert_eq!(benchmark, "fib");
                assert_eq!(workers, 4);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_request_args_round_trip() {
        let request = RunRequest {
            mode: StrategyMode::Interp2,
            benchmark: "nbody".to_string(),
            workers: 8,
        };
        let mut argv = vec!["poolbench".to_string()];
        argv.extend(request.args());
        let cli = Cli::try_parse_from(argv).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Run { mode: StrategyMode::Interp2, workers: 8, .. })
        ));
    }

    #[test]
    fn test_parse_bench_modes() {
        let cli = Cli::try_parse_from([
            "poolbench",
            "bench",
            "data_pass",
            "--modes",
            "thread,sequential",
            "-o",
            "/tmp/out",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Bench {
                modes, output_dir, workers, ..
            }) => {
                assert_eq!(modes.unwrap(), vec!["thread", "sequential"]);
                assert_eq!(output_dir.unwrap(), PathBuf::from("/tmp/out"));
                assert_eq!(workers, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(Cli::try_parse_from(["poolbench", "run", "greenlet", "fib"]).is_err());
    }

    #[test]
    fn test_worker_flag_parses_without_command() {
        let cli = Cli::try_parse_from(["poolbench", poolbench_ipc::WORKER_FLAG]).unwrap();
        assert!(cli.pool_worker);
        assert!(cli.command.is_none());
    }
}
