//! Benchmark Driver
//!
//! Runs one benchmark under each requested mode, one child process at a time,
//! and persists every mode's metrics together in a single document.
//!
//! - A mode that cannot run the workload is skipped with a notice.
//! - A run that fails validation, or fails any other way, aborts the whole
//!   invocation before anything is written.
//! - The document is written once, after the last mode.

use crate::collector::{collect, reported_items};
use crate::monitor::{Launcher, RunExit, RunRequest};
use indicatif::{ProgressBar, ProgressStyle};
use poolbench_core::{
    StrategyError, StrategyMode, StrategyOptions, WorkloadDef, build_strategy, lookup,
};
use poolbench_report::{BenchmarkResult, DocumentError, write_document};
use std::path::PathBuf;
use thiserror::Error;

/// Lines of a failed run's output repeated in the error log
const TRANSCRIPT_TAIL: usize = 10;

/// Prefix of the line a run prints when its strategy cannot run the workload
pub const UNAVAILABLE_KEY: &str = "unavailable:";

/// Errors that abort a driver invocation.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The workload is not registered
    #[error("unknown benchmark '{0}' (see `poolbench list`)")]
    UnknownBenchmark(String),

    /// No modes were requested
    #[error("no modes to run")]
    NoModes,

    /// A strategy could not be built with the requested settings
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// A run reported a different number of outputs than the dataset holds
    #[error("{mode} run of {benchmark} reported {reported} items, expected {expected}; no results were written")]
    ItemCount {
        /// Mode of the failing run
        mode: StrategyMode,
        /// Benchmark name
        benchmark: String,
        /// Dataset length
        expected: usize,
        /// Count printed by the run
        reported: usize,
    },

    /// A run's outputs were wrong
    #[error("{mode} run of {benchmark} failed validation; no results were written")]
    Validation {
        /// Mode of the failing run
        mode: StrategyMode,
        /// Benchmark name
        benchmark: String,
    },

    /// A run failed for any other reason
    #[error("{mode} run of {benchmark} failed (exit code {code:?}); no results were written")]
    RunFailed {
        /// Mode of the failing run
        mode: StrategyMode,
        /// Benchmark name
        benchmark: String,
        /// Child exit code, when it exited normally
        code: Option<i32>,
    },

    /// The run could not be launched
    #[error(transparent)]
    Launch(#[from] anyhow::Error),

    /// The document could not be written
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// What to run.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Registered workload name
    pub benchmark: String,
    /// Modes in the order they are attempted
    pub modes: Vec<StrategyMode>,
    /// Workers per strategy
    pub workers: usize,
    /// Directory for `<benchmark>.json`
    pub output_dir: PathBuf,
    /// Draw a progress bar
    pub progress: bool,
}

/// What a completed invocation produced.
#[derive(Debug)]
pub struct DriverReport {
    /// Metrics of every mode that ran
    pub result: BenchmarkResult,
    /// Modes that were skipped, with the reason
    pub skipped: Vec<(StrategyMode, String)>,
    /// Where the document was written
    pub path: PathBuf,
}

fn tail(output: &str, lines: usize) -> String {
    let all: Vec<_> = output.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Reason a mode can be skipped without launching it, if any.
fn precheck(
    mode: StrategyMode,
    workers: usize,
    workload: &WorkloadDef,
) -> Result<Option<String>, StrategyError> {
    let strategy = build_strategy(mode, workers, &StrategyOptions::default())?;
    Ok(strategy.check_compatible(workload).err().map(|e| e.reason))
}

/// Reason a child gave for exiting unavailable, from its `unavailable:` line.
fn unavailable_reason(output: &str) -> String {
    output
        .lines()
        .rev()
        .find_map(|l| l.trim().strip_prefix(UNAVAILABLE_KEY))
        .map(|r| r.trim().to_string())
        .unwrap_or_else(|| "strategy unavailable".to_string())
}

fn progress_bar(options: &DriverOptions, len: usize) -> ProgressBar {
    if !options.progress {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Run every requested mode and persist the document.
pub fn drive(launcher: &dyn Launcher, options: &DriverOptions) -> Result<DriverReport, DriverError> {
    let Some(workload) = lookup(&options.benchmark) else {
        return Err(DriverError::UnknownBenchmark(options.benchmark.clone()));
    };
    if options.workers == 0 {
        return Err(StrategyError::InvalidWorkerCount(0).into());
    }

    let mut modes = Vec::with_capacity(options.modes.len());
    for &mode in &options.modes {
        if !modes.contains(&mode) {
            modes.push(mode);
        }
    }
    if modes.is_empty() {
        return Err(DriverError::NoModes);
    }

    let expected_items = (workload.generate)().len();
    let mut result = BenchmarkResult::new();
    let mut skipped = Vec::new();
    let pb = progress_bar(options, modes.len());

    for mode in modes {
        pb.set_message(mode.to_string());

        if let Some(reason) = precheck(mode, options.workers, workload)? {
            pb.suspend(|| tracing::warn!("skipping {mode}: {reason}"));
            skipped.push((mode, reason));
            pb.inc(1);
            continue;
        }

        let request = RunRequest {
            mode,
            benchmark: options.benchmark.clone(),
            workers: options.workers,
        };
        let transcript = launcher.launch(&request)?;

        match transcript.exit {
            RunExit::Success => {
                match reported_items(&transcript.output) {
                    Some(reported) if reported != expected_items => {
                        pb.abandon();
                        return Err(DriverError::ItemCount {
                            mode,
                            benchmark: options.benchmark.clone(),
                            expected: expected_items,
                            reported,
                        });
                    }
                    Some(_) => {}
                    None => pb.suspend(|| tracing::warn!("{mode} run did not report its item count")),
                }
                let collected = collect(&transcript.output, mode.shares_lock());
                tracing::debug!(%mode, metrics = ?collected.metrics, "run complete");
                result.insert(mode.name(), collected.metrics);
            }
            RunExit::Unavailable => {
                let reason = unavailable_reason(&transcript.output);
                pb.suspend(|| tracing::warn!("skipping {mode}: {reason}"));
                skipped.push((mode, reason));
            }
            RunExit::ValidationFailed => {
                pb.abandon();
                tracing::error!("{mode} output:\n{}", tail(&transcript.output, TRANSCRIPT_TAIL));
                return Err(DriverError::Validation {
                    mode,
                    benchmark: options.benchmark.clone(),
                });
            }
            RunExit::Failed(code) => {
                pb.abandon();
                tracing::error!("{mode} output:\n{}", tail(&transcript.output, TRANSCRIPT_TAIL));
                return Err(DriverError::RunFailed {
                    mode,
                    benchmark: options.benchmark.clone(),
                    code,
                });
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("complete");

    let path = write_document(&options.output_dir, &options.benchmark, &result)?;
    tracing::info!(path = %path.display(), modes = result.len(), skipped = skipped.len(), "results written");

    Ok(DriverReport {
        result,
        skipped,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Transcript;
    use poolbench_report::load_document;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Replays canned transcripts per mode and records what was launched.
    struct FakeLauncher {
        replies: HashMap<StrategyMode, (RunExit, &'static str)>,
        launched: RefCell<Vec<RunRequest>>,
    }

    impl FakeLauncher {
        fn new(replies: &[(StrategyMode, RunExit, &'static str)]) -> Self {
            Self {
                replies: replies.iter().map(|&(m, e, o)| (m, (e, o))).collect(),
                launched: RefCell::new(Vec::new()),
            }
        }

        fn launched_modes(&self) -> Vec<StrategyMode> {
            self.launched.borrow().iter().map(|r| r.mode).collect()
        }
    }

    impl Launcher for FakeLauncher {
        fn launch(&self, request: &RunRequest) -> anyhow::Result<Transcript> {
            self.launched.borrow_mut().push(request.clone());
            let (exit, output) = self
                .replies
                .get(&request.mode)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no reply for {}", request.mode))?;
            Ok(Transcript {
                exit,
                output: output.to_string(),
            })
        }
    }

    const THREAD_OK: &str = "items: 64\ngilknocker: 0.9\nwall_clock: 2.5\ncpu: 101%\nvmpeak: 9000 kB\n";
    const SEQ_OK: &str = "items: 64\nwall_clock: 2.0\ncpu: 99%\nvmpeak: 8000 kB\n";
    const DATA_PASS_OK: &str = "items: 1024\nwall_clock: 9.0\ncpu: 100%\nvmpeak: 600000 kB\n";

    fn options(dir: &std::path::Path, benchmark: &str, modes: &[StrategyMode]) -> DriverOptions {
        DriverOptions {
            benchmark: benchmark.to_string(),
            modes: modes.to_vec(),
            workers: 4,
            output_dir: dir.to_path_buf(),
            progress: false,
        }
    }

    #[test]
    fn test_drive_writes_document_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(&[
            (StrategyMode::Thread, RunExit::Success, THREAD_OK),
            (StrategyMode::Sequential, RunExit::Success, SEQ_OK),
        ]);
        let report = drive(
            &launcher,
            &options(dir.path(), "fib", &[StrategyMode::Thread, StrategyMode::Sequential]),
        )
        .unwrap();

        assert_eq!(report.path, dir.path().join("fib.json"));
        let loaded = load_document(&report.path).unwrap();
        assert_eq!(loaded, report.result);
        assert_eq!(loaded.modes().collect::<Vec<_>>(), ["thread", "sequential"]);
        assert_eq!(loaded.get("thread").unwrap().contention_fraction, Some(0.9));
        assert_eq!(loaded.get("sequential").unwrap().contention_fraction, None);
        assert_eq!(loaded.get("sequential").unwrap().peak_memory_kb, 8000);
    }

    #[test]
    fn test_known_incompatible_mode_is_skipped_without_launch() {
        let dir = tempfile::tempdir().unwrap();
        let launcher =
            FakeLauncher::new(&[(StrategyMode::Sequential, RunExit::Success, DATA_PASS_OK)]);
        let report = drive(
            &launcher,
            &options(dir.path(), "data_pass", &[StrategyMode::Interp3, StrategyMode::Sequential]),
        )
        .unwrap();

        assert_eq!(launcher.launched_modes(), vec![StrategyMode::Sequential]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, StrategyMode::Interp3);
        assert!(report.result.get("interp3").is_none());
    }

    #[test]
    fn test_unavailable_exit_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(&[
            (
                StrategyMode::Subprocess,
                RunExit::Unavailable,
                "unavailable: subprocess cannot run fib: worker binary missing\n",
            ),
            (StrategyMode::Sequential, RunExit::Success, SEQ_OK),
        ]);
        let report = drive(
            &launcher,
            &options(dir.path(), "fib", &[StrategyMode::Subprocess, StrategyMode::Sequential]),
        )
        .unwrap();
        assert_eq!(report.result.len(), 1);
        assert_eq!(report.skipped[0].0, StrategyMode::Subprocess);
        assert!(report.skipped[0].1.contains("cannot run"), "{}", report.skipped[0].1);
    }

    #[test]
    fn test_validation_failure_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(&[
            (StrategyMode::Sequential, RunExit::Success, SEQ_OK),
            (StrategyMode::Thread, RunExit::ValidationFailed, "fib: output 3 is wrong\n"),
            (StrategyMode::NoGil, RunExit::Success, SEQ_OK),
        ]);
        let err = drive(
            &launcher,
            &options(
                dir.path(),
                "fib",
                &[StrategyMode::Sequential, StrategyMode::Thread, StrategyMode::NoGil],
            ),
        )
        .unwrap_err();

        assert!(matches!(err, DriverError::Validation { mode: StrategyMode::Thread, .. }));
        assert_eq!(
            launcher.launched_modes(),
            vec![StrategyMode::Sequential, StrategyMode::Thread]
        );
        assert!(!dir.path().join("fib.json").exists());
    }

    #[test]
    fn test_run_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(&[(StrategyMode::NoGil, RunExit::Failed(Some(1)), "boom\n")]);
        let err = drive(&launcher, &options(dir.path(), "fib", &[StrategyMode::NoGil])).unwrap_err();
        assert!(matches!(err, DriverError::RunFailed { code: Some(1), .. }));
        assert!(!dir.path().join("fib.json").exists());
    }

    #[test]
    fn test_malformed_metrics_recorded_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(&[(StrategyMode::Sequential, RunExit::Success, "wall_clock: ???\n")]);
        let report = drive(&launcher, &options(dir.path(), "fib", &[StrategyMode::Sequential])).unwrap();
        let metrics = report.result.get("sequential").unwrap();
        assert_eq!(metrics.wall_clock_seconds, 0.0);
        assert_eq!(metrics.cpu_percent, 0);
    }

    #[test]
    fn test_item_count_mismatch_aborts() {
        let dir = tempfile::tempdir().unwrap();
        // fib runs 64 items; a transcript claiming 1024 is wrong
        let launcher = FakeLauncher::new(&[(StrategyMode::Thread, RunExit::Success, DATA_PASS_OK)]);
        let err = drive(&launcher, &options(dir.path(), "fib", &[StrategyMode::Thread])).unwrap_err();
        assert!(matches!(
            err,
            DriverError::ItemCount {
                expected: 64,
                reported: 1024,
                ..
            }
        ));
        assert!(!dir.path().join("fib.json").exists());
    }

    #[test]
    fn test_zero_workers_rejected_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(&[(StrategyMode::Sequential, RunExit::Success, SEQ_OK)]);
        let mut opts = options(dir.path(), "fib", &[StrategyMode::Sequential, StrategyMode::Thread]);
        opts.workers = 0;
        let err = drive(&launcher, &opts).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Strategy(StrategyError::InvalidWorkerCount(0))
        ));
        assert!(launcher.launched_modes().is_empty());
    }

    #[test]
    fn test_unknown_benchmark_and_duplicate_modes() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(&[(StrategyMode::Sequential, RunExit::Success, SEQ_OK)]);
        assert!(matches!(
            drive(&launcher, &options(dir.path(), "raytrace", &[StrategyMode::Sequential])),
            Err(DriverError::UnknownBenchmark(_))
        ));

        let report = drive(
            &launcher,
            &options(dir.path(), "fib", &[StrategyMode::Sequential, StrategyMode::Sequential]),
        )
        .unwrap();
        assert_eq!(report.result.len(), 1);
        assert_eq!(launcher.launched_modes().len(), 1);
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }
}
