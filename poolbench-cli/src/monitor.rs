//! Run Monitor
//!
//! Launches each measured run as a child process and produces the transcript
//! the collector parses. Two things happen around the child:
//!
//! - Timing: either an external wrapper command from `poolbench.toml`
//!   prints `wall_clock`/`cpu` itself, or the built-in wrapper appends them
//!   (wall clock from `Instant`, CPU from `getrusage(RUSAGE_CHILDREN)` deltas).
//! - Memory: a sampler thread sums `VmRSS` over the child's whole process
//!   tree at a fixed interval and appends the peak as `vmpeak`.

use crate::collector::{CPU_KEY, VMPEAK_KEY, WALL_CLOCK_KEY};
use anyhow::Context;
use poolbench_core::StrategyMode;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Exit status of a run that failed validation
pub const EXIT_VALIDATION: i32 = 2;
/// Exit status of a run whose strategy cannot run the workload
pub const EXIT_UNAVAILABLE: i32 = 3;

/// One measured run to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Strategy mode
    pub mode: StrategyMode,
    /// Registered workload name
    pub benchmark: String,
    /// Workers per strategy
    pub workers: usize,
}

impl RunRequest {
    /// Arguments for `poolbench run`.
    pub fn args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            self.mode.name().to_string(),
            self.benchmark.clone(),
            "--workers".to_string(),
            self.workers.to_string(),
        ]
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Outputs validated
    Success,
    /// Outputs failed validation
    ValidationFailed,
    /// The mode cannot run this workload
    Unavailable,
    /// Any other failure, with the exit code when there is one
    Failed(Option<i32>),
}

impl RunExit {
    /// Classify a child's exit code.
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => RunExit::Success,
            Some(EXIT_VALIDATION) => RunExit::ValidationFailed,
            Some(EXIT_UNAVAILABLE) => RunExit::Unavailable,
            other => RunExit::Failed(other),
        }
    }
}

/// Everything a run printed, with monitor lines appended.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// How the run ended
    pub exit: RunExit,
    /// Combined stdout, stderr and monitor lines
    pub output: String,
}

/// Starts measured runs. The driver only talks to this trait.
pub trait Launcher {
    /// Run `request` to completion and return its transcript.
    fn launch(&self, request: &RunRequest) -> anyhow::Result<Transcript>;
}

/// Launches runs as child processes of the `poolbench` binary.
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    binary: PathBuf,
    wrapper: Vec<String>,
    memory_interval: Duration,
}

impl SubprocessLauncher {
    /// Launch `binary`, optionally behind a `wrapper` command.
    pub fn new(binary: impl Into<PathBuf>, wrapper: Vec<String>, memory_interval: Duration) -> Self {
        Self {
            binary: binary.into(),
            wrapper,
            memory_interval,
        }
    }

    fn command(&self, request: &RunRequest) -> Command {
        let mut command = match self.wrapper.split_first() {
            Some((program, args)) => {
                let mut command = Command::new(program);
                command.args(args).arg(&self.binary);
                command
            }
            None => Command::new(&self.binary),
        };
        command
            .args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut stream) = stream {
            let mut bytes = Vec::new();
            if stream.read_to_end(&mut bytes).is_ok() {
                text = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        text
    })
}

impl Launcher for SubprocessLauncher {
    fn launch(&self, request: &RunRequest) -> anyhow::Result<Transcript> {
        let mut command = self.command(request);
        tracing::debug!(?command, "launching run");

        let cpu_before = children_cpu_time();
        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to launch {} run", request.mode))?;
        let sampler = ProcessTreeSampler::start(child.id(), self.memory_interval);

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = child
            .wait()
            .with_context(|| format!("failed to wait for {} run", request.mode))?;
        let wall = started.elapsed();
        let peak_kb = sampler.stop();
        let cpu = children_cpu_time().saturating_sub(cpu_before);

        let mut output = stdout.join().unwrap_or_default();
        output.push_str(&stderr.join().unwrap_or_default());
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }

        if self.wrapper.is_empty() {
            let wall_secs = wall.as_secs_f64();
            let cpu_percent = if wall_secs > 0.0 {
                (cpu.as_secs_f64() / wall_secs * 100.0).round() as u64
            } else {
                0
            };
            let _ = writeln!(output, "{WALL_CLOCK_KEY}: {wall_secs:.3}");
            let _ = writeln!(output, "{CPU_KEY}: {cpu_percent}%");
        }
        let _ = writeln!(output, "{VMPEAK_KEY}: {peak_kb} kB");

        Ok(Transcript {
            exit: RunExit::from_code(status.code()),
            output,
        })
    }
}

/// User plus system CPU time of all reaped children of this process.
fn children_cpu_time() -> Duration {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) };
    if ret != 0 {
        tracing::warn!(error = %std::io::Error::last_os_error(), "getrusage failed");
        return Duration::ZERO;
    }
    let tv = |t: libc::timeval| Duration::new(t.tv_sec as u64, t.tv_usec as u32 * 1_000);
    tv(usage.ru_utime) + tv(usage.ru_stime)
}

/// Tracks the peak summed resident memory of a process and its descendants.
pub struct ProcessTreeSampler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl ProcessTreeSampler {
    /// Begin sampling the tree rooted at `root` every `interval`.
    pub fn start(root: u32, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("poolbench-vmpeak".to_string())
            .spawn(move || {
                let mut peak = 0;
                while !flag.load(Ordering::Acquire) {
                    peak = peak.max(tree_rss_kb(root));
                    std::thread::sleep(interval);
                }
                peak
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "failed to start memory sampler");
                None
            }
        };
        Self { stop, handle }
    }

    /// Stop sampling and return the peak in kB.
    pub fn stop(mut self) -> u64 {
        self.stop.store(true, Ordering::Release);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for ProcessTreeSampler {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Parent pid from the contents of `/proc/<pid>/stat`.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
fn parse_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    // state, then ppid
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// `VmRSS` in kB from the contents of `/proc/<pid>/status`.
fn parse_vmrss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

/// Every pid in the tree rooted at `root`, including `root`.
fn descendants(root: u32, parents: &HashMap<u32, u32>) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (&pid, &ppid) in parents {
        children.entry(ppid).or_default().push(pid);
    }

    let mut tree = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        tree.push(pid);
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids);
        }
    }
    tree
}

/// Summed `VmRSS` of `root` and all its descendants. Zero where `/proc` is
/// unavailable.
fn tree_rss_kb(root: u32) -> u64 {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    let parents: HashMap<u32, u32> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| {
            let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
            Some((pid, parse_ppid(&stat)?))
        })
        .collect();

    descendants(root, &parents)
        .into_iter()
        .filter_map(|pid| std::fs::read_to_string(format!("/proc/{pid}/status")).ok())
        .filter_map(|status| parse_vmrss_kb(&status))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_classification() {
        assert_eq!(RunExit::from_code(Some(0)), RunExit::Success);
        assert_eq!(RunExit::from_code(Some(2)), RunExit::ValidationFailed);
        assert_eq!(RunExit::from_code(Some(3)), RunExit::Unavailable);
        assert_eq!(RunExit::from_code(Some(1)), RunExit::Failed(Some(1)));
        assert_eq!(RunExit::from_code(None), RunExit::Failed(None));
    }

    #[test]
    fn test_request_args() {
        let request = RunRequest {
            mode: StrategyMode::NoGil,
            benchmark: "fib".to_string(),
            workers: 4,
        };
        assert_eq!(request.args(), ["run", "nogil", "fib", "--workers", "4"]);
    }

    #[test]
    fn test_wrapper_prefixes_binary() {
        let launcher = SubprocessLauncher::new(
            "/opt/poolbench",
            vec!["/usr/bin/time".to_string(), "-f".to_string(), "%e".to_string()],
            Duration::from_millis(10),
        );
        let request = RunRequest {
            mode: StrategyMode::Thread,
            benchmark: "fib".to_string(),
            workers: 2,
        };
        let command = launcher.command(&request);
        assert_eq!(command.get_program(), "/usr/bin/time");
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["-f", "%e", "/opt/poolbench", "run", "thread", "fib", "--workers", "2"]
        );
    }

    #[test]
    fn test_parse_ppid() {
        assert_eq!(parse_ppid("1234 (bash) S 1000 1234 1234 0"), Some(1000));
        assert_eq!(parse_ppid("77 (odd) name) R 42 77 77"), Some(42));
        assert_eq!(parse_ppid("garbage"), None);
    }

    #[test]
    fn test_parse_vmrss() {
        let status = "Name:\tpoolbench\nVmPeak:\t  20000 kB\nVmRSS:\t   10432 kB\nThreads:\t4\n";
        assert_eq!(parse_vmrss_kb(status), Some(10_432));
        assert_eq!(parse_vmrss_kb("Name:\tkthreadd\n"), None);
    }

    #[test]
    fn test_descendants() {
        let parents = HashMap::from([(10, 1), (11, 10), (12, 10), (13, 11), (20, 1)]);
        let mut tree = descendants(10, &parents);
        tree.sort();
        assert_eq!(tree, vec![10, 11, 12, 13]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_own_tree_has_memory() {
        assert!(tree_rss_kb(std::process::id()) > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_launch_builtin_wrapper() {
        let launcher = SubprocessLauncher::new("/bin/sh", Vec::new(), Duration::from_millis(5));
        // `/bin/sh run ...` fails to open a script named "run"; the transcript
        // still gets the monitor lines.
        let request = RunRequest {
            mode: StrategyMode::Sequential,
            benchmark: "fib".to_string(),
            workers: 1,
        };
        let transcript = launcher.launch(&request).unwrap();
        assert_ne!(transcript.exit, RunExit::Success);
        assert!(transcript.output.contains("wall_clock: "));
        assert!(transcript.output.contains("cpu: "));
        assert!(transcript.output.contains("vmpeak: "));
    }
}
