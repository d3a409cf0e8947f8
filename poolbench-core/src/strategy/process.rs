//! Process pool
//!
//! Each worker is a re-executed copy of the benchmark binary started with
//! [`WORKER_FLAG`]. Commands flow to the worker on fd 3 and replies come back
//! on fd 4, as length-prefixed rkyv frames. The worker resolves the compute
//! function by registry name, so only the name and the input cross the
//! process boundary.
//!
//! One supervisor thread per worker pulls the next input index from a shared
//! counter, sends it, and blocks for the reply. Results are merged by index
//! after every supervisor has finished.

use super::{ExecutionStrategy, StrategyError, StrategyMode, StrategyUnavailable, check_workers};
use crate::workload::{ComputeFn, WorkloadDef};
use crate::Value;
use poolbench_ipc::{
    FrameError, FrameReader, FrameWriter, IPC_FD_ENV, PROTOCOL_VERSION, SupervisorCommand,
    WORKER_FLAG, WorkerCapabilities, WorkerMessage,
};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerSpawnError {
    #[error("failed to spawn worker: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error during handshake: {0}")]
    Ipc(#[from] FrameError),

    #[error("worker protocol error: expected {expected}, got {got}")]
    Protocol { expected: String, got: String },
}

/// Create a close-on-exec pipe pair, returning (read_fd, write_fd).
///
/// Supervisor threads spawn workers concurrently, so the flag has to be set
/// atomically or a sibling's fork can inherit these ends.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

/// Create a close-on-exec pipe pair, returning (read_fd, write_fd).
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

/// In the forked child: place `cmd_read` on fd 3 and `msg_write` on fd 4.
///
/// Both ends are first copied above 4, so a pipe end that already sits on
/// fd 3 or 4 cannot be clobbered by the other's `dup2`. The originals are
/// close-on-exec and vanish at exec; the `dup2` targets are inheritable.
fn install_child_fds(cmd_read: RawFd, msg_write: RawFd) -> std::io::Result<()> {
    let check = |ret: libc::c_int| {
        if ret < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(ret)
        }
    };
    unsafe {
        let read_high = check(libc::fcntl(cmd_read, libc::F_DUPFD_CLOEXEC, 5))?;
        let write_high = check(libc::fcntl(msg_write, libc::F_DUPFD_CLOEXEC, 5))?;
        check(libc::dup2(read_high, 3))?;
        check(libc::dup2(write_high, 4))?;
        libc::close(read_high);
        libc::close(write_high);
    }
    Ok(())
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// One live worker process.
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
}

impl WorkerHandle {
    /// Start `binary` in worker mode and complete the hello handshake.
    pub fn spawn(binary: &Path) -> Result<Self, WorkerSpawnError> {
        // commands: supervisor writes, worker reads fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // replies: worker writes fd 4, supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(e.into());
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        unsafe {
            command.pre_exec(move || install_child_fds(cmd_read, msg_write));
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(e.into());
            }
        };

        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
        };
        let hello = handle.wait_for_hello()?;
        tracing::debug!(pid = hello.pid, "worker ready");
        Ok(handle)
    }

    fn wait_for_hello(&mut self) -> Result<WorkerCapabilities, WorkerSpawnError> {
        match self.reader.read::<WorkerMessage>()? {
            WorkerMessage::Hello(caps) if caps.protocol_version == PROTOCOL_VERSION => Ok(caps),
            WorkerMessage::Hello(caps) => Err(WorkerSpawnError::Protocol {
                expected: format!("protocol version {PROTOCOL_VERSION}"),
                got: format!("protocol version {}", caps.protocol_version),
            }),
            other => Err(WorkerSpawnError::Protocol {
                expected: "Hello".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Compute one item on this worker and wait for the reply.
    pub fn compute(
        &mut self,
        index: usize,
        workload: &str,
        input: Value,
    ) -> Result<Value, StrategyError> {
        self.writer
            .write(&SupervisorCommand::Compute {
                index: index as u64,
                workload: workload.to_string(),
                input,
            })
            .map_err(|e| self.lost(index, e))?;

        let reply = self
            .reader
            .read::<WorkerMessage>()
            .map_err(|e| self.lost(index, e))?;

        match reply {
            WorkerMessage::Output { index: i, value } if i as usize == index => Ok(value),
            WorkerMessage::Failure {
                index: i,
                kind,
                message,
            } if i as usize == index => Err(StrategyError::WorkerFailure {
                index,
                message: format!("{kind}: {message}"),
            }),
            other => Err(StrategyError::Protocol(format!(
                "expected reply for input {index}, got {other:?}"
            ))),
        }
    }

    fn lost(&mut self, index: usize, error: FrameError) -> StrategyError {
        if matches!(error, FrameError::EndOfStream) || !self.is_alive() {
            StrategyError::WorkerFailure {
                index,
                message: format!("worker process {} exited unexpectedly", self.child.id()),
            }
        } else {
            StrategyError::Protocol(error.to_string())
        }
    }

    /// Ask the worker to exit and reap it.
    pub fn shutdown(mut self) {
        if self.writer.write(&SupervisorCommand::Shutdown).is_ok() {
            let _ = self.child.wait();
        }
    }

    /// Check whether the worker process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            // SIGTERM first, brief wait, then SIGKILL
            let _ = send_sigterm(self.child.id());
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
        }
        let _ = self.child.wait();
    }
}

/// Pool of worker processes.
#[derive(Debug)]
pub struct ProcessPool {
    workers: usize,
    binary: Option<PathBuf>,
}

impl ProcessPool {
    /// Pool that re-executes the current binary.
    pub fn new(workers: usize) -> Result<Self, StrategyError> {
        Ok(Self {
            workers: check_workers(workers)?,
            binary: None,
        })
    }

    /// Use `binary` as the worker executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    fn binary(&self) -> std::io::Result<PathBuf> {
        match &self.binary {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe(),
        }
    }

    fn supervise(
        &self,
        binary: &Path,
        workload: &str,
        inputs: &[Value],
        next: &AtomicUsize,
        failed: &AtomicBool,
    ) -> Result<Vec<(usize, Value)>, StrategyError> {
        let mut worker = WorkerHandle::spawn(binary).map_err(|e| {
            failed.store(true, Ordering::Release);
            StrategyError::Startup {
                mode: StrategyMode::Subprocess,
                message: e.to_string(),
            }
        })?;

        let mut done = Vec::new();
        while !failed.load(Ordering::Acquire) {
            let index = next.fetch_add(1, Ordering::AcqRel);
            let Some(input) = inputs.get(index) else {
                break;
            };
            match worker.compute(index, workload, input.clone()) {
                Ok(value) => done.push((index, value)),
                Err(e) => {
                    failed.store(true, Ordering::Release);
                    // Dropping the handle terminates the worker
                    return Err(e);
                }
            }
        }

        worker.shutdown();
        Ok(done)
    }
}

impl ExecutionStrategy for ProcessPool {
    fn mode(&self) -> StrategyMode {
        StrategyMode::Subprocess
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn check_compatible(&self, workload: &WorkloadDef) -> Result<(), StrategyUnavailable> {
        let unavailable = |reason: String| StrategyUnavailable {
            mode: self.mode(),
            workload: workload.name.to_string(),
            reason,
        };
        let binary = self
            .binary()
            .map_err(|e| unavailable(format!("cannot locate worker binary: {e}")))?;
        if !binary.is_file() {
            return Err(unavailable(format!(
                "worker binary {} does not exist",
                binary.display()
            )));
        }
        Ok(())
    }

    fn map(&self, compute: &ComputeFn, inputs: Vec<Value>) -> Result<Vec<Value>, StrategyError> {
        let count = self.workers.min(inputs.len());
        if count == 0 {
            return Ok(Vec::new());
        }
        let binary = self.binary().map_err(|e| StrategyError::Startup {
            mode: self.mode(),
            message: e.to_string(),
        })?;
        tracing::debug!(binary = %binary.display(), workers = count, items = inputs.len(), "starting worker processes");

        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let outcomes: Vec<_> = std::thread::scope(|s| {
            let supervisors: Vec<_> = (0..count)
                .map(|_| {
                    s.spawn(|| self.supervise(&binary, compute.workload, &inputs, &next, &failed))
                })
                .collect();
            supervisors
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(StrategyError::Protocol("supervisor thread panicked".to_string()))
                    })
                })
                .collect()
        });

        let mut merged = Vec::with_capacity(inputs.len());
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(done) => merged.extend(done),
                Err(e) => {
                    // Prefer a real item failure over the fallout it caused
                    let replace = match (&first_error, &e) {
                        (None, _) => true,
                        (Some(StrategyError::WorkerFailure { .. }), _) => false,
                        (Some(_), StrategyError::WorkerFailure { .. }) => true,
                        _ => false,
                    };
                    if replace {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        merged.sort_by_key(|(index, _)| *index);
        if merged.len() != inputs.len() {
            return Err(StrategyError::Protocol(format!(
                "expected {} results, got {}",
                inputs.len(),
                merged.len()
            )));
        }
        Ok(merged.into_iter().map(|(_, value)| value).collect())
    }
}
