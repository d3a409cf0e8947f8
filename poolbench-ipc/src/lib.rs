#![warn(missing_docs)]
//! poolbench IPC Protocol
//!
//! Length-prefixed rkyv frames for supervisor-worker communication in the
//! process pool. The supervisor hands one input at a time to each worker and
//! the worker answers with the computed value or a failure for that index.

mod framing;
mod messages;

pub use framing::{
    FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, decode_value, encode_value, read_frame,
    write_frame,
};
pub use messages::{FailureKind, SupervisorCommand, Value, WorkerCapabilities, WorkerMessage};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the inherited `<read_fd>,<write_fd>` pair
pub const IPC_FD_ENV: &str = "POOLBENCH_IPC_FD";

/// Command-line flag that switches the binary into worker mode
pub const WORKER_FLAG: &str = "--pool-worker";
