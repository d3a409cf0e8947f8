//! IPC Message Types
//!
//! All messages are serialized with rkyv. [`Value`] is also the item type every
//! workload produces and consumes, so the same archived layout crosses both the
//! process boundary and the in-process isolate boundary.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// A single workload item: dataset input or computed output.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum Value {
    /// Unsigned integer (fibonacci argument/result, n-body loop count)
    Int(u64),
    /// Single float
    Float(f64),
    /// Float sequence (data-pass payload, n-body energies)
    Floats(Vec<f64>),
    /// Integer tagged with its dataset position
    Tagged {
        /// Position of the originating input
        tag: u64,
        /// Payload
        value: u64,
    },
}

impl Value {
    /// Integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Float payload, if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Float sequence payload, if this is a `Floats`.
    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Value::Floats(xs) => Some(xs),
            _ => None,
        }
    }

    /// `(tag, value)` pair, if this is a `Tagged`.
    pub fn as_tagged(&self) -> Option<(u64, u64)> {
        match self {
            Value::Tagged { tag, value } => Some((*tag, *value)),
            _ => None,
        }
    }

    /// Short variant name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Floats(_) => "floats",
            Value::Tagged { .. } => "tagged",
        }
    }
}

/// Worker identity advertised during handshake
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// OS process id of the worker
    pub pid: u32,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
        }
    }
}

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake
    Hello(WorkerCapabilities),

    /// One computed item
    Output {
        /// Dataset position of the input this output belongs to
        index: u64,
        /// Computed value
        value: Value,
    },

    /// Computing an item failed
    Failure {
        /// Dataset position of the failing input
        index: u64,
        /// Error category
        kind: FailureKind,
        /// Human-readable error message
        message: String,
    },
}

/// Categories of worker failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// Rust panic (caught)
    Panic,
    /// Compute function returned an error
    Compute,
    /// The requested workload is not registered in the worker binary
    UnknownWorkload,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Panic => "panic",
            FailureKind::Compute => "compute error",
            FailureKind::UnknownWorkload => "unknown workload",
        };
        f.write_str(name)
    }
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Apply a workload's compute function to one input
    Compute {
        /// Dataset position, echoed back in the reply
        index: u64,
        /// Registered workload name
        workload: String,
        /// Input value
        input: Value,
    },

    /// Request graceful shutdown
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(28).as_int(), Some(28));
        assert_eq!(Value::Int(28).as_float(), None);
        assert_eq!(Value::Float(1.5).as_float(), Some(1.5));
        assert_eq!(Value::Floats(vec![1.0, 2.0]).as_floats(), Some(&[1.0, 2.0][..]));
        assert_eq!(Value::Tagged { tag: 3, value: 8 }.as_tagged(), Some((3, 8)));
        assert_eq!(Value::Float(0.0).kind(), "float");
    }

    #[test]
    fn test_worker_capabilities_default() {
        let caps = WorkerCapabilities::default();
        assert_eq!(caps.protocol_version, crate::PROTOCOL_VERSION);
        assert_eq!(caps.pid, std::process::id());
    }
}
