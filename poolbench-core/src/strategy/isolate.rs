//! Isolate pools
//!
//! An isolate is a dedicated thread that shares nothing with the dispatcher
//! except its task channel and whatever crosses its [`Boundary`]. All three
//! interp modes use the same engine and differ only in how a value crosses:
//!
//! | mode    | boundary                | compute resolved by       |
//! |---------|-------------------------|---------------------------|
//! | interp  | serialized byte copy    | registry name, per isolate |
//! | interp2 | ownership move          | function pointer          |
//! | interp3 | fixed-size shared slot  | registry name, per isolate |
//!
//! The dispatcher primes every isolate with one item, then hands the next
//! item to whichever isolate reports back first. Results are stored by input
//! index, so output order never depends on completion order.

use super::{
    ExecutionStrategy, StrategyError, StrategyMode, StrategyUnavailable, check_workers,
    panic_message,
};
use crate::workload::{self, ComputeFn, ComputeFnPtr, WorkloadDef};
use crate::Value;
use poolbench_ipc::{decode_value, encode_value};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Capacity of each `interp3` exchange slot (64 KiB)
pub const SLOT_BYTES: usize = 64 * 1024;

/// How values cross between the dispatcher and one isolate.
trait Boundary: Send + Sync + 'static {
    type Packet: Send + 'static;

    /// Dispatcher side: package an input for the isolate.
    fn send(&self, input: Value) -> Result<Self::Packet, String>;

    /// Isolate side: unpack, compute, package the output.
    fn compute(&self, packet: Self::Packet) -> Result<Self::Packet, String>;

    /// Dispatcher side: unpack the isolate's reply.
    fn receive(&self, packet: Self::Packet) -> Result<Value, String>;
}

type Reply<P> = (usize, usize, Result<P, String>);

/// Running isolates for one `map` call. Dropping the set closes every task
/// channel and joins every isolate thread.
struct IsolateSet<B: Boundary> {
    lanes: Vec<Arc<B>>,
    tasks: Vec<Sender<(usize, B::Packet)>>,
    replies: Receiver<Reply<B::Packet>>,
    threads: Vec<JoinHandle<()>>,
}

impl<B: Boundary> IsolateSet<B> {
    fn spawn(mode: StrategyMode, lanes: Vec<B>) -> Result<Self, StrategyError> {
        let (reply_tx, replies) = channel();
        let mut set = Self {
            lanes: Vec::with_capacity(lanes.len()),
            tasks: Vec::with_capacity(lanes.len()),
            replies,
            threads: Vec::with_capacity(lanes.len()),
        };

        for (id, lane) in lanes.into_iter().enumerate() {
            let lane = Arc::new(lane);
            let (task_tx, task_rx) = channel::<(usize, B::Packet)>();
            let reply_tx = reply_tx.clone();
            let isolate_lane = Arc::clone(&lane);

            let thread = std::thread::Builder::new()
                .name(format!("poolbench-{mode}-{id}"))
                .spawn(move || {
                    while let Ok((index, packet)) = task_rx.recv() {
                        let reply = catch_unwind(AssertUnwindSafe(|| isolate_lane.compute(packet)))
                            .unwrap_or_else(|panic| {
                                Err(format!("panicked: {}", panic_message(panic.as_ref())))
                            });
                        if reply_tx.send((id, index, reply)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| StrategyError::Startup {
                    mode,
                    message: e.to_string(),
                })?;

            set.lanes.push(lane);
            set.tasks.push(task_tx);
            set.threads.push(thread);
        }
        Ok(set)
    }

    fn submit(&self, isolate: usize, index: usize, input: Value) -> Result<(), StrategyError> {
        let packet = self.lanes[isolate]
            .send(input)
            .map_err(|message| StrategyError::WorkerFailure { index, message })?;
        self.tasks[isolate]
            .send((index, packet))
            .map_err(|_| StrategyError::Protocol(format!("isolate {isolate} exited early")))
    }

    fn dispatch(&self, inputs: Vec<Value>) -> Result<Vec<Value>, StrategyError> {
        let mut outputs: Vec<Option<Value>> = vec![None; inputs.len()];
        let mut pending = inputs.into_iter().enumerate();
        let mut failure: Option<StrategyError> = None;
        let mut in_flight = 0usize;

        for isolate in 0..self.lanes.len() {
            let Some((index, input)) = pending.next() else {
                break;
            };
            match self.submit(isolate, index, input) {
                Ok(()) => in_flight += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        while in_flight > 0 {
            let (isolate, index, reply) = self
                .replies
                .recv()
                .map_err(|_| StrategyError::Protocol("every isolate exited".to_string()))?;
            in_flight -= 1;

            match reply.and_then(|packet| self.lanes[isolate].receive(packet)) {
                Ok(value) => outputs[index] = Some(value),
                Err(message) => {
                    failure.get_or_insert(StrategyError::WorkerFailure { index, message });
                }
            }

            // After a failure, only drain what is already in flight
            if failure.is_some() {
                continue;
            }
            if let Some((index, input)) = pending.next() {
                match self.submit(isolate, index, input) {
                    Ok(()) => in_flight += 1,
                    Err(e) => failure = Some(e),
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        outputs
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                value.ok_or_else(|| StrategyError::Protocol(format!("no output for input {index}")))
            })
            .collect()
    }
}

impl<B: Boundary> Drop for IsolateSet<B> {
    fn drop(&mut self) {
        self.tasks.clear();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::warn!("isolate thread panicked during shutdown");
            }
        }
    }
}

fn run_isolates<B: Boundary>(
    mode: StrategyMode,
    workers: usize,
    inputs: Vec<Value>,
    make_lane: impl Fn() -> B,
) -> Result<Vec<Value>, StrategyError> {
    // No point starting isolates that would never receive an item
    let count = workers.min(inputs.len()).max(1);
    tracing::debug!(%mode, isolates = count, items = inputs.len(), "starting isolates");
    let set = IsolateSet::spawn(mode, (0..count).map(|_| make_lane()).collect())?;
    set.dispatch(inputs)
}

fn resolve(name: &str) -> Result<ComputeFnPtr, String> {
    workload::lookup(name)
        .map(|def| def.compute)
        .ok_or_else(|| format!("workload '{name}' is not registered"))
}

fn to_bytes(value: &Value) -> Result<Vec<u8>, String> {
    encode_value(value)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| e.to_string())
}

fn from_bytes(bytes: &[u8]) -> Result<Value, String> {
    decode_value(bytes).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// interp
// ---------------------------------------------------------------------------

struct CopyLane {
    workload: &'static str,
}

impl Boundary for CopyLane {
    type Packet = Vec<u8>;

    fn send(&self, input: Value) -> Result<Vec<u8>, String> {
        to_bytes(&input)
    }

    fn compute(&self, packet: Vec<u8>) -> Result<Vec<u8>, String> {
        let func = resolve(self.workload)?;
        let input = from_bytes(&packet)?;
        let output = func(&input).map_err(|e| e.to_string())?;
        to_bytes(&output)
    }

    fn receive(&self, packet: Vec<u8>) -> Result<Value, String> {
        from_bytes(&packet)
    }
}

/// Isolates that receive serialized copies of every input and return
/// serialized copies of every output.
#[derive(Debug)]
pub struct CopyIsolatePool {
    workers: usize,
}

impl CopyIsolatePool {
    pub fn new(workers: usize) -> Result<Self, StrategyError> {
        Ok(Self {
            workers: check_workers(workers)?,
        })
    }
}

impl ExecutionStrategy for CopyIsolatePool {
    fn mode(&self) -> StrategyMode {
        StrategyMode::Interp
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn map(&self, compute: &ComputeFn, inputs: Vec<Value>) -> Result<Vec<Value>, StrategyError> {
        let workload = compute.workload;
        run_isolates(self.mode(), self.workers, inputs, || CopyLane { workload })
    }
}

// ---------------------------------------------------------------------------
// interp2
// ---------------------------------------------------------------------------

struct MoveLane {
    func: ComputeFnPtr,
}

impl Boundary for MoveLane {
    type Packet = Box<Value>;

    fn send(&self, input: Value) -> Result<Box<Value>, String> {
        Ok(Box::new(input))
    }

    fn compute(&self, packet: Box<Value>) -> Result<Box<Value>, String> {
        (self.func)(&packet)
            .map(Box::new)
            .map_err(|e| e.to_string())
    }

    fn receive(&self, packet: Box<Value>) -> Result<Value, String> {
        Ok(*packet)
    }
}

/// Isolates that take ownership of each input and hand ownership of each
/// output back, with no copy in between.
#[derive(Debug)]
pub struct MoveIsolatePool {
    workers: usize,
}

impl MoveIsolatePool {
    pub fn new(workers: usize) -> Result<Self, StrategyError> {
        Ok(Self {
            workers: check_workers(workers)?,
        })
    }
}

impl ExecutionStrategy for MoveIsolatePool {
    fn mode(&self) -> StrategyMode {
        StrategyMode::Interp2
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn map(&self, compute: &ComputeFn, inputs: Vec<Value>) -> Result<Vec<Value>, StrategyError> {
        let func = compute.func;
        run_isolates(self.mode(), self.workers, inputs, || MoveLane { func })
    }
}

// ---------------------------------------------------------------------------
// interp3
// ---------------------------------------------------------------------------

struct SlotLane {
    workload: &'static str,
    slot: Mutex<Box<[u8]>>,
}

impl SlotLane {
    fn new(workload: &'static str) -> Self {
        Self {
            workload,
            slot: Mutex::new(vec![0u8; SLOT_BYTES].into_boxed_slice()),
        }
    }

    fn write(&self, value: &Value) -> Result<usize, String> {
        let bytes = encode_value(value).map_err(|e| e.to_string())?;
        if bytes.len() > SLOT_BYTES {
            return Err(format!(
                "{} bytes do not fit the {SLOT_BYTES}-byte exchange slot",
                bytes.len()
            ));
        }
        let mut slot = self.slot.lock().map_err(|_| "exchange slot poisoned")?;
        slot[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn read(&self, len: usize) -> Result<Value, String> {
        let slot = self.slot.lock().map_err(|_| "exchange slot poisoned")?;
        from_bytes(&slot[..len])
    }
}

impl Boundary for SlotLane {
    type Packet = usize;

    fn send(&self, input: Value) -> Result<usize, String> {
        self.write(&input)
    }

    fn compute(&self, len: usize) -> Result<usize, String> {
        let func = resolve(self.workload)?;
        let input = self.read(len)?;
        let output = func(&input).map_err(|e| e.to_string())?;
        self.write(&output)
    }

    fn receive(&self, len: usize) -> Result<Value, String> {
        self.read(len)
    }
}

/// Isolates that exchange values through one fixed-capacity byte slot each.
///
/// Workloads whose outputs can exceed [`SLOT_BYTES`] are rejected up front by
/// [`check_compatible`](ExecutionStrategy::check_compatible).
#[derive(Debug)]
pub struct SlotIsolatePool {
    workers: usize,
}

impl SlotIsolatePool {
    pub fn new(workers: usize) -> Result<Self, StrategyError> {
        Ok(Self {
            workers: check_workers(workers)?,
        })
    }
}

impl ExecutionStrategy for SlotIsolatePool {
    fn mode(&self) -> StrategyMode {
        StrategyMode::Interp3
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn check_compatible(&self, workload: &WorkloadDef) -> Result<(), StrategyUnavailable> {
        if workload.output_bytes > SLOT_BYTES {
            return Err(StrategyUnavailable {
                mode: self.mode(),
                workload: workload.name.to_string(),
                reason: format!(
                    "outputs of up to {} bytes exceed the {SLOT_BYTES}-byte exchange slot",
                    workload.output_bytes
                ),
            });
        }
        Ok(())
    }

    fn map(&self, compute: &ComputeFn, inputs: Vec<Value>) -> Result<Vec<Value>, StrategyError> {
        let workload = compute.workload;
        run_isolates(self.mode(), self.workers, inputs, || SlotLane::new(workload))
    }
}
