//! Worker pool management.

use std::io;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use tracing::debug;

use crate::crypto::{encode_wif, secret_bytes, AddressDerivation, AddressFormat};
use crate::matcher::Target;
use crate::partition::Partitioner;

use super::cpu::CpuWorker;
use super::event::{WorkerEvent, WorkerExit};
use super::heartbeat::Heartbeats;
use super::signal::ControlSignal;

/// How often a worker blocked on a full event channel re-stamps its heartbeat.
const BLOCKED_BEAT: Duration = Duration::from_millis(50);

/// A scalar whose derived address equals the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// The private-key scalar
    pub scalar: u64,
    /// The derived address (equal to the target)
    pub address: String,
    /// The ID of the worker that found this result
    pub worker_id: usize,
}

impl MatchResult {
    /// Returns the private key as 64 hex characters (no 0x prefix).
    pub fn private_key_hex(&self) -> String {
        hex::encode(secret_bytes(self.scalar))
    }

    /// Returns the private key in Wallet Import Format.
    pub fn wif(&self, format: AddressFormat) -> String {
        encode_wif(&secret_bytes(self.scalar), format.is_compressed())
    }
}

/// Write-once slot holding the first match of a run.
#[derive(Debug, Default)]
pub struct MatchSlot {
    cell: OnceLock<MatchResult>,
}

impl MatchSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `result` if the slot is empty. Returns true for the first writer.
    pub fn publish(&self, result: MatchResult) -> bool {
        self.cell.set(result).is_ok()
    }

    pub fn get(&self) -> Option<&MatchResult> {
        self.cell.get()
    }

    pub fn is_filled(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Everything a worker shares with the rest of its run.
#[derive(Clone)]
pub struct RunContext {
    pub partitioner: Arc<Partitioner>,
    pub derivation: Arc<dyn AddressDerivation>,
    pub target: Arc<Target>,
    pub signal: Arc<ControlSignal>,
    pub slot: Arc<MatchSlot>,
    pub events: Sender<WorkerEvent>,
    pub heartbeats: Arc<Heartbeats>,
    /// Scalars scanned between control checks
    pub check_interval: u64,
    /// Minimum time between progress reports
    pub flush_interval: Duration,
}

impl RunContext {
    /// Sends `event` for `worker`, waiting while the channel is full.
    ///
    /// A worker held up by back-pressure keeps beating, so a slow consumer
    /// is never mistaken for a stalled worker. Gives up once the
    /// coordinator is gone.
    pub fn send(&self, worker: usize, mut event: WorkerEvent) {
        loop {
            match self.events.send_timeout(event, BLOCKED_BEAT) {
                Ok(()) | Err(SendTimeoutError::Disconnected(_)) => return,
                Err(SendTimeoutError::Timeout(pending)) => {
                    self.heartbeats.beat(worker);
                    event = pending;
                }
            }
        }
    }
}

/// Sends the worker's exit event when dropped, including during a panic
/// unwind, so the coordinator never waits on a dead worker.
struct ExitNotice {
    worker: usize,
    ctx: RunContext,
    exit: Option<WorkerExit>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let exit = self.exit.take().unwrap_or(WorkerExit::Panicked);
        self.ctx.heartbeats.beat(self.worker);
        self.ctx.send(
            self.worker,
            WorkerEvent::Exited {
                worker: self.worker,
                exit,
            },
        );
    }
}

/// Fixed set of worker threads for one run.
pub struct WorkerPool {
    /// Worker thread handles, indexed by worker ID; `None` once joined or detached
    handles: Vec<Option<JoinHandle<()>>>,
    /// Shared control signal, cancelled on drop
    signal: Arc<ControlSignal>,
}

impl WorkerPool {
    /// Spawns `num_workers` threads scanning `ctx`.
    ///
    /// If any spawn fails the already started workers are cancelled and
    /// joined before the error is returned.
    pub fn spawn(num_workers: usize, ctx: RunContext) -> io::Result<Self> {
        let mut pool = Self {
            handles: Vec::with_capacity(num_workers),
            signal: Arc::clone(&ctx.signal),
        };

        for id in 0..num_workers {
            let ctx = ctx.clone();
            let handle = thread::Builder::new()
                .name(format!("keyrange-worker-{}", id))
                .spawn(move || {
                    let mut notice = ExitNotice {
                        worker: id,
                        ctx: ctx.clone(),
                        exit: None,
                    };
                    let worker = CpuWorker::new(id, ctx);
                    notice.exit = Some(worker.run());
                })?;
            pool.handles.push(Some(handle));
        }

        debug!(workers = num_workers, "worker pool started");
        Ok(pool)
    }

    /// Returns the number of workers spawned.
    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }

    /// Joins a worker that reported its exit. Returns false if it panicked.
    pub fn join(&mut self, worker: usize) -> bool {
        match self.handles.get_mut(worker).and_then(Option::take) {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }

    /// Gives up on a worker without waiting for it.
    pub fn detach(&mut self, worker: usize) {
        if let Some(slot) = self.handles.get_mut(worker) {
            slot.take();
        }
    }
}

impl Drop for WorkerPool {
    /// Cancels the run and waits for every worker not yet joined or detached.
    fn drop(&mut self) {
        self.signal.cancel();
        for handle in self.handles.iter_mut().filter_map(Option::take) {
            let _ = handle.join();
        }
    }
}
