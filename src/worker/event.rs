//! Messages sent from workers to the run coordinator.

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The partitioner had no more chunks.
    Exhausted,
    /// The control signal was cancelled.
    Cancelled,
    /// This worker published a match.
    Matched,
    /// The worker thread unwound from a panic.
    Panicked,
}

/// Event reported by a worker. Workers never touch run state directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Scalars scanned since the previous report.
    Progress { worker: usize, scanned: u64 },
    /// The worker won the match slot.
    Found { worker: usize },
    /// The worker thread is about to end. Always the worker's last event.
    Exited { worker: usize, exit: WorkerExit },
}

impl WorkerEvent {
    /// Id of the worker that sent the event.
    pub fn worker(&self) -> usize {
        match *self {
            WorkerEvent::Progress { worker, .. }
            | WorkerEvent::Found { worker }
            | WorkerEvent::Exited { worker, .. } => worker,
        }
    }
}
