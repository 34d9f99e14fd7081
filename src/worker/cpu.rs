//! CPU-based worker for range scanning.

use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::crypto::ADDRESS_BUF_CAPACITY;
use crate::partition::Chunk;

use super::event::{WorkerEvent, WorkerExit};
use super::pool::{MatchResult, RunContext};
use super::signal::Mode;

/// Scalars scanned but not yet reported.
struct PendingProgress {
    scanned: u64,
    last_flush: Instant,
    interval: Duration,
}

impl PendingProgress {
    fn new(interval: Duration) -> Self {
        Self {
            scanned: 0,
            last_flush: Instant::now(),
            interval,
        }
    }

    #[inline]
    fn is_due(&self) -> bool {
        self.last_flush.elapsed() >= self.interval
    }
}

/// A CPU worker that scans chunks claimed from the run's partitioner.
pub struct CpuWorker {
    /// Worker ID
    id: usize,
    /// Shared run state
    ctx: RunContext,
}

impl CpuWorker {
    /// Creates a new CPU worker.
    pub fn new(id: usize, ctx: RunContext) -> Self {
        Self { id, ctx }
    }

    /// Runs the worker loop.
    ///
    /// Claims and scans chunks until:
    /// - The partitioner is exhausted
    /// - This worker publishes a match
    /// - The control signal is cancelled
    ///
    /// Pending progress is always reported before returning.
    pub fn run(&self) -> WorkerExit {
        let mut address = String::with_capacity(ADDRESS_BUF_CAPACITY);
        let mut progress = PendingProgress::new(self.ctx.flush_interval);

        let exit = loop {
            if self.ctx.signal.is_cancelled() {
                break WorkerExit::Cancelled;
            }
            let Some(chunk) = self.ctx.partitioner.next_chunk() else {
                break WorkerExit::Exhausted;
            };
            self.ctx.heartbeats.beat(self.id);
            trace!(worker = self.id, start = chunk.start, end = chunk.end, "claimed chunk");

            if let Some(exit) = self.scan_chunk(chunk, &mut address, &mut progress) {
                break exit;
            }
        };

        self.flush(&mut progress);
        debug!(worker = self.id, ?exit, "worker finished");
        exit
    }

    /// Scans `chunk` in ascending order, observing control every
    /// `check_interval` scalars and at the end of the chunk.
    fn scan_chunk(
        &self,
        chunk: Chunk,
        address: &mut String,
        progress: &mut PendingProgress,
    ) -> Option<WorkerExit> {
        let step = self.ctx.check_interval.max(1) - 1;
        let mut next = chunk.start;

        loop {
            let last = chunk.end.min(next.saturating_add(step));

            for scalar in next..=last {
                progress.scanned += 1;
                if scalar == 0 {
                    continue;
                }

                if let Err(e) = self.ctx.derivation.derive_into(scalar, address) {
                    warn!(worker = self.id, scalar, error = %e, "skipping scalar");
                    continue;
                }

                if self.ctx.target.matches(address) {
                    self.publish(scalar, address);
                    return Some(WorkerExit::Matched);
                }
            }

            if let Some(exit) = self.checkpoint(progress) {
                return Some(exit);
            }
            if last == chunk.end {
                return None;
            }
            next = last + 1;
        }
    }

    /// Observes the control signal. Parks while paused; the caller keeps its
    /// position, so resuming continues with the next unscanned scalar.
    fn checkpoint(&self, progress: &mut PendingProgress) -> Option<WorkerExit> {
        self.ctx.heartbeats.beat(self.id);
        match self.ctx.signal.mode() {
            Mode::Running => {
                if progress.is_due() {
                    self.flush(progress);
                }
                None
            }
            Mode::Cancelled => Some(WorkerExit::Cancelled),
            Mode::Paused => {
                self.flush(progress);
                trace!(worker = self.id, "parked");
                if self.ctx.signal.park() {
                    self.ctx.heartbeats.beat(self.id);
                    trace!(worker = self.id, "resumed");
                    progress.last_flush = Instant::now();
                    None
                } else {
                    Some(WorkerExit::Cancelled)
                }
            }
        }
    }

    fn publish(&self, scalar: u64, address: &str) {
        let result = MatchResult {
            scalar,
            address: address.to_owned(),
            worker_id: self.id,
        };

        if self.ctx.slot.publish(result) {
            info!(worker = self.id, scalar, address, "match found");
            self.ctx.send(self.id, WorkerEvent::Found { worker: self.id });
        } else {
            debug!(worker = self.id, scalar, "match discarded, slot already filled");
        }
    }

    fn flush(&self, progress: &mut PendingProgress) {
        if progress.scanned > 0 {
            self.ctx.send(
                self.id,
                WorkerEvent::Progress {
                    worker: self.id,
                    scanned: progress.scanned,
                },
            );
            progress.scanned = 0;
        }
        progress.last_flush = Instant::now();
    }
}
