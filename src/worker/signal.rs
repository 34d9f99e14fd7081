//! Pause / cancel broadcast shared by all workers of a run.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};

const RUNNING: u8 = 0;
const PAUSED: u8 = 1;
const CANCELLED: u8 = 2;

/// Current control mode as seen by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Running,
    Paused,
    Cancelled,
}

/// Control flag checked by workers at every check point.
///
/// The mode lives in an atomic so the running path costs one relaxed load.
/// Transitions happen under `lock` so a parked worker never misses a wake-up.
/// Cancellation is sticky: once cancelled, pause and resume are ignored.
#[derive(Debug)]
pub struct ControlSignal {
    mode: AtomicU8,
    lock: Mutex<()>,
    wake: Condvar,
}

impl ControlSignal {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(RUNNING),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        match self.mode.load(Ordering::Acquire) {
            RUNNING => Mode::Running,
            PAUSED => Mode::Paused,
            _ => Mode::Cancelled,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.mode() == Mode::Cancelled
    }

    /// Asks workers to park at their next check point.
    pub fn pause(&self) {
        let _guard = self.lock.lock();
        let _ = self
            .mode
            .compare_exchange(RUNNING, PAUSED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Releases parked workers.
    pub fn resume(&self) {
        let _guard = self.lock.lock();
        if self
            .mode
            .compare_exchange(PAUSED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.wake.notify_all();
        }
    }

    /// Tells every worker to abandon its chunk and exit, waking parked ones.
    pub fn cancel(&self) {
        let _guard = self.lock.lock();
        self.mode.store(CANCELLED, Ordering::Release);
        self.wake.notify_all();
    }

    /// Blocks while paused.
    ///
    /// Returns `true` when the worker may continue, `false` when cancelled.
    pub fn park(&self) -> bool {
        let mut guard = self.lock.lock();
        loop {
            match self.mode.load(Ordering::Acquire) {
                RUNNING => return true,
                PAUSED => self.wake.wait(&mut guard),
                _ => return false,
            }
        }
    }
}

impl Default for ControlSignal {
    fn default() -> Self {
        Self::new()
    }
}
