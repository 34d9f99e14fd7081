//! Per-worker liveness stamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Last time each worker proved it was making progress.
///
/// Workers stamp their own slot at every check point and while waiting on a
/// full event channel, so liveness does not depend on how fast the
/// coordinator drains events.
#[derive(Debug)]
pub struct Heartbeats {
    origin: Instant,
    /// Nanoseconds since `origin`
    beats: Vec<AtomicU64>,
}

impl Heartbeats {
    /// Creates `workers` slots, all stamped now.
    pub fn new(workers: usize) -> Self {
        Self {
            origin: Instant::now(),
            beats: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn offset(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_nanos() as u64
    }

    /// Stamps `worker` as alive now.
    #[inline]
    pub fn beat(&self, worker: usize) {
        if let Some(slot) = self.beats.get(worker) {
            slot.fetch_max(self.offset(Instant::now()), Ordering::Relaxed);
        }
    }

    /// Stamps every worker as alive at `at`.
    pub fn beat_all(&self, at: Instant) {
        let offset = self.offset(at);
        for slot in &self.beats {
            slot.fetch_max(offset, Ordering::Relaxed);
        }
    }

    /// How long `worker` has been silent as of `now`.
    pub fn silence(&self, worker: usize, now: Instant) -> Duration {
        let last = self
            .beats
            .get(worker)
            .map_or(0, |slot| slot.load(Ordering::Relaxed));
        Duration::from_nanos(self.offset(now).saturating_sub(last))
    }
}
