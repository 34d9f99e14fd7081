//! Progress aggregation and throttling.

use std::time::{Duration, Instant};

/// Aggregated progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Scalars scanned so far
    pub scanned: u64,
    /// Scalars in the run's range
    pub total: u64,
    /// Time spent running, excluding pauses
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Fraction of the range scanned, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.scanned as f64 / self.total as f64
        }
    }

    /// Scan rate over the active (unpaused) time.
    pub fn keys_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.scanned as f64 / secs
        } else {
            0.0
        }
    }
}

/// Run time that stops while the run is paused.
#[derive(Debug)]
struct RunClock {
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl RunClock {
    fn new(started: Instant) -> Self {
        Self {
            started,
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    fn pause(&mut self, at: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(at);
        }
    }

    fn resume(&mut self, at: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += at.saturating_duration_since(paused_at);
        }
    }

    fn elapsed(&self, now: Instant) -> Duration {
        let end = self.paused_at.unwrap_or(now);
        end.saturating_duration_since(self.started)
            .saturating_sub(self.paused_total)
    }
}

/// Folds worker deltas into a running total and decides when to report it.
///
/// A snapshot is produced at most once per `interval` and only when the
/// count changed since the last one. [`finish`](Self::finish) always yields
/// the exact total unless it was already the last reported value.
#[derive(Debug)]
pub struct ProgressReporter {
    total: u64,
    scanned: u64,
    interval: Duration,
    last_reported: Option<u64>,
    last_emit: Instant,
    clock: RunClock,
}

impl ProgressReporter {
    pub fn new(total: u64, interval: Duration, started: Instant) -> Self {
        Self {
            total,
            scanned: 0,
            interval,
            last_reported: None,
            last_emit: started,
            clock: RunClock::new(started),
        }
    }

    /// Adds a worker's delta.
    #[inline]
    pub fn record(&mut self, delta: u64) {
        self.scanned = self.scanned.saturating_add(delta);
    }

    pub fn pause(&mut self, at: Instant) {
        self.clock.pause(at);
    }

    pub fn resume(&mut self, at: Instant) {
        self.clock.resume(at);
    }

    /// Current snapshot, regardless of throttling.
    pub fn snapshot(&self, now: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            scanned: self.scanned,
            total: self.total,
            elapsed: self.clock.elapsed(now),
        }
    }

    /// Returns a snapshot if one is due.
    pub fn poll(&mut self, now: Instant) -> Option<ProgressSnapshot> {
        if now.saturating_duration_since(self.last_emit) < self.interval {
            return None;
        }
        self.take_if_changed(now)
    }

    /// Final snapshot of the run.
    pub fn finish(&mut self, now: Instant) -> Option<ProgressSnapshot> {
        self.take_if_changed(now)
    }

    fn take_if_changed(&mut self, now: Instant) -> Option<ProgressSnapshot> {
        if self.last_reported == Some(self.scanned) {
            return None;
        }
        self.last_reported = Some(self.scanned);
        self.last_emit = now;
        Some(self.snapshot(now))
    }
}
