//! Search controller: run state machine and coordination.
//!
//! The controller owns the [`RunState`]. Control calls (`start`, `pause`,
//! `resume`, `stop`) transition it synchronously; everything workers report
//! flows over channels into one coordinator thread per run, which aggregates
//! progress, reacts to a match or exhaustion, and is the only caller of the
//! host's [`EventSink`].

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, EngineSettings};
use crate::crypto::{AddressDerivation, P2pkhDerivation};
use crate::events::EventSink;
use crate::matcher::Target;
use crate::partition::{KeyRange, Partitioner};
use crate::reporter::{ProgressReporter, ProgressSnapshot};
use crate::worker::{
    ControlSignal, Heartbeats, MatchResult, MatchSlot, RunContext, WorkerEvent, WorkerExit,
    WorkerPool,
};

/// Capacity of the worker → coordinator event channel.
const EVENT_CAPACITY: usize = 1024;

/// Longest the coordinator sleeps between housekeeping passes.
const MAX_TICK: Duration = Duration::from_millis(100);

/// Lifecycle state of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// No run has been started
    #[default]
    Idle,
    Running,
    Paused,
    /// Cancellation broadcast, waiting for workers to exit
    Stopping,
    /// Terminal: a match was found
    Found,
    /// Terminal: range exhausted or stopped without a match
    Completed,
}

impl RunState {
    /// Returns true while a run owns the workers.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Paused | RunState::Stopping)
    }

    /// Returns true once a run has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Found | RunState::Completed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Stopping => "stopping",
            RunState::Found => "found",
            RunState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Found,
    /// Every chunk was handed out and every worker finished
    Exhausted,
    /// `stop()` was called before any match was published
    Stopped,
    /// No match, and part of the range was lost with a panicked or stalled
    /// worker
    Incomplete,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub result: Option<MatchResult>,
    pub progress: ProgressSnapshot,
    pub reason: FinishReason,
}

impl RunOutcome {
    pub fn matched(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("A search is already running")]
    AlreadyRunning,
    #[error("Failed to spawn search thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Controller → coordinator notices.
#[derive(Debug)]
enum Notice {
    Paused(Instant),
    Resumed(Instant),
    /// `matched` records whether the slot was filled when stop was called.
    Stop { matched: bool },
}

/// Handles the controller keeps on the active run.
struct ActiveRun {
    signal: Arc<ControlSignal>,
    slot: Arc<MatchSlot>,
    notices: Sender<Notice>,
}

#[derive(Default)]
struct RunSlot {
    state: RunState,
    run_id: u64,
    active: Option<ActiveRun>,
    progress: Option<ProgressSnapshot>,
    outcome: Option<RunOutcome>,
    coordinator: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    run: Mutex<RunSlot>,
    finished: Condvar,
}

/// Drives one search at a time over a pool of worker threads.
pub struct SearchController {
    settings: EngineSettings,
    derivation: Arc<dyn AddressDerivation>,
    sink: Arc<dyn EventSink>,
    shared: Arc<Shared>,
    /// Serializes `start` calls while the previous coordinator is joined
    start_gate: Mutex<()>,
}

impl SearchController {
    /// Creates a controller deriving P2PKH addresses in `settings.format`.
    pub fn new(settings: EngineSettings, sink: Arc<dyn EventSink>) -> Result<Self, ConfigError> {
        let derivation = Arc::new(P2pkhDerivation::new(settings.format));
        Self::with_derivation(settings, derivation, sink)
    }

    /// Creates a controller with a custom derivation scheme.
    pub fn with_derivation(
        settings: EngineSettings,
        derivation: Arc<dyn AddressDerivation>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            derivation,
            sink,
            shared: Arc::new(Shared::default()),
            start_gate: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Starts a new run over `[low, high]`.
    ///
    /// Fails with [`SearchError::InvalidRequest`] if `low > high` or the
    /// target is empty, and with [`SearchError::AlreadyRunning`] while
    /// another run is active. Neither failure changes any state.
    pub fn start(&self, low: u64, high: u64, target: &str) -> Result<(), SearchError> {
        let range = KeyRange::new(low, high).ok_or_else(|| {
            SearchError::InvalidRequest(format!("low ({}) is greater than high ({})", low, high))
        })?;
        let target = Target::new(target);
        if target.is_empty() {
            return Err(SearchError::InvalidRequest("target address is empty".into()));
        }

        let _gate = self.start_gate.lock();

        let previous = {
            let mut run = self.shared.run.lock();
            if run.state.is_active() {
                return Err(SearchError::AlreadyRunning);
            }
            run.coordinator.take()
        };
        // Let the previous run deliver its last events first. Skipped when
        // called from that run's own sink callback.
        if let Some(handle) = previous {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        let target = Arc::new(target);
        let signal = Arc::new(ControlSignal::new());
        let slot = Arc::new(MatchSlot::new());
        let partitioner = Arc::new(Partitioner::new(range, self.settings.chunk_size));
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let (notice_tx, notice_rx) = unbounded();
        let heartbeats = Arc::new(Heartbeats::new(self.settings.workers));

        let ctx = RunContext {
            partitioner: Arc::clone(&partitioner),
            derivation: Arc::clone(&self.derivation),
            target: Arc::clone(&target),
            signal: Arc::clone(&signal),
            slot: Arc::clone(&slot),
            events: event_tx,
            heartbeats: Arc::clone(&heartbeats),
            check_interval: self.settings.check_interval,
            flush_interval: self.settings.flush_interval,
        };
        let pool = WorkerPool::spawn(self.settings.workers, ctx)?;

        let started = Instant::now();
        let reporter = ProgressReporter::new(range.size(), self.settings.progress_interval, started);

        let mut run = self.shared.run.lock();
        run.run_id += 1;

        let coordinator = Coordinator {
            run_id: run.run_id,
            shared: Arc::clone(&self.shared),
            sink: Arc::clone(&self.sink),
            events: event_rx,
            notices: notice_rx,
            pool,
            reporter,
            heartbeats,
            signal: Arc::clone(&signal),
            slot: Arc::clone(&slot),
            stall_timeout: self.settings.stall_timeout,
            tick: self.settings.progress_interval.min(MAX_TICK),
        };

        // Holding the lock keeps the coordinator from finishing before the
        // run is marked Running.
        let handle = thread::Builder::new()
            .name("keyrange-coordinator".into())
            .spawn(move || coordinator.run())?;

        run.state = RunState::Running;
        run.outcome = None;
        run.progress = Some(ProgressSnapshot {
            scanned: 0,
            total: range.size(),
            elapsed: Duration::ZERO,
        });
        run.active = Some(ActiveRun {
            signal,
            slot,
            notices: notice_tx,
        });
        run.coordinator = Some(handle);

        info!(
            run = run.run_id,
            %range,
            target = %target,
            p2pkh = target.hash160().is_some(),
            workers = self.settings.workers,
            chunk_size = partitioner.chunk_size(),
            chunks = partitioner.chunk_count(),
            "search started"
        );
        Ok(())
    }

    /// Pauses a running search. No-op in any other state.
    pub fn pause(&self) {
        let mut run = self.shared.run.lock();
        if run.state != RunState::Running {
            debug!(state = %run.state, "pause ignored");
            return;
        }
        if let Some(active) = &run.active {
            active.signal.pause();
            let _ = active.notices.send(Notice::Paused(Instant::now()));
        }
        run.state = RunState::Paused;
        info!(run = run.run_id, "search paused");
    }

    /// Resumes a paused search. No-op in any other state.
    pub fn resume(&self) {
        let mut run = self.shared.run.lock();
        if run.state != RunState::Paused {
            debug!(state = %run.state, "resume ignored");
            return;
        }
        if let Some(active) = &run.active {
            active.signal.resume();
            let _ = active.notices.send(Notice::Resumed(Instant::now()));
        }
        run.state = RunState::Running;
        info!(run = run.run_id, "search resumed");
    }

    /// Stops a running or paused search. No-op in any other state.
    ///
    /// The run finishes asynchronously once every worker has exited; use
    /// [`wait`](Self::wait) to block until then.
    pub fn stop(&self) {
        let mut run = self.shared.run.lock();
        if !matches!(run.state, RunState::Running | RunState::Paused) {
            debug!(state = %run.state, "stop ignored");
            return;
        }
        if let Some(active) = &run.active {
            let matched = active.slot.is_filled();
            active.signal.cancel();
            let _ = active.notices.send(Notice::Stop { matched });
        }
        run.state = RunState::Stopping;
        info!(run = run.run_id, "search stopping");
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.shared.run.lock().state
    }

    /// Latest progress reported for the current or last run.
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.shared.run.lock().progress
    }

    /// Outcome of the last finished run.
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.shared.run.lock().outcome.clone()
    }

    /// Blocks until the current run has finished and delivered its events.
    ///
    /// Returns `None` if no run was ever started.
    pub fn wait(&self) -> Option<RunOutcome> {
        let mut run = self.shared.run.lock();
        loop {
            if run.state == RunState::Idle {
                return None;
            }
            if run.state.is_terminal() {
                if let Some(outcome) = &run.outcome {
                    return Some(outcome.clone());
                }
            }
            self.shared.finished.wait(&mut run);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RunOutcome> {
        let deadline = Instant::now() + timeout;
        let mut run = self.shared.run.lock();
        loop {
            if run.state == RunState::Idle {
                return None;
            }
            if run.state.is_terminal() {
                if let Some(outcome) = &run.outcome {
                    return Some(outcome.clone());
                }
            }
            if self
                .shared
                .finished
                .wait_until(&mut run, deadline)
                .timed_out()
            {
                return None;
            }
        }
    }
}

impl Drop for SearchController {
    fn drop(&mut self) {
        self.stop();
        let handle = self.shared.run.lock().coordinator.take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Per-run coordinator thread.
///
/// Field order matters on drop: the receivers go before the pool so a worker
/// blocked on a full channel is released before the pool joins it.
struct Coordinator {
    run_id: u64,
    shared: Arc<Shared>,
    sink: Arc<dyn EventSink>,
    events: Receiver<WorkerEvent>,
    notices: Receiver<Notice>,
    pool: WorkerPool,
    reporter: ProgressReporter,
    heartbeats: Arc<Heartbeats>,
    signal: Arc<ControlSignal>,
    slot: Arc<MatchSlot>,
    stall_timeout: Option<Duration>,
    tick: Duration,
}

/// Coordinator's view of the run while workers are live.
struct Tracking {
    /// False once a worker exited or was abandoned
    live: Vec<bool>,
    /// Workers that panicked or were abandoned, leaving chunks unscanned
    lost: usize,
    paused: bool,
    /// Set by `stop()`: whether a match was already published at that point
    stopped: Option<bool>,
}

impl Tracking {
    fn live_count(&self) -> usize {
        self.live.iter().filter(|&&live| live).count()
    }
}

impl Coordinator {
    fn run(mut self) {
        let mut tracking = Tracking {
            live: vec![true; self.pool.num_workers()],
            lost: 0,
            paused: false,
            stopped: None,
        };

        let events = self.events.clone();
        let notices = self.notices.clone();

        while tracking.live_count() > 0 {
            select! {
                recv(events) -> msg => match msg {
                    Ok(event) => self.on_worker_event(event, &mut tracking),
                    Err(_) => break,
                },
                recv(notices) -> msg => {
                    if let Ok(notice) = msg {
                        self.on_notice(notice, &mut tracking);
                    }
                },
                default(self.tick) => {},
            }

            if let Some(snapshot) = self.reporter.poll(Instant::now()) {
                self.report(snapshot);
            }
            if !tracking.paused {
                // Exit notices queued while the sink was busy must not be
                // mistaken for silence.
                for event in events.try_iter() {
                    self.on_worker_event(event, &mut tracking);
                }
                self.check_stalls(&mut tracking, Instant::now());
            }
        }

        // A stop that raced the last worker exit still decides the outcome.
        for notice in notices.try_iter() {
            if matches!(notice, Notice::Stop { .. }) {
                self.on_notice(notice, &mut tracking);
            }
        }
        self.finish(&tracking);
    }

    fn on_worker_event(&mut self, event: WorkerEvent, tracking: &mut Tracking) {
        match event {
            WorkerEvent::Progress { scanned, .. } => self.reporter.record(scanned),
            WorkerEvent::Found { worker } => {
                debug!(run = self.run_id, worker, "match reported, cancelling workers");
                self.signal.cancel();
                let mut run = self.shared.run.lock();
                if run.run_id == self.run_id
                    && matches!(run.state, RunState::Running | RunState::Paused)
                {
                    run.state = RunState::Stopping;
                }
            }
            WorkerEvent::Exited { worker, exit } => {
                let Some(live) = tracking.live.get_mut(worker) else {
                    return;
                };
                if !std::mem::replace(live, false) {
                    // Already abandoned; the thread was detached.
                    return;
                }
                let clean = self.pool.join(worker);
                if exit == WorkerExit::Panicked || !clean {
                    tracking.lost += 1;
                    error!(
                        run = self.run_id,
                        worker, "worker panicked, abandoning its remaining work"
                    );
                } else {
                    debug!(run = self.run_id, worker, ?exit, "worker exited");
                }
            }
        }
    }

    fn on_notice(&mut self, notice: Notice, tracking: &mut Tracking) {
        match notice {
            Notice::Paused(at) => {
                self.reporter.pause(at);
                tracking.paused = true;
            }
            Notice::Resumed(at) => {
                self.reporter.resume(at);
                tracking.paused = false;
                // Parked workers could not beat.
                self.heartbeats.beat_all(Instant::now());
            }
            Notice::Stop { matched } => {
                if tracking.paused {
                    self.reporter.resume(Instant::now());
                    tracking.paused = false;
                }
                tracking.stopped = Some(matched);
            }
        }
    }

    /// Gives up on workers whose heartbeat is older than the stall timeout,
    /// so one wedged thread cannot block completion.
    fn check_stalls(&mut self, tracking: &mut Tracking, now: Instant) {
        let Some(timeout) = self.stall_timeout else {
            return;
        };
        for (worker, live) in tracking.live.iter_mut().enumerate() {
            if !*live {
                continue;
            }
            let silence = self.heartbeats.silence(worker, now);
            if silence > timeout {
                warn!(
                    run = self.run_id,
                    worker,
                    silent_ms = silence.as_millis() as u64,
                    "worker stalled, abandoning its remaining work"
                );
                *live = false;
                tracking.lost += 1;
                self.pool.detach(worker);
            }
        }
    }

    fn report(&self, snapshot: ProgressSnapshot) {
        {
            let mut run = self.shared.run.lock();
            if run.run_id == self.run_id {
                run.progress = Some(snapshot);
            }
        }
        self.sink.on_progress(&snapshot);
    }

    fn finish(mut self, tracking: &Tracking) {
        let stopped = tracking.stopped;
        // Releases any abandoned worker that is still scanning.
        self.signal.cancel();

        let now = Instant::now();
        let final_progress = self.reporter.finish(now);
        let progress = self.reporter.snapshot(now);

        let (result, reason) = match stopped {
            Some(false) => {
                if let Some(late) = self.slot.get() {
                    info!(
                        run = self.run_id,
                        scalar = late.scalar,
                        "match published after stop, discarded"
                    );
                }
                (None, FinishReason::Stopped)
            }
            _ => match self.slot.get() {
                Some(found) => (Some(found.clone()), FinishReason::Found),
                None if stopped.is_some() => (None, FinishReason::Stopped),
                None if tracking.lost > 0 => {
                    warn!(
                        run = self.run_id,
                        lost_workers = tracking.lost,
                        "range not fully scanned"
                    );
                    (None, FinishReason::Incomplete)
                }
                None => (None, FinishReason::Exhausted),
            },
        };
        let outcome = RunOutcome {
            result,
            progress,
            reason,
        };

        {
            let mut run = self.shared.run.lock();
            if run.run_id == self.run_id {
                run.state = if outcome.matched() {
                    RunState::Found
                } else {
                    RunState::Completed
                };
                run.active = None;
                run.progress = Some(progress);
            }
        }

        info!(
            run = self.run_id,
            ?reason,
            scanned = progress.scanned,
            total = progress.total,
            elapsed_ms = progress.elapsed.as_millis() as u64,
            "search finished"
        );

        if let Some(snapshot) = final_progress {
            self.sink.on_progress(&snapshot);
        }
        if let Some(found) = &outcome.result {
            self.sink.on_found(found);
        }
        self.sink.on_finished(outcome.matched());

        let mut run = self.shared.run.lock();
        if run.run_id == self.run_id {
            run.outcome = Some(outcome);
        }
        self.shared.finished.notify_all();
    }
}
