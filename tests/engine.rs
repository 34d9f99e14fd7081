//! End-to-end tests of the search controller with fake derivations.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use keyrange_search::{
    AddressDerivation, AddressFormat, DeriveError, EngineSettings, EventSink, FinishReason,
    MatchResult, ProgressSnapshot, RunOutcome, RunState, SearchController, SearchError,
    SearchEvent,
};

const TIMEOUT: Duration = Duration::from_secs(20);

/// Derives "addr-<scalar>", with optional delay, panic and hang points.
#[derive(Default)]
struct Fake {
    delay: Option<Duration>,
    panic_at: Option<u64>,
    hang_at: Option<u64>,
    hits: Option<Vec<AtomicU32>>,
}

impl Fake {
    fn counting(size: usize) -> Self {
        Self {
            hits: Some((0..size).map(|_| AtomicU32::new(0)).collect()),
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn hits(&self, scalar: u64) -> u32 {
        self.hits
            .as_ref()
            .map_or(0, |hits| hits[scalar as usize].load(Ordering::SeqCst))
    }

    fn total_hits(&self) -> u32 {
        self.hits
            .as_ref()
            .map_or(0, |hits| hits.iter().map(|h| h.load(Ordering::SeqCst)).sum())
    }
}

impl AddressDerivation for Fake {
    fn derive_into(&self, scalar: u64, out: &mut String) -> Result<(), DeriveError> {
        if let Some(hits) = &self.hits {
            if let Some(hit) = hits.get(scalar as usize) {
                hit.fetch_add(1, Ordering::SeqCst);
            }
        }
        if Some(scalar) == self.panic_at {
            panic!("derivation failed at {}", scalar);
        }
        if Some(scalar) == self.hang_at {
            thread::sleep(Duration::from_secs(2));
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        out.clear();
        out.push_str("addr-");
        out.push_str(&scalar.to_string());
        Ok(())
    }
}

/// Derives "addr-<scalar>" and flags when `at` is reached. With a `hold`
/// channel, derivation of `at` blocks until the test releases it.
struct Staged {
    at: u64,
    delay: Duration,
    reached: AtomicBool,
    hold: Option<Receiver<()>>,
}

impl Staged {
    fn new(at: u64, delay: Duration, hold: Option<Receiver<()>>) -> Self {
        Self {
            at,
            delay,
            reached: AtomicBool::new(false),
            hold,
        }
    }

    fn wait_reached(&self) {
        let deadline = Instant::now() + TIMEOUT;
        while !self.reached.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "scalar {} never reached", self.at);
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl AddressDerivation for Staged {
    fn derive_into(&self, scalar: u64, out: &mut String) -> Result<(), DeriveError> {
        thread::sleep(self.delay);
        if scalar == self.at {
            self.reached.store(true, Ordering::SeqCst);
            if let Some(hold) = &self.hold {
                let _ = hold.recv();
            }
        }
        out.clear();
        out.push_str("addr-");
        out.push_str(&scalar.to_string());
        Ok(())
    }
}

/// Forwards events to a channel. The first progress callback blocks until
/// `gate` is released or `block_for` elapses.
struct SlowHost {
    events: Sender<SearchEvent>,
    gate: Mutex<Option<Receiver<()>>>,
    block_for: Duration,
}

impl SlowHost {
    fn new(block_for: Duration, gate: Option<Receiver<()>>) -> (Arc<Self>, Receiver<SearchEvent>) {
        let (tx, rx) = unbounded();
        let host = Arc::new(Self {
            events: tx,
            gate: Mutex::new(gate),
            block_for,
        });
        (host, rx)
    }
}

impl EventSink for SlowHost {
    fn on_progress(&self, progress: &ProgressSnapshot) {
        if let Some(gate) = self.gate.lock().take() {
            let _ = gate.recv_timeout(self.block_for);
        }
        self.events.on_progress(progress);
    }

    fn on_found(&self, result: &MatchResult) {
        self.events.on_found(result);
    }

    fn on_finished(&self, matched: bool) {
        self.events.on_finished(matched);
    }
}

fn settings(workers: usize, chunk_size: u64) -> EngineSettings {
    EngineSettings {
        workers,
        chunk_size,
        check_interval: 4,
        progress_interval: Duration::from_millis(10),
        flush_interval: Duration::from_millis(5),
        stall_timeout: None,
        format: AddressFormat::Compressed,
    }
}

fn controller(
    settings: EngineSettings,
    fake: Arc<Fake>,
) -> (SearchController, Receiver<SearchEvent>) {
    let (tx, rx) = unbounded();
    let controller = SearchController::with_derivation(settings, fake, Arc::new(tx)).unwrap();
    (controller, rx)
}

fn wait(controller: &SearchController) -> RunOutcome {
    controller
        .wait_timeout(TIMEOUT)
        .expect("search did not finish in time")
}

/// Checks the event stream shape and returns the scanned counts reported.
fn check_events(events: &[SearchEvent], matched: bool) -> Vec<u64> {
    let mut progress = Vec::new();
    let mut found = 0;
    for (i, event) in events.iter().enumerate() {
        match event {
            SearchEvent::Progress(p) => {
                assert_eq!(found, 0, "progress after found");
                progress.push(p.scanned);
            }
            SearchEvent::Found(_) => found += 1,
            SearchEvent::Finished { matched: m } => {
                assert_eq!(i, events.len() - 1, "finished is not the last event");
                assert_eq!(*m, matched);
            }
        }
    }
    assert_eq!(found, usize::from(matched));
    assert!(matches!(events.last(), Some(SearchEvent::Finished { .. })));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards");
    progress
}

#[test]
fn test_finds_target() {
    let (controller, rx) = controller(settings(2, 3), Arc::new(Fake::default()));
    controller.start(1, 10, "addr-7").unwrap();

    let outcome = wait(&controller);
    assert_eq!(outcome.reason, FinishReason::Found);
    let result = outcome.result.unwrap();
    assert_eq!(result.scalar, 7);
    assert_eq!(result.address, "addr-7");
    assert!(result.worker_id < 2);
    assert_eq!(controller.state(), RunState::Found);

    let events: Vec<_> = rx.try_iter().collect();
    check_events(&events, true);
    assert!(events.contains(&SearchEvent::Found(result)));
}

#[test]
fn test_exhausts_range_without_match() {
    let (controller, rx) = controller(settings(3, 2), Arc::new(Fake::default()));
    controller.start(1, 5, "unreachable").unwrap();

    let outcome = wait(&controller);
    assert_eq!(outcome.reason, FinishReason::Exhausted);
    assert!(outcome.result.is_none());
    assert_eq!(outcome.progress.scanned, 5);
    assert_eq!(outcome.progress.total, 5);
    assert_eq!(controller.progress(), Some(outcome.progress));
    assert_eq!(controller.state(), RunState::Completed);

    let events: Vec<_> = rx.try_iter().collect();
    let progress = check_events(&events, false);
    assert_eq!(progress.last(), Some(&5));
}

#[test]
fn test_single_key_range() {
    let (controller, _rx) = controller(settings(4, 1000), Arc::new(Fake::default()));
    controller.start(42, 42, "addr-42").unwrap();
    let outcome = wait(&controller);
    assert_eq!(outcome.result.map(|r| r.scalar), Some(42));
}

#[test]
fn test_result_independent_of_workers_and_chunks() {
    for workers in [1, 2, 4, 8] {
        for chunk_size in [1, 3, 64, 1000] {
            let (controller, _rx) =
                controller(settings(workers, chunk_size), Arc::new(Fake::default()));
            controller.start(1, 2000, "addr-777").unwrap();
            let outcome = wait(&controller);
            assert_eq!(
                outcome.result.map(|r| r.scalar),
                Some(777),
                "workers={} chunk_size={}",
                workers,
                chunk_size
            );
        }
    }
}

#[test]
fn test_every_scalar_scanned_once() {
    let fake = Arc::new(Fake::counting(5000));
    let (controller, _rx) = controller(settings(6, 37), Arc::clone(&fake));
    controller.start(0, 4999, "unreachable").unwrap();

    let outcome = wait(&controller);
    assert_eq!(outcome.progress.scanned, 5000);
    // Zero is counted but never derived.
    assert_eq!(fake.hits(0), 0);
    for scalar in 1..5000 {
        assert_eq!(fake.hits(scalar), 1, "scalar {}", scalar);
    }
}

#[test]
fn test_pause_and_resume() {
    let fake = Arc::new(Fake {
        delay: Some(Duration::from_millis(1)),
        ..Fake::counting(401)
    });
    let (controller, rx) = controller(settings(2, 16), Arc::clone(&fake));
    controller.start(1, 400, "unreachable").unwrap();

    thread::sleep(Duration::from_millis(30));
    controller.pause();
    assert_eq!(controller.state(), RunState::Paused);

    // Let in-flight batches drain, then nothing should move.
    thread::sleep(Duration::from_millis(50));
    let frozen = fake.total_hits();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(fake.total_hits(), frozen);
    assert!(frozen < 400);

    // Pause is not repeatable and resume restores Running.
    controller.pause();
    assert_eq!(controller.state(), RunState::Paused);
    controller.resume();
    assert_eq!(controller.state(), RunState::Running);

    let outcome = wait(&controller);
    assert_eq!(outcome.reason, FinishReason::Exhausted);
    assert_eq!(outcome.progress.scanned, 400);
    assert_eq!(fake.total_hits(), 400);

    let events: Vec<_> = rx.try_iter().collect();
    check_events(&events, false);
}

#[test]
fn test_stop_completes_without_match() {
    let fake = Arc::new(Fake::slow(Duration::from_millis(1)));
    let (controller, rx) = controller(settings(2, 8), fake);
    controller.start(1, 1_000_000, "unreachable").unwrap();

    thread::sleep(Duration::from_millis(30));
    controller.stop();
    assert!(matches!(
        controller.state(),
        RunState::Stopping | RunState::Completed
    ));

    let outcome = wait(&controller);
    assert_eq!(outcome.reason, FinishReason::Stopped);
    assert!(outcome.result.is_none());
    assert!(outcome.progress.scanned < 1_000_000);
    assert_eq!(controller.state(), RunState::Completed);

    let events: Vec<_> = rx.try_iter().collect();
    check_events(&events, false);
}

#[test]
fn test_stop_while_paused() {
    let fake = Arc::new(Fake::slow(Duration::from_millis(1)));
    let (controller, _rx) = controller(settings(2, 8), fake);
    controller.start(1, 1_000_000, "unreachable").unwrap();

    thread::sleep(Duration::from_millis(20));
    controller.pause();
    controller.stop();

    let outcome = wait(&controller);
    assert_eq!(outcome.reason, FinishReason::Stopped);
    assert_eq!(controller.state(), RunState::Completed);
}

#[test]
fn test_start_while_running_is_rejected() {
    let fake = Arc::new(Fake::slow(Duration::from_millis(1)));
    let (controller, _rx) = controller(settings(2, 8), fake);
    controller.start(1, 1_000_000, "unreachable").unwrap();

    assert!(matches!(
        controller.start(1, 10, "addr-3"),
        Err(SearchError::AlreadyRunning)
    ));
    assert_eq!(controller.state(), RunState::Running);

    controller.stop();
    wait(&controller);
}

#[test]
fn test_controls_are_noops_after_finish() {
    let (controller, _rx) = controller(settings(2, 4), Arc::new(Fake::default()));
    controller.start(1, 20, "unreachable").unwrap();
    let outcome = wait(&controller);

    controller.pause();
    controller.resume();
    controller.stop();
    assert_eq!(controller.state(), RunState::Completed);
    assert_eq!(controller.outcome(), Some(outcome));
}

#[test]
fn test_restart_after_finish() {
    let (controller, rx) = controller(settings(2, 4), Arc::new(Fake::default()));
    controller.start(1, 50, "unreachable").unwrap();
    assert_eq!(wait(&controller).reason, FinishReason::Exhausted);

    controller.start(100, 200, "addr-150").unwrap();
    let outcome = wait(&controller);
    assert_eq!(outcome.result.map(|r| r.scalar), Some(150));
    assert_eq!(outcome.progress.total, 101);
    assert_eq!(controller.state(), RunState::Found);

    let finished = rx
        .try_iter()
        .filter(|e| matches!(e, SearchEvent::Finished { .. }))
        .count();
    assert_eq!(finished, 2);
}

#[test]
fn test_worker_panic_does_not_stall_run() {
    let fake = Arc::new(Fake {
        panic_at: Some(5),
        ..Fake::default()
    });
    let (controller, rx) = controller(settings(2, 4), fake);
    controller.start(1, 100, "addr-90").unwrap();

    let outcome = wait(&controller);
    assert_eq!(outcome.result.map(|r| r.scalar), Some(90));
    check_events(&rx.try_iter().collect::<Vec<_>>(), true);
}

#[test]
fn test_stalled_worker_is_abandoned() {
    let fake = Arc::new(Fake {
        hang_at: Some(5),
        ..Fake::default()
    });
    let settings = EngineSettings {
        stall_timeout: Some(Duration::from_millis(200)),
        ..settings(2, 4)
    };
    let (controller, _rx) = controller(settings, fake);
    controller.start(1, 50, "unreachable").unwrap();

    let outcome = controller
        .wait_timeout(Duration::from_millis(1500))
        .expect("stalled worker blocked completion");
    assert_eq!(outcome.reason, FinishReason::Incomplete);
    assert!(outcome.result.is_none());
    assert!(outcome.progress.scanned < 50);
    assert_eq!(controller.state(), RunState::Completed);
}

#[test]
fn test_worker_panic_without_match_is_incomplete() {
    let fake = Arc::new(Fake {
        panic_at: Some(5),
        ..Fake::default()
    });
    let (controller, rx) = controller(settings(2, 4), fake);
    controller.start(1, 100, "unreachable").unwrap();

    let outcome = wait(&controller);
    assert_eq!(outcome.reason, FinishReason::Incomplete);
    assert!(outcome.progress.scanned < 100);
    check_events(&rx.try_iter().collect::<Vec<_>>(), false);
}

#[test]
fn test_slow_host_does_not_abandon_live_workers() {
    for _ in 0..3 {
        let (_never, gate) = bounded::<()>(1);
        let (host, rx) = SlowHost::new(Duration::from_millis(600), Some(gate));
        let settings = EngineSettings {
            stall_timeout: Some(Duration::from_millis(200)),
            ..settings(2, 64)
        };
        let fake = Arc::new(Fake::slow(Duration::from_micros(50)));
        let controller = SearchController::with_derivation(settings, fake, host).unwrap();
        controller.start(1, 10_000, "unreachable").unwrap();

        let outcome = wait(&controller);
        assert_eq!(outcome.reason, FinishReason::Exhausted);
        assert_eq!(outcome.progress.scanned, 10_000);
        check_events(&rx.try_iter().collect::<Vec<_>>(), false);
    }
}

#[test]
fn test_stop_after_match_finishes_found() {
    // The host holds the coordinator in its first progress callback, so the
    // match is published but not yet processed when stop() arrives.
    let (release, gate) = bounded::<()>(1);
    let (host, rx) = SlowHost::new(TIMEOUT, Some(gate));
    let staged = Arc::new(Staged::new(200, Duration::from_millis(1), None));
    let derivation: Arc<dyn AddressDerivation> = staged.clone();
    let controller =
        SearchController::with_derivation(settings(1, 1000), derivation, host).unwrap();
    controller.start(1, 1000, "addr-200").unwrap();

    staged.wait_reached();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.state(), RunState::Running);
    controller.stop();
    assert_eq!(controller.state(), RunState::Stopping);
    release.send(()).unwrap();

    let outcome = wait(&controller);
    assert_eq!(outcome.reason, FinishReason::Found);
    assert_eq!(outcome.result.map(|r| r.scalar), Some(200));
    assert_eq!(controller.state(), RunState::Found);

    let events: Vec<_> = rx.try_iter().collect();
    check_events(&events, true);
    let n = events.len();
    assert!(matches!(events[n - 2], SearchEvent::Found(ref r) if r.scalar == 200));
    assert_eq!(events[n - 1], SearchEvent::Finished { matched: true });
}

#[test]
fn test_match_after_stop_is_discarded() {
    // The only matching scalar is held mid-derivation until stop() is in.
    let (release, hold) = bounded::<()>(1);
    let staged = Arc::new(Staged::new(50, Duration::ZERO, Some(hold)));
    let (tx, rx) = unbounded();
    let derivation: Arc<dyn AddressDerivation> = staged.clone();
    let controller =
        SearchController::with_derivation(settings(1, 1000), derivation, Arc::new(tx)).unwrap();
    controller.start(1, 1000, "addr-50").unwrap();

    staged.wait_reached();
    controller.stop();
    release.send(()).unwrap();

    let outcome = wait(&controller);
    assert_eq!(outcome.reason, FinishReason::Stopped);
    assert!(outcome.result.is_none());
    assert_eq!(controller.state(), RunState::Completed);
    check_events(&rx.try_iter().collect::<Vec<_>>(), false);
}

#[test]
fn test_secret_hash_search() {
    let (tx, _rx) = unbounded::<SearchEvent>();
    let settings = EngineSettings {
        workers: 2,
        chunk_size: 3,
        format: AddressFormat::SecretHash,
        ..EngineSettings::default()
    };
    let controller = SearchController::new(settings, Arc::new(tx)).unwrap();
    controller
        .start(1, 10, "16QUXFx3zRBtyXkYbs9FawB9aJzHQJqfoE")
        .unwrap();

    assert_eq!(wait(&controller).result.map(|r| r.scalar), Some(7));
}

#[test]
fn test_real_p2pkh_search() {
    let (tx, _rx) = unbounded::<SearchEvent>();
    let settings = EngineSettings {
        workers: 2,
        chunk_size: 3,
        ..EngineSettings::default()
    };
    let controller = SearchController::new(settings, Arc::new(tx)).unwrap();
    controller
        .start(1, 10, "19ZewH8Kk1PDbSNdJ97FP4EiCjTRaZMZQA")
        .unwrap();

    let result = wait(&controller).result.unwrap();
    assert_eq!(result.scalar, 7);
    assert_eq!(
        result.private_key_hex(),
        "0000000000000000000000000000000000000000000000000000000000000007"
    );
}

#[test]
fn test_real_p2pkh_uncompressed() {
    let (tx, _rx) = unbounded::<SearchEvent>();
    let settings = EngineSettings {
        workers: 1,
        format: AddressFormat::Uncompressed,
        ..EngineSettings::default()
    };
    let controller = SearchController::new(settings, Arc::new(tx)).unwrap();
    controller
        .start(1, 4, "1EHNa6Q4Jz2uvNExL497mE43ikXhwF6kZm")
        .unwrap();

    let result = wait(&controller).result.unwrap();
    assert_eq!(result.scalar, 1);
    assert_eq!(
        result.wif(AddressFormat::Uncompressed),
        "5HpHagT65TZzG1PH3CSu63k8DbpvD8s5ip4nEB3kEsreAnchuDf"
    );
}
