//! Outward event surface consumed by the host.

use crossbeam_channel::Sender;

use crate::reporter::ProgressSnapshot;
use crate::worker::MatchResult;

/// Receives a run's events.
///
/// All callbacks of a run are made from a single coordinator thread, in
/// order: any number of `on_progress`, then at most one `on_found`, then
/// exactly one `on_finished`. Implementations may call the controller's
/// `pause`/`resume`/`stop`/`start`, but must not block on `wait`.
pub trait EventSink: Send + Sync {
    /// Periodic progress; `scanned` never decreases within a run.
    fn on_progress(&self, progress: &ProgressSnapshot);

    /// The run found a match. Sent before `on_finished`.
    fn on_found(&self, result: &MatchResult);

    /// The run is over.
    fn on_finished(&self, matched: bool);
}

/// An event as a value, for hosts that prefer a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Progress(ProgressSnapshot),
    Found(MatchResult),
    Finished { matched: bool },
}

/// Forwards events into a channel. Send errors (receiver gone) are ignored.
impl EventSink for Sender<SearchEvent> {
    fn on_progress(&self, progress: &ProgressSnapshot) {
        let _ = self.send(SearchEvent::Progress(*progress));
    }

    fn on_found(&self, result: &MatchResult) {
        let _ = self.send(SearchEvent::Found(result.clone()));
    }

    fn on_finished(&self, matched: bool) {
        let _ = self.send(SearchEvent::Finished { matched });
    }
}
