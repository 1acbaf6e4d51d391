//! Completion tracking across dynamically spawned group pipelines.
//!
//! Completion fires exactly once: on the transition into
//! `in_flight == 0 && drained`, whichever of [`CompletionTracker::input_drained`]
//! or the last [`InFlightGuard`] drop causes it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct State {
    in_flight: usize,
    drained: bool,
    fired: bool,
}

impl State {
    /// Fire if the completion condition holds and has not fired yet.
    fn try_fire(&mut self) -> bool {
        if !self.fired && self.drained && self.in_flight == 0 {
            self.fired = true;
            return true;
        }
        false
    }
}

/// Counts in-flight group pipelines and signals overall completion.
#[derive(Debug)]
pub struct CompletionTracker {
    state: Mutex<State>,
    done: watch::Sender<bool>,
}

impl CompletionTracker {
    pub fn new() -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(State::default()),
            done,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a group pipeline. Must be called before the pipeline's
    /// first suspension point; dropping the guard finishes the group.
    pub fn group_started(self: &Arc<Self>) -> InFlightGuard {
        let in_flight = {
            let mut state = self.lock();
            state.in_flight += 1;
            state.in_flight
        };
        debug!(in_flight, "group started");
        InFlightGuard {
            tracker: Some(Arc::clone(self)),
        }
    }

    /// Record a finished group. Returns `true` if this call fired completion.
    pub fn group_finished(&self) -> bool {
        let fired = {
            let mut state = self.lock();
            if state.in_flight == 0 {
                warn!("group finished with no group in flight");
                return false;
            }
            state.in_flight -= 1;
            debug!(in_flight = state.in_flight, "group finished");
            state.try_fire()
        };
        if fired {
            self.signal();
        }
        fired
    }

    /// Record the end of the document stream. Returns `true` if this call
    /// fired completion. Repeated calls are ignored.
    pub fn input_drained(&self) -> bool {
        let fired = {
            let mut state = self.lock();
            if state.drained {
                return false;
            }
            state.drained = true;
            debug!(in_flight = state.in_flight, "input drained");
            state.try_fire()
        };
        if fired {
            self.signal();
        }
        fired
    }

    fn signal(&self) {
        debug!("all groups complete");
        self.done.send_replace(true);
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn is_complete(&self) -> bool {
        self.lock().fired
    }

    /// Resolve once completion has fired.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Marks one group pipeline as in flight until dropped.
///
/// Dropping on every exit path (success, error, or panic unwind) is what
/// keeps the overall stream from stalling.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Option<Arc<CompletionTracker>>,
}

impl InFlightGuard {
    /// Finish the group explicitly. Returns `true` if this fired completion.
    pub fn finish(mut self) -> bool {
        self.tracker
            .take()
            .is_some_and(|tracker| tracker.group_finished())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.group_finished();
        }
    }
}
