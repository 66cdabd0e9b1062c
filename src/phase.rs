//! Run state machine.
//!
//! `Idle → Starting → Running → Draining → Finished`, and any non-terminal
//! state may jump to `Cancelled`.
use std::sync::Arc;

use serde::Serialize;
use strum::Display;
use tokio::sync::watch;

/// Current state of a run.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Not started yet.
    #[default]
    Idle,
    /// Configuration validated, workers spinning up.
    Starting,
    /// Workers are consuming permits.
    Running,
    /// A stop condition fired; in-flight requests are finishing.
    Draining,
    /// Every request produced an outcome (terminal).
    Finished,
    /// Force-stopped; in-flight requests were abandoned (terminal).
    Cancelled,
}

impl RunState {
    /// Returns `true` for `Finished` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finished | RunState::Cancelled)
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle, Starting) | (Starting, Running) | (Running, Draining) | (Draining, Finished) => true,
            // a run whose stop condition fires during startup skips Running
            (Starting, Draining) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Shared, observable holder of the [`RunState`].
///
/// Invalid transitions are ignored, so racing callers (e.g. the pool reaching
/// `Running` while the orchestrator already drains) cannot move the machine
/// backwards.
#[derive(Clone, Debug)]
pub struct StateTracker {
    tx: Arc<watch::Sender<RunState>>,
}

impl StateTracker {
    /// A tracker in the `Idle` state.
    pub fn new() -> Self {
        Self { tx: Arc::new(watch::Sender::new(RunState::Idle)) }
    }

    /// Current state.
    pub fn get(&self) -> RunState {
        *self.tx.borrow()
    }

    /// Moves to `next` if the transition is allowed. Returns whether it moved.
    pub fn advance(&self, next: RunState) -> bool {
        let moved = self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(state = %next, "run state changed");
        }
        moved
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
