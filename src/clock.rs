//! Logical run clock.
//!
//! The [`Clock`] measures time since the run entered the `Running` state. It is
//! created stopped while the pool spins up its workers and starts once every
//! worker is ready, so permit schedules and the duration stop condition are
//! both expressed as offsets from the same origin.
//!
//! All timing goes through `tokio::time`, which makes the clock follow tokio's
//! paused test time.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::{self, Duration, Instant};

/// A shared clock measuring elapsed run time.
///
/// Cloning is cheap and every clone observes the same time.
#[derive(Debug, Clone)]
pub struct Clock {
    inner: Arc<Mutex<State>>,
}

#[derive(Debug, Clone, Copy, Default)]
enum State {
    #[default]
    Stopped,
    Running(Instant),
}

impl Clock {
    /// Creates a clock that is already running from `start`.
    pub fn start_at(start: Instant) -> Self {
        Self { inner: Arc::new(Mutex::new(State::Running(start))) }
    }

    /// Creates a stopped clock. Call [`start`](Self::start) to begin measuring.
    pub fn new_stopped() -> Self {
        Self { inner: Arc::new(Mutex::new(State::Stopped)) }
    }

    /// Starts the clock. Has no effect when it is already running.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if let State::Stopped = *inner {
            *inner = State::Running(Instant::now());
        }
    }

    /// Returns `true` once the clock has been started.
    pub fn is_running(&self) -> bool {
        matches!(*self.inner.lock(), State::Running(_))
    }

    /// Time elapsed since the clock started, or zero while stopped.
    pub fn elapsed(&self) -> Duration {
        match *self.inner.lock() {
            State::Stopped => Duration::ZERO,
            State::Running(start) => start.elapsed(),
        }
    }

    /// Sleeps until the clock reads at least `deadline`.
    ///
    /// Returns immediately if the deadline has already passed. While the clock
    /// is stopped the remaining time is re-evaluated after each wake-up.
    pub async fn sleep_until(&self, deadline: Duration) {
        loop {
            let now = self.elapsed();
            if now >= deadline {
                return;
            }
            time::sleep(deadline - now).await;
        }
    }

    /// Sleeps for `duration` of clock time.
    pub async fn sleep(&self, duration: Duration) {
        self.sleep_until(self.elapsed() + duration).await;
    }

    /// Creates a [`Ticker`] firing every `interval` of clock time.
    pub fn ticker(&self, interval: Duration) -> Ticker {
        Ticker { clock: self.clone(), interval, next_tick: interval }
    }
}

/// Fires at fixed offsets of a [`Clock`]: `interval`, `2 * interval`, ...
///
/// Ticks are computed from the clock origin, so a late consumer does not shift
/// subsequent ticks.
#[derive(Debug, Clone)]
pub struct Ticker {
    clock: Clock,
    interval: Duration,
    next_tick: Duration,
}

impl Ticker {
    /// Waits for the next tick and returns its offset.
    pub async fn tick(&mut self) -> Duration {
        let tick = self.next_tick;
        self.clock.sleep_until(tick).await;
        self.next_tick += self.interval;
        tick
    }
}
