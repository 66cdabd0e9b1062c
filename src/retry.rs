//! Retry policy and the per-request attempt state machine.
//!
//! A request moves through
//! `Attempting(n) -> Success | Backoff -> Attempting(n + 1) | Terminal`.
//! The pool drives the machine with [`Attempt::after`]; no recursion and no
//! hidden loops inside futures.
use std::{num::NonZeroU32, time::Duration};

use nonzero_ext::nonzero;

use crate::{error::RequestError, outcome::Response};

/// How often, and how patiently, failed attempts are repeated.
///
/// Transport and protocol errors are retried. Timeouts are terminal: the
/// request already used its whole time budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    backoff: Vec<Duration>,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self { max_attempts: nonzero!(1u32), backoff: vec![] }
    }

    /// Up to `max_attempts` attempts in total. `backoff[i]` is the delay
    /// before attempt `i + 2`; the last entry repeats, an empty table retries
    /// immediately.
    pub fn new(max_attempts: NonZeroU32, backoff: Vec<Duration>) -> Self {
        Self { max_attempts, backoff }
    }

    /// Exponential backoff starting at `base`, doubling up to `cap`.
    pub fn exponential(max_attempts: NonZeroU32, base: Duration, cap: Duration) -> Self {
        let retries = max_attempts.get().saturating_sub(1) as usize;
        let backoff = std::iter::successors(Some(base), |d| Some(d.saturating_mul(2)))
            .map(|d| d.min(cap))
            .take(retries)
            .collect();
        Self { max_attempts, backoff }
    }

    /// Total number of attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    /// The backoff delay table.
    pub fn backoff(&self) -> &[Duration] {
        &self.backoff
    }

    /// Delay to wait before attempt number `attempt` (2 for the first retry).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(2) as usize;
        self.backoff.get(index).or(self.backoff.last()).copied().unwrap_or_default()
    }

    /// Whether a failed attempt may be repeated.
    pub fn is_retryable(e: &RequestError) -> bool {
        match e {
            RequestError::Transport(_) | RequestError::Protocol { .. } => true,
            RequestError::Timeout(_) => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// State of one in-flight request.
#[derive(Debug, PartialEq)]
pub(crate) enum Attempt {
    /// Attempt number `n` (starting at 1) is about to run.
    Attempting(u32),
    /// Waiting `delay` before attempt `next`.
    Backoff { next: u32, delay: Duration, last: RequestError },
    /// Final result after `attempts` attempts.
    Terminal { result: Result<Response, RequestError>, attempts: u32 },
}

impl Attempt {
    /// Initial state.
    pub(crate) fn start() -> Self {
        Attempt::Attempting(1)
    }

    /// Transition taken once attempt `n` produced `result`.
    ///
    /// No retry is scheduled while the pool is draining.
    pub(crate) fn after(
        n: u32,
        result: Result<Response, RequestError>,
        policy: &RetryPolicy,
        draining: bool,
    ) -> Self {
        match result {
            Err(e) if !draining && n < policy.max_attempts() && RetryPolicy::is_retryable(&e) => {
                Attempt::Backoff { next: n + 1, delay: policy.delay_before(n + 1), last: e }
            }
            result => Attempt::Terminal { result, attempts: n },
        }
    }
}
