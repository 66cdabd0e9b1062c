use std::time::Duration;

use serde::Serialize;

use crate::outcome::Outcome;

/// Running totals over a set of outcomes.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Counter {
    /// Number of outcomes.
    pub requests: u64,
    /// Response bytes.
    pub bytes:    u64,
    /// Sum of latencies.
    #[serde(skip)]
    pub latency:  Duration,
}

impl Counter {
    /// Mean latency, or zero when empty.
    pub fn mean_latency(&self) -> Duration {
        if self.requests == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.latency.as_secs_f64() / self.requests as f64)
    }
}

impl std::ops::AddAssign<&Outcome> for Counter {
    fn add_assign(&mut self, outcome: &Outcome) {
        self.requests += 1;
        self.bytes += outcome.bytes;
        self.latency += outcome.latency();
    }
}
