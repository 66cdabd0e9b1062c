//! Statistics accumulated over the outcomes of a run.
//!
//! - [`Counter`] - request count, response bytes and latency sum.
//! - [`RunStats`] - totals with per-kind, per-status, per-target and
//!   per-error breakdowns plus latency histograms.

mod counter;

pub use counter::Counter;

use std::collections::BTreeMap;

use strum::IntoEnumIterator;

use crate::{
    histogram::LatencyHistogram,
    outcome::{Outcome, OutcomeKind},
};

/// Statistics of one target.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetStats {
    /// All outcomes of the target.
    pub counter: Counter,
    /// Outcomes that were not a success.
    pub errors: u64,
    /// Latency distribution of the target.
    pub hist: LatencyHistogram,
}

/// Append-only statistics of a run.
///
/// Only the [`Aggregator`](crate::Aggregator) mutates it. Everything else
/// works on snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct RunStats {
    /// Totals across all outcomes.
    pub overall: Counter,
    /// Breakdown by outcome kind. Every kind is present, possibly zero.
    pub by_kind: BTreeMap<OutcomeKind, Counter>,
    /// Count of each status code reported by the executor.
    pub by_status: BTreeMap<u16, u64>,
    /// Breakdown by target index.
    pub by_target: Vec<TargetStats>,
    /// Count of each distinct error detail.
    pub errors: BTreeMap<String, u64>,
    /// Latency distribution across all outcomes.
    pub hist: LatencyHistogram,
    /// Attempts beyond the first, summed over all outcomes.
    pub retries: u64,
}

impl RunStats {
    /// Empty statistics for a run with `targets` targets.
    pub fn new(targets: usize) -> Self {
        Self {
            overall: Counter::default(),
            by_kind: OutcomeKind::iter().map(|k| (k, Counter::default())).collect(),
            by_status: BTreeMap::new(),
            by_target: vec![TargetStats::default(); targets],
            errors: BTreeMap::new(),
            hist: LatencyHistogram::new(),
            retries: 0,
        }
    }

    /// Folds one outcome in.
    pub fn record(&mut self, outcome: &Outcome) {
        let latency = outcome.latency();

        self.overall += outcome;
        *self.by_kind.entry(outcome.kind).or_default() += outcome;
        if let Some(status) = outcome.status {
            *self.by_status.entry(status).or_default() += 1;
        }
        if let Some(error) = &outcome.error {
            *self.errors.entry(error.clone()).or_default() += 1;
        }
        self.hist.record(latency);
        self.retries += u64::from(outcome.retries());

        if self.by_target.len() <= outcome.target {
            self.by_target.resize_with(outcome.target + 1, TargetStats::default);
        }
        let target = &mut self.by_target[outcome.target];
        target.counter += outcome;
        target.hist.record(latency);
        if outcome.kind.is_error() {
            target.errors += 1;
        }
    }

    /// Total number of outcomes.
    pub fn total(&self) -> u64 {
        self.overall.requests
    }

    /// Number of outcomes of `kind`.
    pub fn count(&self, kind: OutcomeKind) -> u64 {
        self.by_kind.get(&kind).map_or(0, |c| c.requests)
    }

    /// Number of outcomes that were not a success.
    pub fn error_count(&self) -> u64 {
        self.total() - self.count(OutcomeKind::Success)
    }

    /// Share of failed outcomes in `[0, 1]`, zero for an empty run.
    pub fn error_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.error_count() as f64 / total as f64,
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn outcome(target: usize, kind: OutcomeKind, latency_ms: u64) -> Outcome {
        Outcome {
            target,
            seq: 0,
            issued_at: Duration::ZERO,
            completed_at: Duration::from_millis(latency_ms),
            kind,
            status: (kind == OutcomeKind::Success).then_some(200),
            bytes: 100,
            error: kind.is_error().then(|| kind.to_string()),
            attempts: 1,
        }
    }

    #[test]
    fn breakdowns_add_up() {
        let mut stats = RunStats::new(2);
        stats.record(&outcome(0, OutcomeKind::Success, 10));
        stats.record(&outcome(1, OutcomeKind::Success, 30));
        stats.record(&outcome(1, OutcomeKind::Timeout, 1000));

        assert_eq!(stats.total(), 3);
        assert_eq!(stats.count(OutcomeKind::Success), 2);
        assert_eq!(stats.count(OutcomeKind::Timeout), 1);
        assert_eq!(stats.count(OutcomeKind::Cancelled), 0);
        assert_eq!(stats.by_kind.values().map(|c| c.requests).sum::<u64>(), stats.total());
        assert_eq!(stats.by_status.get(&200), Some(&2));
        assert_eq!(stats.errors.get("timeout"), Some(&1));
        assert_eq!(stats.by_target[1].counter.requests, 2);
        assert_eq!(stats.by_target[1].errors, 1);
        assert_eq!(stats.hist.len(), 3);
        assert_eq!(stats.overall.bytes, 300);
        assert!((stats.error_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn mean_latency() {
        let mut stats = RunStats::new(1);
        stats.record(&outcome(0, OutcomeKind::Success, 10));
        stats.record(&outcome(0, OutcomeKind::Success, 30));
        assert_eq!(stats.overall.mean_latency(), Duration::from_millis(20));
        assert_eq!(Counter::default().mean_latency(), Duration::ZERO);
    }

    #[test]
    fn empty_run_has_no_error_rate() {
        assert_eq!(RunStats::new(1).error_rate(), 0.0);
    }
}
