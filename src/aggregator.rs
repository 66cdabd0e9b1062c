//! The result aggregator.
//!
//! Workers call [`Aggregator::record`] directly, progress reporting reads
//! [`Aggregator::snapshot`], and the orchestrator closes the run with
//! [`Aggregator::finalize`].
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    outcome::Outcome,
    report::{RunMeta, RunReport},
    stats::RunStats,
};

#[derive(Debug)]
struct Inner {
    stats: RunStats,
    log: Option<UnboundedSender<Outcome>>,
}

/// Thread-safe accumulator of outcomes.
///
/// Every operation holds the lock for a bounded amount of work: one stats
/// update, one clone, or one channel send.
#[derive(Debug)]
pub struct Aggregator {
    inner: Mutex<Inner>,
}

impl Aggregator {
    /// An aggregator for a run with `targets` targets.
    pub fn new(targets: usize) -> Self {
        Self { inner: Mutex::new(Inner { stats: RunStats::new(targets), log: None }) }
    }

    /// Also streams every recorded outcome to `log`, in record order.
    pub fn with_log(self, log: UnboundedSender<Outcome>) -> Self {
        self.inner.lock().log = Some(log);
        self
    }

    /// Records one outcome. Safe to call from any number of workers.
    pub fn record(&self, outcome: Outcome) {
        let mut inner = self.inner.lock();
        inner.stats.record(&outcome);
        if let Some(log) = &inner.log {
            if log.send(outcome).is_err() {
                tracing::warn!("outcome log receiver dropped, no longer streaming outcomes");
                inner.log = None;
            }
        }
    }

    /// A copy of the current statistics.
    pub fn snapshot(&self) -> RunStats {
        self.inner.lock().stats.clone()
    }

    /// Builds the terminal report and closes the outcome log stream.
    ///
    /// Call once, after the pool has drained.
    pub fn finalize(&self, meta: RunMeta) -> RunReport {
        let mut inner = self.inner.lock();
        inner.log = None;
        RunReport { meta, stats: inner.stats.clone() }
    }
}
