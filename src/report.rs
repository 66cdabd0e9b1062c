//! The final run report.
use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use strum::IntoEnumIterator;

use crate::{outcome::OutcomeKind, phase::RunState, stats::RunStats};

/// Exit status of a run that finished within its error budget.
pub const EXIT_OK: u8 = 0;
/// Exit status of a cancelled run or one exceeding its error budget.
pub const EXIT_FAILED: u8 = 1;
/// Exit status of a run rejected by configuration validation.
pub const EXIT_CONFIG: u8 = 2;

/// Run facts the statistics alone do not carry.
#[derive(Clone, Debug)]
pub struct RunMeta {
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// State the run ended in.
    pub state: RunState,
    /// Configured concurrency.
    pub concurrency: u32,
    /// Time spent from `Running` to the end of the run.
    pub elapsed: Duration,
    /// Human readable rate profile.
    pub profile: String,
    /// Permits the profile asked for over `elapsed`, `None` when unlimited.
    pub requested: Option<f64>,
    /// Highest number of requests in flight at once.
    pub peak_in_flight: usize,
    /// Target names, by index.
    pub targets: Vec<String>,
    /// Configured error-rate threshold.
    pub max_error_rate: Option<f64>,
}

/// The terminal report of a run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Run facts.
    pub meta: RunMeta,
    /// Accumulated statistics.
    pub stats: RunStats,
}

impl RunReport {
    /// Total number of outcomes.
    pub fn total(&self) -> u64 {
        self.stats.total()
    }

    /// Achieved throughput in requests per second.
    pub fn throughput(&self) -> f64 {
        per_second(self.total() as f64, self.meta.elapsed)
    }

    /// Requested throughput in requests per second, `None` when unlimited.
    pub fn requested_rate(&self) -> Option<f64> {
        self.meta.requested.map(|n| per_second(n, self.meta.elapsed))
    }

    /// Share of outcomes that were not a success.
    pub fn error_rate(&self) -> f64 {
        self.stats.error_rate()
    }

    /// Share of each failing outcome kind among all outcomes.
    pub fn error_rate_by_kind(&self) -> BTreeMap<OutcomeKind, f64> {
        let total = self.total();
        OutcomeKind::iter()
            .filter(|k| k.is_error())
            .map(|k| {
                let rate = if total == 0 { 0.0 } else { self.stats.count(k) as f64 / total as f64 };
                (k, rate)
            })
            .collect()
    }

    /// Whether the error rate stayed within the configured threshold.
    pub fn within_error_budget(&self) -> bool {
        self.meta.max_error_rate.is_none_or(|max| self.error_rate() <= max)
    }

    /// Process exit status for this report.
    pub fn exit_code(&self) -> u8 {
        match self.meta.state {
            RunState::Finished if self.within_error_budget() => EXIT_OK,
            _ => EXIT_FAILED,
        }
    }
}

fn per_second(n: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { n / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;

    fn report(state: RunState, kinds: &[OutcomeKind], max_error_rate: Option<f64>) -> RunReport {
        let mut stats = RunStats::new(1);
        for (seq, &kind) in kinds.iter().enumerate() {
            stats.record(&Outcome {
                target: 0,
                seq: seq as u64,
                issued_at: Duration::ZERO,
                completed_at: Duration::from_millis(5),
                kind,
                status: None,
                bytes: 0,
                error: None,
                attempts: 1,
            });
        }
        RunReport {
            meta: RunMeta {
                started_at: Utc::now(),
                state,
                concurrency: 1,
                elapsed: Duration::from_secs(2),
                profile: "[open: 2/s]".to_string(),
                requested: Some(4.0),
                peak_in_flight: 1,
                targets: vec!["a".to_string()],
                max_error_rate,
            },
            stats,
        }
    }

    #[test]
    fn rates() {
        use OutcomeKind::*;
        let r = report(RunState::Finished, &[Success, Success, Timeout, TransportError], None);
        assert_eq!(r.throughput(), 2.0);
        assert_eq!(r.requested_rate(), Some(2.0));
        assert_eq!(r.error_rate(), 0.5);
        let by_kind = r.error_rate_by_kind();
        assert_eq!(by_kind[&Timeout], 0.25);
        assert_eq!(by_kind[&Cancelled], 0.0);
        assert!(!by_kind.contains_key(&Success));
    }

    #[test]
    fn exit_codes() {
        use OutcomeKind::*;
        let kinds = [Success, Success, Success, ProtocolError];
        assert_eq!(report(RunState::Finished, &kinds, None).exit_code(), EXIT_OK);
        assert_eq!(report(RunState::Finished, &kinds, Some(0.25)).exit_code(), EXIT_OK);
        assert_eq!(report(RunState::Finished, &kinds, Some(0.1)).exit_code(), EXIT_FAILED);
        assert_eq!(report(RunState::Cancelled, &[Success], None).exit_code(), EXIT_FAILED);
    }
}
