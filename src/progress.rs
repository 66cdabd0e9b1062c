//! Periodic progress snapshots emitted while a run is `Running`.
use std::{fmt, io::Write, time::Duration};

use serde::Serialize;

use crate::{
    stats::RunStats,
    units::{FormattedDuration, TimeUnit},
};

/// One progress sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Progress {
    /// Clock offset of the sample.
    pub at: Duration,
    /// Outcomes recorded so far.
    pub total: u64,
    /// Achieved rate over the last interval, in requests per second.
    pub rate: f64,
    /// Share of failed outcomes over the last interval.
    pub error_rate: f64,
    /// Median latency since the start of the run.
    pub p50: Duration,
    /// 99th percentile latency since the start of the run.
    pub p99: Duration,
    /// Requests in flight at sampling time.
    pub in_flight: usize,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>7.1}] total {} | {:.1} req/s | errors {:.2}% | p50 {:.2} p99 {:.2} | in-flight {}",
            FormattedDuration::new(self.at, TimeUnit::Sec),
            self.total,
            self.rate,
            100.0 * self.error_rate,
            FormattedDuration::auto(self.p50),
            FormattedDuration::auto(self.p99),
            self.in_flight,
        )
    }
}

/// Receives progress samples. Called from the orchestrator task only.
pub trait ProgressObserver: Send {
    /// Handles one sample.
    fn observe(&mut self, progress: &Progress);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&Progress) + Send,
{
    fn observe(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Emits samples as `info` events.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn observe(&mut self, p: &Progress) {
        tracing::info!(
            total = p.total,
            rate = p.rate,
            error_rate = p.error_rate,
            p50 = ?p.p50,
            p99 = ?p.p99,
            in_flight = p.in_flight,
            "progress"
        );
    }
}

/// Writes one line per sample, e.g. to stderr.
pub struct WriterProgress<W> {
    w: W,
}

impl<W: Write + Send> WriterProgress<W> {
    /// Writes samples to `w`.
    pub fn new(w: W) -> Self {
        Self { w }
    }
}

impl<W: Write + Send> ProgressObserver for WriterProgress<W> {
    fn observe(&mut self, progress: &Progress) {
        // a closed stream must not disturb the run
        let _ = writeln!(self.w, "{progress}");
    }
}

/// Turns consecutive stats snapshots into interval samples.
#[derive(Debug, Default)]
pub(crate) struct ProgressMeter {
    last_at: Duration,
    last_total: u64,
    last_errors: u64,
}

impl ProgressMeter {
    pub(crate) fn sample(&mut self, at: Duration, stats: &RunStats, in_flight: usize) -> Progress {
        let total = stats.total();
        let errors = stats.error_count();
        let span = at.saturating_sub(self.last_at).as_secs_f64();
        let done = total - self.last_total;

        let progress = Progress {
            at,
            total,
            rate: if span > 0.0 { done as f64 / span } else { 0.0 },
            error_rate: if done > 0 { (errors - self.last_errors) as f64 / done as f64 } else { 0.0 },
            p50: stats.hist.value_at_quantile(0.5),
            p99: stats.hist.value_at_quantile(0.99),
            in_flight,
        };

        self.last_at = at;
        self.last_total = total;
        self.last_errors = errors;
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Outcome, OutcomeKind};

    fn record(stats: &mut RunStats, n: u64, kind: OutcomeKind) {
        for seq in 0..n {
            stats.record(&Outcome {
                target: 0,
                seq,
                issued_at: Duration::ZERO,
                completed_at: Duration::from_millis(10),
                kind,
                status: None,
                bytes: 0,
                error: None,
                attempts: 1,
            });
        }
    }

    #[test]
    fn samples_cover_the_last_interval() {
        let mut meter = ProgressMeter::default();
        let mut stats = RunStats::new(1);

        record(&mut stats, 10, OutcomeKind::Success);
        let first = meter.sample(Duration::from_secs(1), &stats, 2);
        assert_eq!(first.total, 10);
        assert_eq!(first.rate, 10.0);
        assert_eq!(first.error_rate, 0.0);
        assert_eq!(first.in_flight, 2);

        record(&mut stats, 3, OutcomeKind::Success);
        record(&mut stats, 1, OutcomeKind::Timeout);
        let second = meter.sample(Duration::from_millis(1500), &stats, 0);
        assert_eq!(second.total, 14);
        assert_eq!(second.rate, 8.0);
        assert_eq!(second.error_rate, 0.25);
    }

    #[test]
    fn closures_observe() {
        let mut seen = Vec::new();
        let mut observer = |p: &Progress| seen.push(p.total);
        let mut meter = ProgressMeter::default();
        observer.observe(&meter.sample(Duration::from_secs(1), &RunStats::new(1), 0));
        assert_eq!(seen, [0]);
    }

    #[test]
    fn writer_lines() {
        let mut buf = Vec::new();
        let mut meter = ProgressMeter::default();
        WriterProgress::new(&mut buf).observe(&meter.sample(Duration::from_secs(2), &RunStats::new(1), 1));
        let line = String::from_utf8(buf).unwrap();
        assert!(line.starts_with("[    2.0s] total 0"), "{line}");
        assert!(line.ends_with("in-flight 1\n"), "{line}");
    }

    #[test]
    fn observers_are_boxable() {
        let mut observers: Vec<Box<dyn ProgressObserver>> =
            vec![Box::new(LogProgress), Box::new(WriterProgress::new(std::io::sink()))];
        let mut meter = ProgressMeter::default();
        let sample = meter.sample(Duration::from_secs(1), &RunStats::new(1), 0);
        for observer in &mut observers {
            observer.observe(&sample);
        }
    }
}
