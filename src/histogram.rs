//! Latency histogram backed by [`hdrhistogram::Histogram`].
use std::time::Duration;

use hdrhistogram::Histogram;

/// Percentiles shown in reports.
pub(crate) const PERCENTAGES: &[f64] = &[50.0, 75.0, 90.0, 95.0, 99.0, 99.9];

/// Latency histogram with nanosecond resolution and 3 significant digits.
#[derive(Clone, Debug, PartialEq)]
pub struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl LatencyHistogram {
    /// Creates an empty, auto-resizing histogram.
    pub fn new() -> LatencyHistogram {
        Self { hist: Histogram::<u64>::new(3).expect("3 significant digits is a valid precision") }
    }

    /// Records a latency. Values beyond the trackable range are clamped.
    pub fn record(&mut self, d: Duration) {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        self.hist.saturating_record(nanos);
    }

    /// Number of recorded values.
    pub fn len(&self) -> u64 {
        self.hist.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    /// Highest recorded latency.
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.hist.max())
    }

    /// Lowest recorded latency.
    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.hist.min())
    }

    /// Mean latency.
    pub fn mean(&self) -> Duration {
        Duration::from_nanos(self.hist.mean() as u64)
    }

    /// Standard deviation.
    pub fn stdev(&self) -> Duration {
        Duration::from_nanos(self.hist.stdev() as u64)
    }

    /// Median latency.
    pub fn median(&self) -> Duration {
        self.value_at_quantile(0.5)
    }

    /// Latency at quantile `q` in `[0, 1]`.
    pub fn value_at_quantile(&self, q: f64) -> Duration {
        Duration::from_nanos(self.hist.value_at_quantile(q))
    }

    /// Non-empty buckets, walking quantiles one half-distance at a time.
    pub fn quantiles(&self) -> impl Iterator<Item = (Duration, u64)> + '_ {
        self.hist
            .iter_quantiles(1)
            .map(|t| (Duration::from_nanos(t.value_iterated_to()), t.count_since_last_iteration()))
            .filter(|(_, n)| *n > 0)
    }

    /// Latency at each of the given percentages.
    pub fn percentiles<'a>(&'a self, percentages: &'a [f64]) -> impl Iterator<Item = (f64, Duration)> + 'a {
        percentages.iter().map(|&p| (p, self.value_at_quantile(p / 100.0)))
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
