//! Run configuration, resolved once before a run starts.
mod file;

pub use file::{ConfigFile, DurationValue, TargetEntry, load_config_file};

use std::time::Duration;

use crate::{error::ConfigError, rate::RateProfile, retry::RetryPolicy, target::TargetDescriptor};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval between progress samples.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// When a run stops issuing new requests, besides the profile running out.
///
/// Whichever condition fires first wins. With neither set and an open-ended
/// profile, the run only ends on an external stop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopCondition {
    /// Stop after this much run time.
    pub duration: Option<Duration>,
    /// Stop after this many requests were issued.
    pub count: Option<u64>,
}

/// Immutable configuration of one run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Targets, in configuration order.
    pub targets: Vec<TargetDescriptor>,
    /// Rate profile.
    pub rate: RateProfile,
    /// Maximum number of requests in flight.
    pub concurrency: u32,
    /// Stop condition.
    pub stop: StopCondition,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Interval between progress samples.
    pub progress_interval: Duration,
    /// Highest error rate a run may have and still pass.
    pub max_error_rate: Option<f64>,
}

impl RunConfig {
    /// A configuration hitting `targets` as fast as one worker allows, until
    /// stopped.
    pub fn new(targets: Vec<TargetDescriptor>) -> Self {
        Self {
            targets,
            rate: RateProfile::unlimited(),
            concurrency: 1,
            stop: StopCondition::default(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::none(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            max_error_rate: None,
        }
    }

    /// Sets the rate profile.
    pub fn with_rate(mut self, rate: RateProfile) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the concurrency limit.
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Stops the run after `duration`.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.stop.duration = Some(duration);
        self
    }

    /// Stops the run after `count` requests.
    pub fn with_count(mut self, count: u64) -> Self {
        self.stop.count = Some(count);
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the progress interval.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the error-rate threshold.
    pub fn with_max_error_rate(mut self, rate: f64) -> Self {
        self.max_error_rate = Some(rate);
        self
    }

    /// Checks every invariant of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if let Some(index) = self.targets.iter().position(|t| t.endpoint.trim().is_empty()) {
            return Err(ConfigError::EmptyEndpoint { index });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        self.rate.validate()?;
        if self.stop.duration == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidDuration { key: "duration", reason: "must be greater than zero".into() });
        }
        if self.stop.count == Some(0) {
            return Err(ConfigError::ZeroCount);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::ZeroProgressInterval);
        }
        match self.max_error_rate {
            Some(rate) if !(0.0..=1.0).contains(&rate) => Err(ConfigError::InvalidErrorRate(rate)),
            _ => Ok(()),
        }
    }
}
