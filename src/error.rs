//! Error types for configuration, request execution and the run itself.
use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = ShooterError> = std::result::Result<T, E>;

/// Invalid run configuration. Always fatal before the run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No target was configured.
    #[error("at least one target is required")]
    NoTargets,

    /// Concurrency must be at least one.
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    /// A target has a weight of zero.
    #[error("target '{target}' has zero weight")]
    ZeroWeight {
        /// Name of the offending target.
        target: String,
    },

    /// A target endpoint is empty.
    #[error("target #{index} has an empty endpoint")]
    EmptyEndpoint {
        /// Position of the target in the configured list.
        index: usize,
    },

    /// A rate is negative, NaN or infinite.
    #[error("invalid rate {rate} in segment #{segment}: must be a finite number >= 0")]
    InvalidRate {
        /// Index of the segment in the profile.
        segment: usize,
        /// The rejected rate.
        rate: f64,
    },

    /// A ramp segment goes from 0 to 0.
    #[error("ramp segment #{segment} never issues a request (both ends are 0)")]
    EmptyRamp {
        /// Index of the segment in the profile.
        segment: usize,
    },

    /// A segment has a zero duration.
    #[error("segment #{segment} has a zero duration")]
    ZeroSegmentDuration {
        /// Index of the segment in the profile.
        segment: usize,
    },

    /// Only the last segment may be open-ended.
    #[error("segment #{segment} is open-ended but is not the last segment")]
    OpenSegmentNotLast {
        /// Index of the segment in the profile.
        segment: usize,
    },

    /// The profile has no segments.
    #[error("the rate profile has no segments")]
    EmptyProfile,

    /// The request count stop condition is zero.
    #[error("request count must be at least 1")]
    ZeroCount,

    /// A duration setting is zero or malformed.
    #[error("invalid {key}: {reason}")]
    InvalidDuration {
        /// Setting the duration belongs to.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The per-request timeout is zero.
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    /// The retry policy allows no attempt at all.
    #[error("retry policy must allow at least one attempt")]
    ZeroAttempts,

    /// The error-rate threshold is outside `[0, 1]`.
    #[error("max error rate {0} must be within [0, 1]")]
    InvalidErrorRate(f64),

    /// The progress interval is zero.
    #[error("progress interval must be greater than zero")]
    ZeroProgressInterval,

    /// A stage could not be parsed from its textual form.
    #[error("invalid stage '{input}': {reason}")]
    InvalidStage {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A header could not be parsed from `NAME: VALUE`.
    #[error("invalid header '{0}': expected 'NAME: VALUE'")]
    InvalidHeader(String),

    /// Both a constant rate and stages were configured.
    #[error("config cannot set both '{left}' and '{right}'")]
    Conflict {
        /// First conflicting key.
        left: &'static str,
        /// Second conflicting key.
        right: &'static str,
    },

    /// A config file could not be read.
    #[error("failed to read config '{path}': {source}")]
    ReadConfig {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A TOML config file could not be parsed.
    #[error("failed to parse TOML config '{path}': {source}")]
    ParseToml {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A JSON config file could not be parsed.
    #[error("failed to parse JSON config '{path}': {source}")]
    ParseJson {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The config file extension is not supported.
    #[error("unsupported config extension '{0}', use .toml or .json")]
    UnsupportedExtension(String),

    /// The config file has no extension.
    #[error("config file must have a .toml or .json extension")]
    MissingExtension,

    /// A target cannot be served by the built-in executor.
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget {
        /// Name of the offending target.
        target: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be built.
    #[error("failed to build the request client: {0}")]
    Client(String),
}

/// Failure of a single request attempt, as reported by a
/// [`RequestExecutor`](crate::RequestExecutor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Network-level failure: connection refused, DNS failure, reset, ...
    #[error("transport error: {0}")]
    Transport(String),

    /// The target answered but violated the expected contract.
    #[error("protocol error: {detail}")]
    Protocol {
        /// Status code of the response, when the protocol has one.
        status: Option<u16>,
        /// Human readable detail.
        detail: String,
    },

    /// The attempt did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl RequestError {
    /// Creates a transport error.
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport(detail.into())
    }

    /// Creates a protocol error without status code.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol { status: None, detail: detail.into() }
    }

    /// Creates a protocol error carrying a status code.
    pub fn protocol_status(status: u16, detail: impl Into<String>) -> Self {
        Self::Protocol { status: Some(status), detail: detail.into() }
    }

    /// Status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Protocol { status, .. } => *status,
            _ => None,
        }
    }
}

/// Top-level error of a run.
#[derive(Debug, Error)]
pub enum ShooterError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A worker task failed outside of request execution.
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// Writing the outcome log or a report failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serializing an outcome or a report failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
