use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    rate::{RateProfile, Segment},
    retry::RetryPolicy,
    target::{Header, RequestTemplate, TargetDescriptor},
};

use super::RunConfig;

/// On-disk run configuration, `.toml` or `.json`.
///
/// Every key is optional; command line flags override what is set here.
///
/// ```toml
/// concurrency = 8
/// stages = ["30s:0..50", "2m:50"]
/// timeout = "2s"
/// retries = 2
/// backoff = ["100ms", "500ms"]
///
/// [[targets]]
/// endpoint = "http://localhost:8080"
/// path = "/health"
/// weight = 3
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Targets to hit.
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
    /// Number of concurrent workers.
    pub concurrency: Option<u32>,
    /// Constant rate in requests per second, 0 for unlimited.
    pub rate: Option<f64>,
    /// Staged profile in `DURATION:RATE` / `DURATION:FROM..TO` syntax.
    pub stages: Option<Vec<String>>,
    /// Run duration.
    pub duration: Option<DurationValue>,
    /// Number of requests.
    pub count: Option<u64>,
    /// Per-request timeout.
    pub timeout: Option<DurationValue>,
    /// Extra attempts after a failed one.
    pub retries: Option<u32>,
    /// Backoff delays between attempts; the last one repeats.
    pub backoff: Option<Vec<DurationValue>>,
    /// Progress interval.
    pub progress: Option<DurationValue>,
    /// Error-rate threshold in `[0, 1]`.
    pub max_error_rate: Option<f64>,
    /// Path of the JSON-lines outcome log.
    pub outcome_log: Option<PathBuf>,
}

/// One target of a [`ConfigFile`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetEntry {
    /// Endpoint identity.
    pub endpoint: String,
    /// Display name, defaults to the endpoint.
    pub name: Option<String>,
    /// Request method, defaults to `GET`.
    pub method: Option<String>,
    /// Path appended to the endpoint.
    pub path: Option<String>,
    /// Headers in `NAME: VALUE` form.
    #[serde(default)]
    pub headers: Vec<String>,
    /// Request body.
    pub body: Option<String>,
    /// Selection weight, defaults to 1.
    pub weight: Option<u32>,
}

/// A duration given either as whole seconds or as humantime text (`"250ms"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    /// Whole seconds.
    Seconds(u64),
    /// Humantime text.
    Text(String),
}

impl DurationValue {
    /// Resolves the duration. `key` names the setting in errors.
    pub fn to_duration(&self, key: &'static str) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => humantime::parse_duration(text.trim())
                .map_err(|e| ConfigError::InvalidDuration { key, reason: format!("'{text}': {e}") }),
        }
    }
}

impl TargetEntry {
    /// Converts the entry into a descriptor.
    pub fn to_descriptor(&self) -> Result<TargetDescriptor, ConfigError> {
        let headers = self.headers.iter().map(|h| h.parse::<Header>()).collect::<Result<Vec<_>, _>>()?;
        let template = RequestTemplate {
            method: self.method.clone().unwrap_or_else(|| "GET".to_string()),
            path: self.path.clone().unwrap_or_default(),
            headers,
            body: self.body.clone(),
        };

        let mut target = TargetDescriptor::new(&self.endpoint).with_template(template);
        if let Some(name) = &self.name {
            target = target.with_name(name);
        }
        if let Some(weight) = self.weight {
            let weight = NonZeroU32::new(weight).ok_or_else(|| ConfigError::ZeroWeight { target: target.name.clone() })?;
            target = target.with_weight(weight);
        }
        Ok(target)
    }
}

impl ConfigFile {
    /// The rate profile, if the file sets one.
    pub fn profile(&self) -> Result<Option<RateProfile>, ConfigError> {
        match (self.rate, &self.stages) {
            (Some(_), Some(_)) => Err(ConfigError::Conflict { left: "rate", right: "stages" }),
            (Some(rate), None) => Ok(Some(RateProfile::constant(rate))),
            (None, Some(stages)) => {
                let segments = stages.iter().map(|s| s.parse::<Segment>()).collect::<Result<_, _>>()?;
                Ok(Some(RateProfile::staged(segments)))
            }
            (None, None) => Ok(None),
        }
    }

    /// The retry policy, if the file sets retries or backoff.
    pub fn retry(&self) -> Result<Option<RetryPolicy>, ConfigError> {
        if self.retries.is_none() && self.backoff.is_none() {
            return Ok(None);
        }
        let attempts = self.retries.unwrap_or(0).saturating_add(1);
        let backoff = self
            .backoff
            .iter()
            .flatten()
            .map(|d| d.to_duration("backoff"))
            .collect::<Result<Vec<_>, _>>()?;
        let attempts = NonZeroU32::new(attempts).ok_or(ConfigError::ZeroAttempts)?;
        Ok(Some(RetryPolicy::new(attempts, backoff)))
    }

    /// Resolves the file into a run configuration. Unset keys keep the
    /// [`RunConfig::new`] defaults.
    pub fn to_run_config(&self) -> Result<RunConfig, ConfigError> {
        let targets = self.targets.iter().map(TargetEntry::to_descriptor).collect::<Result<_, _>>()?;
        let mut config = RunConfig::new(targets);

        if let Some(profile) = self.profile()? {
            config.rate = profile;
        }
        if let Some(retry) = self.retry()? {
            config.retry = retry;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(duration) = &self.duration {
            config.stop.duration = Some(duration.to_duration("duration")?);
        }
        config.stop.count = self.count.or(config.stop.count);
        if let Some(timeout) = &self.timeout {
            config.timeout = timeout.to_duration("timeout")?;
        }
        if let Some(progress) = &self.progress {
            config.progress_interval = progress.to_duration("progress")?;
        }
        config.max_error_rate = self.max_error_rate.or(config.max_error_rate);
        Ok(config)
    }
}

/// Loads a config file, picking the format from its extension.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadConfig { path: path.to_path_buf(), source })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => {
            toml::from_str(&content).map_err(|source| ConfigError::ParseToml { path: path.to_path_buf(), source })
        }
        Some("json") => serde_json::from_str(&content)
            .map_err(|source| ConfigError::ParseJson { path: path.to_path_buf(), source }),
        Some(ext) => Err(ConfigError::UnsupportedExtension(ext.to_owned())),
        None => Err(ConfigError::MissingExtension),
    }
}
