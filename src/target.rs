//! Target descriptors and the weighted round-robin target set.
use std::{fmt, num::NonZeroU32, str::FromStr, sync::Arc};

use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The request sent to a target. How it is turned into bytes on the wire is up
/// to the [`RequestExecutor`](crate::RequestExecutor).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTemplate {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Path appended to the endpoint.
    pub path: String,
    /// Extra headers, in order.
    pub headers: Vec<Header>,
    /// Optional request body.
    pub body: Option<String>,
}

/// A `NAME: VALUE` header pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

impl FromStr for Header {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok(Header { name: name.trim().to_string(), value: value.trim().to_string() })
            }
            _ => Err(ConfigError::InvalidHeader(s.to_string())),
        }
    }
}

/// One destination and the request to send it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Display name used in reports. Defaults to the endpoint.
    pub name: String,
    /// Endpoint identity, e.g. `http://localhost:8080`.
    pub endpoint: String,
    /// Request template.
    pub template: RequestTemplate,
    /// Relative selection weight.
    pub weight: NonZeroU32,
}

impl TargetDescriptor {
    /// Creates a `GET` target for `endpoint` with weight 1.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            name: endpoint.clone(),
            endpoint,
            template: RequestTemplate { method: "GET".to_string(), ..Default::default() },
            weight: nonzero!(1u32),
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the request template.
    pub fn with_template(mut self, template: RequestTemplate) -> Self {
        self.template = template;
        self
    }

    /// Sets the selection weight.
    pub fn with_weight(mut self, weight: NonZeroU32) -> Self {
        self.weight = weight;
        self
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The immutable set of targets of a run.
///
/// Selection walks a cumulative weight table with the request sequence number,
/// so each target receives a share of requests proportional to its weight and
/// equal weights degrade to plain round robin. Selection is lock-free.
#[derive(Debug)]
pub struct TargetSet {
    targets: Vec<Arc<TargetDescriptor>>,
    cumulative: Vec<u64>,
}

impl TargetSet {
    /// Builds a target set, rejecting an empty list.
    pub fn new(targets: Vec<TargetDescriptor>) -> Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if let Some(index) = targets.iter().position(|t| t.endpoint.trim().is_empty()) {
            return Err(ConfigError::EmptyEndpoint { index });
        }

        let cumulative = targets
            .iter()
            .scan(0u64, |acc, t| {
                *acc += u64::from(t.weight.get());
                Some(*acc)
            })
            .collect();
        Ok(Self { targets: targets.into_iter().map(Arc::new).collect(), cumulative })
    }

    /// Picks the target for request number `seq`. Returns its index and descriptor.
    pub fn pick(&self, seq: u64) -> (usize, &Arc<TargetDescriptor>) {
        let total = self.cumulative.last().copied().unwrap_or(1);
        let slot = seq % total;
        let index = self.cumulative.partition_point(|&c| c <= slot);
        (index, &self.targets[index])
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Always `false`: a target set holds at least one target.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Iterates over the targets in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &TargetDescriptor> {
        self.targets.iter().map(|t| t.as_ref())
    }
}
