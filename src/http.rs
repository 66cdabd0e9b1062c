//! The built-in HTTP executor.
use std::{error::Error as StdError, time::Duration};

use async_trait::async_trait;
use http::{HeaderName, HeaderValue, Method};
use reqwest::{Client, Url};

use crate::{
    error::{ConfigError, RequestError},
    executor::RequestExecutor,
    outcome::Response,
    target::TargetDescriptor,
};

/// Sends each target's request template over HTTP with [`reqwest`].
///
/// A 2xx answer is a success, any other status a protocol error. Connection
/// failures are transport errors.
#[derive(Clone, Debug)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    /// Builds an executor for `targets`, rejecting the ones it cannot send.
    pub fn new(targets: &[TargetDescriptor]) -> Result<Self, ConfigError> {
        for target in targets {
            prepare(target)?;
        }
        let client = Client::builder().build().map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, target: &TargetDescriptor, timeout: Duration) -> Result<Response, RequestError> {
        let (method, url) = prepare(target).map_err(|e| RequestError::protocol(e.to_string()))?;
        let template = &target.template;

        let mut request = self.client.request(method, url).timeout(timeout);
        for header in &template.headers {
            request = request.header(header.name.as_str(), header.value.as_str());
        }
        if let Some(body) = &template.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| classify(&e, timeout))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| classify(&e, timeout))?;
        Response::from_http(status, bytes.len() as u64)
    }
}

fn prepare(target: &TargetDescriptor) -> Result<(Method, Url), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidTarget { target: target.name.clone(), reason };
    let template = &target.template;

    let method = Method::from_bytes(template.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| invalid(format!("bad method '{}'", template.method)))?;
    let url = join(&target.endpoint, &template.path);
    let url = Url::parse(&url).map_err(|e| invalid(format!("bad url '{url}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    for header in &template.headers {
        HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| invalid(format!("bad header name '{}'", header.name)))?;
        HeaderValue::from_str(&header.value)
            .map_err(|_| invalid(format!("bad value for header '{}'", header.name)))?;
    }
    Ok((method, url))
}

fn join(endpoint: &str, path: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    match path {
        "" => endpoint.to_string(),
        p if p.starts_with('/') => format!("{base}{p}"),
        p => format!("{base}/{p}"),
    }
}

fn classify(e: &reqwest::Error, timeout: Duration) -> RequestError {
    if e.is_timeout() {
        return RequestError::Timeout(timeout);
    }
    // reqwest hides the interesting part (refused, reset, dns) in the sources
    let mut detail = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    RequestError::Transport(detail)
}
