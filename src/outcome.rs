//! Per-request outcomes.
use std::time::Duration;

use serde::Serialize;
use strum::{Display, EnumIter, IntoStaticStr};

use crate::error::RequestError;

/// Terminal status of one request.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, IntoStaticStr, Serialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// The target answered as expected.
    Success,
    /// The target answered but violated the expected contract, or the
    /// executor faulted.
    ProtocolError,
    /// The request did not complete within its timeout.
    Timeout,
    /// The request was abandoned by a forced cancellation.
    Cancelled,
    /// Network-level failure.
    TransportError,
}

impl OutcomeKind {
    /// Returns `true` for every kind but [`Success`](Self::Success).
    pub fn is_error(self) -> bool {
        self != OutcomeKind::Success
    }
}

impl From<&RequestError> for OutcomeKind {
    fn from(e: &RequestError) -> Self {
        match e {
            RequestError::Transport(_) => OutcomeKind::TransportError,
            RequestError::Protocol { .. } => OutcomeKind::ProtocolError,
            RequestError::Timeout(_) => OutcomeKind::Timeout,
        }
    }
}

/// What an executor reports about a successful exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// Protocol status code, when the protocol has one.
    pub status: Option<u16>,
    /// Number of response bytes received.
    pub bytes: u64,
}

impl Response {
    /// A response with a status code and a body size.
    pub fn new(status: u16, bytes: u64) -> Self {
        Self { status: Some(status), bytes }
    }
}

#[cfg(feature = "http")]
impl Response {
    /// Classifies an HTTP response: 2xx is a success, anything else a protocol
    /// error carrying the status code.
    pub fn from_http(status: http::StatusCode, bytes: u64) -> Result<Self, RequestError> {
        if status.is_success() {
            Ok(Self::new(status.as_u16(), bytes))
        } else {
            Err(RequestError::protocol_status(status.as_u16(), status.to_string()))
        }
    }
}

/// The immutable record of one completed or abandoned request.
///
/// Timestamps are offsets of the run [`Clock`](crate::clock::Clock).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Outcome {
    /// Index of the target in the target set.
    pub target: usize,
    /// Sequence number of the permit that issued the request.
    pub seq: u64,
    /// When the first attempt started.
    #[serde(serialize_with = "as_secs")]
    pub issued_at: Duration,
    /// When the terminal attempt finished.
    #[serde(serialize_with = "as_secs")]
    pub completed_at: Duration,
    /// Terminal status.
    pub kind: OutcomeKind,
    /// Status code of the last response, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response bytes of the terminal attempt.
    pub bytes: u64,
    /// Error detail when `kind` is not a success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of attempts made, including the terminal one.
    pub attempts: u32,
}

impl Outcome {
    /// Time between issue and completion.
    pub fn latency(&self) -> Duration {
        self.completed_at.saturating_sub(self.issued_at)
    }

    /// Attempts beyond the first one.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(OutcomeKind::TransportError.to_string(), "transport-error");
        let name: &'static str = OutcomeKind::ProtocolError.into();
        assert_eq!(name, "protocol-error");
        assert!(!OutcomeKind::Success.is_error());
        assert!(OutcomeKind::Cancelled.is_error());
    }

    #[test]
    fn error_classification() {
        assert_eq!(OutcomeKind::from(&RequestError::transport("refused")), OutcomeKind::TransportError);
        assert_eq!(OutcomeKind::from(&RequestError::protocol_status(503, "busy")), OutcomeKind::ProtocolError);
        assert_eq!(OutcomeKind::from(&RequestError::Timeout(Duration::from_secs(1))), OutcomeKind::Timeout);
    }

    #[cfg(feature = "http")]
    #[test]
    fn http_status_classification() {
        assert_eq!(Response::from_http(http::StatusCode::OK, 12), Ok(Response::new(200, 12)));
        assert_eq!(
            Response::from_http(http::StatusCode::NOT_FOUND, 0),
            Err(RequestError::protocol_status(404, "404 Not Found"))
        );
    }

    #[test]
    fn latency_and_retries() {
        let outcome = Outcome {
            target: 0,
            seq: 7,
            issued_at: Duration::from_millis(100),
            completed_at: Duration::from_millis(350),
            kind: OutcomeKind::Success,
            status: Some(200),
            bytes: 10,
            error: None,
            attempts: 3,
        };
        assert_eq!(outcome.latency(), Duration::from_millis(250));
        assert_eq!(outcome.retries(), 2);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "success");
        assert_eq!(json["issued_at"], 0.1);
        assert!(json.get("error").is_none());
    }
}
