//! The one failure shape callers ever observe.
//!
//! Whatever went wrong, the caller gets an [`HttpException`] whose
//! [`FailureKind`] says which way it failed.
//! Raw `reqwest` errors are converted into an [`ErrorCause`] at the transport
//! edge and never leak past it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a call failed, as far as the caller is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The server answered with a status outside the retryable set.
    Terminal,
    /// A retryable failure persisted until the retry budget ran out.
    RetryExhausted,
    /// The body arrived but could not be decoded as the declared kind.
    Decode,
    /// The caller fired the request's cancellation signal.
    Cancelled,
    /// The request never became an HTTP exchange (invalid URL or header,
    /// isolated worker gone, broken stream).
    Transport,
}

/// Underlying cause of a failed attempt or call.
///
/// Serializable so the isolated worker can send it back across the channel
/// boundary unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "detail")]
pub enum ErrorCause {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to decode {kind} body: {message}")]
    Decode { kind: String, message: String },
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("isolated channel error: {0}")]
    Channel(String),
}

impl ErrorCause {
    /// Convert a `reqwest` error raised during one attempt.
    ///
    /// `timeout` is the per-attempt bound that was in force, reported when
    /// reqwest itself gave up on time.
    pub fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ErrorCause::Timeout(timeout)
        } else if err.is_builder() {
            ErrorCause::InvalidRequest(err.to_string())
        } else if err.is_connect() {
            ErrorCause::Connect(err.to_string())
        } else {
            ErrorCause::Request(err.to_string())
        }
    }

    pub(crate) fn decode(kind: &str, message: impl ToString) -> Self {
        ErrorCause::Decode {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}

/// Canonical failure returned by every request.
///
/// `retry_attempts` always holds the number of retries the policy approved
/// before the call gave up, so an exhausted 429 loop with `retries = 4`
/// reports `4` while an immediate 404 reports `0`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{cause} (retry attempts: {retry_attempts})")]
pub struct HttpException {
    pub retry_attempts: u32,
    #[source]
    pub cause: ErrorCause,
    pub kind: FailureKind,
    pub status_code: Option<u16>,
    pub status_message: Option<String>,
    /// Body received alongside a failed status, if any.
    pub partial_data: Option<Bytes>,
}

impl HttpException {
    pub fn new(kind: FailureKind, cause: ErrorCause) -> Self {
        Self {
            retry_attempts: 0,
            cause,
            kind,
            status_code: None,
            status_message: None,
            partial_data: None,
        }
    }

    /// A cancellation carrying the caller-supplied reason.
    pub fn cancelled(reason: impl Into<String>, retry_attempts: u32) -> Self {
        Self::new(FailureKind::Cancelled, ErrorCause::Cancelled(reason.into()))
            .with_retry_attempts(retry_attempts)
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn with_status(mut self, status_code: Option<u16>, status_message: Option<String>) -> Self {
        self.status_code = status_code;
        self.status_message = status_message;
        self
    }

    pub fn with_partial_data(mut self, data: Option<Bytes>) -> Self {
        self.partial_data = data;
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Whether the call failed because the retry budget ran out.
    pub fn is_retry_exhausted(&self) -> bool {
        self.kind == FailureKind::RetryExhausted
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_cause_and_attempts() {
        let err = HttpException::new(FailureKind::RetryExhausted, ErrorCause::Status(429))
            .with_retry_attempts(4);
        assert_eq!(err.to_string(), "HTTP 429 (retry attempts: 4)");
    }

    #[test]
    fn cancelled_carries_reason() {
        let err = HttpException::cancelled("user closed the tab", 1);
        assert!(err.is_cancelled());
        assert_eq!(err.retry_attempts, 1);
        assert_eq!(
            err.cause,
            ErrorCause::Cancelled("user closed the tab".into())
        );
    }

    #[test]
    fn cause_survives_json_round_trip() {
        let cause = ErrorCause::Timeout(Duration::from_millis(1500));
        let json = serde_json::to_string(&cause).unwrap();
        let back: ErrorCause = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cause);
    }
}
