//! Raw result of one physical attempt, before normalization.

use crate::error::ErrorCause;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::HeaderMap;
use std::fmt;
use std::pin::Pin;

/// Response body chunks straight off the wire, errors not yet attributed to
/// a call.
pub type RawStream = Pin<Box<dyn Stream<Item = Result<Bytes, ErrorCause>> + Send>>;

/// Body of a successful attempt.
pub enum RawBody {
    /// Fully read into memory.
    Buffered(Bytes),
    /// Left on the wire for the caller to pull.
    Stream(RawStream),
}

impl fmt::Debug for RawBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            RawBody::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct Success {
    pub status_code: u16,
    pub status_message: Option<String>,
    pub headers: HeaderMap,
    pub body: RawBody,
}

#[derive(Debug, Clone)]
pub struct Failure {
    /// `None` when the attempt never produced a response (connect error,
    /// reset, timeout, cancellation).
    pub status_code: Option<u16>,
    pub status_message: Option<String>,
    pub error: ErrorCause,
    pub data: Option<Bytes>,
}

/// What the transport reports for a single attempt.
#[derive(Debug)]
pub enum Outcome {
    Success(Success),
    Failure(Failure),
}

impl Outcome {
    pub fn failure(
        status_code: Option<u16>,
        status_message: Option<String>,
        error: ErrorCause,
        data: Option<Bytes>,
    ) -> Self {
        Outcome::Failure(Failure {
            status_code,
            status_message,
            error,
            data,
        })
    }

    /// A failure that never reached the network layer's status line.
    pub fn network(error: ErrorCause) -> Self {
        Self::failure(None, None, error, None)
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::network(ErrorCause::Cancelled(reason.into()))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Outcome::Success(s) => Some(s.status_code),
            Outcome::Failure(f) => f.status_code,
        }
    }

    pub fn status_message(&self) -> Option<&str> {
        match self {
            Outcome::Success(s) => s.status_message.as_deref(),
            Outcome::Failure(f) => f.status_message.as_deref(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Outcome::Failure(Failure {
                error: ErrorCause::Cancelled(_),
                ..
            })
        )
    }
}
