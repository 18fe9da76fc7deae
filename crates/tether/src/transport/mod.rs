//! Transport layer: one physical HTTP attempt per call to [`Transport::send`].
//!
//! - [`local`]: [`LocalTransport`], the `reqwest`-backed adapter used in the
//!   caller's task and inside the isolated worker.
//! - [`body`]: replayable stream bodies and send-progress wrapping.
//!
//! Retrying is never the transport's business; it reports an
//! [`Outcome`] and the router decides what happens next.

pub mod body;
pub mod local;

pub use local::LocalTransport;

use crate::cancel::CancelSignal;
use crate::error::ErrorCause;
use crate::outcome::Outcome;
use crate::request::{ProgressCallback, RequestBody, RequestSpec, ResponseKind};
use body::ReplayableBody;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Url};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Boxed future returned by [`Transport::send`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;

/// Performs one HTTP round trip.
///
/// Uses a boxed future so the trait stays dyn-compatible and the router can
/// hold any transport behind an `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    /// Send `request` once. `attempt` is the number of retries already spent.
    fn send<'a>(&'a self, request: &'a PreparedRequest, attempt: u32) -> TransportFuture<'a>;
}

/// Hooks run around every physical attempt.
pub trait Interceptor: Send + Sync {
    fn on_request(&self, _request: &PreparedRequest, _attempt: u32) {}

    fn on_response(&self, _request: &PreparedRequest, _outcome: &Outcome, _elapsed: Duration) {}
}

/// Logs each attempt and its result at debug level.
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn on_request(&self, request: &PreparedRequest, attempt: u32) {
        debug!(
            "HTTP request: {} {} (attempt {}, body {})",
            request.method,
            request.url,
            attempt + 1,
            request.body.describe(),
        );
    }

    fn on_response(&self, request: &PreparedRequest, outcome: &Outcome, elapsed: Duration) {
        match outcome {
            Outcome::Success(s) => debug!(
                "HTTP response: {} {} -> {} in {:.3}s",
                request.method,
                request.url,
                s.status_code,
                elapsed.as_secs_f64(),
            ),
            Outcome::Failure(f) => debug!(
                "HTTP failure: {} {} -> {} in {:.3}s",
                request.method,
                request.url,
                f.error,
                elapsed.as_secs_f64(),
            ),
        }
    }
}

/// Request body once validated and made re-sendable.
#[derive(Clone)]
pub enum PreparedBody {
    Empty,
    Buffered(Bytes),
    Replay(ReplayableBody),
}

impl PreparedBody {
    fn describe(&self) -> String {
        match self {
            PreparedBody::Empty => "empty".to_string(),
            PreparedBody::Buffered(b) => format!("{} bytes", b.len()),
            PreparedBody::Replay(_) => "stream".to_string(),
        }
    }
}

/// A validated [`RequestSpec`], shared by every attempt of one call.
#[derive(Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: PreparedBody,
    pub response_kind: ResponseKind,
    /// Per-attempt bound; the transport's default applies when `None`.
    pub timeout: Option<Duration>,
    pub progress: Option<ProgressCallback>,
    pub total_len: Option<u64>,
    pub cancel: Option<CancelSignal>,
}

impl PreparedRequest {
    /// Validate `spec` and turn its body into something every attempt can send.
    ///
    /// A stream body is recorded for replay only when `max_retries > 0`;
    /// with no retry budget it is passed through as-is.
    pub fn from_spec(spec: RequestSpec, max_retries: u32) -> Result<Self, ErrorCause> {
        let timeout = spec.attempt_timeout();
        let total_len = spec.body.len();
        if let Some(invalid) = spec.invalid {
            return Err(ErrorCause::InvalidRequest(invalid));
        }
        let url = Url::parse(&spec.url)
            .map_err(|e| ErrorCause::InvalidRequest(format!("URL '{}': {e}", spec.url)))?;

        let mut headers = spec.headers;
        let body = match spec.body {
            RequestBody::Empty => PreparedBody::Empty,
            RequestBody::Text(text) => {
                default_content_type(&mut headers, "text/plain; charset=utf-8");
                PreparedBody::Buffered(Bytes::from(text))
            }
            RequestBody::Bytes(bytes) => {
                default_content_type(&mut headers, "application/octet-stream");
                PreparedBody::Buffered(bytes)
            }
            RequestBody::Stream(stream) => {
                default_content_type(&mut headers, "application/octet-stream");
                PreparedBody::Replay(if max_retries > 0 {
                    ReplayableBody::new(stream)
                } else {
                    ReplayableBody::single_use(stream)
                })
            }
        };

        Ok(Self {
            method: spec.method,
            url,
            headers,
            body,
            response_kind: spec.response_kind,
            timeout,
            progress: spec.progress,
            total_len,
            cancel: spec.cancel,
        })
    }

    /// Whether an attempt may run on another task without changing behavior.
    pub fn can_offload(&self) -> bool {
        self.progress.is_none()
            && self.cancel.is_none()
            && !matches!(self.body, PreparedBody::Replay(_))
    }
}

fn default_content_type(headers: &mut HeaderMap, value: &'static str) {
    headers
        .entry(CONTENT_TYPE)
        .or_insert_with(|| HeaderValue::from_static(value));
}
