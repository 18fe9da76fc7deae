//! `reqwest`-backed transport running in whatever task awaits it.

use super::body::{chunked, with_progress};
use super::{Interceptor, LoggingInterceptor, PreparedBody, PreparedRequest, Transport, TransportFuture};
use crate::config::ClientOptions;
use crate::error::ErrorCause;
use crate::outcome::{Outcome, RawBody, Success};
use crate::request::ResponseKind;
use crate::retry::is_retryable_status;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// One HTTP round trip per [`Transport::send`], bounded by a per-attempt
/// wall-clock timeout covering connect, headers and (for buffered kinds) the
/// whole body.
pub struct LocalTransport {
    client: reqwest::Client,
    interceptors: Vec<Arc<dyn Interceptor>>,
    default_timeout: Duration,
}

impl LocalTransport {
    /// Build a transport with a [`LoggingInterceptor`] installed.
    pub fn new(options: &ClientOptions) -> Result<Self, ErrorCause> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.as_str())
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| ErrorCause::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            interceptors: vec![Arc::new(LoggingInterceptor)],
            default_timeout: options.attempt_timeout,
        })
    }

    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    async fn round_trip(&self, request: &PreparedRequest, attempt: u32) -> Outcome {
        for interceptor in &self.interceptors {
            interceptor.on_request(request, attempt);
        }
        let start = Instant::now();
        let outcome = self.exchange(request).await;
        let elapsed = start.elapsed();
        for interceptor in &self.interceptors {
            interceptor.on_response(request, &outcome, elapsed);
        }
        outcome
    }

    async fn exchange(&self, request: &PreparedRequest) -> Outcome {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = request_body(request) {
            builder = builder.body(body);
        }

        let response = match tokio::time::timeout_at(deadline, builder.send()).await {
            Err(_) => return Outcome::network(ErrorCause::Timeout(timeout)),
            Ok(Err(e)) => {
                if let Some(outcome) = body_source_failure(request).await {
                    return outcome;
                }
                return Outcome::failure(
                    e.status().map(|s| s.as_u16()),
                    None,
                    ErrorCause::from_reqwest(&e, timeout),
                    None,
                );
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let status_code = status.as_u16();
        let status_message = status.canonical_reason().map(str::to_string);
        let headers = response.headers().clone();

        if status.is_success() && request.response_kind == ResponseKind::Stream {
            let stream = response
                .bytes_stream()
                .map(move |chunk| chunk.map_err(|e| ErrorCause::from_reqwest(&e, timeout)))
                .boxed();
            return Outcome::Success(Success {
                status_code,
                status_message,
                headers,
                body: RawBody::Stream(stream),
            });
        }

        // A body cut short is a network fault unless the status already
        // settled the outcome.
        let body = match tokio::time::timeout_at(deadline, response.bytes()).await {
            Ok(Ok(body)) => body,
            _ if !status.is_success() && !is_retryable_status(status_code) => {
                return Outcome::failure(
                    Some(status_code),
                    status_message,
                    ErrorCause::Status(status_code),
                    None,
                );
            }
            Err(_) => return Outcome::network(ErrorCause::Timeout(timeout)),
            Ok(Err(e)) => return Outcome::network(ErrorCause::from_reqwest(&e, timeout)),
        };
        trace!("Response body: {} bytes", body.len());

        if status.is_success() {
            Outcome::Success(Success {
                status_code,
                status_message,
                headers,
                body: RawBody::Buffered(body),
            })
        } else {
            Outcome::failure(
                Some(status_code),
                status_message,
                ErrorCause::Status(status_code),
                Some(body),
            )
        }
    }
}

impl Transport for LocalTransport {
    fn send<'a>(&'a self, request: &'a PreparedRequest, attempt: u32) -> TransportFuture<'a> {
        Box::pin(self.round_trip(request, attempt))
    }
}

/// A send that failed because the caller's body stream broke is not worth
/// retrying: the stream cannot be read again.
async fn body_source_failure(request: &PreparedRequest) -> Option<Outcome> {
    let PreparedBody::Replay(body) = &request.body else {
        return None;
    };
    let message = body.failure().await?;
    Some(Outcome::network(ErrorCause::InvalidRequest(format!(
        "request body stream failed: {message}"
    ))))
}

fn request_body(request: &PreparedRequest) -> Option<reqwest::Body> {
    let progress = request.progress.clone();
    match &request.body {
        PreparedBody::Empty => None,
        PreparedBody::Buffered(bytes) => match progress {
            None => Some(reqwest::Body::from(bytes.clone())),
            Some(progress) => Some(reqwest::Body::wrap_stream(with_progress(
                chunked(bytes.clone()),
                progress,
                request.total_len,
            ))),
        },
        PreparedBody::Replay(replay) => {
            let stream = replay.attempt_stream();
            let stream = match progress {
                Some(progress) => with_progress(stream, progress, request.total_len),
                None => stream,
            };
            Some(reqwest::Body::wrap_stream(stream))
        }
    }
}
