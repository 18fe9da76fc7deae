//! HTTP requests with one retry policy and one result shape, wherever they run.
//!
//! `tether` wraps [`reqwest`] behind an [`HttpClient`] that retries transient
//! failures with exponential backoff and reports every outcome as either an
//! [`HttpResponse`] or an [`HttpException`]. Eligible calls run on an
//! isolated worker thread with its own runtime and HTTP client; calls that
//! carry live objects (stream bodies, progress callbacks, cancellation
//! signals, streamed responses) run in the caller's task. Both paths apply
//! the same retry loop and report the same attempt counts.
//!
//! # Getting started
//!
//! ```no_run
//! use tether::{HttpClient, ResponseKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tether::HttpException> {
//!     let client = HttpClient::new()?;
//!     let response = client.get("https://example.com/health", ResponseKind::Text).await?;
//!     println!("{} after {} retries", response.status_code.unwrap_or(0), response.retry_attempts);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Build a request:** [`RequestSpec`] with its `with_*` builders, and
//!   [`ResponseKind`] for how the body should be decoded.
//! - **Tune retries and execution:** [`ClientOptions`] and [`ExecutionMode`].
//!   The backoff schedule and retryable status set live in [`retry`].
//! - **Cancel a call:** hand a [`CancelSignal`] to the request and fire it
//!   from anywhere.
//! - **Plug in another HTTP stack:** implement [`Transport`] and pass it to
//!   [`HttpClient::with_transport`].
//! - **Observe attempts:** implement [`Interceptor`] and install it on a
//!   [`LocalTransport`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`router`] | Transport selection and the retry loop |
//! | [`retry`] | Retryable statuses, backoff schedule, [`RetryPolicy`] |
//! | [`transport`] | [`Transport`] trait, [`LocalTransport`], interceptors, replayable bodies |
//! | [`channel`] | Isolated worker, its loader and by-value wire format |
//! | [`normalize`] | Decoding and error classification |

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod normalize;
pub mod outcome;
pub mod prelude;
pub mod request;
pub mod response;
pub mod retry;
pub mod router;
pub mod transport;

pub use cancel::CancelSignal;
pub use config::{ClientOptions, ExecutionMode};
pub use error::{ErrorCause, FailureKind, HttpException};
pub use request::{RequestBody, RequestSpec, ResponseKind};
pub use response::{ByteStream, HttpResponse, ResponseData};
pub use retry::RetryPolicy;
pub use router::ExecutionRouter;
pub use transport::{Interceptor, LocalTransport, Transport};

use serde::de::DeserializeOwned;
use std::sync::Arc;

// ── Client ─────────────────────────────────────────────────────────

/// Entry point for making requests.
///
/// Cheap to clone; clones share configuration and connection pools.
#[derive(Clone)]
pub struct HttpClient {
    router: ExecutionRouter,
}

impl HttpClient {
    /// Client with default [`ClientOptions`].
    pub fn new() -> Result<Self, HttpException> {
        Self::with_options(ClientOptions::default())
    }

    pub fn with_options(options: ClientOptions) -> Result<Self, HttpException> {
        Ok(Self {
            router: ExecutionRouter::new(options)?,
        })
    }

    /// Client over a custom transport. Every call runs in the caller's
    /// context, since the isolated worker cannot use a caller's transport.
    pub fn with_transport(options: ClientOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            router: ExecutionRouter::with_transport(options, transport).local_only(),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        self.router.options()
    }

    /// Execute `spec` with the client's retry settings.
    pub async fn request(&self, spec: RequestSpec) -> Result<HttpResponse, HttpException> {
        self.router.execute(spec).await
    }

    /// Execute `spec` with retry settings for this call only.
    pub async fn request_with_retries(
        &self,
        spec: RequestSpec,
        retries: u32,
        retry_delay_ms: u64,
    ) -> Result<HttpResponse, HttpException> {
        let no_logs = self.options().no_logs;
        self.router.execute_with(spec, retries, retry_delay_ms, no_logs).await
    }

    // ── Convenience ────────────────────────────────────────────────

    pub async fn get(&self, url: &str, kind: ResponseKind) -> Result<HttpResponse, HttpException> {
        self.request(RequestSpec::get(url).expect(kind)).await
    }

    pub async fn get_text(&self, url: &str) -> Result<String, HttpException> {
        let response = self.get(url, ResponseKind::Text).await?;
        match response.data {
            ResponseData::Text(text) => Ok(text),
            other => Err(unexpected(ResponseKind::Text, &other, response.retry_attempts)),
        }
    }

    /// GET and deserialize a JSON body into `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpException> {
        let response = self.get(url, ResponseKind::Json).await?;
        response.data.json_as().map_err(|e| {
            HttpException::new(
                FailureKind::Decode,
                ErrorCause::Decode {
                    kind: ResponseKind::Json.to_string(),
                    message: e.to_string(),
                },
            )
            .with_retry_attempts(response.retry_attempts)
        })
    }

    pub async fn get_bytes(&self, url: &str) -> Result<bytes::Bytes, HttpException> {
        let response = self.get(url, ResponseKind::Bytes).await?;
        match response.data {
            ResponseData::Bytes(bytes) => Ok(bytes),
            other => Err(unexpected(ResponseKind::Bytes, &other, response.retry_attempts)),
        }
    }

    /// GET a body as a lazy chunk stream. Firing `cancel` stops the stream
    /// with a final cancellation error.
    pub async fn get_stream(
        &self,
        url: &str,
        cancel: Option<CancelSignal>,
    ) -> Result<ByteStream, HttpException> {
        let mut spec = RequestSpec::get(url).expect(ResponseKind::Stream);
        if let Some(signal) = cancel {
            spec = spec.with_cancel(signal);
        }
        let response = self.request(spec).await?;
        let attempts = response.retry_attempts;
        match response.data {
            ResponseData::Stream(stream) => Ok(stream),
            other => Err(unexpected(ResponseKind::Stream, &other, attempts)),
        }
    }

    pub async fn post(
        &self,
        url: &str,
        body: impl Into<RequestBody>,
        kind: ResponseKind,
    ) -> Result<HttpResponse, HttpException> {
        self.request(RequestSpec::post(url).with_body(body).expect(kind)).await
    }
}

fn unexpected(expected: ResponseKind, data: &ResponseData, retry_attempts: u32) -> HttpException {
    HttpException::new(
        FailureKind::Decode,
        ErrorCause::Decode {
            kind: expected.to_string(),
            message: format!("received a {} body", data.kind()),
        },
    )
    .with_retry_attempts(retry_attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Outcome, RawBody, Success};
    use crate::transport::{PreparedRequest, TransportFuture};
    use bytes::Bytes;

    struct Fixed(&'static [u8]);

    impl Transport for Fixed {
        fn send<'a>(&'a self, _request: &'a PreparedRequest, _attempt: u32) -> TransportFuture<'a> {
            let body = Bytes::from_static(self.0);
            Box::pin(async move {
                Outcome::Success(Success {
                    status_code: 200,
                    status_message: Some("OK".into()),
                    headers: Default::default(),
                    body: RawBody::Buffered(body),
                })
            })
        }
    }

    fn client(body: &'static [u8]) -> HttpClient {
        HttpClient::with_transport(ClientOptions::default(), Arc::new(Fixed(body)))
    }

    #[derive(Debug, serde::Deserialize)]
    struct Message {
        message: String,
    }

    #[tokio::test]
    async fn get_json_deserializes_typed_value() {
        let message: Message = client(br#"{"message":"ok"}"#)
            .get_json("http://example.test/json")
            .await
            .unwrap();
        assert_eq!(message.message, "ok");
    }

    #[tokio::test]
    async fn get_json_reports_shape_mismatch_as_decode() {
        let err = client(b"[1,2]")
            .get_json::<Message>("http://example.test/json")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Decode);
    }

    #[tokio::test]
    async fn get_text_and_bytes() {
        let client = client(b"ok");
        assert_eq!(client.get_text("http://example.test/").await.unwrap(), "ok");
        assert_eq!(
            client.get_bytes("http://example.test/").await.unwrap(),
            Bytes::from_static(b"ok")
        );
    }

    #[test]
    fn custom_transport_client_keeps_options() {
        let options = ClientOptions::default().with_retries(2);
        let client = HttpClient::with_transport(options, Arc::new(Fixed(b"")));
        assert_eq!(client.options().retries, 2);
    }
}
