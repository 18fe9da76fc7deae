//! Request description handed to the router.

use crate::cancel::CancelSignal;
use bytes::Bytes;
use futures::Stream;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Open byte stream used as a request body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Send-progress callback: `(bytes_sent, total_bytes)`. `total_bytes` is
/// `None` for open streams of unknown length.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// How the response body should be delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// UTF-8 text.
    #[default]
    Text,
    /// Parsed JSON value.
    Json,
    /// Raw bytes.
    Bytes,
    /// Lazy, single-pass sequence of byte chunks.
    Stream,
}

impl ResponseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseKind::Text => "text",
            ResponseKind::Json => "json",
            ResponseKind::Bytes => "bytes",
            ResponseKind::Stream => "stream",
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body.
#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    /// Open stream, pulled once.
    ///
    /// With a retry budget above zero every chunk pulled is kept in memory
    /// until the call finishes, so a retry can resend it; a very large upload
    /// costs its full size in memory. With `retries == 0` nothing is kept and
    /// the stream is passed through as-is.
    Stream(BodyStream),
}

impl RequestBody {
    pub fn is_stream(&self) -> bool {
        matches!(self, RequestBody::Stream(_))
    }

    /// Known length, if the body is already in memory.
    pub fn len(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Text(s) => Some(s.len() as u64),
            RequestBody::Bytes(b) => Some(b.len() as u64),
            RequestBody::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "Empty"),
            RequestBody::Text(s) => write!(f, "Text({} bytes)", s.len()),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        RequestBody::Text(value)
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        RequestBody::Text(value.to_string())
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for RequestBody {
    fn from(value: Bytes) -> Self {
        RequestBody::Bytes(value)
    }
}

/// One logical request: what to send and how to deliver the answer.
///
/// Built with chained `with_*` methods and consumed by
/// [`HttpClient::request`](crate::HttpClient::request). Invalid header names
/// or values are remembered and reported when the request is dispatched, so
/// building never fails.
pub struct RequestSpec {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: RequestBody,
    pub(crate) response_kind: ResponseKind,
    pub(crate) send_timeout: Option<Duration>,
    pub(crate) receive_timeout: Option<Duration>,
    pub(crate) progress: Option<ProgressCallback>,
    pub(crate) cancel: Option<CancelSignal>,
    pub(crate) invalid: Option<String>,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            response_kind: ResponseKind::default(),
            send_timeout: None,
            receive_timeout: None,
            progress: None,
            cancel: None,
            invalid: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add a header. Names are case-insensitive; a repeated name replaces the
    /// earlier value.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.record_invalid(format!("header name '{name}': {e}")),
            (_, Err(e)) => self.record_invalid(format!("header '{name}' value: {e}")),
        }
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the JSON body and set `Content-Type`.
    pub fn with_json_body<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.body = RequestBody::Bytes(Bytes::from(bytes));
                self.headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
            Err(e) => self.record_invalid(format!("JSON body: {e}")),
        }
        self
    }

    pub fn with_stream_body(mut self, stream: BodyStream) -> Self {
        self.body = RequestBody::Stream(stream);
        self
    }

    /// Declare how the response body should be decoded.
    pub fn expect(mut self, kind: ResponseKind) -> Self {
        self.response_kind = kind;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Report send progress. Keeps the request on the local path, since a
    /// callback cannot cross into the isolated worker.
    pub fn on_progress(mut self, callback: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn response_kind(&self) -> ResponseKind {
        self.response_kind
    }

    pub fn has_progress(&self) -> bool {
        self.progress.is_some()
    }

    pub fn cancel_signal(&self) -> Option<&CancelSignal> {
        self.cancel.as_ref()
    }

    /// Per-attempt bound derived from the send and receive timeouts.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        match (self.send_timeout, self.receive_timeout) {
            (None, None) => None,
            (send, receive) => Some(send.unwrap_or_default() + receive.unwrap_or_default()),
        }
    }

    fn record_invalid(&mut self, message: String) {
        if self.invalid.is_none() {
            self.invalid = Some(message);
        }
    }
}

impl fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpec")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("response_kind", &self.response_kind)
            .field("send_timeout", &self.send_timeout)
            .field("receive_timeout", &self.receive_timeout)
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}
