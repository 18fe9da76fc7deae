//! What crosses the isolation boundary: flat, serializable values only.
//!
//! Calls and replies travel as JSON bytes. Binary payloads ride inside as
//! base64 [`TransferBuffer`]s and are re-materialized on the far side.

use crate::error::ErrorCause;
use crate::outcome::{Outcome, RawBody};
use crate::retry::RetryPolicy;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Byte payload in channel-transferable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferBuffer(String);

impl TransferBuffer {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    /// Re-materialize the in-process byte buffer.
    pub fn into_bytes(self) -> Result<Bytes, ErrorCause> {
        STANDARD
            .decode(self.0)
            .map(Bytes::from)
            .map_err(|e| ErrorCause::Channel(format!("corrupt transfer buffer: {e}")))
    }
}

/// Arguments of one channel call, by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<TransferBuffer>,
    pub timeout_ms: Option<u64>,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub no_logs: bool,
}

impl WireRequest {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.retry_delay_ms, self.no_logs)
    }
}

/// `run(function, args)` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCall {
    pub function: String,
    pub args: WireRequest,
}

/// Flat result map sent back by the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<TransferBuffer>,
    pub retry_attempts: u32,
}

impl ChannelReply {
    pub fn from_error(error: ErrorCause, retry_attempts: u32) -> Self {
        Self {
            error: Some(error),
            retry_attempts,
            ..Default::default()
        }
    }

    /// Flatten a final outcome. A streamed body is drained first, since a
    /// lazy stream cannot cross the boundary.
    pub async fn from_outcome(outcome: Outcome, retry_attempts: u32) -> Self {
        match outcome {
            Outcome::Success(success) => {
                let body = match success.body {
                    RawBody::Buffered(bytes) => Ok(bytes),
                    RawBody::Stream(stream) => stream
                        .try_collect::<Vec<Bytes>>()
                        .await
                        .map(|chunks| Bytes::from(chunks.concat())),
                };
                match body {
                    Ok(bytes) => Self {
                        error: None,
                        status_code: Some(success.status_code),
                        status_message: success.status_message,
                        headers: flatten_headers(&success.headers),
                        data: Some(TransferBuffer::from_bytes(&bytes)),
                        retry_attempts,
                    },
                    Err(cause) => Self::from_error(cause, retry_attempts),
                }
            }
            Outcome::Failure(failure) => Self {
                error: Some(failure.error),
                status_code: failure.status_code,
                status_message: failure.status_message,
                headers: Vec::new(),
                data: failure.data.as_deref().map(TransferBuffer::from_bytes),
                retry_attempts,
            },
        }
    }
}

pub fn flatten_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Rebuild a header map, dropping entries that are no longer valid.
pub fn restore_headers(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ErrorCause> {
    serde_json::to_vec(value).map_err(|e| ErrorCause::Channel(format!("failed to encode: {e}")))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ErrorCause> {
    serde_json::from_slice(bytes).map_err(|e| ErrorCause::Channel(format!("failed to decode: {e}")))
}
