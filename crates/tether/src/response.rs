//! The one success shape callers ever observe.

use crate::error::HttpException;
use crate::request::ResponseKind;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::fmt;
use std::pin::Pin;

/// Lazy, single-pass sequence of response body chunks.
///
/// Ends early with a final `Err` when the request's cancellation signal fires
/// or the connection breaks mid-body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpException>> + Send>>;

/// Decoded response body, shaped by the request's [`ResponseKind`].
pub enum ResponseData {
    Text(String),
    Json(serde_json::Value),
    Bytes(Bytes),
    Stream(ByteStream),
}

impl ResponseData {
    pub fn kind(&self) -> ResponseKind {
        match self {
            ResponseData::Text(_) => ResponseKind::Text,
            ResponseData::Json(_) => ResponseKind::Json,
            ResponseData::Bytes(_) => ResponseKind::Bytes,
            ResponseData::Stream(_) => ResponseKind::Stream,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseData::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseData::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ResponseData::Bytes(b) => Some(b),
            ResponseData::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn into_stream(self) -> Option<ByteStream> {
        match self {
            ResponseData::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Deserialize a JSON body into `T`.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            ResponseData::Json(v) => T::deserialize(v),
            ResponseData::Text(s) => serde_json::from_str(s),
            ResponseData::Bytes(b) => serde_json::from_slice(b),
            ResponseData::Stream(_) => Err(serde::de::Error::custom(
                "a streaming body must be consumed through its chunks",
            )),
        }
    }
}

impl fmt::Debug for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseData::Text(s) => f.debug_tuple("Text").field(s).finish(),
            ResponseData::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ResponseData::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ResponseData::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

/// Canonical successful response.
#[derive(Debug)]
pub struct HttpResponse {
    pub data: ResponseData,
    pub status_code: Option<u16>,
    pub status_message: Option<String>,
    pub headers: HeaderMap,
    /// Retries the policy approved before this response arrived.
    pub retry_attempts: u32,
}
