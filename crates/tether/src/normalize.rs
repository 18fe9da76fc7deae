//! Turns raw outcomes and channel replies into [`HttpResponse`] or
//! [`HttpException`].

use crate::cancel::CancelSignal;
use crate::channel::wire::{ChannelReply, restore_headers};
use crate::error::{ErrorCause, FailureKind, HttpException};
use crate::outcome::{Outcome, RawBody, RawStream};
use crate::request::ResponseKind;
use crate::response::{ByteStream, HttpResponse, ResponseData};
use crate::retry::is_retryable_failure;
use bytes::Bytes;
use futures::StreamExt;
use tracing::debug;

/// Decode a complete body as `kind`.
///
/// An empty JSON body reads as `null`. A `Stream` kind yields the buffer as a
/// single chunk.
pub fn decode(kind: ResponseKind, body: Bytes) -> Result<ResponseData, ErrorCause> {
    match kind {
        ResponseKind::Text => String::from_utf8(body.to_vec())
            .map(ResponseData::Text)
            .map_err(|e| ErrorCause::decode(kind.as_str(), e)),
        ResponseKind::Json if body.is_empty() => Ok(ResponseData::Json(serde_json::Value::Null)),
        ResponseKind::Json => serde_json::from_slice(&body)
            .map(ResponseData::Json)
            .map_err(|e| ErrorCause::decode(kind.as_str(), e)),
        ResponseKind::Bytes => Ok(ResponseData::Bytes(body)),
        ResponseKind::Stream => Ok(ResponseData::Stream(Box::pin(futures::stream::once(
            async move { Ok(body) },
        )))),
    }
}

/// Classify a call that ended in failure.
///
/// The retry loop only stops on a transient failure once the budget is spent,
/// so a retryable cause at this point means the budget ran out.
pub fn failure_kind(status_code: Option<u16>, cause: &ErrorCause) -> FailureKind {
    match cause {
        ErrorCause::Cancelled(_) => FailureKind::Cancelled,
        ErrorCause::Decode { .. } => FailureKind::Decode,
        ErrorCause::InvalidRequest(_) | ErrorCause::Channel(_) => FailureKind::Transport,
        _ if is_retryable_failure(status_code, cause) => FailureKind::RetryExhausted,
        _ => FailureKind::Terminal,
    }
}

fn exception(
    status_code: Option<u16>,
    status_message: Option<String>,
    cause: ErrorCause,
    data: Option<Bytes>,
    retry_attempts: u32,
) -> HttpException {
    HttpException::new(failure_kind(status_code, &cause), cause)
        .with_retry_attempts(retry_attempts)
        .with_status(status_code, status_message)
        .with_partial_data(data)
}

fn decode_failure(cause: ErrorCause, body: Bytes, retry_attempts: u32) -> HttpException {
    exception(None, None, cause, Some(body), retry_attempts)
}

/// Normalize the final outcome of a locally executed call.
///
/// `cancel` guards a streamed body: once it fires the stream yields one
/// cancellation error and ends.
pub fn from_outcome(
    outcome: Outcome,
    kind: ResponseKind,
    retry_attempts: u32,
    cancel: Option<CancelSignal>,
) -> Result<HttpResponse, HttpException> {
    let success = match outcome {
        Outcome::Success(success) => success,
        Outcome::Failure(f) => {
            return Err(exception(
                f.status_code,
                f.status_message,
                f.error,
                f.data,
                retry_attempts,
            ));
        }
    };

    let data = match (success.body, kind) {
        (RawBody::Stream(raw), ResponseKind::Stream) => {
            ResponseData::Stream(guard_stream(raw, cancel, retry_attempts))
        }
        (RawBody::Stream(_), kind) => {
            return Err(exception(
                None,
                None,
                ErrorCause::decode(kind.as_str(), "transport returned an unbuffered body"),
                None,
                retry_attempts,
            ));
        }
        (RawBody::Buffered(body), kind) => match decode(kind, body.clone()) {
            Ok(data) => data,
            Err(cause) => return Err(decode_failure(cause, body, retry_attempts)),
        },
    };

    Ok(HttpResponse {
        data,
        status_code: Some(success.status_code),
        status_message: success.status_message,
        headers: success.headers,
        retry_attempts,
    })
}

/// Normalize a reply from the isolated worker.
///
/// The worker's attempt count is taken as given, clamped to `max_retries`.
pub fn from_channel_reply(
    reply: ChannelReply,
    kind: ResponseKind,
    max_retries: u32,
) -> Result<HttpResponse, HttpException> {
    let retry_attempts = if reply.retry_attempts > max_retries {
        debug!(
            "Isolated worker reported {} retries with a budget of {max_retries}; clamping",
            reply.retry_attempts
        );
        max_retries
    } else {
        reply.retry_attempts
    };

    let data = match reply.data.map(|buffer| buffer.into_bytes()).transpose() {
        Ok(data) => data,
        Err(cause) => {
            return Err(HttpException::new(FailureKind::Transport, cause)
                .with_retry_attempts(retry_attempts));
        }
    };

    if let Some(cause) = reply.error {
        return Err(exception(
            reply.status_code,
            reply.status_message,
            cause,
            data,
            retry_attempts,
        ));
    }

    let body = data.unwrap_or_default();
    let data = match decode(kind, body.clone()) {
        Ok(data) => data,
        Err(cause) => return Err(decode_failure(cause, body, retry_attempts)),
    };
    Ok(HttpResponse {
        data,
        status_code: reply.status_code,
        status_message: reply.status_message,
        headers: restore_headers(&reply.headers),
        retry_attempts,
    })
}

fn guard_stream(raw: RawStream, cancel: Option<CancelSignal>, retry_attempts: u32) -> ByteStream {
    let chunks = raw.map(move |chunk| {
        chunk.map_err(|cause| {
            HttpException::new(FailureKind::Transport, cause).with_retry_attempts(retry_attempts)
        })
    });
    let Some(signal) = cancel else {
        return Box::pin(chunks);
    };

    Box::pin(futures::stream::unfold(
        Some((chunks, signal)),
        move |state| async move {
            let (mut chunks, signal) = state?;
            tokio::select! {
                biased;
                _ = signal.cancelled() => Some((
                    Err(HttpException::cancelled(signal.reason(), retry_attempts)),
                    None,
                )),
                chunk = chunks.next() => chunk.map(|chunk| (chunk, Some((chunks, signal)))),
            }
        },
    ))
}
