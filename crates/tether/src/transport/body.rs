//! Request bodies that survive retries and report send progress.

use crate::request::{BodyStream, ProgressCallback};
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Chunk size used when a buffered body is fed through a progress callback.
pub const PROGRESS_CHUNK_BYTES: usize = 16 * 1024;

struct ReplayState {
    recorded: Vec<Bytes>,
    /// Chunks taken from the source so far, retained or not.
    pulled: usize,
    retain: bool,
    source: Option<BodyStream>,
    /// First error seen on the source; every later attempt ends with it.
    failed: Option<String>,
}

/// An open body stream that can be sent more than once.
///
/// Each attempt gets a fresh stream that first replays every chunk earlier
/// attempts already pulled, then continues pulling the source. The source
/// itself is only ever read once. A body built with [`single_use`] keeps
/// nothing, so only an attempt that starts before any chunk was pulled can
/// send it.
///
/// A source error is sticky: the failing attempt and every later one end
/// with it instead of a clean, truncated end of body.
///
/// [`single_use`]: ReplayableBody::single_use
#[derive(Clone)]
pub struct ReplayableBody {
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayableBody {
    pub fn new(source: BodyStream) -> Self {
        Self::with_retention(source, true)
    }

    /// Pass `source` through without recording it.
    pub fn single_use(source: BodyStream) -> Self {
        Self::with_retention(source, false)
    }

    fn with_retention(source: BodyStream, retain: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplayState {
                recorded: Vec::new(),
                pulled: 0,
                retain,
                source: Some(source),
                failed: None,
            })),
        }
    }

    /// Why the body could not be sent in full, if it could not.
    pub async fn failure(&self) -> Option<String> {
        self.state.lock().await.failed.clone()
    }

    /// Body stream for one attempt.
    pub fn attempt_stream(&self) -> BodyStream {
        let state = Arc::clone(&self.state);
        futures::stream::unfold((state, 0usize, false), |(state, index, done)| async move {
            if done {
                return None;
            }
            let mut guard = state.lock().await;
            if let Some(chunk) = guard.recorded.get(index).cloned() {
                drop(guard);
                return Some((Ok(chunk), (state, index + 1, false)));
            }
            if index < guard.pulled && guard.failed.is_none() {
                guard.failed = Some("stream body was partly sent and cannot be replayed".into());
            }
            if let Some(message) = guard.failed.clone() {
                drop(guard);
                return Some((Err(io::Error::other(message)), (state, index, true)));
            }
            let source = guard.source.as_mut()?;
            match source.next().await {
                Some(Ok(chunk)) => {
                    guard.pulled += 1;
                    if guard.retain {
                        guard.recorded.push(chunk.clone());
                    }
                    drop(guard);
                    Some((Ok(chunk), (state, index + 1, false)))
                }
                Some(Err(e)) => {
                    guard.failed = Some(e.to_string());
                    guard.source = None;
                    drop(guard);
                    Some((Err(e), (state, index, true)))
                }
                None => {
                    guard.source = None;
                    None
                }
            }
        })
        .boxed()
    }
}

/// Split an in-memory body into chunks so progress can be reported.
pub fn chunked(bytes: Bytes) -> BodyStream {
    let chunks: Vec<Result<Bytes, std::io::Error>> = (0..bytes.len())
        .step_by(PROGRESS_CHUNK_BYTES)
        .map(|start| {
            let end = (start + PROGRESS_CHUNK_BYTES).min(bytes.len());
            Ok(bytes.slice(start..end))
        })
        .collect();
    futures::stream::iter(chunks).boxed()
}

/// Invoke `progress` as each chunk is handed to the transport.
pub fn with_progress(stream: BodyStream, progress: ProgressCallback, total: Option<u64>) -> BodyStream {
    let mut sent = 0u64;
    stream
        .inspect(move |chunk| {
            if let Ok(chunk) = chunk {
                sent += chunk.len() as u64;
                progress(sent, total);
            }
        })
        .boxed()
}
