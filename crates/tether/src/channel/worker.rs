//! The isolated worker: a dedicated thread with its own current-thread
//! runtime and HTTP client.
//!
//! Nothing is shared with callers. Calls arrive as encoded
//! [`ChannelCall`] bytes and leave as encoded [`ChannelReply`] bytes; each
//! call runs as its own task on the worker runtime, retry loop included.

use super::WorkerSettings;
use super::wire::{self, ChannelCall, ChannelReply, WireRequest, restore_headers};
use crate::error::ErrorCause;
use crate::outcome::Outcome;
use crate::request::ResponseKind;
use crate::router::{AttemptState, retry_loop};
use crate::transport::{LocalTransport, PreparedBody, PreparedRequest, Transport};
use reqwest::{Method, Url};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// One call in flight: encoded arguments and where to send the encoded reply.
pub(crate) struct Job {
    pub payload: Vec<u8>,
    pub reply: oneshot::Sender<Vec<u8>>,
}

/// Sending half of the worker's job queue.
pub(crate) struct WorkerHandle {
    pub jobs: mpsc::UnboundedSender<Job>,
}

/// Start the worker thread and wait until it can take calls.
pub(crate) fn spawn(settings: &WorkerSettings) -> Result<WorkerHandle, String> {
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let options = settings.to_options();

    std::thread::Builder::new()
        .name("tether-worker".into())
        .spawn(move || run(options, jobs_rx, ready_tx))
        .map_err(|e| format!("failed to spawn worker thread: {e}"))?;

    ready_rx
        .recv()
        .map_err(|_| "worker thread exited during startup".to_string())??;
    Ok(WorkerHandle { jobs: jobs_tx })
}

fn run(
    options: crate::config::ClientOptions,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    ready: std::sync::mpsc::Sender<Result<(), String>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to build worker runtime: {e}")));
            return;
        }
    };

    runtime.block_on(async move {
        let transport = match LocalTransport::new(&options) {
            Ok(t) => Arc::new(t),
            Err(cause) => {
                let _ = ready.send(Err(cause.to_string()));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        debug!("Isolated worker ready");

        while let Some(job) = jobs.recv().await {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                let reply = handle(&transport, &job.payload).await;
                if job.reply.send(reply).is_err() {
                    debug!("Caller went away before the isolated reply arrived");
                }
            });
        }
        error!("Isolated worker job queue closed");
    });
}

/// Calls the worker has taken off its queue since the process started.
static CALLS_SERVED: AtomicU64 = AtomicU64::new(0);

pub(crate) fn calls_served() -> u64 {
    CALLS_SERVED.load(Ordering::Relaxed)
}

async fn handle(transport: &LocalTransport, payload: &[u8]) -> Vec<u8> {
    CALLS_SERVED.fetch_add(1, Ordering::Relaxed);
    let reply = match wire::decode::<ChannelCall>(payload) {
        Ok(call) => dispatch(transport, call).await,
        Err(cause) => ChannelReply::from_error(cause, 0),
    };
    // An empty payload fails to decode on the caller side and is reported there.
    wire::encode(&reply).unwrap_or_default()
}

async fn dispatch(transport: &LocalTransport, call: ChannelCall) -> ChannelReply {
    let method = match call.function.as_str() {
        "get" => Method::GET,
        "post" => Method::POST,
        "request" => match Method::from_bytes(call.args.method.as_bytes()) {
            Ok(m) => m,
            Err(e) => {
                return ChannelReply::from_error(
                    ErrorCause::InvalidRequest(format!("method '{}': {e}", call.args.method)),
                    0,
                );
            }
        },
        other => {
            return ChannelReply::from_error(
                ErrorCause::Channel(format!("unknown channel function '{other}'")),
                0,
            );
        }
    };

    let policy = call.args.policy();
    let request = match prepare(method, call.args) {
        Ok(r) => r,
        Err(cause) => return ChannelReply::from_error(cause, 0),
    };
    let url = request.url.to_string();
    let mut state = AttemptState::default();

    let outcome: Outcome = retry_loop(&policy, &url, None, &mut state, |attempt| {
        transport.send(&request, attempt)
    })
    .await;
    ChannelReply::from_outcome(outcome, state.attempts_used).await
}

/// Rebuild a sendable request from its by-value form.
fn prepare(method: Method, args: WireRequest) -> Result<PreparedRequest, ErrorCause> {
    let url = Url::parse(&args.url)
        .map_err(|e| ErrorCause::InvalidRequest(format!("URL '{}': {e}", args.url)))?;
    let body = match args.body {
        Some(buffer) => PreparedBody::Buffered(buffer.into_bytes()?),
        None => PreparedBody::Empty,
    };
    let total_len = match &body {
        PreparedBody::Buffered(b) => Some(b.len() as u64),
        _ => Some(0),
    };
    Ok(PreparedRequest {
        method,
        url,
        headers: restore_headers(&args.headers),
        body,
        response_kind: ResponseKind::Bytes,
        timeout: args.timeout_ms.map(Duration::from_millis),
        progress: None,
        total_len,
        cancel: None,
    })
}
