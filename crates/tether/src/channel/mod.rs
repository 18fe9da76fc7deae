//! The isolated execution context.
//!
//! A single worker thread per process, started lazily by [`ChannelLoader`]
//! and reached through [`IsolatedTransport::run`]. Arguments and results
//! cross by value (see [`wire`]); nothing is shared between the caller and
//! the worker.

pub mod wire;
mod worker;

use crate::config::ClientOptions;
use crate::error::ErrorCause;
use crate::request::RequestSpec;
use crate::retry::RetryPolicy;
use crate::transport::{PreparedBody, PreparedRequest};
use reqwest::Method;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use wire::{ChannelCall, ChannelReply, TransferBuffer, WireRequest, flatten_headers};
use worker::{Job, WorkerHandle};

/// Whether this platform can host an isolated worker at all.
pub fn isolation_supported() -> bool {
    cfg!(not(target_arch = "wasm32"))
}

/// Client settings the worker is built with.
///
/// The worker is process-wide, so the first client that loads it decides
/// these; later clients share the running worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub connect_timeout: Duration,
    pub attempt_timeout: Duration,
    pub user_agent: String,
}

impl From<&ClientOptions> for WorkerSettings {
    fn from(options: &ClientOptions) -> Self {
        Self {
            connect_timeout: options.connect_timeout,
            attempt_timeout: options.attempt_timeout,
            user_agent: options.user_agent.clone(),
        }
    }
}

impl WorkerSettings {
    pub(crate) fn to_options(&self) -> ClientOptions {
        ClientOptions::default()
            .with_connect_timeout(self.connect_timeout)
            .with_attempt_timeout(self.attempt_timeout)
            .with_user_agent(self.user_agent.clone())
    }
}

static WORKER: OnceLock<Option<WorkerHandle>> = OnceLock::new();

/// Starts the isolated worker at most once per process.
pub struct ChannelLoader;

impl ChannelLoader {
    /// Start the worker if nobody has tried yet. A failed start is remembered
    /// and every later call runs locally.
    pub fn ensure_loaded(settings: &WorkerSettings) -> bool {
        Self::handle(settings).is_some()
    }

    /// Whether a worker is running, without trying to start one.
    pub fn is_loaded() -> bool {
        matches!(WORKER.get(), Some(Some(_)))
    }

    /// Calls the worker has served so far in this process.
    pub fn calls_served() -> u64 {
        worker::calls_served()
    }

    fn handle(settings: &WorkerSettings) -> Option<&'static WorkerHandle> {
        WORKER
            .get_or_init(|| match worker::spawn(settings) {
                Ok(handle) => {
                    debug!("Isolated worker started");
                    Some(handle)
                }
                Err(e) => {
                    warn!("Isolated worker unavailable, requests will run locally: {e}");
                    None
                }
            })
            .as_ref()
    }
}

/// Caller-side end of the channel to the isolated worker.
pub struct IsolatedTransport {
    handle: &'static WorkerHandle,
}

impl IsolatedTransport {
    /// Connect to the worker, starting it if needed.
    pub fn connect(settings: &WorkerSettings) -> Option<Self> {
        ChannelLoader::handle(settings).map(|handle| Self { handle })
    }

    /// Invoke `function` in the worker and wait for its flat reply.
    pub async fn run(&self, function: &str, args: WireRequest) -> Result<ChannelReply, ErrorCause> {
        let payload = wire::encode(&ChannelCall {
            function: function.to_string(),
            args,
        })?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.handle
            .jobs
            .send(Job {
                payload,
                reply: reply_tx,
            })
            .map_err(|_| ErrorCause::Channel("isolated worker is gone".into()))?;
        let bytes = reply_rx
            .await
            .map_err(|_| ErrorCause::Channel("isolated worker dropped the call".into()))?;
        wire::decode(&bytes)
    }
}

/// Express `spec` as a channel call.
///
/// Validation happens here, before anything crosses, so an invalid URL or
/// header fails the same way it would locally.
pub fn call_for(
    spec: RequestSpec,
    policy: &RetryPolicy,
) -> Result<(&'static str, WireRequest), ErrorCause> {
    let prepared = PreparedRequest::from_spec(spec, policy.max_retries)?;
    let function = match prepared.method {
        Method::GET => "get",
        Method::POST => "post",
        _ => "request",
    };
    let body = match &prepared.body {
        PreparedBody::Empty => None,
        PreparedBody::Buffered(bytes) => Some(TransferBuffer::from_bytes(bytes)),
        PreparedBody::Replay(_) => {
            return Err(ErrorCause::Channel(
                "stream bodies cannot cross the isolation boundary".into(),
            ));
        }
    };
    let args = WireRequest {
        method: prepared.method.to_string(),
        url: prepared.url.to_string(),
        headers: flatten_headers(&prepared.headers),
        body,
        timeout_ms: prepared.timeout.map(|t| t.as_millis() as u64),
        retries: policy.max_retries,
        retry_delay_ms: policy.base_delay_ms,
        no_logs: policy.suppress_logs,
    };
    Ok((function, args))
}
