//! Execution routing and the retry loop.
//!
//! Every call lands here. [`select_transport`] decides, from the request and
//! the environment alone, whether the call may run in the isolated worker.
//! Isolated calls are handed over whole, retry loop included; local calls
//! run [`retry_loop`] in the caller's task around [`Transport::send`].

use crate::cancel::CancelSignal;
use crate::channel::{self, IsolatedTransport, WorkerSettings};
use crate::config::{ClientOptions, ExecutionMode};
use crate::error::{ErrorCause, FailureKind, HttpException};
use crate::normalize;
use crate::outcome::Outcome;
use crate::request::{RequestSpec, ResponseKind};
use crate::response::HttpResponse;
use crate::retry::RetryPolicy;
use crate::transport::{LocalTransport, PreparedRequest, Transport};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Which transport serves a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportChoice {
    /// Caller's task, retried by the router.
    Local,
    /// Isolated worker, retried inside the worker.
    Isolated,
}

/// What the environment offers for this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The platform and the client's [`ExecutionMode`] permit an isolated
    /// worker.
    pub isolation_supported: bool,
    /// The worker is running for this process.
    pub channel_loaded: bool,
}

/// Whether everything the request carries can be copied across the
/// isolation boundary.
///
/// Open body streams, progress callbacks, cancellation signals and lazy
/// streamed responses are live objects and stay in the caller's context.
pub fn request_can_cross_boundary(spec: &RequestSpec) -> bool {
    !spec.body.is_stream()
        && spec.progress.is_none()
        && spec.cancel.is_none()
        && spec.response_kind != ResponseKind::Stream
}

/// Pick the transport for `spec`.
pub fn select_transport(spec: &RequestSpec, caps: Capabilities) -> TransportChoice {
    if caps.isolation_supported && caps.channel_loaded && request_can_cross_boundary(spec) {
        TransportChoice::Isolated
    } else {
        TransportChoice::Local
    }
}

/// Retries spent so far by one logical call. Lives in the call's frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    pub attempts_used: u32,
}

/// Run attempts until the policy says stop.
///
/// `attempt` receives the number of retries already spent. With
/// `max_retries == 0` the policy is never consulted. A fired `cancel` wins
/// over any pending backoff and ends the loop.
pub async fn retry_loop<F, Fut>(
    policy: &RetryPolicy,
    url: &str,
    cancel: Option<&CancelSignal>,
    state: &mut AttemptState,
    mut attempt: F,
) -> Outcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Outcome>,
{
    loop {
        let outcome = attempt(state.attempts_used).await;
        if policy.max_retries == 0 || outcome.is_cancelled() {
            return outcome;
        }

        let decision = policy.evaluate(&outcome, state.attempts_used, url);
        if !decision.should_retry {
            return outcome;
        }
        drop(outcome);

        match cancel {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => return Outcome::cancelled(signal.reason()),
                    _ = tokio::time::sleep(decision.delay) => {}
                }
            }
            None => tokio::time::sleep(decision.delay).await,
        }
        state.attempts_used += 1;
    }
}

/// Dispatches calls and owns their retry bookkeeping.
///
/// Holds only immutable configuration and shared transports, so one router
/// serves any number of concurrent calls.
#[derive(Clone)]
pub struct ExecutionRouter {
    local: Arc<dyn Transport>,
    options: ClientOptions,
    isolation_allowed: bool,
}

impl ExecutionRouter {
    /// Router with the default [`LocalTransport`].
    pub fn new(options: ClientOptions) -> Result<Self, HttpException> {
        let local = LocalTransport::new(&options)
            .map_err(|cause| HttpException::new(FailureKind::Transport, cause))?;
        Ok(Self::with_transport(options, Arc::new(local)))
    }

    /// Router over a caller-supplied local transport.
    pub fn with_transport(options: ClientOptions, local: Arc<dyn Transport>) -> Self {
        let isolation_allowed = options.execution == ExecutionMode::Isolated;
        Self {
            local,
            options,
            isolation_allowed,
        }
    }

    /// Never hand calls to the isolated worker, whatever the options say.
    /// Used when the local transport is a stand-in the worker cannot mirror.
    pub fn local_only(mut self) -> Self {
        self.isolation_allowed = false;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Execute with the client's configured retry settings.
    pub async fn execute(&self, spec: RequestSpec) -> Result<HttpResponse, HttpException> {
        self.execute_with(
            spec,
            self.options.retries,
            self.options.retry_delay_ms,
            self.options.no_logs,
        )
        .await
    }

    /// Execute with explicit retry settings.
    pub async fn execute_with(
        &self,
        spec: RequestSpec,
        retries: u32,
        base_delay_ms: u64,
        suppress_logs: bool,
    ) -> Result<HttpResponse, HttpException> {
        let policy = RetryPolicy::new(retries, base_delay_ms, suppress_logs);
        let caps = self.capabilities(&spec);
        let choice = select_transport(&spec, caps);
        debug!("Routing {} {} via {choice:?}", spec.method, spec.url);
        match choice {
            TransportChoice::Isolated => self.execute_isolated(spec, &policy).await,
            TransportChoice::Local => self.execute_local(spec, &policy).await,
        }
    }

    /// Loads the worker only when this call could actually use it.
    fn capabilities(&self, spec: &RequestSpec) -> Capabilities {
        let isolation_supported = self.isolation_allowed && channel::isolation_supported();
        let channel_loaded = isolation_supported
            && request_can_cross_boundary(spec)
            && channel::ChannelLoader::ensure_loaded(&WorkerSettings::from(&self.options));
        Capabilities {
            isolation_supported,
            channel_loaded,
        }
    }

    async fn execute_isolated(
        &self,
        spec: RequestSpec,
        policy: &RetryPolicy,
    ) -> Result<HttpResponse, HttpException> {
        let kind = spec.response_kind;
        let transport = IsolatedTransport::connect(&WorkerSettings::from(&self.options))
            .ok_or_else(|| {
                HttpException::new(
                    FailureKind::Transport,
                    ErrorCause::Channel("isolated worker is not running".into()),
                )
            })?;
        let (function, args) = channel::call_for(spec, policy)
            .map_err(|cause| HttpException::new(FailureKind::Transport, cause))?;
        let reply = transport
            .run(function, args)
            .await
            .map_err(|cause| HttpException::new(FailureKind::Transport, cause))?;
        normalize::from_channel_reply(reply, kind, policy.max_retries)
    }

    async fn execute_local(
        &self,
        spec: RequestSpec,
        policy: &RetryPolicy,
    ) -> Result<HttpResponse, HttpException> {
        let prepared = PreparedRequest::from_spec(spec, policy.max_retries)
            .map(Arc::new)
            .map_err(|cause| HttpException::new(FailureKind::Transport, cause))?;
        let offload = self.options.execution == ExecutionMode::Offload && prepared.can_offload();
        let url = prepared.url.to_string();
        let mut state = AttemptState::default();

        let outcome = retry_loop(
            policy,
            &url,
            prepared.cancel.as_ref(),
            &mut state,
            |attempt| self.attempt(&prepared, attempt, offload),
        )
        .await;

        normalize::from_outcome(
            outcome,
            prepared.response_kind,
            state.attempts_used,
            prepared.cancel.clone(),
        )
    }

    /// One physical attempt, raced against the cancellation signal.
    async fn attempt(&self, prepared: &Arc<PreparedRequest>, attempt: u32, offload: bool) -> Outcome {
        let send = async {
            if offload {
                let transport = Arc::clone(&self.local);
                let request = Arc::clone(prepared);
                let handle = tokio::spawn(async move { transport.send(&request, attempt).await });
                match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => Outcome::network(ErrorCause::Request(format!(
                        "offloaded attempt did not finish: {e}"
                    ))),
                }
            } else {
                self.local.send(prepared, attempt).await
            }
        };

        match &prepared.cancel {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => Outcome::cancelled(signal.reason()),
                    outcome = send => outcome,
                }
            }
            None => send.await,
        }
    }
}
