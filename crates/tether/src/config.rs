//! Client construction options.

use std::time::Duration;

/// Default number of retries per call.
pub const DEFAULT_RETRIES: u32 = 8;

/// Default delay before the first retry, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// Default wall-clock bound on one attempt (connect + receive).
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound on establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_USER_AGENT: &str = concat!("tether/", env!("CARGO_PKG_VERSION"));

/// Where eligible requests run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Hand eligible requests to the isolated worker thread; everything else
    /// runs in the caller's task.
    #[default]
    Isolated,
    /// Always run in the caller's task.
    Local,
    /// Run in the caller's task, but spawn each eligible attempt onto the
    /// tokio runtime so the caller's task never drives the I/O itself.
    Offload,
}

/// Immutable configuration shared by every call made through one client.
///
/// # Example
///
/// ```
/// use tether::{ClientOptions, ExecutionMode};
///
/// let options = ClientOptions::default()
///     .with_retries(4)
///     .with_retry_delay_ms(0)
///     .with_execution(ExecutionMode::Local);
/// assert_eq!(options.retries, 4);
/// assert!(!options.no_logs);
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Maximum retries per call (0 = single attempt).
    pub retries: u32,
    /// Base backoff delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Suppress the per-retry diagnostic line.
    pub no_logs: bool,
    pub execution: ExecutionMode,
    /// Per-attempt bound used when a request sets no timeouts of its own.
    pub attempt_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            no_logs: false,
            execution: ExecutionMode::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientOptions {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_no_logs(mut self, no_logs: bool) -> Self {
        self.no_logs = no_logs;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
