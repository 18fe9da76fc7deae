//! Caller-owned cancellation signal.

use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

const DEFAULT_REASON: &str = "request cancelled";

/// Cooperative cancellation for one request.
///
/// Clone it, hand one copy to the request, keep the other. Firing it aborts
/// the in-flight attempt (or the backoff sleep, or the response stream) and
/// makes the call fail with the supplied reason. No retry follows a
/// cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| DEFAULT_REASON.to_string())
    }

    /// Resolves once the signal fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}
