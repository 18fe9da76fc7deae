//! Retry decisions with exponential backoff.
//!
//! Retries transient failures: any status in [`RETRYABLE_STATUS_CODES`]
//! (request timeout, rate limiting, gateway and origin errors) and any
//! attempt that failed without a status at all (connection refused or reset,
//! timeout). Everything else (400, 401, 404 and friends) is terminal and
//! never retried, no matter how much budget is left.
//!
//! The delay before retry `k` (zero-indexed, counting retries already spent)
//! is `base_delay_ms * 1.5^k`. There is no jitter and no cap; `max_retries`
//! alone bounds the sequence.

use crate::error::ErrorCause;
use crate::outcome::Outcome;
use std::time::Duration;
use tracing::warn;

/// Status codes treated as transient server or network conditions.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[
    408, 429, 440, 460, 499, 500, 502, 503, 504, 520, 521, 522, 523, 524, 525, 527, 598, 599,
];

/// Growth factor applied per retry already spent.
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Whether a status code belongs to the retryable set.
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Whether a failed attempt is transient.
///
/// Failures without a status are transient, except the ones the caller or
/// the request itself caused: cancellation, decode errors and malformed
/// requests would fail the same way again.
pub fn is_retryable_failure(status_code: Option<u16>, cause: &ErrorCause) -> bool {
    match cause {
        ErrorCause::Cancelled(_) | ErrorCause::Decode { .. } | ErrorCause::InvalidRequest(_) => {
            false
        }
        _ => status_code.is_none_or(is_retryable_status),
    }
}

/// Whether an attempt's outcome warrants another attempt, budget permitting.
pub fn is_retryable(outcome: &Outcome) -> bool {
    match outcome {
        Outcome::Success(_) => false,
        Outcome::Failure(f) => is_retryable_failure(f.status_code, &f.error),
    }
}

/// Delay before the retry that follows `attempt` retries already spent.
pub fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let millis = base_delay_ms as f64 * BACKOFF_MULTIPLIER.powi(attempt as i32);
    Duration::from_nanos((millis * 1_000_000.0).round() as u64)
}

/// Verdict for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub const STOP: RetryDecision = RetryDecision {
        should_retry: false,
        delay: Duration::ZERO,
    };
}

/// Decide whether to retry after `outcome`, given `attempt` retries spent.
pub fn decide(outcome: &Outcome, attempt: u32, max_retries: u32, base_delay_ms: u64) -> RetryDecision {
    if attempt < max_retries && is_retryable(outcome) {
        RetryDecision {
            should_retry: true,
            delay: backoff_delay(base_delay_ms, attempt),
        }
    } else {
        RetryDecision::STOP
    }
}

/// Immutable retry settings for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = a single attempt, no retries).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Silence the per-retry diagnostic line.
    pub suppress_logs: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, suppress_logs: bool) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            suppress_logs,
        }
    }

    /// [`decide`] plus the diagnostic line for every approved retry.
    pub fn evaluate(&self, outcome: &Outcome, attempt: u32, url: &str) -> RetryDecision {
        let decision = decide(outcome, attempt, self.max_retries, self.base_delay_ms);
        if decision.should_retry && !self.suppress_logs {
            let status = outcome
                .status_code()
                .map_or_else(|| "none".to_string(), |s| s.to_string());
            let message = match outcome {
                Outcome::Failure(f) => f
                    .status_message
                    .clone()
                    .unwrap_or_else(|| f.error.to_string()),
                Outcome::Success(_) => String::new(),
            };
            warn!(
                "Retrying {url} (status {status}: {message}), attempt {}/{} in {:?}",
                attempt + 1,
                self.max_retries,
                decision.delay,
            );
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_failure(code: u16) -> Outcome {
        Outcome::failure(Some(code), None, ErrorCause::Status(code), None)
    }

    fn success() -> Outcome {
        Outcome::Success(crate::outcome::Success {
            status_code: 200,
            status_message: Some("OK".into()),
            headers: Default::default(),
            body: crate::outcome::RawBody::Buffered(bytes::Bytes::from_static(b"ok")),
        })
    }

    #[test]
    fn every_listed_status_is_retried() {
        for &code in RETRYABLE_STATUS_CODES {
            let d = decide(&status_failure(code), 0, 3, 200);
            assert!(d.should_retry, "status {code} should be retried");
        }
    }

    #[test]
    fn terminal_statuses_never_retried() {
        for code in [400, 401, 403, 404, 409, 422, 501, 505] {
            let d = decide(&status_failure(code), 0, 8, 200);
            assert_eq!(d, RetryDecision::STOP, "status {code} must be terminal");
        }
    }

    #[test]
    fn statusless_network_failure_is_transient() {
        let reset = Outcome::network(ErrorCause::Connect("connection reset".into()));
        assert!(decide(&reset, 0, 1, 10).should_retry);

        let timed_out = Outcome::network(ErrorCause::Timeout(Duration::from_secs(5)));
        assert!(decide(&timed_out, 0, 1, 10).should_retry);
    }

    #[test]
    fn cancellation_and_bad_requests_not_retried() {
        assert!(!is_retryable(&Outcome::cancelled("stop")));
        assert!(!is_retryable(&Outcome::network(ErrorCause::InvalidRequest(
            "bad header".into()
        ))));
    }

    #[test]
    fn success_is_never_retried() {
        assert_eq!(decide(&success(), 0, 8, 200), RetryDecision::STOP);
    }

    #[test]
    fn budget_bounds_retries() {
        let outcome = status_failure(503);
        assert!(decide(&outcome, 3, 4, 0).should_retry);
        assert!(!decide(&outcome, 4, 4, 0).should_retry);
        assert!(!decide(&outcome, 0, 0, 0).should_retry);
    }

    #[test]
    fn delay_is_base_times_one_and_a_half_to_the_attempt() {
        assert_eq!(backoff_delay(200, 0), Duration::from_millis(200));
        assert_eq!(backoff_delay(200, 1), Duration::from_millis(300));
        assert_eq!(backoff_delay(200, 2), Duration::from_millis(450));
        assert_eq!(backoff_delay(200, 3), Duration::from_millis(675));
        assert_eq!(backoff_delay(200, 4), Duration::from_micros(1_012_500));
        assert_eq!(backoff_delay(0, 7), Duration::ZERO);
    }

    #[test]
    fn decision_delay_matches_backoff() {
        let outcome = status_failure(429);
        for k in 0..8 {
            let d = decide(&outcome, k, 8, 100);
            assert_eq!(d.delay, backoff_delay(100, k));
        }
    }

    #[test]
    fn evaluate_agrees_with_decide() {
        let policy = RetryPolicy::new(2, 50, true);
        let outcome = status_failure(502);
        assert_eq!(
            policy.evaluate(&outcome, 1, "http://example.test"),
            decide(&outcome, 1, 2, 50)
        );
    }
}
