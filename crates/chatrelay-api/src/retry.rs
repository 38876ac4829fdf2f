//! Backoff policy for transient chat-completions failures.

use chatrelay_types::ApiError;
use rand::Rng;
use std::time::Duration;

/// How often and how patiently a failed completion request is retried.
///
/// Delays grow by `backoff_factor` per attempt with ±25 % jitter. A
/// `retry-after` from the server replaces the computed delay. Both are
/// capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Whether attempt number `attempt` (0-based) failing with `error`
    /// should be followed by another one.
    pub fn should_retry(&self, error: &ApiError, attempt: u32) -> bool {
        attempt < self.max_retries && is_transient(error)
    }

    /// Pause before the retry that follows attempt `attempt`.
    pub fn delay(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        let cap = self.max_delay_ms;
        let millis = match retry_after_ms {
            Some(server) => server.min(cap),
            None => {
                let exp = self.initial_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
                let jitter = rand::rng().random_range(0.75..=1.25);
                ((exp.min(cap as f64) * jitter) as u64).min(cap)
            }
        };
        Duration::from_millis(millis)
    }
}

/// 429, 5xx, timeouts and connection failures.
fn is_transient(error: &ApiError) -> bool {
    match error {
        ApiError::RateLimited { .. } | ApiError::Network(_) | ApiError::Timeout => true,
        ApiError::Server { status, .. } => *status >= 500,
        _ => false,
    }
}
