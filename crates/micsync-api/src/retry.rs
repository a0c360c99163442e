// ── Retry and backoff policy ──
//
// Shared by the REST client (transient failures, 5xx, 429 cooldowns) and
// the push stream reconnect loop.

use std::time::Duration;

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Cooldown applied after HTTP 429 when the server gives no hint.
    pub default_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            default_cooldown: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` (zero-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.initial_delay, self.max_delay)
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
///
/// The jitter is deterministic per attempt; it only needs to spread out
/// reconnect storms, not be unpredictable.
pub fn calculate_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exp = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = initial.as_secs_f64() * 2.0_f64.powi(exp);
    let capped = base.min(max.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).clamp(0.0, max.as_secs_f64() * 1.25);

    Duration::from_secs_f64(with_jitter)
}
