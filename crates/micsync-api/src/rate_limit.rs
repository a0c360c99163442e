//! Per-vendor token-bucket throttling.
//!
//! Every vendor owns one bucket with capacity `C` and refill rate `R`
//! tokens/second. [`RateLimiter::acquire`] either takes a token at once,
//! reserves the next token and sleeps until it accrues, or fails fast with
//! [`Error::RateLimitExceeded`] when the wait would exceed the vendor's
//! `max_wait`. Reserving before sleeping keeps concurrent callers queued
//! in arrival order, and a grant only ever spends a token that was either
//! part of the initial capacity or refilled since, so no window can see
//! more than `C + ceil(elapsed * R)` permits.
//!
//! State lives in memory only and resets with the process.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Error;

/// Bucket parameters for one vendor.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Burst size.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// Longest a caller may be suspended waiting for a token.
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 5.0,
            max_wait: Duration::from_secs(5),
        }
    }
}

/// Proof that a request may go out. Records how long the caller waited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    pub waited: Duration,
}

#[derive(Debug)]
struct TokenBucket {
    /// May go negative: each unit below zero is a reservation held by a
    /// sleeping caller.
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    max_wait: Duration,
    last_refill: Instant,
    cooldown_until: Option<Instant>,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.capacity.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: config.refill_per_sec.max(f64::MIN_POSITIVE),
            max_wait: config.max_wait,
            last_refill: Instant::now(),
            cooldown_until: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Time until one more token exists, given current reservations.
    /// Saturates to `Duration::MAX` when the refill is too slow to express.
    fn token_wait(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
            .unwrap_or(Duration::MAX)
    }

    fn cooldown_wait(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now))
    }
}

/// Process-wide limiter holding one bucket per vendor code.
///
/// Vendors without an explicit [`configure`](Self::configure) call get a
/// bucket built from the limiter's default config on first use.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    defaults: RateLimitConfig,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(defaults: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            defaults,
        }
    }

    /// Install (or replace) the bucket for `vendor`. Replacing resets it to full.
    pub fn configure(&self, vendor: &str, config: &RateLimitConfig) {
        self.buckets.insert(
            vendor.to_owned(),
            Arc::new(Mutex::new(TokenBucket::new(config))),
        );
    }

    fn bucket(&self, vendor: &str) -> Arc<Mutex<TokenBucket>> {
        self.buckets
            .entry(vendor.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(&self.defaults))))
            .clone()
    }

    /// Obtain a permit for one request to `vendor`.
    pub async fn acquire(&self, vendor: &str) -> Result<Permit, Error> {
        let bucket = self.bucket(vendor);

        let wait = {
            let mut b = bucket.lock().await;
            let now = Instant::now();
            b.refill(now);

            let cooldown = b.cooldown_wait(now);
            let wait = cooldown.max(b.token_wait());
            if wait > b.max_wait {
                return Err(Error::RateLimitExceeded {
                    vendor: vendor.to_owned(),
                    wait,
                    max_wait: b.max_wait,
                });
            }
            b.tokens -= 1.0;
            wait
        };

        if !wait.is_zero() {
            tracing::trace!(vendor, wait_ms = wait.as_millis(), "waiting for rate-limit permit");
            tokio::time::sleep(wait).await;
        }

        Ok(Permit { waited: wait })
    }

    /// Non-suspending variant: take a token only if one is available now.
    pub async fn try_acquire(&self, vendor: &str) -> Option<Permit> {
        let bucket = self.bucket(vendor);
        let mut b = bucket.lock().await;
        let now = Instant::now();
        b.refill(now);
        if b.cooldown_wait(now).is_zero() && b.tokens >= 1.0 {
            b.tokens -= 1.0;
            Some(Permit {
                waited: Duration::ZERO,
            })
        } else {
            None
        }
    }

    /// Block new permits for `vendor` for `duration` (e.g. after HTTP 429).
    ///
    /// Refill still accrues during the cooldown but the bucket is drained
    /// first, so the vendor resumes at the refill rate instead of a burst.
    pub async fn cooldown(&self, vendor: &str, duration: Duration) {
        let bucket = self.bucket(vendor);
        let mut b = bucket.lock().await;
        let now = Instant::now();
        b.refill(now);
        b.tokens = b.tokens.min(0.0);
        let until = now + duration;
        b.cooldown_until = Some(b.cooldown_until.map_or(until, |prev| prev.max(until)));
        tracing::debug!(vendor, cooldown_ms = duration.as_millis(), "rate-limit cooldown");
    }
}
