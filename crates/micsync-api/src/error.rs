use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `micsync-api` crate.
///
/// Covers every failure mode of a vendor transport: authentication,
/// throttling, HTTP status classes, WebSocket, and payload decoding.
/// `micsync-core` maps these into its sync-level taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credentials missing, malformed, or rejected (HTTP 401/403).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Throttling ──────────────────────────────────────────────────
    /// The vendor answered HTTP 429. Carries the server hint, if any.
    #[error("Rate limited by vendor{}", retry_hint(*retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// The local token bucket could not grant a permit within the wait bound.
    #[error("Rate limit exceeded for {vendor}: next permit in {wait:?} (max wait {max_wait:?})")]
    RateLimitExceeded {
        vendor: String,
        wait: Duration,
        max_wait: Duration,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, reset, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── HTTP status classes ─────────────────────────────────────────
    /// 5xx from the vendor server.
    #[error("Vendor server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// 4xx other than 401/403/429, or an unexpected 1xx/3xx reply.
    #[error("Vendor rejected request (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

fn retry_hint(retry_after: Option<Duration>) -> String {
    retry_after.map_or_else(String::new, |d| format!(" -- retry after {}s", d.as_secs()))
}

impl Error {
    /// Returns `true` for failures worth retrying with backoff:
    /// timeouts, connection failures, and 5xx replies.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::Server { .. } | Self::WebSocketConnect(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if the credentials were rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Client { status: 404, .. })
    }

    /// Server-provided cooldown hint for a 429 reply.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
