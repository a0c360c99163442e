// ── Core error types ──
//
// Every failure the engine reports belongs to exactly one taxonomy kind.
// The `From<micsync_api::Error>` impl translates transport-layer errors
// so the orchestrator never handles raw HTTP or WebSocket failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plugin::Capability;
use crate::transform::{TransformError, TransformErrorKind};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Vendor-scope failures ────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Transient network error: {message}")]
    TransientNetwork { message: String },

    #[error("Vendor server error (HTTP {status}): {message}")]
    VendorServer { status: u16, message: String },

    // ── Device-scope failures ────────────────────────────────────────
    #[error("Vendor rejected request (HTTP {status}): {message}")]
    VendorClient { status: u16, message: String },

    #[error(transparent)]
    Transform(#[from] TransformError),

    // ── Engine-level failures ────────────────────────────────────────
    #[error("Vendor {vendor} does not support {capability}")]
    UnsupportedCapability {
        vendor: String,
        capability: Capability,
    },

    #[error("Discovery list for {vendor} changed during update; giving up after retry")]
    DiscoveryUpdateConflict { vendor: String },

    #[error("Sync for {vendor} exceeded its time budget after {elapsed:?}")]
    SyncTimeout { vendor: String, elapsed: Duration },

    #[error("Unknown vendor: {code}")]
    UnknownVendor { code: String },

    #[error("Vendor registered twice: {code}")]
    DuplicateVendor { code: String },

    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialisable discriminant of a [`CoreError`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    RateLimitExceeded,
    TransientNetwork,
    VendorServer,
    VendorClient,
    Transform,
    UnsupportedCapability,
    DiscoveryUpdateConflict,
    SyncTimeout,
    UnknownVendor,
    DuplicateVendor,
    InvalidAddress,
    Store,
    Config,
    Internal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            Self::VendorServer { .. } => ErrorKind::VendorServer,
            Self::VendorClient { .. } => ErrorKind::VendorClient,
            Self::Transform(_) => ErrorKind::Transform,
            Self::UnsupportedCapability { .. } => ErrorKind::UnsupportedCapability,
            Self::DiscoveryUpdateConflict { .. } => ErrorKind::DiscoveryUpdateConflict,
            Self::SyncTimeout { .. } => ErrorKind::SyncTimeout,
            Self::UnknownVendor { .. } => ErrorKind::UnknownVendor,
            Self::DuplicateVendor { .. } => ErrorKind::DuplicateVendor,
            Self::InvalidAddress { .. } => ErrorKind::InvalidAddress,
            Self::Store { .. } => ErrorKind::Store,
            Self::Config { .. } => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Failures that make the rest of a vendor's run pointless.
    pub fn is_vendor_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::UnsupportedCapability { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<micsync_api::Error> for CoreError {
    fn from(err: micsync_api::Error) -> Self {
        use micsync_api::Error as Api;

        match err {
            Api::Authentication { message } => Self::Authentication { message },
            Api::RateLimited { retry_after } => Self::RateLimitExceeded {
                message: "vendor answered HTTP 429".into(),
                retry_after,
            },
            Api::RateLimitExceeded {
                vendor,
                wait,
                max_wait,
            } => Self::RateLimitExceeded {
                message: format!("{vendor}: next permit in {wait:?} exceeds max wait {max_wait:?}"),
                retry_after: Some(wait),
            },
            Api::Transport(e) => Self::TransientNetwork {
                message: e.to_string(),
            },
            Api::Timeout { timeout_secs } => Self::TransientNetwork {
                message: format!("request timed out after {timeout_secs}s"),
            },
            e @ (Api::WebSocketConnect(_) | Api::WebSocketClosed { .. }) => {
                Self::TransientNetwork {
                    message: e.to_string(),
                }
            }
            Api::Server { status, message } => Self::VendorServer { status, message },
            Api::Client { status, message } => Self::VendorClient { status, message },
            Api::Deserialization { message, .. } => Self::Transform(TransformError {
                path: "$".into(),
                kind: TransformErrorKind::Malformed(message),
            }),
            Api::InvalidUrl(e) => Self::Config {
                message: format!("invalid URL: {e}"),
            },
            Api::Tls(message) => Self::Config {
                message: format!("TLS setup failed: {message}"),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_onto_taxonomy() {
        let cases = [
            (
                micsync_api::Error::Authentication {
                    message: "nope".into(),
                },
                ErrorKind::Authentication,
            ),
            (
                micsync_api::Error::RateLimited {
                    retry_after: Some(Duration::from_secs(3)),
                },
                ErrorKind::RateLimitExceeded,
            ),
            (
                micsync_api::Error::Timeout { timeout_secs: 30 },
                ErrorKind::TransientNetwork,
            ),
            (
                micsync_api::Error::Server {
                    status: 502,
                    message: "bad gateway".into(),
                },
                ErrorKind::VendorServer,
            ),
            (
                micsync_api::Error::Client {
                    status: 404,
                    message: "missing".into(),
                },
                ErrorKind::VendorClient,
            ),
            (
                micsync_api::Error::Deserialization {
                    message: "eof".into(),
                    body: String::new(),
                },
                ErrorKind::Transform,
            ),
        ];

        for (api, expected) in cases {
            assert_eq!(CoreError::from(api).kind(), expected);
        }
    }

    #[test]
    fn rate_limit_hint_survives_conversion() {
        let err = CoreError::from(micsync_api::Error::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        });
        match err {
            CoreError::RateLimitExceeded { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn error_kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SyncTimeout).unwrap();
        assert_eq!(json, "\"sync_timeout\"");
        assert_eq!(ErrorKind::VendorClient.to_string(), "vendor_client");
    }
}
