// ── Runtime engine configuration ──
//
// These types describe which vendors to talk to and how to pace the
// synchronization loop. They carry credential data and tuning, but never
// touch disk. `micsync-config` constructs an `EngineConfig` and hands it in.

use std::time::Duration;

use micsync_api::{RateLimitConfig, RetryPolicy, SharedSecret, TlsMode, TransportConfig};
use serde::{Deserialize, Serialize};
use url::Url;

/// Which transformer and capability set a vendor entry uses.
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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VendorKind {
    /// Reference REST + WebSocket integration with discovery management.
    Shure,
    /// REST-only integration; no discovery list, no push.
    Sennheiser,
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Bundled web PKI roots (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (on-premise servers with self-signed certs).
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => Self::System,
            TlsVerification::CustomCa(path) => Self::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => Self::DangerAcceptInvalid,
        }
    }
}

/// Connection settings for one vendor API.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    /// Manufacturer code, e.g. `"shure"`. Unique across the engine.
    pub code: String,
    pub kind: VendorKind,
    /// REST base URL (e.g. `https://10.0.0.2:10000/api/v1`).
    pub base_url: Url,
    /// Push endpoint. `None` disables subscriptions even if the kind supports them.
    pub ws_url: Option<Url>,
    pub credentials: SharedSecret,
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    /// Disabled vendors are skipped when the registry is built.
    pub enabled: bool,
}

impl VendorConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: TlsMode::from(&self.tls),
            timeout: self.timeout,
        }
    }
}

/// Pacing of the synchronization pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Scheduler period between runs.
    pub poll_interval: Duration,
    /// A device not observed for this long is marked offline.
    pub offline_threshold: Duration,
    /// Parallel detail fetches within one vendor's run.
    pub max_concurrent_details: usize,
    /// Wall-clock budget for one vendor's run.
    pub run_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let poll_interval = Duration::from_secs(10);
        Self {
            poll_interval,
            offline_threshold: poll_interval * 3,
            max_concurrent_details: 4,
            run_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Consecutive errors at which a device stops being healthy.
    pub error_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { error_threshold: 3 }
    }
}

/// Full engine configuration.
///
/// Built by the host process, passed to [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub vendors: Vec<VendorConfig>,
    pub sync: SyncConfig,
    pub health: HealthConfig,
    /// Buffer size of the domain event bus.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vendors: Vec::new(),
            sync: SyncConfig::default(),
            health: HealthConfig::default(),
            event_channel_capacity: 1024,
        }
    }
}
