//! Configuration for micsync hosts.
//!
//! TOML vendor profiles merged with `MICSYNC_` environment overrides,
//! credential resolution (env + keyring + plaintext), and translation to
//! `micsync_core::EngineConfig`. The engine itself never reads files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use micsync_core::{
    EngineConfig, HealthConfig, RateLimitConfig, RetryPolicy, SharedSecret, SyncConfig,
    TlsVerification, VendorConfig, VendorKind,
};

const KEYRING_SERVICE: &str = "micsync";

/// Slowest accepted refill: one request every ~17 minutes.
const MIN_REFILL_PER_SEC: f64 = 0.001;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no secret configured for vendor '{vendor}'")]
    NoCredentials { vendor: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub health: HealthSection,

    /// Domain event bus buffer.
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,

    /// Vendor profiles keyed by manufacturer code.
    #[serde(default)]
    pub vendors: BTreeMap<String, VendorProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync: SyncSection::default(),
            health: HealthSection::default(),
            event_channel_capacity: default_event_capacity(),
            vendors: BTreeMap::new(),
        }
    }
}

fn default_event_capacity() -> usize {
    1024
}

/// Durations are humantime strings (`"10s"`, `"2m 30s"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Defaults to three poll intervals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_threshold: Option<String>,

    #[serde(default = "default_detail_parallelism")]
    pub max_concurrent_details: usize,

    #[serde(default = "default_run_timeout")]
    pub run_timeout: String,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            offline_threshold: None,
            max_concurrent_details: default_detail_parallelism(),
            run_timeout: default_run_timeout(),
        }
    }
}

fn default_poll_interval() -> String {
    "10s".into()
}
fn default_detail_parallelism() -> usize {
    4
}
fn default_run_timeout() -> String {
    "120s".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthSection {
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
        }
    }
}

fn default_error_threshold() -> u32 {
    3
}

/// One vendor API endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VendorProfile {
    pub kind: VendorKind,

    /// REST base URL.
    pub base_url: String,

    /// WebSocket push endpoint (`ws://` or `wss://`).
    pub ws_url: Option<String>,

    /// Non-secret half of the shared-secret pair.
    pub key: String,

    /// Secret (plaintext; prefer keyring or env var).
    pub secret: Option<String>,

    /// Environment variable holding the secret.
    pub secret_env: Option<String>,

    pub key_header: Option<String>,
    pub secret_header: Option<String>,

    /// Accept self-signed certificates.
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,

    /// Per-request timeout, default 30s.
    pub timeout: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub rate_limit: RateLimitSection,

    #[serde(default)]
    pub retry: RetrySection,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimitSection {
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_refill")]
    pub refill_per_sec: f64,
    #[serde(default = "default_max_wait")]
    pub max_wait: String,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill(),
            max_wait: default_max_wait(),
        }
    }
}

fn default_capacity() -> u32 {
    10
}
fn default_refill() -> f64 {
    5.0
}
fn default_max_wait() -> String {
    "5s".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,
    #[serde(default = "default_max_delay")]
    pub max_delay: String,
    /// Cooldown after HTTP 429 without a `Retry-After` hint.
    #[serde(default = "default_cooldown")]
    pub default_cooldown: String,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            default_cooldown: default_cooldown(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}
fn default_initial_delay() -> String {
    "250ms".into()
}
fn default_max_delay() -> String {
    "10s".into()
}
fn default_cooldown() -> String {
    "5s".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "micsync", "micsync").map_or_else(
        || PathBuf::from(".").join("micsync.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the platform config path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Defaults, then `path` (if it exists), then `MICSYNC_*` variables.
///
/// Nested keys use a double underscore: `MICSYNC_SYNC__POLL_INTERVAL=5s`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MICSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize config to TOML at `path`, creating parent directories.
pub fn save_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a vendor secret: env var named by the profile, then the system
/// keyring (`micsync` / `<code>/secret`), then plaintext.
pub fn resolve_secret(profile: &VendorProfile, code: &str) -> Result<SecretString, ConfigError> {
    if let Some(env_name) = &profile.secret_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{code}/secret")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    if let Some(secret) = &profile.secret {
        return Ok(SecretString::from(secret.clone()));
    }

    Err(ConfigError::NoCredentials {
        vendor: code.into(),
    })
}

fn shared_secret(profile: &VendorProfile, code: &str) -> Result<SharedSecret, ConfigError> {
    if profile.key.trim().is_empty() {
        return Err(invalid(format!("vendors.{code}.key"), "must not be empty"));
    }
    let mut creds = SharedSecret::new(profile.key.clone(), resolve_secret(profile, code)?);
    if let Some(header) = &profile.key_header {
        creds.key_header.clone_from(header);
    }
    if let Some(header) = &profile.secret_header {
        creds.secret_header.clone_from(header);
    }
    Ok(creds)
}

// ── Translation ─────────────────────────────────────────────────────

fn duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| invalid(field, e.to_string()))
}

fn parse_url(field: &str, value: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url: Url = value
        .parse()
        .map_err(|e: url::ParseError| invalid(field, format!("{value}: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(
            field,
            format!("expected one of {schemes:?}, got '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

fn sync_config(section: &SyncSection) -> Result<SyncConfig, ConfigError> {
    let poll_interval = duration("sync.poll_interval", &section.poll_interval)?;
    let offline_threshold = match &section.offline_threshold {
        Some(raw) => duration("sync.offline_threshold", raw)?,
        None => poll_interval * 3,
    };
    if offline_threshold.is_zero() {
        return Err(invalid("sync.offline_threshold", "must be positive"));
    }
    if section.max_concurrent_details == 0 {
        return Err(invalid("sync.max_concurrent_details", "must be at least 1"));
    }
    Ok(SyncConfig {
        poll_interval,
        offline_threshold,
        max_concurrent_details: section.max_concurrent_details,
        run_timeout: duration("sync.run_timeout", &section.run_timeout)?,
    })
}

fn rate_limit(code: &str, section: &RateLimitSection) -> Result<RateLimitConfig, ConfigError> {
    if section.capacity == 0 {
        return Err(invalid(format!("vendors.{code}.rate_limit.capacity"), "must be at least 1"));
    }
    if !(section.refill_per_sec.is_finite() && section.refill_per_sec >= MIN_REFILL_PER_SEC) {
        return Err(invalid(
            format!("vendors.{code}.rate_limit.refill_per_sec"),
            format!("must be a number of at least {MIN_REFILL_PER_SEC}"),
        ));
    }
    Ok(RateLimitConfig {
        capacity: section.capacity,
        refill_per_sec: section.refill_per_sec,
        max_wait: duration(&format!("vendors.{code}.rate_limit.max_wait"), &section.max_wait)?,
    })
}

fn retry(code: &str, section: &RetrySection) -> Result<RetryPolicy, ConfigError> {
    let field = |name: &str| format!("vendors.{code}.retry.{name}");
    if section.max_attempts == 0 {
        return Err(invalid(field("max_attempts"), "must be at least 1"));
    }
    Ok(RetryPolicy {
        max_attempts: section.max_attempts,
        initial_delay: duration(&field("initial_delay"), &section.initial_delay)?,
        max_delay: duration(&field("max_delay"), &section.max_delay)?,
        default_cooldown: duration(&field("default_cooldown"), &section.default_cooldown)?,
    })
}

/// Build a `VendorConfig` from a profile.
///
/// TLS verification is on unless the profile opts out with `insecure`,
/// which takes precedence over `ca_cert`.
pub fn profile_to_vendor_config(
    code: &str,
    profile: &VendorProfile,
) -> Result<VendorConfig, ConfigError> {
    if code.trim().is_empty() {
        return Err(invalid("vendors", "vendor code must not be empty"));
    }

    let base_url = parse_url(
        &format!("vendors.{code}.base_url"),
        &profile.base_url,
        &["http", "https"],
    )?;
    let ws_url = profile
        .ws_url
        .as_deref()
        .map(|raw| parse_url(&format!("vendors.{code}.ws_url"), raw, &["ws", "wss"]))
        .transpose()?;

    let tls = if profile.insecure {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ca_path) = &profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let timeout = match &profile.timeout {
        Some(raw) => duration(&format!("vendors.{code}.timeout"), raw)?,
        None => Duration::from_secs(30),
    };

    Ok(VendorConfig {
        code: code.to_owned(),
        kind: profile.kind,
        base_url,
        ws_url,
        credentials: shared_secret(profile, code)?,
        tls,
        timeout,
        rate_limit: rate_limit(code, &profile.rate_limit)?,
        retry: retry(code, &profile.retry)?,
        enabled: profile.enabled,
    })
}

/// Translate the whole file. Disabled vendors keep their entry but skip
/// credential resolution.
pub fn to_engine_config(cfg: &Config) -> Result<EngineConfig, ConfigError> {
    let mut vendors = Vec::with_capacity(cfg.vendors.len());
    for (code, profile) in &cfg.vendors {
        if !profile.enabled {
            debug!(vendor = %code, "vendor disabled in config");
            continue;
        }
        vendors.push(profile_to_vendor_config(code, profile)?);
    }

    if cfg.health.error_threshold == 0 {
        return Err(invalid("health.error_threshold", "must be at least 1"));
    }
    if cfg.event_channel_capacity == 0 {
        return Err(invalid("event_channel_capacity", "must be at least 1"));
    }

    Ok(EngineConfig {
        vendors,
        sync: sync_config(&cfg.sync)?,
        health: HealthConfig {
            error_threshold: cfg.health.error_threshold,
        },
        event_channel_capacity: cfg.event_channel_capacity,
    })
}
