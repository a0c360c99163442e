// ── Connection health tracking ──
//
// Per-device rolling health records plus the last run status per vendor.
// Records are created on the first heartbeat and pruned only by
// `cleanup_stale`. All operations have `_at` variants taking an explicit
// clock reading.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{DeviceKey, VendorStatus};

/// Snapshot of one device's health record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionHealth {
    pub consecutive_errors: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub successes: u64,
    pub errors: u64,
    /// Transitions from zero to one consecutive errors.
    pub failure_episodes: u64,
}

impl ConnectionHealth {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            consecutive_errors: 0,
            last_heartbeat: None,
            last_error: None,
            last_error_at: None,
            first_seen: at,
            successes: 0,
            errors: 0,
            failure_episodes: 0,
        }
    }
}

/// Aggregate health of one vendor's devices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorHealthStats {
    pub devices: usize,
    pub healthy_devices: usize,
    /// Successful contacts as a share of all contact attempts, 0-100.
    pub uptime_percent: f64,
    /// Failed contacts as a share of all contact attempts, 0-1.
    pub error_rate: f64,
    /// Observed time divided by failure episodes; `None` without failures.
    #[serde(with = "optional_secs")]
    pub mean_time_between_failures: Option<Duration>,
}

pub struct ConnectionHealthService {
    records: DashMap<DeviceKey, ConnectionHealth>,
    vendor_status: DashMap<String, VendorStatus>,
    error_threshold: u32,
    offline_threshold: chrono::Duration,
}

impl ConnectionHealthService {
    pub fn new(error_threshold: u32, offline_threshold: Duration) -> Self {
        Self {
            records: DashMap::new(),
            vendor_status: DashMap::new(),
            error_threshold: error_threshold.max(1),
            offline_threshold: chrono::Duration::from_std(offline_threshold)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    // ── Recording ────────────────────────────────────────────────────

    pub fn record_heartbeat(&self, key: &DeviceKey) {
        self.record_heartbeat_at(key, Utc::now());
    }

    /// Resets the consecutive-error counter. Creates the record if absent.
    pub fn record_heartbeat_at(&self, key: &DeviceKey, at: DateTime<Utc>) {
        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| ConnectionHealth::new(at));
        record.consecutive_errors = 0;
        record.last_heartbeat = Some(at);
        record.successes += 1;
    }

    /// Returns `false` when the device has never been contacted successfully.
    pub fn record_error(&self, key: &DeviceKey, error: &CoreError) -> bool {
        self.record_error_at(key, error, Utc::now())
    }

    pub fn record_error_at(&self, key: &DeviceKey, error: &CoreError, at: DateTime<Utc>) -> bool {
        let Some(mut record) = self.records.get_mut(key) else {
            debug!(device = %key, "no health record yet, error not tracked");
            return false;
        };
        if record.consecutive_errors == 0 {
            record.failure_episodes += 1;
        }
        record.consecutive_errors = record.consecutive_errors.saturating_add(1);
        record.errors += 1;
        record.last_error = Some(error.to_string());
        record.last_error_at = Some(at);
        true
    }

    /// Record `error` against every tracked device of `vendor`.
    pub fn record_vendor_error(&self, vendor: &str, error: &CoreError) -> usize {
        let keys: Vec<DeviceKey> = self
            .records
            .iter()
            .filter(|r| r.key().vendor == vendor)
            .map(|r| r.key().clone())
            .collect();
        let now = Utc::now();
        keys.iter()
            .filter(|k| self.record_error_at(k, error, now))
            .count()
    }

    /// Store the latest run status, returning the previous one.
    pub fn record_vendor_status(&self, vendor: &str, status: VendorStatus) -> Option<VendorStatus> {
        self.vendor_status.insert(vendor.to_owned(), status)
    }

    pub fn vendor_status(&self, vendor: &str) -> Option<VendorStatus> {
        self.vendor_status.get(vendor).map(|s| *s)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get(&self, key: &DeviceKey) -> Option<ConnectionHealth> {
        self.records.get(key).map(|r| r.clone())
    }

    pub fn is_healthy(&self, key: &DeviceKey) -> bool {
        self.is_healthy_at(key, Utc::now())
    }

    /// Below the error threshold and heard from within the offline threshold.
    pub fn is_healthy_at(&self, key: &DeviceKey, now: DateTime<Utc>) -> bool {
        self.records
            .get(key)
            .is_some_and(|r| self.healthy(&r, now))
    }

    fn healthy(&self, record: &ConnectionHealth, now: DateTime<Utc>) -> bool {
        record.consecutive_errors < self.error_threshold
            && record
                .last_heartbeat
                .is_some_and(|hb| now.signed_duration_since(hb) < self.offline_threshold)
    }

    pub fn get_unhealthy_devices(&self, vendor: Option<&str>) -> Vec<DeviceKey> {
        self.get_unhealthy_devices_at(vendor, Utc::now())
    }

    pub fn get_unhealthy_devices_at(&self, vendor: Option<&str>, now: DateTime<Utc>) -> Vec<DeviceKey> {
        let mut keys: Vec<DeviceKey> = self
            .records
            .iter()
            .filter(|r| vendor.is_none_or(|v| r.key().vendor == v))
            .filter(|r| !self.healthy(r.value(), now))
            .map(|r| r.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn get_stats(&self, vendor: &str) -> VendorHealthStats {
        self.get_stats_at(vendor, Utc::now())
    }

    pub fn get_stats_at(&self, vendor: &str, now: DateTime<Utc>) -> VendorHealthStats {
        let mut devices = 0usize;
        let mut healthy_devices = 0usize;
        let mut successes = 0u64;
        let mut errors = 0u64;
        let mut episodes = 0u64;
        let mut observed = Duration::ZERO;

        for r in self.records.iter().filter(|r| r.key().vendor == vendor) {
            devices += 1;
            if self.healthy(r.value(), now) {
                healthy_devices += 1;
            }
            successes += r.successes;
            errors += r.errors;
            episodes += r.failure_episodes;
            observed += now
                .signed_duration_since(r.first_seen)
                .to_std()
                .unwrap_or(Duration::ZERO);
        }

        let attempts = successes + errors;
        let (uptime_percent, error_rate) = if attempts == 0 {
            (100.0, 0.0)
        } else {
            (
                ratio(successes, attempts) * 100.0,
                ratio(errors, attempts),
            )
        };
        let mean_time_between_failures = u32::try_from(episodes)
            .ok()
            .filter(|e| *e > 0)
            .map(|e| observed / e);

        VendorHealthStats {
            devices,
            healthy_devices,
            uptime_percent,
            error_rate,
            mean_time_between_failures,
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Drop records for devices no longer in the inventory. Idempotent.
    pub fn cleanup_stale(&self, live: &[DeviceKey]) -> usize {
        let live: HashSet<&DeviceKey> = live.iter().collect();
        let before = self.records.len();
        self.records.retain(|k, _| live.contains(k));
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, "pruned stale health records");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn ratio(part: u64, whole: u64) -> f64 {
    part as f64 / whole as f64
}

mod optional_secs {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::ref_option, clippy::trivially_copy_pass_by_ref)]
    pub(super) fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn service() -> ConnectionHealthService {
        ConnectionHealthService::new(3, Duration::from_secs(30))
    }

    fn err() -> CoreError {
        CoreError::TransientNetwork {
            message: "timeout".into(),
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn heartbeat_creates_record_and_error_needs_one() {
        let health = service();
        let key = DeviceKey::new("shure", "rx-1");

        assert!(!health.record_error_at(&key, &err(), t(0)));
        assert!(health.get(&key).is_none());

        health.record_heartbeat_at(&key, t(0));
        assert!(health.record_error_at(&key, &err(), t(1)));
        let record = health.get(&key).unwrap();
        assert_eq!(record.consecutive_errors, 1);
        assert_eq!(record.last_error.as_deref(), Some("Transient network error: timeout"));
    }

    #[test]
    fn threshold_errors_make_device_unhealthy() {
        let health = service();
        let key = DeviceKey::new("shure", "rx-1");
        health.record_heartbeat_at(&key, t(0));

        health.record_error_at(&key, &err(), t(1));
        health.record_error_at(&key, &err(), t(2));
        assert!(health.is_healthy_at(&key, t(3)));

        health.record_error_at(&key, &err(), t(3));
        assert!(!health.is_healthy_at(&key, t(4)));
        assert_eq!(health.get_unhealthy_devices_at(Some("shure"), t(4)), vec![key.clone()]);

        health.record_heartbeat_at(&key, t(5));
        assert!(health.is_healthy_at(&key, t(6)));
    }

    #[test]
    fn stale_heartbeat_is_unhealthy() {
        let health = service();
        let key = DeviceKey::new("shure", "rx-1");
        health.record_heartbeat_at(&key, t(0));
        assert!(health.is_healthy_at(&key, t(29)));
        assert!(!health.is_healthy_at(&key, t(30)));
    }

    #[test]
    fn unhealthy_filter_by_vendor() {
        let health = service();
        let a = DeviceKey::new("shure", "rx-1");
        let b = DeviceKey::new("sennheiser", "rx-1");
        health.record_heartbeat_at(&a, t(0));
        health.record_heartbeat_at(&b, t(0));

        assert_eq!(health.get_unhealthy_devices_at(None, t(60)).len(), 2);
        assert_eq!(health.get_unhealthy_devices_at(Some("sennheiser"), t(60)), vec![b]);
    }

    #[test]
    fn stats_count_episodes_not_errors() {
        let health = service();
        let key = DeviceKey::new("shure", "rx-1");
        health.record_heartbeat_at(&key, t(0));
        health.record_error_at(&key, &err(), t(10));
        health.record_error_at(&key, &err(), t(20));
        health.record_heartbeat_at(&key, t(30));
        health.record_error_at(&key, &err(), t(40));
        health.record_heartbeat_at(&key, t(50));

        let stats = health.get_stats_at("shure", t(100));
        assert_eq!(stats.devices, 1);
        assert_eq!(stats.healthy_devices, 0);
        assert!((stats.uptime_percent - 50.0).abs() < 1e-9);
        assert!((stats.error_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.mean_time_between_failures, Some(Duration::from_secs(50)));
    }

    #[test]
    fn stats_for_unknown_vendor_are_neutral() {
        let stats = service().get_stats("nobody");
        assert_eq!(stats.devices, 0);
        assert!(stats.mean_time_between_failures.is_none());
    }

    #[test]
    fn cleanup_is_idempotent() {
        let health = service();
        let keep = DeviceKey::new("shure", "rx-1");
        health.record_heartbeat_at(&keep, t(0));
        health.record_heartbeat_at(&DeviceKey::new("shure", "rx-2"), t(0));

        assert_eq!(health.cleanup_stale(std::slice::from_ref(&keep)), 1);
        assert_eq!(health.cleanup_stale(std::slice::from_ref(&keep)), 0);
        assert_eq!(health.len(), 1);
    }

    #[test]
    fn vendor_status_returns_previous() {
        let health = service();
        assert_eq!(health.record_vendor_status("shure", VendorStatus::Ok), None);
        assert_eq!(
            health.record_vendor_status("shure", VendorStatus::Error),
            Some(VendorStatus::Ok)
        );
    }
}
