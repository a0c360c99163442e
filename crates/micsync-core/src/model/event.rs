// ── Domain events published on the broadcast bus ──

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::device::DeviceKey;
use super::sync::{SyncResult, VendorStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    DevicesSynced,
    HealthChanged,
    DiscoveryUpdated,
}

/// What a health transition is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum HealthSubject {
    Device { device_id: String },
    Vendor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthReason {
    /// Not observed for at least the offline threshold.
    MarkedOffline,
    /// Observed again after being marked offline.
    CameOnline,
    /// A run ended with [`VendorStatus::Error`] after a reachable one.
    VendorDown,
    /// A run reached the vendor again after an error.
    VendorRecovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthChange {
    #[serde(flatten)]
    pub subject: HealthSubject,
    pub healthy: bool,
    pub reason: HealthReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VendorStatus>,
}

impl HealthChange {
    pub fn device(key: &DeviceKey, reason: HealthReason) -> Self {
        Self {
            subject: HealthSubject::Device {
                device_id: key.device_id.clone(),
            },
            healthy: matches!(reason, HealthReason::CameOnline),
            reason,
            status: None,
        }
    }

    pub fn vendor(status: VendorStatus) -> Self {
        let healthy = status.is_reachable();
        Self {
            subject: HealthSubject::Vendor,
            healthy,
            reason: if healthy {
                HealthReason::VendorRecovered
            } else {
                HealthReason::VendorDown
            },
            status: Some(status),
        }
    }
}

/// Discovery candidate list change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Full set after the update, sorted.
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    DevicesSynced(SyncResult),
    HealthChanged(HealthChange),
    DiscoveryUpdated(DiscoveryChange),
}

/// `{event_type, vendor_code, timestamp, payload}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    pub event_type: EventType,
    pub vendor_code: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn new(vendor_code: impl Into<String>, timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        let event_type = match payload {
            EventPayload::DevicesSynced(_) => EventType::DevicesSynced,
            EventPayload::HealthChanged(_) => EventType::HealthChanged,
            EventPayload::DiscoveryUpdated(_) => EventType::DiscoveryUpdated,
        };
        Self {
            event_type,
            vendor_code: vendor_code.into(),
            timestamp,
            payload,
        }
    }

    pub fn devices_synced(result: SyncResult) -> Self {
        Self::new(
            result.vendor.clone(),
            result.finished_at,
            EventPayload::DevicesSynced(result),
        )
    }

    pub fn health_changed(vendor_code: &str, change: HealthChange) -> Self {
        Self::new(vendor_code, Utc::now(), EventPayload::HealthChanged(change))
    }

    pub fn discovery_updated(vendor_code: &str, change: DiscoveryChange) -> Self {
        Self::new(vendor_code, Utc::now(), EventPayload::DiscoveryUpdated(change))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::error::ErrorKind;
    use crate::model::SyncFailure;

    #[test]
    fn devices_synced_wire_shape() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let event = DomainEvent::devices_synced(SyncResult {
            vendor: "shure".into(),
            status: VendorStatus::Partial,
            started_at: at,
            finished_at: at,
            created: 1,
            updated: 1,
            offline: 0,
            failed: 1,
            failures: vec![SyncFailure {
                device_id: Some("rx-3".into()),
                kind: ErrorKind::TransientNetwork,
                message: "request timed out after 30s".into(),
            }],
        });

        insta::assert_json_snapshot!(event, @r#"
        {
          "event_type": "devices_synced",
          "vendor_code": "shure",
          "timestamp": "2026-03-01T12:00:00Z",
          "payload": {
            "vendor": "shure",
            "status": "partial",
            "started_at": "2026-03-01T12:00:00Z",
            "finished_at": "2026-03-01T12:00:00Z",
            "created": 1,
            "updated": 1,
            "offline": 0,
            "failed": 1,
            "failures": [
              {
                "device_id": "rx-3",
                "kind": "transient_network",
                "message": "request timed out after 30s"
              }
            ]
          }
        }
        "#);
    }

    #[test]
    fn device_health_change_is_flat() {
        let change = HealthChange::device(&DeviceKey::new("shure", "rx-1"), HealthReason::MarkedOffline);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "scope": "device",
                "device_id": "rx-1",
                "healthy": false,
                "reason": "marked_offline"
            })
        );
    }

    #[test]
    fn vendor_change_reports_status() {
        let change = HealthChange::vendor(VendorStatus::Error);
        assert!(!change.healthy);
        assert_eq!(change.reason, HealthReason::VendorDown);
        assert_eq!(change.status, Some(VendorStatus::Error));
    }
}
