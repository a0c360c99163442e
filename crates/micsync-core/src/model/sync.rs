// ── Synchronization run results ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ErrorKind};

/// Outcome class of one vendor's run, as surfaced to whoever triggered it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VendorStatus {
    /// Every listed device was fetched, transformed and stored.
    Ok,
    /// Some devices failed; the rest were stored.
    Partial,
    /// The vendor was unreachable or rejected the credentials.
    Error,
}

impl VendorStatus {
    pub fn is_reachable(self) -> bool {
        !matches!(self, Self::Error)
    }
}

/// One recorded failure inside a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    /// `None` for vendor-scope failures.
    pub device_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl SyncFailure {
    pub fn device(device_id: impl Into<String>, err: &CoreError) -> Self {
        Self {
            device_id: Some(device_id.into()),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn vendor(err: &CoreError) -> Self {
        Self {
            device_id: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Immutable summary of one synchronization run for one vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub vendor: String,
    pub status: VendorStatus,
    /// Run timestamp: `last_seen` of every device observed in this run.
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub created: usize,
    pub updated: usize,
    pub offline: usize,
    pub failed: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncResult {
    /// Devices successfully observed in the run.
    pub fn observed(&self) -> usize {
        self.created + self.updated
    }
}

/// Pipeline stage of a vendor's run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Listing,
    Detailing,
    Transforming,
    Persisting,
    OfflineDetection,
    Broadcasting,
}
