// ── Vendor payload transformers ──
//
// Pure mappings from raw vendor JSON to canonical records. No network,
// no storage. Missing optional fields become `Reading::Unknown`; a missing
// identifier or address, or a field of the wrong shape, is a
// `TransformError` carrying the JSON path of the offending field.

mod fields;
pub mod sennheiser;
pub mod shure;

use micsync_api::DeviceDetail;
use serde_json::Value;
use thiserror::Error;

use crate::model::{DeviceKey, DeviceRecord, Transmitter};

pub use sennheiser::SennheiserTransformer;
pub use shure::ShureTransformer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformErrorKind {
    #[error("required field missing")]
    Missing,
    #[error("expected {expected}")]
    WrongType { expected: &'static str },
    #[error("value out of range")]
    OutOfRange,
    #[error("{0}")]
    Malformed(String),
}

/// A payload could not be mapped. `path` is a JSONPath-like pointer,
/// e.g. `$.channels[1].transmitter.batteryBars`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Transform failed at {path}: {kind}")]
pub struct TransformError {
    pub path: String,
    pub kind: TransformErrorKind,
}

impl TransformError {
    pub(crate) fn new(path: impl Into<String>, kind: TransformErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Per-vendor mapping to canonical records.
pub trait Transformer: Send + Sync {
    /// Vendor-scoped identifier from a device listing entry.
    fn device_id(&self, listing: &Value) -> Result<String, TransformError>;

    /// Map a device body plus its channel list. The returned record is not
    /// yet stamped with sync state (`online`, `last_seen`).
    fn to_canonical_device(
        &self,
        vendor: &str,
        detail: &DeviceDetail,
    ) -> Result<DeviceRecord, TransformError>;

    /// Map the transmitter block of one channel payload, if any. `index`
    /// is the channel's position in the device's channel list.
    fn to_canonical_transmitter(
        &self,
        device: &DeviceKey,
        index: usize,
        channel: &Value,
    ) -> Result<Option<Transmitter>, TransformError>;
}
