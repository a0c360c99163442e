// ── Canonical record persistence ──
//
// The engine writes through `DeviceStore`; the host decides what backs it.
// Upserts are atomic per record and keyed by (vendor, device id), so runs
// for different vendors never contend on the same record.

mod collection;
mod memory;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{Channel, Device, DeviceKey, Transmitter};

pub use memory::MemoryStore;

/// Whether an upsert created or replaced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// Outbound persistence interface.
///
/// Lookups must reflect the most recent upsert from the same process.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn upsert_device(&self, device: Device) -> Result<Upsert, CoreError>;

    async fn upsert_channel(&self, channel: Channel) -> Result<Upsert, CoreError>;

    /// Fails with [`CoreError::Store`] if the owning channel does not exist.
    async fn upsert_transmitter(&self, transmitter: Transmitter) -> Result<Upsert, CoreError>;

    async fn remove_transmitter(&self, device: &DeviceKey, channel: u16) -> Result<bool, CoreError>;

    /// Delete the device's channels not listed in `keep`, together with
    /// their transmitters. Returns the number of channels removed.
    async fn retain_channels(&self, device: &DeviceKey, keep: &[u16]) -> Result<usize, CoreError>;

    async fn query_device(&self, vendor: &str, device_id: &str) -> Result<Option<Device>, CoreError>;

    async fn devices_for_vendor(&self, vendor: &str) -> Result<Vec<Device>, CoreError>;

    async fn channels_for_device(&self, device: &DeviceKey) -> Result<Vec<Channel>, CoreError>;

    async fn query_transmitter(
        &self,
        device: &DeviceKey,
        channel: u16,
    ) -> Result<Option<Transmitter>, CoreError>;

    /// Every device key in the inventory.
    async fn device_keys(&self) -> Result<Vec<DeviceKey>, CoreError>;
}
