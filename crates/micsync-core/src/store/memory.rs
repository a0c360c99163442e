// In-process `DeviceStore` backed by reactive collections.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::collection::RecordCollection;
use super::{DeviceStore, Upsert};
use crate::error::CoreError;
use crate::model::{Channel, Device, DeviceKey, Transmitter};

type ChannelKey = (DeviceKey, u16);

/// Device inventory held in memory.
///
/// Read-side consumers can take a point-in-time [`devices_snapshot`]
/// or follow changes through [`subscribe_devices`] / [`device_stream`].
///
/// [`devices_snapshot`]: Self::devices_snapshot
/// [`subscribe_devices`]: Self::subscribe_devices
/// [`device_stream`]: Self::device_stream
pub struct MemoryStore {
    devices: RecordCollection<DeviceKey, Device>,
    channels: RecordCollection<ChannelKey, Channel>,
    transmitters: RecordCollection<ChannelKey, Transmitter>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            devices: RecordCollection::new(),
            channels: RecordCollection::new(),
            transmitters: RecordCollection::new(),
        }
    }

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<Arc<Vec<Arc<Device>>>> {
        self.devices.subscribe()
    }

    /// `Stream` of device snapshots, starting with the current one.
    pub fn device_stream(&self) -> WatchStream<Arc<Vec<Arc<Device>>>> {
        WatchStream::new(self.devices.subscribe())
    }

    /// Bumped on every device mutation.
    pub fn devices_version(&self) -> u64 {
        self.devices.version()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn outcome(is_new: bool) -> Upsert {
        if is_new { Upsert::Created } else { Upsert::Updated }
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn upsert_device(&self, device: Device) -> Result<Upsert, CoreError> {
        Ok(Self::outcome(self.devices.upsert(device.key.clone(), device)))
    }

    async fn upsert_channel(&self, channel: Channel) -> Result<Upsert, CoreError> {
        if !self.devices.contains(&channel.device) {
            return Err(CoreError::Store {
                message: format!("channel {} for unknown device {}", channel.number, channel.device),
            });
        }
        let key = (channel.device.clone(), channel.number);
        Ok(Self::outcome(self.channels.upsert(key, channel)))
    }

    async fn upsert_transmitter(&self, transmitter: Transmitter) -> Result<Upsert, CoreError> {
        let key = (transmitter.device.clone(), transmitter.channel);
        if !self.channels.contains(&key) {
            return Err(CoreError::Store {
                message: format!(
                    "transmitter for missing channel {} on {}",
                    transmitter.channel, transmitter.device
                ),
            });
        }
        Ok(Self::outcome(self.transmitters.upsert(key, transmitter)))
    }

    async fn remove_transmitter(&self, device: &DeviceKey, channel: u16) -> Result<bool, CoreError> {
        Ok(self.transmitters.remove(&(device.clone(), channel)).is_some())
    }

    async fn retain_channels(&self, device: &DeviceKey, keep: &[u16]) -> Result<usize, CoreError> {
        let stale = |(d, n): &ChannelKey| d == device && !keep.contains(n);
        self.transmitters.remove_where(stale);
        Ok(self.channels.remove_where(stale))
    }

    async fn query_device(&self, vendor: &str, device_id: &str) -> Result<Option<Device>, CoreError> {
        Ok(self
            .devices
            .get(&DeviceKey::new(vendor, device_id))
            .map(|d| Device::clone(&d)))
    }

    async fn devices_for_vendor(&self, vendor: &str) -> Result<Vec<Device>, CoreError> {
        Ok(self
            .devices
            .filter(|k| k.vendor == vendor)
            .iter()
            .map(|d| Device::clone(d))
            .collect())
    }

    async fn channels_for_device(&self, device: &DeviceKey) -> Result<Vec<Channel>, CoreError> {
        Ok(self
            .channels
            .filter(|(d, _)| d == device)
            .iter()
            .map(|c| Channel::clone(c))
            .collect())
    }

    async fn query_transmitter(
        &self,
        device: &DeviceKey,
        channel: u16,
    ) -> Result<Option<Transmitter>, CoreError> {
        Ok(self
            .transmitters
            .get(&(device.clone(), channel))
            .map(|t| Transmitter::clone(&t)))
    }

    async fn device_keys(&self) -> Result<Vec<DeviceKey>, CoreError> {
        Ok(self.devices.keys())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Reading;

    fn device(id: &str) -> Device {
        Device {
            key: DeviceKey::new("shure", id),
            address: "10.0.0.1".into(),
            name: id.into(),
            model: Reading::Unknown,
            firmware: Reading::Unknown,
            online: true,
            last_seen: None,
            last_offline_at: None,
            battery: Reading::Unknown,
            signal: Reading::Unknown,
        }
    }

    fn channel(key: &DeviceKey, number: u16) -> Channel {
        Channel {
            device: key.clone(),
            number,
            name: None,
            frequency_mhz: Reading::Unknown,
        }
    }

    fn transmitter(key: &DeviceKey, channel: u16) -> Transmitter {
        Transmitter {
            device: key.clone(),
            channel,
            battery: Reading::Value(50),
            rf_level: Reading::Unknown,
            audio_level: Reading::Unknown,
            quality: Reading::Unknown,
        }
    }

    #[tokio::test]
    async fn upsert_then_query() {
        let store = MemoryStore::new();
        assert_eq!(store.upsert_device(device("rx-1")).await.unwrap(), Upsert::Created);
        assert_eq!(store.upsert_device(device("rx-1")).await.unwrap(), Upsert::Updated);
        assert!(store.query_device("shure", "rx-1").await.unwrap().is_some());
        assert!(store.query_device("sennheiser", "rx-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transmitter_requires_channel() {
        let store = MemoryStore::new();
        let d = device("rx-1");
        let key = d.key.clone();
        store.upsert_device(d).await.unwrap();

        assert!(store.upsert_transmitter(transmitter(&key, 1)).await.is_err());
        store.upsert_channel(channel(&key, 1)).await.unwrap();
        store.upsert_transmitter(transmitter(&key, 1)).await.unwrap();
        assert!(store.query_transmitter(&key, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retain_channels_cascades_to_transmitters() {
        let store = MemoryStore::new();
        let d = device("rx-1");
        let key = d.key.clone();
        store.upsert_device(d).await.unwrap();
        for n in 1..=3 {
            store.upsert_channel(channel(&key, n)).await.unwrap();
            store.upsert_transmitter(transmitter(&key, n)).await.unwrap();
        }

        assert_eq!(store.retain_channels(&key, &[2]).await.unwrap(), 2);

        let numbers: Vec<u16> = store
            .channels_for_device(&key)
            .await
            .unwrap()
            .iter()
            .map(|c| c.number)
            .collect();
        assert_eq!(numbers, vec![2]);
        assert!(store.query_transmitter(&key, 1).await.unwrap().is_none());
        assert!(store.query_transmitter(&key, 2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn devices_are_scoped_by_vendor() {
        let store = MemoryStore::new();
        store.upsert_device(device("rx-1")).await.unwrap();
        let mut other = device("rx-1");
        other.key = DeviceKey::new("sennheiser", "rx-1");
        store.upsert_device(other).await.unwrap();

        assert_eq!(store.devices_for_vendor("shure").await.unwrap().len(), 1);
        assert_eq!(store.device_keys().await.unwrap().len(), 2);
        assert_eq!(store.devices_snapshot().len(), 2);
    }
}
