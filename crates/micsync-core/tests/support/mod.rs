// Scripted in-process vendor used by the engine integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use micsync_core::transform::ShureTransformer;
use micsync_core::{
    Capability, Channel, CoreError, Device, DeviceDetail, DeviceKey, DeviceStore, Engine,
    EngineConfig, ManufacturerPlugin, MemoryStore, PluginRegistry, SyncConfig, Transformer,
    Transmitter, Upsert,
};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Timeout,
    Unauthorized,
    Malformed,
}

impl Fault {
    fn error(self) -> CoreError {
        match self {
            Self::Timeout => CoreError::TransientNetwork {
                message: "request timed out after 30s".into(),
            },
            Self::Unauthorized => CoreError::Authentication {
                message: "invalid shared secret".into(),
            },
            Self::Malformed => CoreError::VendorClient {
                status: 400,
                message: "bad request".into(),
            },
        }
    }
}

pub struct FakeVendor {
    code: String,
    capabilities: Vec<Capability>,
    transformer: ShureTransformer,
    devices: Mutex<Vec<String>>,
    listing_fault: Mutex<Option<Fault>>,
    listing_delay: Mutex<Duration>,
    detail_faults: Mutex<HashMap<String, Fault>>,
    detail_delays: Mutex<HashMap<String, Duration>>,
    channels: Mutex<HashMap<String, Vec<Value>>>,
    corrupt: Mutex<HashSet<String>>,
    discovery: Mutex<Vec<String>>,
    /// Address a competing writer slips in after each of our writes.
    rival: Mutex<Option<(String, usize)>>,
    pub list_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub discovery_writes: AtomicUsize,
}

impl FakeVendor {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_owned(),
            capabilities: vec![
                Capability::Health,
                Capability::DeviceListing,
                Capability::DeviceDetail,
                Capability::DiscoveryManagement,
            ],
            transformer: ShureTransformer,
            devices: Mutex::new(Vec::new()),
            listing_fault: Mutex::new(None),
            listing_delay: Mutex::new(Duration::ZERO),
            detail_faults: Mutex::new(HashMap::new()),
            detail_delays: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            corrupt: Mutex::new(HashSet::new()),
            discovery: Mutex::new(Vec::new()),
            rival: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            discovery_writes: AtomicUsize::new(0),
        }
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.capabilities.retain(|c| *c != capability);
        self
    }

    pub fn with_devices(self, ids: &[&str]) -> Self {
        self.set_devices(ids);
        self
    }

    pub fn set_devices(&self, ids: &[&str]) {
        *self.devices.lock().unwrap() = ids.iter().map(|s| (*s).to_owned()).collect();
    }

    pub fn fail_listing(&self, fault: Fault) {
        *self.listing_fault.lock().unwrap() = Some(fault);
    }

    pub fn delay_listing(&self, delay: Duration) {
        *self.listing_delay.lock().unwrap() = delay;
    }

    pub fn fail_detail(&self, id: &str, fault: Fault) {
        self.detail_faults.lock().unwrap().insert(id.to_owned(), fault);
    }

    pub fn delay_detail(&self, id: &str, delay: Duration) {
        self.detail_delays.lock().unwrap().insert(id.to_owned(), delay);
    }

    pub fn set_channels(&self, id: &str, channels: Vec<Value>) {
        self.channels.lock().unwrap().insert(id.to_owned(), channels);
    }

    /// Serve a device body the transformer cannot map (`ipAddress` is a number).
    pub fn corrupt_detail(&self, id: &str) {
        self.corrupt.lock().unwrap().insert(id.to_owned());
    }

    pub fn with_candidates(self, ips: &[&str]) -> Self {
        *self.discovery.lock().unwrap() = ips.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn candidates(&self) -> Vec<String> {
        self.discovery.lock().unwrap().clone()
    }

    /// After each of the next `times` writes, append `ip` as another writer would.
    pub fn interfere(&self, ip: &str, times: usize) {
        *self.rival.lock().unwrap() = Some((ip.to_owned(), times));
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.discovery_writes.load(Ordering::SeqCst)
    }
}

pub fn receiver(id: &str) -> Value {
    json!({
        "id": id,
        "ipAddress": "10.0.0.10",
        "name": format!("Receiver {id}"),
        "model": "ULXD4",
    })
}

pub fn channel_with_battery(number: u16, battery: u8) -> Value {
    json!({
        "channelNumber": number,
        "frequency": 554.125,
        "transmitter": { "batteryPercent": battery, "rfLevel": -60 },
    })
}

#[async_trait]
impl ManufacturerPlugin for FakeVendor {
    fn code(&self) -> &str {
        &self.code
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn transformer(&self) -> &dyn Transformer {
        &self.transformer
    }

    async fn get_devices(&self) -> Result<Vec<Value>, CoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.listing_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(fault) = *self.listing_fault.lock().unwrap() {
            return Err(fault.error());
        }
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .map(|id| json!({ "id": id }))
            .collect())
    }

    async fn get_device_detail(&self, device_id: &str) -> Result<DeviceDetail, CoreError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.detail_delays.lock().unwrap().get(device_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fault) = self.detail_faults.lock().unwrap().get(device_id).copied() {
            return Err(fault.error());
        }
        let channels = self
            .channels
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or_else(|| vec![channel_with_battery(1, 80)]);
        let device = if self.corrupt.lock().unwrap().contains(device_id) {
            json!({ "id": device_id, "ipAddress": 42 })
        } else {
            receiver(device_id)
        };
        Ok(DeviceDetail { device, channels })
    }

    async fn get_discovery_candidates(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.candidates())
    }

    async fn set_discovery_candidates(&self, ips: &[String]) -> Result<(), CoreError> {
        self.discovery_writes.fetch_add(1, Ordering::SeqCst);
        let mut list = ips.to_vec();
        let mut rival = self.rival.lock().unwrap();
        if let Some((ip, remaining)) = rival.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                list.push(ip.clone());
            }
        }
        *self.discovery.lock().unwrap() = list;
        Ok(())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from_secs(10),
        offline_threshold: Duration::from_secs(20),
        max_concurrent_details: 4,
        run_timeout: Duration::from_secs(120),
    }
}

pub fn harness(vendors: Vec<Arc<FakeVendor>>, sync: SyncConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    Harness {
        engine: engine_with_store(vendors, sync, store.clone()),
        store,
    }
}

pub fn engine_with_store(
    vendors: Vec<Arc<FakeVendor>>,
    sync: SyncConfig,
    store: Arc<dyn DeviceStore>,
) -> Engine {
    let mut builder = PluginRegistry::builder();
    for vendor in vendors {
        builder = builder.register(vendor).unwrap();
    }
    let config = EngineConfig {
        sync,
        ..EngineConfig::default()
    };
    Engine::with_parts(config, Arc::new(builder.build()), store)
}

/// `MemoryStore` whose device upserts take `delay` each.
pub struct SlowStore {
    pub inner: MemoryStore,
    delay: Duration,
    pub device_upserts: AtomicUsize,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
            device_upserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DeviceStore for SlowStore {
    async fn upsert_device(&self, device: Device) -> Result<Upsert, CoreError> {
        tokio::time::sleep(self.delay).await;
        self.device_upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_device(device).await
    }

    async fn upsert_channel(&self, channel: Channel) -> Result<Upsert, CoreError> {
        self.inner.upsert_channel(channel).await
    }

    async fn upsert_transmitter(&self, transmitter: Transmitter) -> Result<Upsert, CoreError> {
        self.inner.upsert_transmitter(transmitter).await
    }

    async fn remove_transmitter(&self, device: &DeviceKey, channel: u16) -> Result<bool, CoreError> {
        self.inner.remove_transmitter(device, channel).await
    }

    async fn retain_channels(&self, device: &DeviceKey, keep: &[u16]) -> Result<usize, CoreError> {
        self.inner.retain_channels(device, keep).await
    }

    async fn query_device(&self, vendor: &str, device_id: &str) -> Result<Option<Device>, CoreError> {
        self.inner.query_device(vendor, device_id).await
    }

    async fn devices_for_vendor(&self, vendor: &str) -> Result<Vec<Device>, CoreError> {
        self.inner.devices_for_vendor(vendor).await
    }

    async fn channels_for_device(&self, device: &DeviceKey) -> Result<Vec<Channel>, CoreError> {
        self.inner.channels_for_device(device).await
    }

    async fn query_transmitter(
        &self,
        device: &DeviceKey,
        channel: u16,
    ) -> Result<Option<Transmitter>, CoreError> {
        self.inner.query_transmitter(device, channel).await
    }

    async fn device_keys(&self) -> Result<Vec<DeviceKey>, CoreError> {
        self.inner.device_keys().await
    }
}
