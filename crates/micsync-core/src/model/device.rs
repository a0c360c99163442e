// ── Receiver, channel and transmitter records ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store key of a device: vendor code plus the vendor-scoped identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub vendor: String,
    pub device_id: String,
}

impl DeviceKey {
    pub fn new(vendor: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            device_id: device_id.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vendor, self.device_id)
    }
}

/// A measurement that the vendor may not report.
///
/// Serialises as the bare value, or `null` when unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading<T> {
    Value(T),
    #[default]
    Unknown,
}

impl<T> Reading<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reading<U> {
        match self {
            Self::Value(v) => Reading::Value(f(v)),
            Self::Unknown => Reading::Unknown,
        }
    }
}

impl<T> From<Option<T>> for Reading<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Unknown, Self::Value)
    }
}

/// A physical receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub key: DeviceKey,
    /// Canonical textual IP address.
    pub address: String,
    pub name: String,
    pub model: Reading<String>,
    pub firmware: Reading<String>,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_offline_at: Option<DateTime<Utc>>,
    /// Lowest known transmitter battery, percent.
    pub battery: Reading<u8>,
    /// Strongest known transmitter RF level, dBm.
    pub signal: Reading<i32>,
}

/// One receiver channel, ordered by `number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub device: DeviceKey,
    /// One-based channel number.
    pub number: u16,
    pub name: Option<String>,
    pub frequency_mhz: Reading<f64>,
}

/// The transmitter currently linked to a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transmitter {
    pub device: DeviceKey,
    pub channel: u16,
    /// Charge, 0-100.
    pub battery: Reading<u8>,
    /// RF level, dBm.
    pub rf_level: Reading<i32>,
    /// Audio level, dBFS.
    pub audio_level: Reading<i32>,
    /// Link quality, 0-100.
    pub quality: Reading<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel: Channel,
    pub transmitter: Option<Transmitter>,
}

/// Everything a transformer produces for one device payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device: Device,
    pub channels: Vec<ChannelRecord>,
}

impl DeviceRecord {
    /// Bundle a device with its channels, sorted by channel number, and
    /// derive the device-level battery and signal summaries.
    pub fn new(mut device: Device, mut channels: Vec<ChannelRecord>) -> Self {
        channels.sort_by_key(|c| c.channel.number);
        channels.dedup_by_key(|c| c.channel.number);

        let transmitters = || channels.iter().filter_map(|c| c.transmitter.as_ref());
        device.battery = transmitters()
            .filter_map(|t| t.battery.value().copied())
            .min()
            .into();
        device.signal = transmitters()
            .filter_map(|t| t.rf_level.value().copied())
            .max()
            .into();

        Self { device, channels }
    }

    pub fn key(&self) -> &DeviceKey {
        &self.device.key
    }
}
