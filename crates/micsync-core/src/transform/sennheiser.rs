// Receiver payloads of the REST-only integration.
//
// Device:  { serial, ip, label?, product?, version? }
// Channel: { index (zero-based), label?, freq_khz?, tx?: {
//            battery?: { gauge? (0.0-1.0) }, rssi?, af?, lqi? } }

use micsync_api::DeviceDetail;
use serde_json::Value;

use super::fields::{self, Fields};
use super::{TransformError, TransformErrorKind, Transformer};
use crate::model::{Channel, ChannelRecord, Device, DeviceKey, DeviceRecord, Reading, Transmitter};

#[derive(Debug, Clone, Copy, Default)]
pub struct SennheiserTransformer;

fn channel(key: &DeviceKey, index: usize, raw: &Value) -> Result<ChannelRecord, TransformError> {
    let f = Fields::at(raw, format!("$.channels[{index}]"))?;

    let zero_based = f
        .opt_u64("index")?
        .ok_or_else(|| TransformError::new(f.path_of("index"), TransformErrorKind::Missing))?;
    let number = u16::try_from(zero_based + 1)
        .map_err(|_| TransformError::new(f.path_of("index"), TransformErrorKind::OutOfRange))?;

    let transmitter = f
        .opt_object("tx")?
        .map(|tx| transmitter(key, number, &tx))
        .transpose()?;

    Ok(ChannelRecord {
        channel: Channel {
            device: key.clone(),
            number,
            name: f.opt_str("label")?,
            frequency_mhz: f.opt_f64("freq_khz")?.map(|khz| khz / 1_000.0).into(),
        },
        transmitter,
    })
}

fn transmitter(key: &DeviceKey, channel: u16, tx: &Fields<'_>) -> Result<Transmitter, TransformError> {
    let battery = match tx.opt_object("battery")? {
        Some(b) => b
            .opt_f64("gauge")?
            .map(|g| fields::percent(g * 100.0, || b.path_of("gauge")))
            .transpose()?,
        None => None,
    };

    let rf_level = tx
        .opt_f64("rssi")?
        .map(|v| fields::level(v, || tx.path_of("rssi")))
        .transpose()?;
    let audio_level = tx
        .opt_f64("af")?
        .map(|v| fields::level(v, || tx.path_of("af")))
        .transpose()?;
    let quality = tx
        .opt_f64("lqi")?
        .map(|v| fields::percent(v, || tx.path_of("lqi")))
        .transpose()?;

    Ok(Transmitter {
        device: key.clone(),
        channel,
        battery: battery.into(),
        rf_level: rf_level.into(),
        audio_level: audio_level.into(),
        quality: quality.into(),
    })
}

impl Transformer for SennheiserTransformer {
    fn device_id(&self, listing: &Value) -> Result<String, TransformError> {
        Fields::root(listing)?.id("serial")
    }

    fn to_canonical_device(
        &self,
        vendor: &str,
        detail: &DeviceDetail,
    ) -> Result<DeviceRecord, TransformError> {
        let f = Fields::root(&detail.device)?;
        let serial = f.id("serial")?;
        let key = DeviceKey::new(vendor, serial.clone());

        let device = Device {
            key: key.clone(),
            address: f.address("ip")?,
            name: f.opt_str("label")?.unwrap_or(serial),
            model: f.opt_str("product")?.into(),
            firmware: f.opt_str("version")?.into(),
            online: true,
            last_seen: None,
            last_offline_at: None,
            battery: Reading::Unknown,
            signal: Reading::Unknown,
        };

        let channels = detail
            .channels
            .iter()
            .enumerate()
            .map(|(i, raw)| channel(&key, i, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DeviceRecord::new(device, channels))
    }

    fn to_canonical_transmitter(
        &self,
        device: &DeviceKey,
        index: usize,
        raw: &Value,
    ) -> Result<Option<Transmitter>, TransformError> {
        Ok(channel(device, index, raw)?.transmitter)
    }
}
