// Reference vendor payloads.
//
// Device:  { id, ipAddress, name?, model?, firmwareVersion? }
// Channel: { channelNumber, name?, frequency? (MHz), transmitter?: {
//            batteryPercent? | batteryBars? (0-5, 255 = unknown),
//            rfLevel?, audioLevel?, quality? } }

use micsync_api::DeviceDetail;
use serde_json::Value;

use super::fields::{self, Fields};
use super::{TransformError, TransformErrorKind, Transformer};
use crate::model::{Channel, ChannelRecord, Device, DeviceKey, DeviceRecord, Reading, Transmitter};

const BARS_UNKNOWN: u64 = 255;
const BARS_MAX: u64 = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct ShureTransformer;

fn channel(key: &DeviceKey, index: usize, raw: &Value) -> Result<ChannelRecord, TransformError> {
    let f = Fields::at(raw, format!("$.channels[{index}]"))?;

    let number = f
        .opt_u64("channelNumber")?
        .ok_or_else(|| TransformError::new(f.path_of("channelNumber"), TransformErrorKind::Missing))?;
    let number = u16::try_from(number)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            TransformError::new(f.path_of("channelNumber"), TransformErrorKind::OutOfRange)
        })?;

    let transmitter = match f.opt_object("transmitter")? {
        Some(tx) => Some(transmitter(key, number, &tx)?),
        None => None,
    };

    Ok(ChannelRecord {
        channel: Channel {
            device: key.clone(),
            number,
            name: f.opt_str("name")?,
            frequency_mhz: f.opt_f64("frequency")?.into(),
        },
        transmitter,
    })
}

fn transmitter(key: &DeviceKey, channel: u16, tx: &Fields<'_>) -> Result<Transmitter, TransformError> {
    let battery = match tx.opt_f64("batteryPercent")? {
        Some(pct) => Reading::Value(fields::percent(pct, || tx.path_of("batteryPercent"))?),
        None => battery_bars(tx)?,
    };

    let rf_level = tx
        .opt_f64("rfLevel")?
        .map(|v| fields::level(v, || tx.path_of("rfLevel")))
        .transpose()?;
    let audio_level = tx
        .opt_f64("audioLevel")?
        .map(|v| fields::level(v, || tx.path_of("audioLevel")))
        .transpose()?;
    let quality = tx
        .opt_f64("quality")?
        .map(|v| fields::percent(v, || tx.path_of("quality")))
        .transpose()?;

    Ok(Transmitter {
        device: key.clone(),
        channel,
        battery,
        rf_level: rf_level.into(),
        audio_level: audio_level.into(),
        quality: quality.into(),
    })
}

/// Bars scale to percent in steps of 20; 255 is the vendor's "no reading".
fn battery_bars(tx: &Fields<'_>) -> Result<Reading<u8>, TransformError> {
    match tx.opt_u64("batteryBars")? {
        None | Some(BARS_UNKNOWN) => Ok(Reading::Unknown),
        Some(bars) if bars <= BARS_MAX => {
            let pct = u8::try_from(bars * 20).map_err(|_| {
                TransformError::new(tx.path_of("batteryBars"), TransformErrorKind::OutOfRange)
            })?;
            Ok(Reading::Value(pct))
        }
        Some(_) => Err(TransformError::new(
            tx.path_of("batteryBars"),
            TransformErrorKind::OutOfRange,
        )),
    }
}

impl Transformer for ShureTransformer {
    fn device_id(&self, listing: &Value) -> Result<String, TransformError> {
        Fields::root(listing)?.id("id")
    }

    fn to_canonical_device(
        &self,
        vendor: &str,
        detail: &DeviceDetail,
    ) -> Result<DeviceRecord, TransformError> {
        let f = Fields::root(&detail.device)?;
        let id = f.id("id")?;
        let key = DeviceKey::new(vendor, id.clone());

        let device = Device {
            key: key.clone(),
            address: f.address("ipAddress")?,
            name: f.opt_str("name")?.unwrap_or(id),
            model: f.opt_str("model")?.into(),
            firmware: f.opt_str("firmwareVersion")?.into(),
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
