//! Manufacturer plugin capability interface.
//!
//! A plugin composes a vendor transport with that vendor's [`Transformer`]
//! behind one object-safe trait. Not every vendor offers every operation:
//! each plugin declares its [`Capability`] set, callers check
//! [`ManufacturerPlugin::supports`] before invoking an optional operation,
//! and the default method bodies answer
//! [`CoreError::UnsupportedCapability`] for anything not overridden.

mod http;

use async_trait::async_trait;
use micsync_api::{DeviceDetail, HealthProbe, PushSubscription, ReconnectConfig};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::transform::Transformer;

pub use http::HttpPlugin;

/// One optional operation group a vendor integration may provide.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    Health,
    DeviceListing,
    DeviceDetail,
    DiscoveryManagement,
    Subscription,
}

/// Capability interface consumed by the rest of the engine.
#[async_trait]
pub trait ManufacturerPlugin: Send + Sync {
    /// Manufacturer code, unique within a registry.
    fn code(&self) -> &str;

    fn capabilities(&self) -> &[Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn transformer(&self) -> &dyn Transformer;

    /// The error every unimplemented operation reports.
    fn unsupported(&self, capability: Capability) -> CoreError {
        CoreError::UnsupportedCapability {
            vendor: self.code().to_owned(),
            capability,
        }
    }

    async fn check_health(&self) -> Result<HealthProbe, CoreError> {
        Err(self.unsupported(Capability::Health))
    }

    /// Raw listing entries, flattened across pages.
    async fn get_devices(&self) -> Result<Vec<Value>, CoreError> {
        Err(self.unsupported(Capability::DeviceListing))
    }

    async fn get_device_detail(&self, _device_id: &str) -> Result<DeviceDetail, CoreError> {
        Err(self.unsupported(Capability::DeviceDetail))
    }

    async fn get_discovery_candidates(&self) -> Result<Vec<String>, CoreError> {
        Err(self.unsupported(Capability::DiscoveryManagement))
    }

    /// Replace the full remote candidate list.
    async fn set_discovery_candidates(&self, _ips: &[String]) -> Result<(), CoreError> {
        Err(self.unsupported(Capability::DiscoveryManagement))
    }

    async fn remove_discovery_candidates(&self, _ips: &[String]) -> Result<(), CoreError> {
        Err(self.unsupported(Capability::DiscoveryManagement))
    }

    fn subscribe(
        &self,
        _device_id: &str,
        _reconnect: ReconnectConfig,
        _cancel: CancellationToken,
    ) -> Result<PushSubscription, CoreError> {
        Err(self.unsupported(Capability::Subscription))
    }
}
