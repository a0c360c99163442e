// REST (+ optional push) plugin: a `VendorClient` paired with a transformer.

use std::sync::Arc;

use async_trait::async_trait;
use micsync_api::{
    DeviceDetail, HealthProbe, PushSubscription, RateLimiter, ReconnectConfig, VendorClient,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{Capability, ManufacturerPlugin};
use crate::config::{VendorConfig, VendorKind};
use crate::error::CoreError;
use crate::transform::{SennheiserTransformer, ShureTransformer, Transformer};

const SHURE_CAPABILITIES: &[Capability] = &[
    Capability::Health,
    Capability::DeviceListing,
    Capability::DeviceDetail,
    Capability::DiscoveryManagement,
    Capability::Subscription,
];

const SENNHEISER_CAPABILITIES: &[Capability] = &[
    Capability::Health,
    Capability::DeviceListing,
    Capability::DeviceDetail,
];

pub struct HttpPlugin {
    code: String,
    client: VendorClient,
    transformer: Box<dyn Transformer>,
    capabilities: Vec<Capability>,
}

impl HttpPlugin {
    pub fn new(
        client: VendorClient,
        transformer: Box<dyn Transformer>,
        capabilities: &[Capability],
    ) -> Self {
        let mut capabilities = capabilities.to_vec();
        capabilities.sort();
        capabilities.dedup();
        Self {
            code: client.vendor().to_owned(),
            client,
            transformer,
            capabilities,
        }
    }

    /// Build the plugin for a configured vendor. Subscription is only
    /// advertised when a push endpoint is configured.
    pub fn from_config(config: &VendorConfig, limiter: Arc<RateLimiter>) -> Result<Self, CoreError> {
        limiter.configure(&config.code, &config.rate_limit);

        let mut client = VendorClient::new(
            config.code.clone(),
            config.base_url.as_str(),
            config.credentials.clone(),
            config.transport(),
            limiter,
            config.retry.clone(),
        )?;
        if let Some(ws_url) = &config.ws_url {
            client = client.with_ws_url(ws_url.clone());
        }

        let (transformer, capabilities): (Box<dyn Transformer>, &[Capability]) = match config.kind {
            VendorKind::Shure => (Box::new(ShureTransformer), SHURE_CAPABILITIES),
            VendorKind::Sennheiser => (Box::new(SennheiserTransformer), SENNHEISER_CAPABILITIES),
        };

        let push = config.ws_url.is_some();
        let capabilities: Vec<Capability> = capabilities
            .iter()
            .copied()
            .filter(|c| push || *c != Capability::Subscription)
            .collect();

        Ok(Self::new(client, transformer, &capabilities))
    }

    fn require(&self, capability: Capability) -> Result<(), CoreError> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(self.unsupported(capability))
        }
    }
}

#[async_trait]
impl ManufacturerPlugin for HttpPlugin {
    fn code(&self) -> &str {
        &self.code
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn transformer(&self) -> &dyn Transformer {
        self.transformer.as_ref()
    }

    async fn check_health(&self) -> Result<HealthProbe, CoreError> {
        self.require(Capability::Health)?;
        Ok(self.client.health_check().await?)
    }

    async fn get_devices(&self) -> Result<Vec<Value>, CoreError> {
        self.require(Capability::DeviceListing)?;
        Ok(self.client.list_devices().await?)
    }

    async fn get_device_detail(&self, device_id: &str) -> Result<DeviceDetail, CoreError> {
        self.require(Capability::DeviceDetail)?;
        Ok(self.client.get_device_detail(device_id).await?)
    }

    async fn get_discovery_candidates(&self) -> Result<Vec<String>, CoreError> {
        self.require(Capability::DiscoveryManagement)?;
        Ok(self.client.list_discovery_candidates().await?)
    }

    async fn set_discovery_candidates(&self, ips: &[String]) -> Result<(), CoreError> {
        self.require(Capability::DiscoveryManagement)?;
        Ok(self.client.set_discovery_candidates(ips).await?)
    }

    async fn remove_discovery_candidates(&self, ips: &[String]) -> Result<(), CoreError> {
        self.require(Capability::DiscoveryManagement)?;
        Ok(self.client.remove_discovery_candidates(ips).await?)
    }

    fn subscribe(
        &self,
        device_id: &str,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Result<PushSubscription, CoreError> {
        self.require(Capability::Subscription)?;
        Ok(self.client.subscribe(device_id, reconnect, cancel)?)
    }
}
