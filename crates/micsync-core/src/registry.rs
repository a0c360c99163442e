// ── Plugin registry ──
//
// Built once at startup, frozen afterwards. Lookups go through a plain
// `HashMap` behind an `Arc`; there is no runtime registration path, so
// reads need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use micsync_api::RateLimiter;
use tracing::{debug, info};

use crate::config::VendorConfig;
use crate::error::CoreError;
use crate::plugin::{HttpPlugin, ManufacturerPlugin};

/// Accumulates plugins before the registry is frozen.
#[derive(Default)]
pub struct PluginRegistryBuilder {
    plugins: HashMap<String, Arc<dyn ManufacturerPlugin>>,
}

impl PluginRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin. Codes must be unique.
    pub fn register(mut self, plugin: Arc<dyn ManufacturerPlugin>) -> Result<Self, CoreError> {
        let code = plugin.code().to_owned();
        if self.plugins.contains_key(&code) {
            return Err(CoreError::DuplicateVendor { code });
        }
        debug!(vendor = %code, capabilities = ?plugin.capabilities(), "registered plugin");
        self.plugins.insert(code, plugin);
        Ok(self)
    }

    pub fn build(self) -> PluginRegistry {
        let mut codes: Vec<String> = self.plugins.keys().cloned().collect();
        codes.sort();
        PluginRegistry {
            plugins: self.plugins,
            codes,
        }
    }
}

/// Immutable lookup of enabled plugins by manufacturer code.
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn ManufacturerPlugin>>,
    /// Sorted; drives the deterministic order of `list_enabled`.
    codes: Vec<String>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::new()
    }

    /// Build HTTP plugins for every enabled vendor entry.
    pub fn from_config(
        vendors: &[VendorConfig],
        limiter: &Arc<RateLimiter>,
    ) -> Result<Self, CoreError> {
        let mut builder = Self::builder();
        for vendor in vendors.iter().filter(|v| v.enabled) {
            let plugin = HttpPlugin::from_config(vendor, Arc::clone(limiter))?;
            builder = builder.register(Arc::new(plugin))?;
        }
        let registry = builder.build();
        info!(vendors = ?registry.codes, "plugin registry ready");
        Ok(registry)
    }

    pub fn get(&self, code: &str) -> Option<Arc<dyn ManufacturerPlugin>> {
        self.plugins.get(code).cloned()
    }

    /// Like [`get`](Self::get), but an unknown code is an error.
    pub fn require(&self, code: &str) -> Result<Arc<dyn ManufacturerPlugin>, CoreError> {
        self.get(code).ok_or_else(|| CoreError::UnknownVendor {
            code: code.to_owned(),
        })
    }

    /// All plugins, ordered by vendor code.
    pub fn list_enabled(&self) -> Vec<Arc<dyn ManufacturerPlugin>> {
        self.codes
            .iter()
            .filter_map(|code| self.plugins.get(code).cloned())
            .collect()
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
