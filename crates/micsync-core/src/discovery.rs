// ── Discovery candidate management ──
//
// A vendor's candidate list lives on the vendor and is shared with other
// writers. Every mutation reads the current list, applies set arithmetic
// locally, writes the full replacement and reads back to confirm. A
// mismatch on read-back is a conflict: re-read and retry once.

use std::collections::BTreeSet;
use std::net::{AddrParseError, IpAddr};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CoreError, ErrorKind};
use crate::events::EventBroadcaster;
use crate::model::{DiscoveryChange, DomainEvent};
use crate::plugin::{Capability, ManufacturerPlugin};
use crate::registry::PluginRegistry;

const MAX_ATTEMPTS: usize = 2;

/// Canonical textual form of an IP address (`"FE80::1"` becomes `"fe80::1"`).
pub fn canonical_address(raw: &str) -> Result<String, AddrParseError> {
    raw.trim().parse::<IpAddr>().map(|ip| ip.to_string())
}

/// Result of an inbound discovery update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    Accepted(DiscoveryChange),
    Rejected { kind: ErrorKind, reason: String },
}

impl DiscoveryOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

impl From<Result<DiscoveryChange, CoreError>> for DiscoveryOutcome {
    fn from(result: Result<DiscoveryChange, CoreError>) -> Self {
        match result {
            Ok(change) => Self::Accepted(change),
            Err(e) => Self::Rejected {
                kind: e.kind(),
                reason: e.to_string(),
            },
        }
    }
}

pub struct DiscoveryService {
    registry: Arc<PluginRegistry>,
    events: EventBroadcaster,
}

impl DiscoveryService {
    pub fn new(registry: Arc<PluginRegistry>, events: EventBroadcaster) -> Self {
        Self { registry, events }
    }

    /// Current remote list, normalised and sorted.
    pub async fn get_candidates(&self, vendor: &str) -> Result<Vec<String>, CoreError> {
        let plugin = self.discovery_plugin(vendor)?;
        Ok(read_set(plugin.as_ref()).await?.into_iter().collect())
    }

    pub async fn add_candidates(
        &self,
        vendor: &str,
        addresses: &[String],
    ) -> Result<DiscoveryChange, CoreError> {
        self.update(vendor, addresses, &[]).await
    }

    pub async fn remove_candidates(
        &self,
        vendor: &str,
        addresses: &[String],
    ) -> Result<DiscoveryChange, CoreError> {
        self.update(vendor, &[], addresses).await
    }

    /// Apply `(current ∪ add) \ remove` to the vendor's list.
    ///
    /// Always writes the full list, even when nothing changes. Publishes
    /// `discovery_updated` only when the list actually changed.
    pub async fn update(
        &self,
        vendor: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<DiscoveryChange, CoreError> {
        let plugin = self.discovery_plugin(vendor)?;
        let add = normalise(add)?;
        let remove = normalise(remove)?;

        let original = read_set(plugin.as_ref()).await?;
        let mut current = original.clone();

        for attempt in 1..=MAX_ATTEMPTS {
            let desired: BTreeSet<String> = current
                .union(&add)
                .filter(|ip| !remove.contains(*ip))
                .cloned()
                .collect();

            let body: Vec<String> = desired.iter().cloned().collect();
            debug!(vendor, attempt, candidates = body.len(), "writing discovery list");
            plugin.set_discovery_candidates(&body).await?;

            let observed = read_set(plugin.as_ref()).await?;
            if observed == desired {
                return Ok(self.finish(vendor, &original, desired));
            }
            warn!(
                vendor,
                attempt,
                expected = desired.len(),
                observed = observed.len(),
                "discovery list changed during update"
            );
            current = observed;
        }

        Err(CoreError::DiscoveryUpdateConflict {
            vendor: vendor.to_owned(),
        })
    }

    fn discovery_plugin(&self, vendor: &str) -> Result<Arc<dyn ManufacturerPlugin>, CoreError> {
        let plugin = self.registry.require(vendor)?;
        if !plugin.supports(Capability::DiscoveryManagement) {
            return Err(plugin.unsupported(Capability::DiscoveryManagement));
        }
        Ok(plugin)
    }

    fn finish(
        &self,
        vendor: &str,
        original: &BTreeSet<String>,
        result: BTreeSet<String>,
    ) -> DiscoveryChange {
        let change = DiscoveryChange {
            added: result.difference(original).cloned().collect(),
            removed: original.difference(&result).cloned().collect(),
            candidates: result.into_iter().collect(),
        };
        if !change.added.is_empty() || !change.removed.is_empty() {
            info!(
                vendor,
                added = change.added.len(),
                removed = change.removed.len(),
                total = change.candidates.len(),
                "discovery list updated"
            );
            self.events
                .publish(DomainEvent::discovery_updated(vendor, change.clone()));
        }
        change
    }
}

fn normalise(addresses: &[String]) -> Result<BTreeSet<String>, CoreError> {
    addresses
        .iter()
        .map(|raw| {
            canonical_address(raw).map_err(|e| CoreError::InvalidAddress {
                address: raw.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Remote entries that are not valid IPs are kept verbatim (trimmed) so a
/// rewrite never silently drops something another writer put there.
async fn read_set(plugin: &dyn ManufacturerPlugin) -> Result<BTreeSet<String>, CoreError> {
    let raw = plugin.get_discovery_candidates().await?;
    Ok(raw
        .iter()
        .map(|entry| canonical_address(entry).unwrap_or_else(|_| entry.trim().to_owned()))
        .filter(|entry| !entry.is_empty())
        .collect())
}
