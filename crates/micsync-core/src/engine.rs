// ── Engine facade ──
//
// Wires the registry, store, health tracker, event bus, discovery and sync
// services together and exposes the inbound trigger interface. Cheaply
// cloneable; all clones share the same state.

use std::sync::Arc;
use std::time::Duration;

use micsync_api::{PushSubscription, RateLimiter, ReconnectConfig};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::discovery::{DiscoveryOutcome, DiscoveryService};
use crate::error::CoreError;
use crate::events::{EventBroadcaster, EventSubscriber};
use crate::health::ConnectionHealthService;
use crate::model::{DeviceKey, DomainEvent, SyncPhase, SyncResult};
use crate::plugin::Capability;
use crate::registry::PluginRegistry;
use crate::store::{DeviceStore, MemoryStore};
use crate::sync::SyncService;

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    registry: Arc<PluginRegistry>,
    store: Arc<dyn DeviceStore>,
    health: Arc<ConnectionHealthService>,
    events: EventBroadcaster,
    discovery: DiscoveryService,
    sync: SyncService,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Build HTTP plugins for every enabled vendor and back the engine
    /// with an in-memory store. Does not start the scheduler.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        let limiter = Arc::new(RateLimiter::default());
        let registry = Arc::new(PluginRegistry::from_config(&config.vendors, &limiter)?);
        Ok(Self::with_parts(config, registry, Arc::new(MemoryStore::new())))
    }

    /// Assemble an engine around an existing registry and store.
    pub fn with_parts(
        config: EngineConfig,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn DeviceStore>,
    ) -> Self {
        let health = Arc::new(ConnectionHealthService::new(
            config.health.error_threshold,
            config.sync.offline_threshold,
        ));
        let events = EventBroadcaster::new(config.event_channel_capacity);
        let discovery = DiscoveryService::new(Arc::clone(&registry), events.clone());
        let sync = SyncService::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&health),
            events.clone(),
            config.sync.clone(),
        );

        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                store,
                health,
                events,
                discovery,
                sync,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.inner.store
    }

    pub fn health(&self) -> &Arc<ConnectionHealthService> {
        &self.inner.health
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.inner.discovery
    }

    // ── Inbound triggers ─────────────────────────────────────────────

    /// Synchronize one vendor, or all of them. Concurrent triggers for the
    /// same vendor share one run.
    pub async fn trigger_sync(&self, vendor: Option<&str>) -> Result<Vec<Arc<SyncResult>>, CoreError> {
        self.inner.sync.poll(vendor).await
    }

    /// Add and remove discovery candidates in one read-modify-write.
    pub async fn trigger_discovery_update(
        &self,
        vendor: &str,
        add: &[String],
        remove: &[String],
    ) -> DiscoveryOutcome {
        let outcome = DiscoveryOutcome::from(self.inner.discovery.update(vendor, add, remove).await);
        if let DiscoveryOutcome::Rejected { reason, .. } = &outcome {
            warn!(vendor, reason = %reason, "discovery update rejected");
        }
        outcome
    }

    /// Open a push subscription for one device. Ends with [`shutdown`](Self::shutdown).
    pub fn subscribe_device(
        &self,
        device: &DeviceKey,
        reconnect: ReconnectConfig,
    ) -> Result<PushSubscription, CoreError> {
        let plugin = self.inner.registry.require(&device.vendor)?;
        if !plugin.supports(Capability::Subscription) {
            return Err(plugin.unsupported(Capability::Subscription));
        }
        plugin.subscribe(&device.device_id, reconnect, self.inner.cancel.child_token())
    }

    /// Prune health records of devices no longer in the store.
    pub async fn cleanup_stale(&self) -> Result<usize, CoreError> {
        let keys = self.inner.store.device_keys().await?;
        Ok(self.inner.health.cleanup_stale(&keys))
    }

    pub fn sync_phase(&self, vendor: &str) -> SyncPhase {
        self.inner.sync.phase(vendor)
    }

    // ── Events ───────────────────────────────────────────────────────

    pub fn events(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.inner.events.subscribe()
    }

    /// Attach a subscriber that runs until [`shutdown`](Self::shutdown).
    pub async fn attach_subscriber(&self, name: &str, subscriber: Arc<dyn EventSubscriber>) {
        let handle = self
            .inner
            .events
            .attach(name, subscriber, self.inner.cancel.child_token());
        self.inner.task_handles.lock().await.push(handle);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the periodic scheduler. The first sync runs immediately.
    pub async fn start(&self) {
        let interval = self.inner.config.sync.poll_interval;
        if interval.is_zero() {
            info!("poll interval is zero, scheduler disabled");
            return;
        }
        let engine = self.clone();
        let cancel = self.inner.cancel.clone();
        self.inner
            .task_handles
            .lock()
            .await
            .push(tokio::spawn(scheduler_task(engine, interval, cancel)));
        info!(
            vendors = self.inner.registry.len(),
            interval = ?interval,
            "engine started"
        );
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("engine stopped");
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn scheduler_task(engine: Engine, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = engine.trigger_sync(None).await {
                    warn!(error = %e, "scheduled sync failed");
                }
                match engine.cleanup_stale().await {
                    Ok(0) => {}
                    Ok(pruned) => debug!(pruned, "health records pruned"),
                    Err(e) => warn!(error = %e, "health cleanup failed"),
                }
            }
        }
    }
}
