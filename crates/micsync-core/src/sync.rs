// ── Per-vendor synchronization runs ──
//
// One run walks Listing → Detailing → Transforming → Persisting →
// OfflineDetection → Broadcasting for a single vendor. Runs execute in
// their own task: a trigger either starts one or joins the run already in
// flight for that vendor, and every joined caller receives the same
// `Arc<SyncResult>`. Different vendors never wait on each other.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use futures_util::future::join_all;
use micsync_api::DeviceDetail;
use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::events::EventBroadcaster;
use crate::health::ConnectionHealthService;
use crate::model::{
    ChannelRecord, DeviceKey, DeviceRecord, DomainEvent, HealthChange, HealthReason, SyncFailure,
    SyncPhase, SyncResult, VendorStatus,
};
use crate::plugin::ManufacturerPlugin;
use crate::registry::PluginRegistry;
use crate::store::{DeviceStore, Upsert};

type ResultSlot = watch::Receiver<Option<Arc<SyncResult>>>;

/// Orchestrates synchronization runs. Cheaply cloneable.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn DeviceStore>,
    health: Arc<ConnectionHealthService>,
    events: EventBroadcaster,
    config: SyncConfig,
    in_flight: DashMap<String, ResultSlot>,
    phases: DashMap<String, SyncPhase>,
}

impl SyncService {
    pub fn new(
        registry: Arc<PluginRegistry>,
        store: Arc<dyn DeviceStore>,
        health: Arc<ConnectionHealthService>,
        events: EventBroadcaster,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                registry,
                store,
                health,
                events,
                config,
                in_flight: DashMap::new(),
                phases: DashMap::new(),
            }),
        }
    }

    /// Synchronize one vendor, or every enabled vendor when `vendor` is
    /// `None`. Results are ordered by vendor code.
    pub async fn poll(&self, vendor: Option<&str>) -> Result<Vec<Arc<SyncResult>>, CoreError> {
        let plugins = match vendor {
            Some(code) => vec![self.inner.registry.require(code)?],
            None => self.inner.registry.list_enabled(),
        };
        Ok(join_all(plugins.into_iter().map(|p| self.poll_vendor(p))).await)
    }

    /// Current phase of the vendor's run, `Idle` when none is in flight.
    pub fn phase(&self, vendor: &str) -> SyncPhase {
        self.inner
            .phases
            .get(vendor)
            .map_or(SyncPhase::Idle, |p| *p)
    }

    pub fn is_running(&self, vendor: &str) -> bool {
        self.inner.in_flight.contains_key(vendor)
    }

    async fn poll_vendor(&self, plugin: Arc<dyn ManufacturerPlugin>) -> Arc<SyncResult> {
        let code = plugin.code().to_owned();

        let (mut rx, starter) = match self.inner.in_flight.entry(code.clone()) {
            Entry::Occupied(slot) => {
                debug!(vendor = %code, "joining in-flight sync");
                (slot.get().clone(), None)
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());
                (rx, Some(tx))
            }
        };

        if let Some(tx) = starter {
            let this = self.clone();
            let vendor = code.clone();
            tokio::spawn(async move {
                let result = Arc::new(this.run(plugin.as_ref()).await);
                this.inner.in_flight.remove(&vendor);
                tx.send_replace(Some(result));
            });
        }

        let outcome = rx.wait_for(Option::is_some).await.map(|slot| slot.clone());
        match outcome {
            Ok(Some(result)) => result,
            _ => {
                // The run task died without reporting.
                self.inner
                    .in_flight
                    .remove_if(&code, |_, slot| slot.same_channel(&rx));
                self.inner.phases.remove(&code);
                error!(vendor = %code, "sync task ended without a result");
                Arc::new(lost_run(&code))
            }
        }
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    async fn run(&self, plugin: &dyn ManufacturerPlugin) -> SyncResult {
        let vendor = plugin.code().to_owned();
        let deadline = Instant::now() + self.inner.config.run_timeout;
        let mut run = RunState::new(vendor.clone(), Utc::now());
        info!(vendor = %vendor, "sync started");

        if let Some(ids) = self.list(plugin, &mut run, deadline).await {
            let details = self.fetch_details(plugin, &ids, &mut run, deadline).await;
            let records = self.transform(plugin, details, &mut run);
            self.persist_all(records, &mut run, deadline).await;
            if run.complete() {
                if Instant::now() >= deadline {
                    let e = run.timeout_error();
                    run.mark_timed_out(&e);
                } else if timeout_at(deadline, self.detect_offline(&mut run))
                    .await
                    .is_err()
                {
                    let e = run.timeout_error();
                    warn!(vendor = %run.vendor, "sync timed out during offline detection");
                    run.mark_timed_out(&e);
                }
            }
        }

        self.set_phase(&vendor, SyncPhase::Broadcasting);
        let result = run.finish();
        self.broadcast(&result, std::mem::take(&mut run.health_changes));
        self.inner.phases.remove(&vendor);

        if result.status == VendorStatus::Error {
            error!(vendor = %vendor, failures = result.failures.len(), "sync failed");
        } else {
            info!(
                vendor = %vendor,
                status = %result.status,
                created = result.created,
                updated = result.updated,
                offline = result.offline,
                failed = result.failed,
                "sync finished"
            );
        }
        result
    }

    /// Unique device ids from the listing. `None` aborts the run.
    async fn list(
        &self,
        plugin: &dyn ManufacturerPlugin,
        run: &mut RunState,
        deadline: Instant,
    ) -> Option<Vec<String>> {
        self.set_phase(&run.vendor, SyncPhase::Listing);
        let listing = match timeout_at(deadline, plugin.get_devices()).await {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) => {
                self.inner.health.record_vendor_error(&run.vendor, &e);
                run.abort(&e);
                return None;
            }
            Err(_) => {
                let e = run.timeout_error();
                self.inner.health.record_vendor_error(&run.vendor, &e);
                run.abort(&e);
                return None;
            }
        };

        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(listing.len());
        for entry in &listing {
            match plugin.transformer().device_id(entry) {
                Ok(id) => {
                    if seen.insert(id.clone()) {
                        ids.push(id);
                    }
                }
                Err(e) => run.fail(None, &CoreError::from(e)),
            }
        }
        debug!(vendor = %run.vendor, devices = ids.len(), "listing complete");
        Some(ids)
    }

    /// Fetch details with bounded parallelism. Everything is joined before
    /// returning, so later phases see the full set observed in this run.
    async fn fetch_details(
        &self,
        plugin: &dyn ManufacturerPlugin,
        ids: &[String],
        run: &mut RunState,
        deadline: Instant,
    ) -> Vec<(String, DeviceDetail)> {
        self.set_phase(&run.vendor, SyncPhase::Detailing);
        let limit = self.inner.config.max_concurrent_details.max(1);
        let mut pending: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut fetched = Vec::with_capacity(ids.len());

        let mut fetches = futures_util::stream::iter(ids.iter().cloned())
            .map(|id| async move {
                let detail = plugin.get_device_detail(&id).await;
                (id, detail)
            })
            .buffer_unordered(limit);

        loop {
            match timeout_at(deadline, fetches.next()).await {
                Ok(Some((id, Ok(detail)))) => {
                    pending.remove(id.as_str());
                    fetched.push((id, detail));
                }
                Ok(Some((id, Err(e)))) => {
                    pending.remove(id.as_str());
                    if e.is_vendor_fatal() {
                        // Details already in hand are still persisted.
                        self.inner.health.record_vendor_error(&run.vendor, &e);
                        run.abort(&e);
                        break;
                    }
                    warn!(vendor = %run.vendor, device = %id, error = %e, "device detail failed");
                    self.inner
                        .health
                        .record_error(&DeviceKey::new(run.vendor.as_str(), id.as_str()), &e);
                    run.fail(Some(id.as_str()), &e);
                }
                Ok(None) => break,
                Err(_) => {
                    let e = run.timeout_error();
                    let mut unfetched: Vec<&str> = pending.iter().copied().collect();
                    unfetched.sort_unstable();
                    warn!(
                        vendor = %run.vendor,
                        unfetched = unfetched.len(),
                        "sync timed out while fetching details"
                    );
                    for id in unfetched {
                        run.fail(Some(id), &e);
                    }
                    run.mark_timed_out(&e);
                    break;
                }
            }
        }
        fetched
    }

    fn transform(
        &self,
        plugin: &dyn ManufacturerPlugin,
        details: Vec<(String, DeviceDetail)>,
        run: &mut RunState,
    ) -> Vec<DeviceRecord> {
        self.set_phase(&run.vendor, SyncPhase::Transforming);
        let transformer = plugin.transformer();
        details
            .into_iter()
            .filter_map(|(id, detail)| {
                match transformer.to_canonical_device(&run.vendor, &detail) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        let e = CoreError::from(e);
                        warn!(vendor = %run.vendor, device = %id, error = %e, "transform failed");
                        self.inner
                            .health
                            .record_error(&DeviceKey::new(run.vendor.as_str(), id.as_str()), &e);
                        run.fail(Some(id.as_str()), &e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Upserts finished before the deadline are kept; the rest are failed
    /// with `SyncTimeout`.
    async fn persist_all(&self, records: Vec<DeviceRecord>, run: &mut RunState, deadline: Instant) {
        self.set_phase(&run.vendor, SyncPhase::Persisting);
        let mut records = records.into_iter();
        while let Some(record) = records.next() {
            let key = record.key().clone();
            let Ok(persisted) = timeout_at(deadline, self.persist(record, run.started_at)).await
            else {
                let e = run.timeout_error();
                warn!(
                    vendor = %run.vendor,
                    unpersisted = records.len() + 1,
                    "sync timed out while persisting"
                );
                run.fail(Some(key.device_id.as_str()), &e);
                for rest in records {
                    run.fail(Some(rest.key().device_id.as_str()), &e);
                }
                run.mark_timed_out(&e);
                return;
            };
            match persisted {
                Ok((outcome, recovered)) => {
                    match outcome {
                        Upsert::Created => run.created += 1,
                        Upsert::Updated => run.updated += 1,
                    }
                    self.inner.health.record_heartbeat(&key);
                    if recovered {
                        run.health_changes
                            .push(HealthChange::device(&key, HealthReason::CameOnline));
                    }
                    run.observed.insert(key.device_id);
                }
                Err(e) => {
                    warn!(vendor = %run.vendor, device = %key, error = %e, "persist failed");
                    run.fail(Some(key.device_id.as_str()), &e);
                }
            }
        }
    }

    /// Upsert one device with its channels. Returns whether the device was
    /// created, and whether it was offline before this observation.
    async fn persist(
        &self,
        record: DeviceRecord,
        seen_at: DateTime<Utc>,
    ) -> Result<(Upsert, bool), CoreError> {
        let store = &self.inner.store;
        let DeviceRecord {
            mut device,
            channels,
        } = record;

        let previous = store
            .query_device(&device.key.vendor, &device.key.device_id)
            .await?;
        let recovered = previous.as_ref().is_some_and(|p| !p.online);
        device.online = true;
        device.last_seen = Some(seen_at);
        device.last_offline_at = previous.and_then(|p| p.last_offline_at);

        let key = device.key.clone();
        let outcome = store.upsert_device(device).await?;

        let mut keep = Vec::with_capacity(channels.len());
        for ChannelRecord {
            channel,
            transmitter,
        } in channels
        {
            let number = channel.number;
            keep.push(number);
            store.upsert_channel(channel).await?;
            match transmitter {
                Some(tx) => {
                    store.upsert_transmitter(tx).await?;
                }
                None => {
                    store.remove_transmitter(&key, number).await?;
                }
            }
        }
        store.retain_channels(&key, &keep).await?;

        Ok((outcome, recovered))
    }

    /// Flip unobserved, stale, online devices to offline exactly once.
    async fn detect_offline(&self, run: &mut RunState) {
        self.set_phase(&run.vendor, SyncPhase::OfflineDetection);
        let store = &self.inner.store;
        let now = run.started_at;
        let threshold = chrono::Duration::from_std(self.inner.config.offline_threshold)
            .unwrap_or(chrono::Duration::MAX);

        let devices = match store.devices_for_vendor(&run.vendor).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(vendor = %run.vendor, error = %e, "offline detection skipped");
                run.fail(None, &e);
                return;
            }
        };

        for mut device in devices {
            if !device.online || run.observed.contains(&device.key.device_id) {
                continue;
            }
            let stale = device
                .last_seen
                .is_none_or(|seen| now.signed_duration_since(seen) >= threshold);
            if !stale {
                continue;
            }

            device.online = false;
            device.last_offline_at = Some(now);
            let key = device.key.clone();
            match store.upsert_device(device).await {
                Ok(_) => {
                    info!(vendor = %run.vendor, device = %key, "device marked offline");
                    run.offline += 1;
                    run.health_changes
                        .push(HealthChange::device(&key, HealthReason::MarkedOffline));
                }
                Err(e) => {
                    warn!(vendor = %run.vendor, device = %key, error = %e, "offline flip failed");
                    run.fail(Some(key.device_id.as_str()), &e);
                }
            }
        }
    }

    fn broadcast(&self, result: &SyncResult, changes: Vec<HealthChange>) {
        let events = &self.inner.events;
        for change in changes {
            events.publish(DomainEvent::health_changed(&result.vendor, change));
        }

        let previous = self
            .inner
            .health
            .record_vendor_status(&result.vendor, result.status);
        if previous.is_some_and(|p| p.is_reachable() != result.status.is_reachable()) {
            events.publish(DomainEvent::health_changed(
                &result.vendor,
                HealthChange::vendor(result.status),
            ));
        }

        events.publish(DomainEvent::devices_synced(result.clone()));
    }

    fn set_phase(&self, vendor: &str, phase: SyncPhase) {
        debug!(vendor, %phase, "sync phase");
        self.inner.phases.insert(vendor.to_owned(), phase);
    }
}

// ── Run bookkeeping ──────────────────────────────────────────────────

struct RunState {
    vendor: String,
    started_at: DateTime<Utc>,
    clock: Instant,
    created: usize,
    updated: usize,
    offline: usize,
    failed: usize,
    failures: Vec<SyncFailure>,
    observed: HashSet<String>,
    health_changes: Vec<HealthChange>,
    aborted: bool,
    timed_out: bool,
}

impl RunState {
    fn new(vendor: String, started_at: DateTime<Utc>) -> Self {
        Self {
            vendor,
            started_at,
            clock: Instant::now(),
            created: 0,
            updated: 0,
            offline: 0,
            failed: 0,
            failures: Vec::new(),
            observed: HashSet::new(),
            health_changes: Vec::new(),
            aborted: false,
            timed_out: false,
        }
    }

    /// Record a contained failure; counts towards `failed`.
    fn fail(&mut self, device_id: Option<&str>, err: &CoreError) {
        self.failed += 1;
        self.failures.push(match device_id {
            Some(id) => SyncFailure::device(id, err),
            None => SyncFailure::vendor(err),
        });
    }

    /// Record a vendor-scope failure that ends the run.
    fn abort(&mut self, err: &CoreError) {
        error!(vendor = %self.vendor, error = %err, "sync aborted");
        self.aborted = true;
        self.failures.push(SyncFailure::vendor(err));
    }

    fn mark_timed_out(&mut self, err: &CoreError) {
        self.timed_out = true;
        self.failures.push(SyncFailure::vendor(err));
    }

    fn timeout_error(&self) -> CoreError {
        CoreError::SyncTimeout {
            vendor: self.vendor.clone(),
            elapsed: self.clock.elapsed(),
        }
    }

    /// Whether this run saw the vendor's full inventory.
    fn complete(&self) -> bool {
        !self.aborted && !self.timed_out
    }

    fn status(&self) -> VendorStatus {
        let observed = self.created + self.updated;
        if self.aborted || (self.failed > 0 && observed == 0) {
            VendorStatus::Error
        } else if self.failed > 0 || self.timed_out {
            VendorStatus::Partial
        } else {
            VendorStatus::Ok
        }
    }

    fn finish(&mut self) -> SyncResult {
        SyncResult {
            vendor: self.vendor.clone(),
            status: self.status(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            created: self.created,
            updated: self.updated,
            offline: self.offline,
            failed: self.failed,
            failures: std::mem::take(&mut self.failures),
        }
    }
}

fn lost_run(vendor: &str) -> SyncResult {
    let now = Utc::now();
    let err = CoreError::Internal("sync task ended without a result".into());
    SyncResult {
        vendor: vendor.to_owned(),
        status: VendorStatus::Error,
        started_at: now,
        finished_at: now,
        created: 0,
        updated: 0,
        offline: 0,
        failed: 0,
        failures: vec![SyncFailure::vendor(&err)],
    }
}
