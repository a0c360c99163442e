// micsync-core: device synchronization engine between micsync-api and hosts.

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod model;
pub mod plugin;
pub mod registry;
pub mod store;
pub mod sync;
pub mod transform;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{EngineConfig, HealthConfig, SyncConfig, TlsVerification, VendorConfig, VendorKind};
pub use discovery::{DiscoveryOutcome, DiscoveryService};
pub use engine::Engine;
pub use error::{CoreError, ErrorKind};
pub use events::{EventBroadcaster, EventSubscriber};
pub use health::{ConnectionHealth, ConnectionHealthService, VendorHealthStats};
pub use plugin::{Capability, HttpPlugin, ManufacturerPlugin};
pub use registry::{PluginRegistry, PluginRegistryBuilder};
pub use store::{DeviceStore, MemoryStore, Upsert};
pub use sync::SyncService;
pub use transform::{TransformError, TransformErrorKind, Transformer};

pub use model::{
    // Inventory
    Channel, ChannelRecord, Device, DeviceKey, DeviceRecord, Reading, Transmitter,
    // Runs
    SyncFailure, SyncPhase, SyncResult, VendorStatus,
    // Events
    DiscoveryChange, DomainEvent, EventPayload, EventType, HealthChange, HealthReason,
    HealthSubject,
};

// Transport types that appear in this crate's public API.
pub use micsync_api::{
    DeviceDetail, HealthProbe, PushMessage, PushSubscription, RateLimitConfig, RateLimiter,
    ReconnectConfig, RetryPolicy, SharedSecret,
};
