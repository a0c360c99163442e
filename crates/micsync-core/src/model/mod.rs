// ── Canonical domain model ──
//
// Vendor-neutral representation of receivers, channels and transmitters,
// plus the values the engine hands back to callers (sync results) and
// publishes on the event bus.

pub mod device;
pub mod event;
pub mod sync;

pub use device::{Channel, ChannelRecord, Device, DeviceKey, DeviceRecord, Reading, Transmitter};
pub use event::{
    DiscoveryChange, DomainEvent, EventPayload, EventType, HealthChange, HealthReason,
    HealthSubject,
};
pub use sync::{SyncFailure, SyncPhase, SyncResult, VendorStatus};
