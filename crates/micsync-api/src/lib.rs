// micsync-api: async transport for wireless-microphone vendor APIs.

pub mod client;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod transport;
pub mod types;
pub mod websocket;

pub use client::{HealthProbe, VendorClient};
pub use error::Error;
pub use rate_limit::{Permit, RateLimitConfig, RateLimiter};
pub use retry::RetryPolicy;
pub use transport::{SharedSecret, TlsMode, TransportConfig};
pub use types::{DeviceDetail, DiscoveryIps, PushMessage};
pub use websocket::{PushSubscription, ReconnectConfig};
