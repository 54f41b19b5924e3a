// ABOUTME: Shared foundation of the gatecast gateway: device identity, lifecycle
// ABOUTME: events, outbound delivery configuration, metrics, and the device registry

pub mod config;
pub mod device;
pub mod metrics;
pub mod registry;

pub use config::{ConfigError, DeliveryConfig, GatewayConfig, OutboundConfig, SelectionPolicy};
pub use device::{
    ConnectInfo, DeliveryEnvelope, DeviceId, DisconnectInfo, EventKind, EventPayload,
    LifecycleEvent,
};
pub use registry::{DeviceCommand, DeviceHandle, DeviceRegistry, DisconnectOutcome, LocalRegistry};
