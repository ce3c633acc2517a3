//! Connection wizard for networked embedded devices.
//!
//! Takes a device from power-on to an operational broker session in stages
//! (wireless association, time synchronization, broker connection), and
//! falls back to an access point with a JSON configuration portal when no
//! usable configuration is stored.
//!
//! Everything except the `esp32` adapters is platform-independent and can be
//! tested on the host machine without ESP32 hardware.

pub mod broker;
pub mod config;
pub mod network;
pub mod orchestrator;
pub mod persistence;
pub mod platform;
pub mod portal;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod time_sync;

// Re-export commonly used items
pub use broker::{BrokerClient, BrokerEndpoint, BrokerError, MqttBroker};
pub use config::{ConfigStore, OptionRegistry, OptionValidator, UserOption};
pub use network::{NetworkProvider, ScanEntry, Security};
pub use orchestrator::{
    ConnectionOrchestrator, ConnectivityError, Mode, OrchestratorSettings, Platform, Status,
    StatusObserver,
};
pub use persistence::{ConfigPersistence, FileStorage, PersistenceError, Storage};
pub use platform::{ClockSource, DeviceControl, SystemClock};
pub use portal::{HttpPortal, PortalListener, PortalRequest, PortalResponse};
pub use time_sync::{SntpClient, TimeSync};
