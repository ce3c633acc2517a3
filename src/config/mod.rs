//! Device configuration model.
//!
//! # Components
//!
//! - [`option`] - Caller-registered named options with defaults
//! - [`store`] - The full device configuration ([`ConfigStore`])
//! - [`wifi`] - Credential validation for association attempts

mod option;
mod store;
mod wifi;

pub use option::{OptionCursor, OptionError, OptionRegistry, OptionValidator, UserOption};
pub use store::{
    ConfigStore, MqttSettings, NtpSettings, WifiSettings, DEFAULT_AP_NAME, DEFAULT_DEVICE_NAME,
    DEFAULT_MQTT_ADDRESS, DEFAULT_MQTT_PORT, DEFAULT_NTP_SERVER,
    DEFAULT_NTP_UPDATE_INTERVAL_MINUTES, DEFAULT_VERSION, MAX_TIME_OFFSET_SECS,
};
pub use wifi::{ConfigError, WifiCredentials, MAX_PASSWORD_LEN, MAX_SSID_LEN, MIN_PASSWORD_LEN};
