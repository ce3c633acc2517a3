//! Device configuration store.
//!
//! [`ConfigStore`] holds the fixed settings every device needs (identity,
//! wireless credentials, time sync and broker parameters) together with the
//! application's [`OptionRegistry`]. Cloning a store copies every option, so
//! two stores never share option state.

use super::option::{OptionCursor, OptionError, OptionRegistry, UserOption};
use log::info;
use std::fmt;
use zeroize::Zeroize;

/// Default configuration version.
pub const DEFAULT_VERSION: &str = "0.0.0";

/// Default device name.
pub const DEFAULT_DEVICE_NAME: &str = "My Device";

/// Default name advertised by the configuration access point.
pub const DEFAULT_AP_NAME: &str = "ESP Configuration";

/// Default time server.
pub const DEFAULT_NTP_SERVER: &str = "time.google.com";

/// Default time-sync update interval (one day).
pub const DEFAULT_NTP_UPDATE_INTERVAL_MINUTES: u16 = 1440;

/// Default broker address.
pub const DEFAULT_MQTT_ADDRESS: &str = "broker.hivemq.com";

/// Default broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Largest offset from UTC of any civil time zone (UTC+14).
pub const MAX_TIME_OFFSET_SECS: i64 = 14 * 60 * 60;

/// Wireless station settings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WifiSettings {
    pub ssid: String,
    pub password: String,
}

/// Time synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtpSettings {
    pub server: String,
    /// Offset from UTC applied to synchronized time.
    pub time_offset_secs: i64,
    pub update_interval_minutes: u16,
}

impl Default for NtpSettings {
    fn default() -> Self {
        Self {
            server: DEFAULT_NTP_SERVER.to_string(),
            time_offset_secs: 0,
            update_interval_minutes: DEFAULT_NTP_UPDATE_INTERVAL_MINUTES,
        }
    }
}

/// Message broker settings.
#[derive(Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub address: String,
    pub port: u16,
    pub client_id: String,
    pub user: String,
    pub password: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_MQTT_ADDRESS.to_string(),
            port: DEFAULT_MQTT_PORT,
            client_id: String::new(),
            user: String::new(),
            password: String::new(),
        }
    }
}

/// Full device configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigStore {
    version: String,
    device_name: String,
    ap_name: String,
    wifi: WifiSettings,
    ntp: NtpSettings,
    mqtt: MqttSettings,
    options: OptionRegistry,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            ap_name: DEFAULT_AP_NAME.to_string(),
            wifi: WifiSettings::default(),
            ntp: NtpSettings::default(),
            mqtt: MqttSettings::default(),
            options: OptionRegistry::new(),
        }
    }
}

impl ConfigStore {
    /// Create a store populated with defaults and no options.
    pub fn new() -> Self {
        Self::default()
    }

    // ---- identity ----

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn set_device_name(&mut self, name: impl Into<String>) {
        self.device_name = name.into();
    }

    /// Name advertised by the configuration access point.
    pub fn ap_name(&self) -> &str {
        &self.ap_name
    }

    pub fn set_ap_name(&mut self, name: impl Into<String>) {
        self.ap_name = name.into();
    }

    // ---- wireless ----

    pub fn wifi(&self) -> &WifiSettings {
        &self.wifi
    }

    pub fn wifi_ssid(&self) -> &str {
        &self.wifi.ssid
    }

    pub fn set_wifi_ssid(&mut self, ssid: impl Into<String>) {
        self.wifi.ssid = ssid.into();
    }

    pub fn wifi_password(&self) -> &str {
        &self.wifi.password
    }

    pub fn set_wifi_password(&mut self, password: impl Into<String>) {
        self.wifi.password.zeroize();
        self.wifi.password = password.into();
    }

    // ---- time sync ----

    pub fn ntp(&self) -> &NtpSettings {
        &self.ntp
    }

    pub fn ntp_server(&self) -> &str {
        &self.ntp.server
    }

    pub fn set_ntp_server(&mut self, server: impl Into<String>) {
        self.ntp.server = server.into();
    }

    pub fn time_offset_secs(&self) -> i64 {
        self.ntp.time_offset_secs
    }

    pub fn set_time_offset_secs(&mut self, offset: i64) {
        self.ntp.time_offset_secs = offset;
    }

    /// Set the offset from a whole-hour time zone.
    pub fn set_time_zone(&mut self, hours: i64) {
        self.ntp.time_offset_secs = hours.saturating_mul(60 * 60);
    }

    pub fn ntp_update_interval_minutes(&self) -> u16 {
        self.ntp.update_interval_minutes
    }

    pub fn set_ntp_update_interval_minutes(&mut self, minutes: u16) {
        self.ntp.update_interval_minutes = minutes;
    }

    // ---- broker ----

    pub fn mqtt(&self) -> &MqttSettings {
        &self.mqtt
    }

    pub fn mqtt_address(&self) -> &str {
        &self.mqtt.address
    }

    /// Set the broker address, trimming surrounding whitespace.
    pub fn set_mqtt_address(&mut self, address: &str) {
        self.mqtt.address = address.trim().to_string();
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt.port
    }

    pub fn set_mqtt_port(&mut self, port: u16) {
        self.mqtt.port = port;
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt.client_id
    }

    pub fn set_mqtt_client_id(&mut self, client_id: impl Into<String>) {
        self.mqtt.client_id = client_id.into();
    }

    pub fn mqtt_user(&self) -> &str {
        &self.mqtt.user
    }

    /// Set the broker user, trimming surrounding whitespace.
    pub fn set_mqtt_user(&mut self, user: &str) {
        self.mqtt.user = user.trim().to_string();
    }

    pub fn mqtt_password(&self) -> &str {
        &self.mqtt.password
    }

    /// Set the broker password. Stored verbatim.
    pub fn set_mqtt_password(&mut self, password: impl Into<String>) {
        self.mqtt.password.zeroize();
        self.mqtt.password = password.into();
    }

    // ---- options ----

    /// Register an option or update an existing definition.
    pub fn register_option(
        &mut self,
        name: &str,
        default_value: &str,
        allows_empty: bool,
    ) -> &mut UserOption {
        self.options.register(name, default_value, allows_empty)
    }

    pub fn set_option_value(&mut self, name: &str, value: &str) -> Result<(), OptionError> {
        self.options.set_value(name, value)
    }

    pub fn option(&self, name: &str) -> Option<&UserOption> {
        self.options.find(name)
    }

    pub fn option_count(&self) -> usize {
        self.options.count()
    }

    pub fn options(&self) -> &OptionRegistry {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut OptionRegistry {
        &mut self.options
    }

    pub fn option_cursor(&self) -> OptionCursor {
        self.options.cursor()
    }

    pub fn clear_options(&mut self) {
        self.options.clear();
    }

    /// Write the full configuration to the log, one line per field.
    pub fn dump(&self) {
        for line in self.to_string().lines() {
            info!("{}", line);
        }
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        self.wifi.password.zeroize();
        self.mqtt.password.zeroize();
    }
}

impl fmt::Debug for WifiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiSettings")
            .field("ssid", &self.ssid)
            .field("password", &mask(&self.password))
            .finish()
    }
}

impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("user", &self.user)
            .field("password", &mask(&self.password))
            .finish()
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("version", &self.version)
            .field("device_name", &self.device_name)
            .field("ap_name", &self.ap_name)
            .field("wifi", &self.wifi)
            .field("ntp", &self.ntp)
            .field("mqtt", &self.mqtt)
            .field("options", &self.options)
            .finish()
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(none)"
    } else {
        "****"
    }
}

impl fmt::Display for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version: {}", self.version)?;
        writeln!(f, "device name: {}", self.device_name)?;
        writeln!(f, "ap name: {}", self.ap_name)?;
        writeln!(f, "::WIFI::")?;
        writeln!(f, "    ssid: {}", self.wifi.ssid)?;
        writeln!(f, "    password: {}", mask(&self.wifi.password))?;
        writeln!(f, "::NTP::")?;
        writeln!(f, "    address: {}", self.ntp.server)?;
        writeln!(f, "    update interval: {} min", self.ntp.update_interval_minutes)?;
        writeln!(f, "    time offset: {} s", self.ntp.time_offset_secs)?;
        writeln!(f, "::MQTT::")?;
        writeln!(f, "    address: {}", self.mqtt.address)?;
        writeln!(f, "    port: {}", self.mqtt.port)?;
        writeln!(f, "    clientID: {}", self.mqtt.client_id)?;
        writeln!(f, "    user: {}", self.mqtt.user)?;
        writeln!(f, "    password: {}", mask(&self.mqtt.password))?;
        write!(f, "::Options::")?;
        for option in &self.options {
            write!(f, "\n    {}: {}", option.name(), option.value())?;
        }
        Ok(())
    }
}
