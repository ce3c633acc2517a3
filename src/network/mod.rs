//! Network abstraction layer.
//!
//! This module provides a platform-independent view of the wireless radio:
//! - **ESP32** (`esp32` feature): [`EspWifiNetwork`] drives the ESP-IDF WiFi stack
//! - **Host**: [`HostNetwork`] reports the OS network, which is always up
//!
//! The orchestrator only ever talks to [`NetworkProvider`], so the staged
//! connect logic and the configuration portal run unchanged on both.
//!
//! # Example
//!
//! ```
//! use esp_config_wizard::network::{HostNetwork, NetworkProvider};
//!
//! let mut network = HostNetwork::new();
//! network.begin("ignored-on-host", "").unwrap();
//! assert!(network.is_connected());
//! ```

use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};

mod host;
#[cfg(feature = "esp32")]
mod wifi;

pub use host::HostNetwork;
#[cfg(feature = "esp32")]
pub use wifi::EspWifiNetwork;

/// Security class of a scanned network, as shown in the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Open,
    Wep,
    Wpa,
    Wpa2,
    Wpa3,
    Enterprise,
    /// Mixed or unknown; the driver negotiates.
    Auto,
}

impl Security {
    /// Portal label for this class.
    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "None",
            Self::Wep => "WEP",
            Self::Wpa => "WPA",
            Self::Wpa2 => "WPA2",
            Self::Wpa3 => "WPA3",
            Self::Enterprise => "Enterprise",
            Self::Auto => "Auto",
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One network found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub ssid: String,
    pub security: Security,
    /// Signal strength in dBm.
    pub rssi: i8,
}

/// Network provider abstraction.
///
/// Association is asynchronous: [`begin`](Self::begin) starts an attempt and
/// returns, and callers poll [`is_connected`](Self::is_connected).
pub trait NetworkProvider {
    /// Start associating with `ssid`. An empty password means an open network.
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError>;

    /// Check if the station is associated and has an address.
    fn is_connected(&self) -> bool;

    /// Get the station IP address.
    ///
    /// Returns `None` if not connected.
    fn ip_addr(&self) -> Option<IpAddr>;

    /// Bring up an open access point named `name`, keeping the station
    /// interface available for scans and association attempts.
    fn start_access_point(&mut self, name: &str) -> Result<(), NetworkError>;

    /// Scan for nearby networks.
    fn scan(&mut self) -> Result<Vec<ScanEntry>, NetworkError>;

    /// Resolve `host` to an address.
    fn resolve(&self, host: &str) -> Result<IpAddr, NetworkError> {
        (host, 0)
            .to_socket_addrs()?
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| NetworkError::Resolve(host.to_string()))
    }
}

/// Network errors.
#[derive(Debug)]
pub enum NetworkError {
    /// SSID or password rejected by the driver.
    InvalidCredentials(String),
    /// Host name did not resolve.
    Resolve(String),
    /// Operation not available on this platform.
    Unsupported(&'static str),
    /// ESP-IDF driver error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
    /// Generic I/O error.
    Io(std::io::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials(msg) => write!(f, "invalid credentials: {}", msg),
            Self::Resolve(host) => write!(f, "cannot resolve {}", host),
            Self::Unsupported(what) => write!(f, "{} not supported on this platform", what),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for NetworkError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}
