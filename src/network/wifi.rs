//! ESP32 WiFi network provider.
//!
//! Wraps the non-blocking ESP-IDF driver: [`begin`](NetworkProvider::begin)
//! configures the station and issues a connect request, and the caller polls
//! for the association to complete. While the configuration access point is
//! up the driver runs in mixed mode so scans and association attempts keep
//! working alongside it.

use super::{NetworkError, NetworkProvider, ScanEntry, Security};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use log::{info, warn};
use std::net::IpAddr;

/// WiFi-based network provider for ESP32.
pub struct EspWifiNetwork<'a> {
    wifi: EspWifi<'a>,
    access_point: Option<AccessPointConfiguration>,
}

impl<'a> EspWifiNetwork<'a> {
    /// Create a new WiFi network provider.
    ///
    /// # Arguments
    ///
    /// * `modem` - The WiFi/BT modem peripheral
    /// * `sysloop` - The ESP-IDF system event loop
    /// * `nvs` - Partition the driver keeps its calibration data in
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, NetworkError> {
        let wifi = EspWifi::new(modem, sysloop, nvs)?;
        Ok(Self {
            wifi,
            access_point: None,
        })
    }

    fn client_configuration(ssid: &str, password: &str) -> Result<ClientConfiguration, NetworkError> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        Ok(ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| NetworkError::InvalidCredentials("SSID too long".to_string()))?,
            password: password
                .try_into()
                .map_err(|_| NetworkError::InvalidCredentials("password too long".to_string()))?,
            auth_method,
            ..Default::default()
        })
    }

    fn ensure_started(&mut self) -> Result<(), NetworkError> {
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }
}

fn security_of(auth: Option<AuthMethod>) -> Security {
    match auth {
        Some(AuthMethod::None) => Security::Open,
        Some(AuthMethod::WEP) => Security::Wep,
        Some(AuthMethod::WPA) => Security::Wpa,
        Some(AuthMethod::WPA2Personal) => Security::Wpa2,
        Some(AuthMethod::WPA3Personal) => Security::Wpa3,
        Some(AuthMethod::WPA2Enterprise) => Security::Enterprise,
        _ => Security::Auto,
    }
}

impl<'a> NetworkProvider for EspWifiNetwork<'a> {
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        info!("Connecting to WiFi: {}", ssid);

        let client = Self::client_configuration(ssid, password)?;
        let configuration = match &self.access_point {
            Some(ap) => Configuration::Mixed(client, ap.clone()),
            None => Configuration::Client(client),
        };

        if self.wifi.is_connected().unwrap_or(false) {
            if let Err(e) = self.wifi.disconnect() {
                warn!("Failed to drop previous association: {:?}", e);
            }
        }
        self.wifi.set_configuration(&configuration)?;
        self.ensure_started()?;
        self.wifi.connect()?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.is_up().unwrap_or(false)
    }

    fn ip_addr(&self) -> Option<IpAddr> {
        if !self.is_connected() {
            return None;
        }
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| IpAddr::V4(info.ip))
    }

    fn start_access_point(&mut self, name: &str) -> Result<(), NetworkError> {
        let ap = AccessPointConfiguration {
            ssid: name
                .try_into()
                .map_err(|_| NetworkError::InvalidCredentials("AP name too long".to_string()))?,
            auth_method: AuthMethod::None,
            ..Default::default()
        };
        let configuration = Configuration::Mixed(ClientConfiguration::default(), ap.clone());
        self.wifi.set_configuration(&configuration)?;
        self.ensure_started()?;
        self.access_point = Some(ap);

        match self.wifi.ap_netif().get_ip_info() {
            Ok(info) => info!("Access point '{}' up, IP: {}", name, info.ip),
            Err(e) => warn!("Access point '{}' up, IP unknown: {:?}", name, e),
        }
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<ScanEntry>, NetworkError> {
        self.ensure_started()?;
        let found = self.wifi.scan()?;
        Ok(found
            .into_iter()
            .map(|ap| ScanEntry {
                ssid: ap.ssid.as_str().to_string(),
                security: security_of(ap.auth_method),
                rssi: ap.signal_strength,
            })
            .collect())
    }
}
