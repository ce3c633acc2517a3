//! Host network provider.
//!
//! On host systems, the OS handles networking. This provider is a thin wrapper
//! that reports the system's network status so the device runner can be
//! exercised on a development machine.

use super::{NetworkError, NetworkProvider, ScanEntry};
use log::{debug, info};
use std::net::IpAddr;

/// Host network provider.
///
/// On host systems, networking is always available via the OS. Association
/// requests are recorded and succeed immediately, the access point is
/// simulated by the portal listening on the host's interfaces, and scans
/// report no networks.
pub struct HostNetwork {
    ip_addr: Option<IpAddr>,
    ssid: Option<String>,
}

impl HostNetwork {
    /// Create a new host network provider.
    pub fn new() -> Self {
        Self {
            ip_addr: None,
            ssid: None,
        }
    }

    /// SSID passed to the last [`begin`](NetworkProvider::begin).
    pub fn ssid(&self) -> Option<&str> {
        self.ssid.as_deref()
    }

    /// Get the primary local IP address.
    ///
    /// This uses a trick: create a UDP socket and "connect" to a public IP
    /// (doesn't actually send anything), then check which local address was chosen.
    fn detect_local_ip() -> Option<IpAddr> {
        use std::net::UdpSocket;

        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        let local_addr = socket.local_addr().ok()?;
        Some(local_addr.ip())
    }
}

impl Default for HostNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkProvider for HostNetwork {
    fn begin(&mut self, ssid: &str, _password: &str) -> Result<(), NetworkError> {
        self.ssid = Some(ssid.to_string());
        self.ip_addr = Self::detect_local_ip();

        match self.ip_addr {
            Some(ip) => info!("Host network ready for '{}', local IP: {}", ssid, ip),
            None => info!("Host network ready for '{}', binding to 0.0.0.0", ssid),
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        // The actual connection will fail at socket level if not
        true
    }

    fn ip_addr(&self) -> Option<IpAddr> {
        self.ip_addr
    }

    fn start_access_point(&mut self, name: &str) -> Result<(), NetworkError> {
        info!("Access point '{}' simulated on host interfaces", name);
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<ScanEntry>, NetworkError> {
        debug!("Wireless scan not available on host");
        Ok(Vec::new())
    }
}
