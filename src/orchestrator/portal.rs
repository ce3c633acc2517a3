//! Configuration portal request handlers.
//!
//! Every handler answers with a JSON object carrying `success`. Malformed
//! requests get a 400, logical failures (association timeout, unreachable
//! time server, refused broker, rejected option) a 200 with
//! `"success": false`.

use super::ConnectionOrchestrator;
use crate::broker::BrokerEndpoint;
use crate::config::{WifiCredentials, DEFAULT_MQTT_PORT, MAX_TIME_OFFSET_SECS};
use crate::network::ScanEntry;
use crate::portal::{resolve, Endpoint, PortalRequest, PortalResponse, RouteError};
use log::{info, warn};
use serde_json::{json, Value};

fn scan_entry_json(entry: &ScanEntry) -> Value {
    json!({
        "ssid": entry.ssid,
        "type": entry.security.label(),
        "rssi": entry.rssi,
    })
}

/// Broker port from the form. Missing, non-numeric and non-positive values
/// fall back to the default port; values above the port range are rejected.
fn parse_broker_port(raw: Option<&str>) -> Option<u16> {
    match raw.map(str::trim).and_then(|raw| raw.parse::<i64>().ok()) {
        None => Some(DEFAULT_MQTT_PORT),
        Some(port) if port <= 0 => Some(DEFAULT_MQTT_PORT),
        Some(port) => u16::try_from(port).ok(),
    }
}

impl ConnectionOrchestrator {
    /// Answer one portal request.
    ///
    /// Listeners call this through [`ConnectionOrchestrator::tick`]; it is
    /// public so applications with their own HTTP stack can route to it.
    pub fn handle_portal_request(&mut self, request: &PortalRequest) -> PortalResponse {
        let endpoint = match resolve(request.method(), request.path()) {
            Ok(endpoint) => endpoint,
            Err(RouteError::NotFound) => return PortalResponse::not_found(),
            Err(RouteError::MethodNotAllowed { allow }) => {
                return PortalResponse::method_not_allowed(allow)
            }
        };

        match endpoint {
            Endpoint::WifiScan => self.portal_scan(),
            Endpoint::WifiScanCount => self.portal_scan_count(),
            Endpoint::WifiScanItem => self.portal_scan_item(request),
            Endpoint::WifiConnect => self.portal_wifi_connect(request),
            Endpoint::WifiInfo => PortalResponse::ok(json!({
                "success": true,
                "ssid": self.config.wifi_ssid(),
            })),
            Endpoint::NtpInfo => PortalResponse::ok(json!({
                "success": true,
                "ntp": self.config.ntp_server(),
                "interval": self.config.ntp_update_interval_minutes(),
                "offset": self.config.time_offset_secs(),
            })),
            Endpoint::NtpSet => self.portal_ntp_set(request),
            Endpoint::MqttConnect => self.portal_mqtt_connect(request),
            Endpoint::MqttInfo => {
                let mqtt = self.config.mqtt();
                PortalResponse::ok(json!({
                    "success": true,
                    "url": mqtt.address,
                    "port": mqtt.port,
                    "muser": mqtt.user,
                    "mpass": mqtt.password,
                    "mid": mqtt.client_id,
                }))
            }
            Endpoint::OptionCount => {
                self.session.cursor.reset();
                PortalResponse::ok(json!({
                    "success": true,
                    "cnt": self.config.option_count(),
                }))
            }
            Endpoint::OptionGet => self.portal_option_get(),
            Endpoint::OptionSet => self.portal_option_set(request),
            Endpoint::Info => PortalResponse::ok(json!({
                "success": true,
                "connected": self.network.is_connected(),
                "ip": self.network.ip_addr().map(|ip| ip.to_string()).unwrap_or_default(),
                "version": self.config.version(),
                "ssid": self.config.wifi_ssid(),
                "device": self.config.device_name(),
            })),
            Endpoint::Commit => self.portal_commit(),
        }
    }

    fn refresh_scan(&mut self) -> Result<(), PortalResponse> {
        match self.network.scan() {
            Ok(entries) => {
                self.session.scan = entries;
                Ok(())
            }
            Err(e) => {
                warn!("Network scan failed: {}", e);
                self.session.scan.clear();
                Err(PortalResponse::failure(e.to_string()))
            }
        }
    }

    fn portal_scan(&mut self) -> PortalResponse {
        if let Err(response) = self.refresh_scan() {
            return response;
        }
        let networks: Vec<Value> = self.session.scan.iter().map(scan_entry_json).collect();
        PortalResponse::ok(json!({ "success": true, "networks": networks }))
    }

    fn portal_scan_count(&mut self) -> PortalResponse {
        if let Err(response) = self.refresh_scan() {
            return response;
        }
        PortalResponse::ok(json!({ "success": true, "count": self.session.scan.len() }))
    }

    fn portal_scan_item(&mut self, request: &PortalRequest) -> PortalResponse {
        let Some(index) = request
            .param("count")
            .and_then(|raw| raw.trim().parse::<usize>().ok())
        else {
            return PortalResponse::bad_request();
        };
        match self.session.scan.get(index) {
            Some(entry) => {
                let mut body = scan_entry_json(entry);
                body["success"] = Value::Bool(true);
                PortalResponse::ok(body)
            }
            None => PortalResponse::success(false),
        }
    }

    fn portal_wifi_connect(&mut self, request: &PortalRequest) -> PortalResponse {
        let ssid = request.param("ssid").unwrap_or_default();
        let password = request.param("password").unwrap_or_default();
        let credentials = match WifiCredentials::new(ssid, password) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("Rejected credentials for '{}': {}", ssid, e);
                return PortalResponse::bad_request();
            }
        };

        if let Err(e) = self.network.begin(credentials.ssid(), credentials.password()) {
            warn!("Association with '{}' could not start: {}", ssid, e);
            return PortalResponse::failure(e.to_string());
        }
        let started = self.clock.millis();
        self.clock.delay(self.settings.portal_association_settle);
        let timeout = self.settings.wifi_timeout.as_millis() as u64;
        while !self.network.is_connected() {
            if self.clock.millis().saturating_sub(started) > timeout {
                warn!("Association with '{}' timed out", ssid);
                return PortalResponse::success(false);
            }
            self.clock.delay(self.settings.wifi_poll_interval);
        }

        self.config.set_wifi_ssid(credentials.ssid());
        self.config.set_wifi_password(credentials.password());
        let ip = self
            .network
            .ip_addr()
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        info!("Associated with '{}' as {}", ssid, ip);
        PortalResponse::ok(json!({ "success": true, "ip": ip }))
    }

    fn portal_ntp_set(&mut self, request: &PortalRequest) -> PortalResponse {
        let server = request.param("ntp").map(str::trim).unwrap_or_default();
        let offset = request
            .param("offset")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|secs| (-MAX_TIME_OFFSET_SECS..=MAX_TIME_OFFSET_SECS).contains(secs));
        let interval = request
            .param("interval")
            .and_then(|raw| raw.trim().parse::<u16>().ok())
            .filter(|minutes| *minutes > 0);
        let (Some(offset), Some(interval)) = (offset, interval) else {
            return PortalResponse::bad_request();
        };
        if server.is_empty() {
            return PortalResponse::bad_request();
        }

        if !self.sync_time(server, offset, interval) {
            return PortalResponse::success(false);
        }
        self.config.set_ntp_server(server);
        self.config.set_time_offset_secs(offset);
        self.config.set_ntp_update_interval_minutes(interval);

        match self.time_sync.local_time() {
            Some(time) => PortalResponse::ok(json!({
                "success": true,
                "h": time.hours,
                "m": time.minutes,
                "s": time.seconds,
            })),
            None => PortalResponse::success(true),
        }
    }

    fn portal_mqtt_connect(&mut self, request: &PortalRequest) -> PortalResponse {
        let address = request.param("url").map(str::trim).unwrap_or_default();
        if address.is_empty() {
            return PortalResponse::bad_request();
        }
        let Some(port) = parse_broker_port(request.param("port")) else {
            return PortalResponse::bad_request();
        };
        let user = request.param("muser").unwrap_or_default();
        let password = request.param("mpass").unwrap_or_default();
        let client_id = request.param("mid").unwrap_or_default();

        if self.broker.is_connected() {
            self.broker.disconnect();
        }
        let mut endpoint = BrokerEndpoint::anonymous(address, port, client_id);
        if !user.is_empty() || !password.is_empty() {
            endpoint = endpoint.with_credentials(user, password);
        }
        if let Err(e) = self.broker.connect(&endpoint) {
            warn!("Broker {}:{} refused: {}", address, port, e);
            return PortalResponse::success(false);
        }

        self.config.set_mqtt_address(address);
        self.config.set_mqtt_port(port);
        self.config.set_mqtt_client_id(client_id);
        self.config.set_mqtt_user(user);
        self.config.set_mqtt_password(password);
        PortalResponse::success(true)
    }

    fn portal_option_get(&mut self) -> PortalResponse {
        let (name, value, allows_empty) = match self.session.cursor.next(self.config.options()) {
            Some(option) => (
                option.name().to_string(),
                option.value().to_string(),
                option.allows_empty(),
            ),
            None => (String::new(), String::new(), false),
        };
        PortalResponse::ok(json!({
            "success": true,
            "name": name,
            "value": value,
            "isNull": allows_empty,
        }))
    }

    fn portal_option_set(&mut self, request: &PortalRequest) -> PortalResponse {
        let (Some(name), Some(value)) = (request.param("name"), request.param("value")) else {
            return PortalResponse::bad_request();
        };

        if let Some(validator) = self.validator.as_mut() {
            if let Err(reason) = validator.validate(name, value) {
                info!("Option '{}' rejected: {}", name, reason);
                return PortalResponse::failure(reason);
            }
        }
        match self.config.set_option_value(name, value) {
            Ok(()) => PortalResponse::success(true),
            Err(e) => PortalResponse::failure(e.to_string()),
        }
    }

    fn portal_commit(&mut self) -> PortalResponse {
        let saved = match self.persistence.save(&self.config) {
            Ok(()) => {
                info!("Configuration committed");
                true
            }
            Err(e) => {
                warn!("Configuration commit failed: {}", e);
                false
            }
        };
        self.session.restart_pending = true;
        PortalResponse::success(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_port_parsing() {
        assert_eq!(parse_broker_port(None), Some(1883));
        assert_eq!(parse_broker_port(Some("")), Some(1883));
        assert_eq!(parse_broker_port(Some("abc")), Some(1883));
        assert_eq!(parse_broker_port(Some("-5")), Some(1883));
        assert_eq!(parse_broker_port(Some("0")), Some(1883));
        assert_eq!(parse_broker_port(Some(" 8883 ")), Some(8883));
        assert_eq!(parse_broker_port(Some("70000")), None);
    }
}
