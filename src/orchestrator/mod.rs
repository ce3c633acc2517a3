//! Staged connection orchestrator.
//!
//! [`ConnectionOrchestrator`] takes a device from power-on to an operational
//! broker session: wireless association, then time synchronization, then
//! the broker connection. Without a usable stored configuration it instead
//! opens an access point and serves the configuration portal until the
//! operator commits a configuration and the device restarts.
//!
//! The orchestrator is single-threaded and cooperative. [`connect`] runs the
//! stages once; the application then calls [`tick`] from its main loop. Each
//! tick re-checks every stage in order and repairs the first one that is
//! down, so the device recovers from dropped links without restarting.
//!
//! # Example
//!
//! ```no_run
//! use esp_config_wizard::config::ConfigStore;
//! use esp_config_wizard::orchestrator::{ConnectionOrchestrator, Platform, Status};
//!
//! # fn platform() -> Platform { unimplemented!() }
//! let mut config = ConfigStore::new();
//! config.register_option("topic", "garden/pump", false);
//!
//! let mut orchestrator = ConnectionOrchestrator::new(config, platform());
//! orchestrator.set_status_observer(|status: Status| log::info!("status {}", status.code()));
//! let _ = orchestrator.connect();
//! loop {
//!     orchestrator.tick();
//!     if orchestrator.available() {
//!         let _ = orchestrator.broker_mut().publish("garden/pump", b"alive", false);
//!     }
//! }
//! ```
//!
//! [`connect`]: ConnectionOrchestrator::connect
//! [`tick`]: ConnectionOrchestrator::tick

mod portal;
mod status;

pub use status::{Mode, Status};

use crate::broker::{BrokerClient, BrokerEndpoint, DEFAULT_KEEP_ALIVE, DEFAULT_SOCKET_TIMEOUT};
use crate::config::{ConfigStore, OptionCursor, OptionValidator};
use crate::network::{NetworkProvider, ScanEntry};
use crate::persistence::{ConfigPersistence, PersistenceError, Storage};
use crate::platform::{ClockSource, DeviceControl};
use crate::portal::{PortalError, PortalListener, PortalRequest, DEFAULT_PORTAL_PORT};
use crate::time_sync::{LocalTime, TimeSync, NTP_PORT};
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// How long a wireless association may take.
pub const WIFI_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Polling interval while waiting for association.
pub const WIFI_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pause before the single time-sync retry.
pub const NTP_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Pause between a portal commit response and the restart.
pub const COMMIT_RESTART_DELAY: Duration = Duration::from_millis(1000);

/// Short settle pauses around the time-sync and broker stages of `connect`.
const STAGE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Pause after a portal-initiated association before polling it.
const PORTAL_ASSOCIATION_SETTLE: Duration = Duration::from_millis(1000);

/// Timing and port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub wifi_timeout: Duration,
    pub wifi_poll_interval: Duration,
    pub ntp_retry_delay: Duration,
    pub stage_settle_delay: Duration,
    pub portal_association_settle: Duration,
    pub broker_socket_timeout: Duration,
    pub broker_keep_alive: Duration,
    pub commit_restart_delay: Duration,
    pub portal_port: u16,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            wifi_timeout: WIFI_TIMEOUT,
            wifi_poll_interval: WIFI_POLL_INTERVAL,
            ntp_retry_delay: NTP_RETRY_DELAY,
            stage_settle_delay: STAGE_SETTLE_DELAY,
            portal_association_settle: PORTAL_ASSOCIATION_SETTLE,
            broker_socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            broker_keep_alive: DEFAULT_KEEP_ALIVE,
            commit_restart_delay: COMMIT_RESTART_DELAY,
            portal_port: DEFAULT_PORTAL_PORT,
        }
    }
}

/// Collaborators the orchestrator drives.
pub struct Platform {
    pub network: Box<dyn NetworkProvider>,
    pub clock: Box<dyn ClockSource>,
    pub time_sync: Box<dyn TimeSync>,
    pub broker: Box<dyn BrokerClient>,
    pub portal: Box<dyn PortalListener>,
    pub storage: Box<dyn Storage>,
    pub device: Box<dyn DeviceControl>,
}

/// Receives every status change.
///
/// Closures of the form `FnMut(Status)` implement this trait.
pub trait StatusObserver {
    fn on_status(&mut self, status: Status);
}

impl<F> StatusObserver for F
where
    F: FnMut(Status),
{
    fn on_status(&mut self, status: Status) {
        self(status)
    }
}

/// Why a connection stage failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    /// Association did not complete within the timeout.
    WifiTimeout,
    /// Time server unreachable or unresolvable.
    TimeSyncFailed,
    /// Broker refused or unreachable.
    BrokerUnavailable,
    /// Access point or portal listener could not be started.
    PortalUnavailable(String),
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WifiTimeout => write!(f, "wireless association timed out"),
            Self::TimeSyncFailed => write!(f, "time synchronization failed"),
            Self::BrokerUnavailable => write!(f, "broker connection failed"),
            Self::PortalUnavailable(msg) => write!(f, "configuration portal unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ConnectivityError {}

impl From<PortalError> for ConnectivityError {
    fn from(e: PortalError) -> Self {
        Self::PortalUnavailable(e.to_string())
    }
}

/// Portal session state.
#[derive(Default)]
struct PortalSession {
    cursor: OptionCursor,
    scan: Vec<ScanEntry>,
    restart_pending: bool,
}

/// Drives a device from unconfigured to connected.
pub struct ConnectionOrchestrator {
    config: ConfigStore,
    persistence: ConfigPersistence,
    network: Box<dyn NetworkProvider>,
    clock: Box<dyn ClockSource>,
    time_sync: Box<dyn TimeSync>,
    broker: Box<dyn BrokerClient>,
    /// Taken out while requests are being served.
    portal: Option<Box<dyn PortalListener>>,
    device: Box<dyn DeviceControl>,
    settings: OrchestratorSettings,
    mode: Mode,
    status: Status,
    observer: Option<Box<dyn StatusObserver>>,
    validator: Option<Box<dyn OptionValidator>>,
    wifi_started_at: u64,
    last_error: Option<ConnectivityError>,
    session: PortalSession,
}

impl ConnectionOrchestrator {
    /// Create an orchestrator with default settings.
    ///
    /// Options registered on `config` keep their definitions when the stored
    /// configuration is loaded.
    pub fn new(config: ConfigStore, platform: Platform) -> Self {
        Self::with_settings(config, platform, OrchestratorSettings::default())
    }

    pub fn with_settings(
        config: ConfigStore,
        platform: Platform,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            config,
            persistence: ConfigPersistence::new(platform.storage),
            network: platform.network,
            clock: platform.clock,
            time_sync: platform.time_sync,
            broker: platform.broker,
            portal: Some(platform.portal),
            device: platform.device,
            settings,
            mode: Mode::Prepare,
            status: Status::Prepare,
            observer: None,
            validator: None,
            wifi_started_at: 0,
            last_error: None,
            session: PortalSession::default(),
        }
    }

    /// Observe status changes.
    pub fn set_status_observer(&mut self, observer: impl StatusObserver + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Vet option values submitted through the portal.
    pub fn set_option_validator(&mut self, validator: impl OptionValidator + 'static) {
        self.validator = Some(Box::new(validator));
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_configuration_mode(&self) -> bool {
        self.mode == Mode::Configuration
    }

    /// Most recent connectivity failure, cleared when `Ready` is reached
    /// again or, for a failed periodic resync, by the next good one.
    pub fn last_error(&self) -> Option<&ConnectivityError> {
        self.last_error.as_ref()
    }

    /// Every stage is up.
    pub fn available(&self) -> bool {
        self.wifi_available() && self.time_synced() && self.broker_connected()
    }

    pub fn wifi_available(&self) -> bool {
        self.network.is_connected()
    }

    pub fn time_synced(&self) -> bool {
        self.time_sync.is_time_set()
    }

    pub fn broker_connected(&self) -> bool {
        self.broker.is_connected()
    }

    /// Synchronized Unix time with the configured offset applied.
    pub fn epoch_time(&self) -> Option<u64> {
        self.time_sync.epoch_time()
    }

    pub fn local_time(&self) -> Option<LocalTime> {
        self.time_sync.local_time()
    }

    /// The broker session, for publishing and subscribing.
    pub fn broker_mut(&mut self) -> &mut dyn BrokerClient {
        self.broker.as_mut()
    }

    /// Persist the current configuration.
    pub fn save_config(&mut self) -> Result<(), PersistenceError> {
        self.persistence.save(&self.config)
    }

    /// Load the stored configuration and run every stage once.
    ///
    /// Without a usable stored configuration the orchestrator switches to
    /// configuration mode and returns `Ok(Status::Configuration)`.
    pub fn connect(&mut self) -> Result<Status, ConnectivityError> {
        if let Err(e) = self.hydrate() {
            info!("No usable configuration ({}), starting configuration mode", e);
            self.start_configuration_mode()?;
            return Ok(Status::Configuration);
        }

        self.stop_portal();
        self.mode = Mode::Run;
        self.broker
            .set_timeouts(self.settings.broker_socket_timeout, self.settings.broker_keep_alive);

        if !self.begin_association() {
            return Err(self.fail(Status::WifiError, ConnectivityError::WifiTimeout));
        }
        while !self.network.is_connected() && !self.association_expired() {
            self.clock.delay(self.settings.wifi_poll_interval);
        }
        if !self.network.is_connected() {
            return Err(self.fail(Status::WifiError, ConnectivityError::WifiTimeout));
        }
        self.set_status(Status::WifiConnected);

        if !self.time_synced() {
            self.set_status(Status::NtpConnecting);
            self.clock.delay(self.settings.stage_settle_delay);
            if !self.sync_configured_time() {
                return Err(self.fail(Status::NtpError, ConnectivityError::TimeSyncFailed));
            }
        }
        self.set_status(Status::NtpConnected);

        if !self.broker.is_connected() {
            self.set_status(Status::MqttConnecting);
            if !self.connect_configured_broker() {
                return Err(self.fail(Status::MqttError, ConnectivityError::BrokerUnavailable));
            }
            self.clock.delay(self.settings.stage_settle_delay);
        }
        self.set_status(Status::MqttConnected);
        self.set_status(Status::Ready);
        self.last_error = None;
        Ok(Status::Ready)
    }

    /// Open the access point and serve the configuration portal.
    pub fn start_configuration_mode(&mut self) -> Result<(), ConnectivityError> {
        self.mode = Mode::Configuration;
        self.set_status(Status::Configuration);

        self.time_sync.end();
        self.stop_portal();
        self.session = PortalSession::default();

        let ap_name = self.config.ap_name().to_string();
        self.network
            .start_access_point(&ap_name)
            .map_err(|e| ConnectivityError::PortalUnavailable(e.to_string()))?;
        if let Some(portal) = self.portal.as_mut() {
            portal.start(self.settings.portal_port)?;
        }
        info!(
            "Configuration mode: access point '{}', portal port {}",
            ap_name, self.settings.portal_port
        );
        Ok(())
    }

    /// Advance the orchestrator. Call this from the application's main loop.
    pub fn tick(&mut self) {
        match self.mode {
            Mode::Configuration => self.service_portal(),
            Mode::Run => self.run_stages(),
            Mode::Prepare => {}
        }
    }

    fn run_stages(&mut self) {
        if self.status == Status::WifiConnecting && !self.network.is_connected() {
            if self.association_expired() {
                self.fail(Status::WifiError, ConnectivityError::WifiTimeout);
            }
            return;
        }
        // A timed-out attempt is never promoted, even if its link comes up late
        if self.status == Status::WifiError || !self.network.is_connected() {
            if !self.begin_association() {
                self.fail(Status::WifiError, ConnectivityError::WifiTimeout);
            }
            return;
        }
        self.advance(Status::WifiConnected);

        if !self.time_synced() {
            self.set_status(Status::NtpConnecting);
            if !self.sync_configured_time() {
                self.fail(Status::NtpError, ConnectivityError::TimeSyncFailed);
                return;
            }
        }
        self.advance(Status::NtpConnected);

        if self.time_sync.update() {
            if self.last_error == Some(ConnectivityError::TimeSyncFailed) {
                self.last_error = None;
            }
        } else {
            warn!("Periodic time sync update failed");
            self.last_error = Some(ConnectivityError::TimeSyncFailed);
        }

        if !self.broker.is_connected() {
            self.set_status(Status::MqttConnecting);
            if !self.connect_configured_broker() {
                self.fail(Status::MqttError, ConnectivityError::BrokerUnavailable);
                return;
            }
        }
        self.advance(Status::MqttConnected);
        if self.advance(Status::Ready) {
            self.last_error = None;
        }

        self.broker.poll();
    }

    fn service_portal(&mut self) {
        let Some(mut portal) = self.portal.take() else {
            return;
        };
        portal.poll(&mut |request: &PortalRequest| self.handle_portal_request(request));
        self.portal = Some(portal);

        if self.session.restart_pending {
            self.session.restart_pending = false;
            self.clock.delay(self.settings.commit_restart_delay);
            self.device.restart();
        }
    }

    fn stop_portal(&mut self) {
        if let Some(portal) = self.portal.as_mut() {
            if portal.is_running() {
                portal.stop();
            }
        }
    }

    /// Load the stored configuration, keeping the definitions of options
    /// registered beforehand.
    fn hydrate(&mut self) -> Result<(), PersistenceError> {
        let definitions = self.config.options().clone();
        self.persistence.load(&mut self.config)?;
        for definition in definitions.iter() {
            self.config.register_option(
                definition.name(),
                definition.default_value(),
                definition.allows_empty(),
            );
        }
        self.config.dump();
        Ok(())
    }

    fn set_status(&mut self, status: Status) {
        if self.status == status {
            return;
        }
        debug!("Status {} -> {}", self.status, status);
        self.status = status;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_status(status);
        }
    }

    /// Move forward to `target` if the current status is behind it.
    fn advance(&mut self, target: Status) -> bool {
        if self.status.progress() < target.progress() {
            self.set_status(target);
            return true;
        }
        false
    }

    fn fail(&mut self, status: Status, error: ConnectivityError) -> ConnectivityError {
        warn!("{}", error);
        self.set_status(status);
        self.last_error = Some(error.clone());
        error
    }

    fn association_expired(&self) -> bool {
        let elapsed = self.clock.millis().saturating_sub(self.wifi_started_at);
        elapsed >= self.settings.wifi_timeout.as_millis() as u64
    }

    fn begin_association(&mut self) -> bool {
        self.set_status(Status::WifiConnecting);
        self.wifi_started_at = self.clock.millis();
        let ssid = self.config.wifi_ssid().to_string();
        let password = self.config.wifi_password().to_string();
        match self.network.begin(&ssid, &password) {
            Ok(()) => true,
            Err(e) => {
                warn!("Association with '{}' could not start: {}", ssid, e);
                false
            }
        }
    }

    fn sync_configured_time(&mut self) -> bool {
        let server = self.config.ntp_server().to_string();
        let ntp = self.config.ntp();
        let (offset, interval) = (ntp.time_offset_secs, ntp.update_interval_minutes);
        self.sync_time(&server, offset, interval)
    }

    /// Start a fresh time-sync session and try to synchronize, retrying
    /// once from a new local port.
    fn sync_time(&mut self, server: &str, offset_secs: i64, interval_minutes: u16) -> bool {
        self.time_sync.end();

        let ip = match self.network.resolve(server) {
            Ok(ip) => ip,
            Err(e) => {
                warn!("Time server {}: {}", server, e);
                return false;
            }
        };
        let interval = Duration::from_secs(u64::from(interval_minutes) * 60);
        if let Err(e) = self
            .time_sync
            .begin(SocketAddr::new(ip, NTP_PORT), offset_secs, interval)
        {
            warn!("Time sync session failed to start: {}", e);
            return false;
        }

        self.time_sync.update();
        if !self.time_sync.is_time_set() {
            self.clock.delay(self.settings.ntp_retry_delay);
            if let Err(e) = self.time_sync.randomize_port() {
                warn!("Time sync port change failed: {}", e);
            }
            self.time_sync.update();
        }
        self.time_sync.is_time_set()
    }

    /// Connect with the stored credentials if a user is set, falling back to
    /// an anonymous session.
    fn connect_configured_broker(&mut self) -> bool {
        let mqtt = self.config.mqtt();
        let anonymous =
            BrokerEndpoint::anonymous(mqtt.address.clone(), mqtt.port, mqtt.client_id.clone());

        if !mqtt.user.is_empty() {
            let endpoint = anonymous
                .clone()
                .with_credentials(mqtt.user.clone(), mqtt.password.clone());
            match self.broker.connect(&endpoint) {
                Ok(()) => return true,
                Err(e) => warn!("Broker login as '{}' failed: {}", mqtt.user, e),
            }
        }
        match self.broker.connect(&anonymous) {
            Ok(()) => true,
            Err(e) => {
                warn!("Anonymous broker connection failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ScanEntry, Security};
    use crate::persistence::{LEGACY_KEY, RECORD_KEY};
    use crate::portal::{Method, PortalResponse};
    use crate::testing::FakePlatform;
    use std::cell::RefCell;
    use std::net::{IpAddr, Ipv4Addr};
    use std::rc::Rc;

    fn stored_config() -> ConfigStore {
        let mut config = ConfigStore::new();
        config.set_version("1.0.0");
        config.set_device_name("Pump");
        config.set_wifi_ssid("HomeNet");
        config.set_wifi_password("hunter22");
        config.set_ntp_server("pool.ntp.org");
        config.set_time_offset_secs(3600);
        config.set_ntp_update_interval_minutes(60);
        config.set_mqtt_address("mqtt.local");
        config.set_mqtt_port(1883);
        config.set_mqtt_client_id("pump-1");
        config
    }

    fn provision(fakes: &FakePlatform, config: &ConfigStore) {
        ConfigPersistence::new(Box::new(fakes.storage.clone()))
            .save(config)
            .unwrap();
    }

    fn observed(orchestrator: &mut ConnectionOrchestrator) -> Rc<RefCell<Vec<Status>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        orchestrator.set_status_observer(move |status: Status| sink.borrow_mut().push(status));
        seen
    }

    fn ready(fakes: &FakePlatform) -> ConnectionOrchestrator {
        provision(fakes, &stored_config());
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());
        assert_eq!(orchestrator.connect(), Ok(Status::Ready));
        orchestrator
    }

    fn configuring(fakes: &FakePlatform) -> ConnectionOrchestrator {
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());
        assert_eq!(orchestrator.connect(), Ok(Status::Configuration));
        orchestrator
    }

    fn serve(
        orchestrator: &mut ConnectionOrchestrator,
        fakes: &FakePlatform,
        request: PortalRequest,
    ) -> PortalResponse {
        fakes.portal.push(request);
        orchestrator.tick();
        fakes.portal.last_response().unwrap()
    }

    const FULL_SEQUENCE: [Status; 7] = [
        Status::WifiConnecting,
        Status::WifiConnected,
        Status::NtpConnecting,
        Status::NtpConnected,
        Status::MqttConnecting,
        Status::MqttConnected,
        Status::Ready,
    ];

    // ==================== Connect Tests ====================

    #[test]
    fn test_connect_without_record_enters_configuration() {
        let fakes = FakePlatform::new();
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());
        let seen = observed(&mut orchestrator);

        assert_eq!(orchestrator.connect(), Ok(Status::Configuration));
        assert!(orchestrator.is_configuration_mode());
        assert_eq!(*seen.borrow(), vec![Status::Configuration]);
        assert_eq!(
            fakes.network.access_points(),
            vec!["ESP Configuration".to_string()]
        );
        assert_eq!(fakes.portal.port(), Some(DEFAULT_PORTAL_PORT));
        assert_eq!(fakes.time_sync.ends(), 1);
        assert!(fakes.network.begins().is_empty());
    }

    #[test]
    fn test_connect_reaches_ready() {
        let fakes = FakePlatform::new();
        provision(&fakes, &stored_config());
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());
        let seen = observed(&mut orchestrator);

        assert_eq!(orchestrator.connect(), Ok(Status::Ready));
        assert_eq!(*seen.borrow(), FULL_SEQUENCE.to_vec());
        assert_eq!(orchestrator.mode(), Mode::Run);
        assert!(orchestrator.available());
        assert!(orchestrator.last_error().is_none());

        assert_eq!(
            fakes.network.begins(),
            vec![("HomeNet".to_string(), "hunter22".to_string())]
        );
        assert_eq!(fakes.network.resolved(), vec!["pool.ntp.org".to_string()]);
        assert_eq!(
            fakes.time_sync.server(),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), NTP_PORT))
        );
        assert_eq!(fakes.time_sync.offset_secs(), 3600);
        assert_eq!(fakes.time_sync.update_interval(), Duration::from_secs(3600));
        assert_eq!(
            fakes.broker.timeouts(),
            Some((DEFAULT_SOCKET_TIMEOUT, DEFAULT_KEEP_ALIVE))
        );

        let attempts = fakes.broker.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].host, "mqtt.local");
        assert_eq!(attempts[0].client_id, "pump-1");
        assert!(attempts[0].credentials.is_none());

        assert_eq!(
            fakes.clock.delays(),
            vec![STAGE_SETTLE_DELAY, STAGE_SETTLE_DELAY]
        );
        assert!(!fakes.portal.is_running());
    }

    #[test]
    fn test_connect_polls_until_associated() {
        let fakes = FakePlatform::new();
        fakes.network.set_association_polls(3);
        let orchestrator = ready(&fakes);

        assert!(orchestrator.wifi_available());
        assert_eq!(
            fakes.clock.delays(),
            vec![
                WIFI_POLL_INTERVAL,
                WIFI_POLL_INTERVAL,
                WIFI_POLL_INTERVAL,
                STAGE_SETTLE_DELAY,
                STAGE_SETTLE_DELAY,
            ]
        );
    }

    #[test]
    fn test_wifi_timeout() {
        let fakes = FakePlatform::new();
        provision(&fakes, &stored_config());
        fakes.network.set_associate_on_begin(false);
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());
        let seen = observed(&mut orchestrator);

        assert_eq!(orchestrator.connect(), Err(ConnectivityError::WifiTimeout));
        assert_eq!(orchestrator.status(), Status::WifiError);
        assert_eq!(*seen.borrow(), vec![Status::WifiConnecting, Status::WifiError]);
        assert_eq!(
            orchestrator.last_error(),
            Some(&ConnectivityError::WifiTimeout)
        );
        assert!(fakes.clock.millis() >= WIFI_TIMEOUT.as_millis() as u64);
        assert!(fakes.broker.attempts().is_empty());
    }

    #[test]
    fn test_time_sync_retries_from_new_port() {
        let fakes = FakePlatform::new();
        fakes.time_sync.fail_next_updates(1);
        let orchestrator = ready(&fakes);

        assert!(orchestrator.time_synced());
        assert_eq!(fakes.time_sync.updates(), 2);
        assert_eq!(fakes.time_sync.port_changes(), 1);
        assert!(fakes.clock.delays().contains(&NTP_RETRY_DELAY));
    }

    #[test]
    fn test_time_sync_failure() {
        let fakes = FakePlatform::new();
        provision(&fakes, &stored_config());
        fakes.time_sync.set_reachable(false);
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());

        assert_eq!(
            orchestrator.connect(),
            Err(ConnectivityError::TimeSyncFailed)
        );
        assert_eq!(orchestrator.status(), Status::NtpError);
        assert_eq!(fakes.time_sync.port_changes(), 1);
        assert!(fakes.broker.attempts().is_empty());
    }

    #[test]
    fn test_unresolvable_time_server() {
        let fakes = FakePlatform::new();
        provision(&fakes, &stored_config());
        fakes.network.set_resolvable(false);
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());

        assert_eq!(
            orchestrator.connect(),
            Err(ConnectivityError::TimeSyncFailed)
        );
        assert_eq!(fakes.time_sync.server(), None);
        assert_eq!(fakes.time_sync.updates(), 0);
    }

    #[test]
    fn test_broker_falls_back_to_anonymous() {
        let fakes = FakePlatform::new();
        let mut config = stored_config();
        config.set_mqtt_user("sensor");
        config.set_mqtt_password("brokerpw");
        provision(&fakes, &config);
        fakes.broker.set_accept_credentials(false);

        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());
        assert_eq!(orchestrator.connect(), Ok(Status::Ready));

        let attempts = fakes.broker.attempts();
        assert_eq!(attempts.len(), 2);
        let credentials = attempts[0].credentials.as_ref().unwrap();
        assert_eq!(credentials.user, "sensor");
        assert_eq!(credentials.password, "brokerpw");
        assert!(attempts[1].credentials.is_none());
    }

    #[test]
    fn test_broker_unavailable() {
        let fakes = FakePlatform::new();
        provision(&fakes, &stored_config());
        fakes.broker.set_accept_anonymous(false);
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());

        assert_eq!(
            orchestrator.connect(),
            Err(ConnectivityError::BrokerUnavailable)
        );
        assert_eq!(orchestrator.status(), Status::MqttError);
        assert!(orchestrator.time_synced());
        assert!(!orchestrator.available());
    }

    #[test]
    fn test_option_definitions_survive_hydration() {
        let fakes = FakePlatform::new();
        let mut stored = stored_config();
        stored.register_option("topic", "", true);
        stored.set_option_value("topic", "pump/custom").unwrap();
        provision(&fakes, &stored);

        let mut config = ConfigStore::new();
        config.register_option("topic", "pump/state", false);
        config.register_option("interval", "30", false);
        let mut orchestrator = ConnectionOrchestrator::new(config, fakes.platform());
        assert_eq!(orchestrator.connect(), Ok(Status::Ready));

        let topic = orchestrator.config().option("topic").unwrap();
        assert_eq!(topic.value(), "pump/custom");
        assert_eq!(topic.default_value(), "pump/state");
        assert!(!topic.allows_empty());
        assert_eq!(orchestrator.config().option("interval").unwrap().value(), "30");
        assert_eq!(orchestrator.config().device_name(), "Pump");
    }

    #[test]
    fn test_legacy_record_migrated_on_connect() {
        let fakes = FakePlatform::new();
        fakes.storage.insert(
            LEGACY_KEY,
            b"0.9.0\n2.0.1\nBoiler\nAttic\nwifi-pass\ntime.nist.gov\n720\n-3600\nmqtt.home\n1884\nboiler-7\nhome\nsecret\n1\nsetpoint\n21\n",
        );
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());

        assert_eq!(orchestrator.connect(), Ok(Status::Ready));
        assert_eq!(orchestrator.config().wifi_ssid(), "Attic");
        assert!(fakes.storage.get(LEGACY_KEY).is_none());
        assert!(fakes.storage.get(RECORD_KEY).is_some());

        let credentials = fakes.broker.attempts()[0].credentials.clone().unwrap();
        assert_eq!(credentials.user, "home");
    }

    // ==================== Tick Tests ====================

    #[test]
    fn test_status_observer_fires_once_per_change() {
        let fakes = FakePlatform::new();
        let mut orchestrator = ready(&fakes);
        let seen = observed(&mut orchestrator);

        orchestrator.tick();
        orchestrator.tick();
        orchestrator.tick();

        assert!(seen.borrow().is_empty());
        assert_eq!(orchestrator.status(), Status::Ready);
        assert_eq!(fakes.broker.polls(), 3);
    }

    #[test]
    fn test_tick_recovers_every_stage() {
        let fakes = FakePlatform::new();
        let mut orchestrator = ready(&fakes);
        let seen = observed(&mut orchestrator);

        fakes.network.drop_link();
        fakes.time_sync.lose_sync();
        fakes.broker.drop_connection();

        orchestrator.tick();
        assert_eq!(orchestrator.status(), Status::WifiConnecting);
        assert_eq!(fakes.broker.polls(), 0);

        orchestrator.tick();
        assert_eq!(*seen.borrow(), FULL_SEQUENCE.to_vec());
        assert!(orchestrator.available());
        assert_eq!(fakes.network.begins().len(), 2);
        assert_eq!(fakes.broker.polls(), 1);
    }

    #[test]
    fn test_tick_link_loss_keeps_later_stages() {
        let fakes = FakePlatform::new();
        let mut orchestrator = ready(&fakes);
        let seen = observed(&mut orchestrator);

        fakes.network.drop_link();
        orchestrator.tick();
        orchestrator.tick();

        assert_eq!(
            *seen.borrow(),
            vec![
                Status::WifiConnecting,
                Status::WifiConnected,
                Status::NtpConnected,
                Status::MqttConnected,
                Status::Ready,
            ]
        );
        assert_eq!(fakes.broker.attempts().len(), 1);
    }

    #[test]
    fn test_tick_pending_association_times_out() {
        let fakes = FakePlatform::new();
        let mut orchestrator = ready(&fakes);

        fakes.network.set_associate_on_begin(false);
        fakes.network.drop_link();
        orchestrator.tick();
        assert_eq!(orchestrator.status(), Status::WifiConnecting);

        fakes.clock.advance(Duration::from_secs(30));
        orchestrator.tick();
        assert_eq!(orchestrator.status(), Status::WifiConnecting);

        fakes.clock.advance(Duration::from_secs(31));
        orchestrator.tick();
        assert_eq!(orchestrator.status(), Status::WifiError);
        assert_eq!(
            orchestrator.last_error(),
            Some(&ConnectivityError::WifiTimeout)
        );

        // The next tick starts a fresh attempt
        orchestrator.tick();
        assert_eq!(orchestrator.status(), Status::WifiConnecting);
        assert_eq!(fakes.network.begins().len(), 3);
    }

    #[test]
    fn test_late_association_after_timeout_starts_new_attempt() {
        let fakes = FakePlatform::new();
        provision(&fakes, &stored_config());
        let polls_in_timeout = (WIFI_TIMEOUT.as_millis() / WIFI_POLL_INTERVAL.as_millis()) as u32;
        fakes.network.set_association_polls(polls_in_timeout + 2);
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());
        let seen = observed(&mut orchestrator);

        assert_eq!(orchestrator.connect(), Err(ConnectivityError::WifiTimeout));
        orchestrator.tick();

        assert_eq!(
            *seen.borrow(),
            vec![
                Status::WifiConnecting,
                Status::WifiError,
                Status::WifiConnecting,
            ]
        );
        assert_eq!(fakes.network.begins().len(), 2);
        assert!(fakes.broker.attempts().is_empty());
    }

    #[test]
    fn test_tick_reports_failed_periodic_resync() {
        let fakes = FakePlatform::new();
        let mut orchestrator = ready(&fakes);
        let seen = observed(&mut orchestrator);

        fakes.time_sync.fail_resyncs(true);
        orchestrator.tick();
        assert_eq!(
            orchestrator.last_error(),
            Some(&ConnectivityError::TimeSyncFailed)
        );
        assert_eq!(orchestrator.status(), Status::Ready);
        assert_eq!(fakes.broker.polls(), 1);

        fakes.time_sync.fail_resyncs(false);
        orchestrator.tick();
        assert!(orchestrator.last_error().is_none());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_tick_time_sync_failure_ends_tick() {
        let fakes = FakePlatform::new();
        let mut orchestrator = ready(&fakes);
        let seen = observed(&mut orchestrator);

        fakes.time_sync.lose_sync();
        fakes.time_sync.set_reachable(false);
        orchestrator.tick();
        assert_eq!(*seen.borrow(), vec![Status::NtpConnecting, Status::NtpError]);
        assert_eq!(fakes.broker.polls(), 0);

        fakes.time_sync.set_reachable(true);
        orchestrator.tick();
        assert_eq!(orchestrator.status(), Status::Ready);
        assert!(orchestrator.last_error().is_none());
        assert_eq!(fakes.broker.polls(), 1);
    }

    #[test]
    fn test_tick_in_run_mode_ignores_portal() {
        let fakes = FakePlatform::new();
        let mut orchestrator = ready(&fakes);

        fakes.portal.push(PortalRequest::get("/api/info"));
        orchestrator.tick();
        assert!(fakes.portal.exchanges().is_empty());
    }

    #[test]
    fn test_local_time_after_sync() {
        let fakes = FakePlatform::new();
        let orchestrator = ready(&fakes);

        // 1_700_000_000 + 3600 is 23:13:20 UTC on a Tuesday
        let time = orchestrator.local_time().unwrap();
        assert_eq!((time.hours, time.minutes, time.seconds), (23, 13, 20));
        assert_eq!(
            orchestrator.epoch_time(),
            Some(crate::testing::FAKE_EPOCH + 3600)
        );
    }

    #[test]
    fn test_publish_through_broker() {
        let fakes = FakePlatform::new();
        let mut orchestrator = ready(&fakes);

        orchestrator
            .broker_mut()
            .publish("pump/state", b"on", true)
            .unwrap();
        assert_eq!(
            fakes.broker.published(),
            vec![("pump/state".to_string(), b"on".to_vec(), true)]
        );
    }

    // ==================== Configuration Mode Tests ====================

    #[test]
    fn test_portal_start_failure() {
        let fakes = FakePlatform::new();
        fakes.portal.set_fail_start(true);
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());

        assert!(matches!(
            orchestrator.connect(),
            Err(ConnectivityError::PortalUnavailable(_))
        ));
    }

    #[test]
    fn test_custom_access_point_name() {
        let fakes = FakePlatform::new();
        let mut config = ConfigStore::new();
        config.set_ap_name("Pump Setup");
        let mut orchestrator = ConnectionOrchestrator::new(config, fakes.platform());

        assert_eq!(orchestrator.connect(), Ok(Status::Configuration));
        assert_eq!(fakes.network.access_points(), vec!["Pump Setup".to_string()]);
    }

    #[test]
    fn test_portal_malformed_requests() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);

        let bad = [
            PortalRequest::post("/api/wifi/connect").with_param("password", "hunter22"),
            PortalRequest::post("/api/wifi/connect")
                .with_param("ssid", "HomeNet")
                .with_param("password", "short"),
            PortalRequest::post("/api/ntp/set")
                .with_param("ntp", "pool.ntp.org")
                .with_param("offset", "abc")
                .with_param("interval", "60"),
            PortalRequest::post("/api/ntp/set")
                .with_param("ntp", "pool.ntp.org")
                .with_param("offset", "0")
                .with_param("interval", "0"),
            PortalRequest::post("/api/ntp/set")
                .with_param("offset", "0")
                .with_param("interval", "60"),
            PortalRequest::post("/api/mqtt/connect").with_param("port", "1883"),
            PortalRequest::post("/api/mqtt/connect")
                .with_param("url", "mqtt.local")
                .with_param("port", "70000"),
            PortalRequest::post("/api/option/set").with_param("name", "topic"),
            PortalRequest::get("/api/wifi/scan/item").with_param("count", "first"),
        ];
        for request in bad {
            let response = serve(&mut orchestrator, &fakes, request.clone());
            assert_eq!(response.status(), 400, "{:?}", request);
            assert!(!response.is_success());
        }
        assert!(fakes.network.begins().is_empty());
        assert!(fakes.broker.attempts().is_empty());
    }

    #[test]
    fn test_portal_unknown_route_and_wrong_method() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);

        let response = serve(&mut orchestrator, &fakes, PortalRequest::get("/api/reboot"));
        assert_eq!(response.status(), 404);

        let response = serve(&mut orchestrator, &fakes, PortalRequest::get("/api/wifi/connect"));
        assert_eq!(response.status(), 405);
        assert_eq!(response.allow(), Some(Method::Post));
    }

    #[test]
    fn test_portal_info() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);

        let response = serve(&mut orchestrator, &fakes, PortalRequest::get("/api/info"));
        let body = response.body();
        assert_eq!(body["success"], true);
        assert_eq!(body["connected"], false);
        assert_eq!(body["ip"], "");
        assert_eq!(body["version"], "0.0.0");
        assert_eq!(body["ssid"], "");
        assert_eq!(body["device"], "My Device");
    }

    #[test]
    fn test_portal_scan() {
        let fakes = FakePlatform::new();
        fakes.network.set_scan_results(vec![
            ScanEntry {
                ssid: "HomeNet".to_string(),
                security: Security::Wpa2,
                rssi: -40,
            },
            ScanEntry {
                ssid: "Cafe".to_string(),
                security: Security::Open,
                rssi: -71,
            },
        ]);
        let mut orchestrator = configuring(&fakes);

        let response = serve(&mut orchestrator, &fakes, PortalRequest::get("/api/wifi/scan"));
        let networks = response.body()["networks"].as_array().unwrap();
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0]["ssid"], "HomeNet");
        assert_eq!(networks[0]["type"], "WPA2");

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::get("/api/wifi/scan/count"),
        );
        assert_eq!(response.body()["count"], 2);

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::get("/api/wifi/scan/item").with_param("count", "1"),
        );
        assert!(response.is_success());
        assert_eq!(response.body()["ssid"], "Cafe");
        assert_eq!(response.body()["type"], "None");
        assert_eq!(response.body()["rssi"], -71);

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::get("/api/wifi/scan/item").with_param("count", "2"),
        );
        assert_eq!(response.status(), 200);
        assert!(!response.is_success());
    }

    #[test]
    fn test_portal_wifi_connect() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::post("/api/wifi/connect")
                .with_param("ssid", "HomeNet")
                .with_param("password", "hunter22"),
        );
        assert!(response.is_success());
        assert_eq!(response.body()["ip"], "192.168.4.23");
        assert_eq!(orchestrator.config().wifi_ssid(), "HomeNet");
        assert_eq!(orchestrator.config().wifi_password(), "hunter22");
        assert!(fakes.clock.delays().contains(&PORTAL_ASSOCIATION_SETTLE));

        let response = serve(&mut orchestrator, &fakes, PortalRequest::get("/api/wifi/info"));
        assert_eq!(response.body()["ssid"], "HomeNet");
    }

    #[test]
    fn test_portal_wifi_connect_timeout() {
        let fakes = FakePlatform::new();
        fakes.network.set_associate_on_begin(false);
        let mut orchestrator = configuring(&fakes);

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::post("/api/wifi/connect").with_param("ssid", "OpenCafe"),
        );
        assert_eq!(response.status(), 200);
        assert!(!response.is_success());
        assert_eq!(orchestrator.config().wifi_ssid(), "");
        assert_eq!(
            fakes.network.begins(),
            vec![("OpenCafe".to_string(), String::new())]
        );
    }

    #[test]
    fn test_portal_ntp_set() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::post("/api/ntp/set")
                .with_param("ntp", "pool.ntp.org")
                .with_param("offset", "3600")
                .with_param("interval", "60"),
        );
        assert!(response.is_success());
        assert_eq!(response.body()["h"], 23);
        assert_eq!(response.body()["m"], 13);
        assert_eq!(response.body()["s"], 20);

        let response = serve(&mut orchestrator, &fakes, PortalRequest::get("/api/ntp/info"));
        assert_eq!(response.body()["ntp"], "pool.ntp.org");
        assert_eq!(response.body()["offset"], 3600);
        assert_eq!(response.body()["interval"], 60);
    }

    #[test]
    fn test_portal_ntp_set_rejects_out_of_range_offset() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);

        for offset in ["9223372036854775807", "-9223372036854775808", "50401"] {
            let response = serve(
                &mut orchestrator,
                &fakes,
                PortalRequest::post("/api/ntp/set")
                    .with_param("ntp", "pool.ntp.org")
                    .with_param("offset", offset)
                    .with_param("interval", "60"),
            );
            assert_eq!(response.status(), 400, "offset {}", offset);
        }
        assert!(fakes.network.resolved().is_empty());
        assert_eq!(orchestrator.config().time_offset_secs(), 0);

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::post("/api/ntp/set")
                .with_param("ntp", "pool.ntp.org")
                .with_param("offset", "-50400")
                .with_param("interval", "60"),
        );
        assert!(response.is_success());
        assert_eq!(orchestrator.config().time_offset_secs(), -50_400);
    }

    #[test]
    fn test_portal_ntp_set_unreachable() {
        let fakes = FakePlatform::new();
        fakes.time_sync.set_reachable(false);
        let mut orchestrator = configuring(&fakes);

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::post("/api/ntp/set")
                .with_param("ntp", "ntp.invalid")
                .with_param("offset", "0")
                .with_param("interval", "60"),
        );
        assert_eq!(response.status(), 200);
        assert!(!response.is_success());
        assert_eq!(fakes.network.resolved(), vec!["ntp.invalid".to_string()]);
        assert_eq!(orchestrator.config().ntp_server(), "time.google.com");
    }

    #[test]
    fn test_portal_mqtt_connect_anonymous_clears_login() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);
        orchestrator.config_mut().set_mqtt_user("old");
        orchestrator.config_mut().set_mqtt_password("oldpw");

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::post("/api/mqtt/connect")
                .with_param("url", "mqtt.local")
                .with_param("port", "not-a-port")
                .with_param("muser", "")
                .with_param("mpass", "")
                .with_param("mid", "pump-1"),
        );
        assert!(response.is_success());

        let attempt = fakes.broker.attempts().pop().unwrap();
        assert_eq!(attempt.port, 1883);
        assert!(attempt.credentials.is_none());

        let mqtt = orchestrator.config().mqtt();
        assert_eq!(mqtt.address, "mqtt.local");
        assert_eq!(mqtt.client_id, "pump-1");
        assert_eq!(mqtt.user, "");
        assert_eq!(mqtt.password, "");
    }

    #[test]
    fn test_portal_mqtt_connect_with_login() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::post("/api/mqtt/connect")
                .with_param("url", "mqtt.local")
                .with_param("port", "8883")
                .with_param("muser", "sensor")
                .with_param("mpass", "brokerpw")
                .with_param("mid", "pump-1"),
        );
        assert!(response.is_success());

        let response = serve(&mut orchestrator, &fakes, PortalRequest::get("/api/mqtt/info"));
        let body = response.body();
        assert_eq!(body["url"], "mqtt.local");
        assert_eq!(body["port"], 8883);
        assert_eq!(body["muser"], "sensor");
        assert_eq!(body["mpass"], "brokerpw");
        assert_eq!(body["mid"], "pump-1");
    }

    #[test]
    fn test_portal_mqtt_refused_keeps_config() {
        let fakes = FakePlatform::new();
        fakes.broker.set_accept_credentials(false);
        let mut orchestrator = configuring(&fakes);

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::post("/api/mqtt/connect")
                .with_param("url", "mqtt.local")
                .with_param("muser", "sensor")
                .with_param("mpass", "wrong"),
        );
        assert_eq!(response.status(), 200);
        assert!(!response.is_success());
        assert_eq!(orchestrator.config().mqtt_address(), "broker.hivemq.com");
        assert_eq!(orchestrator.config().mqtt_user(), "");
    }

    #[test]
    fn test_portal_option_walk() {
        let fakes = FakePlatform::new();
        let mut config = ConfigStore::new();
        config.register_option("topic", "pump/state", false);
        config.register_option("note", "", true);
        let mut orchestrator = ConnectionOrchestrator::new(config, fakes.platform());
        assert_eq!(orchestrator.connect(), Ok(Status::Configuration));

        let count = PortalRequest::get("/api/option/count");
        let next = PortalRequest::get("/api/option/get");

        let response = serve(&mut orchestrator, &fakes, count.clone());
        assert_eq!(response.body()["cnt"], 2);

        let response = serve(&mut orchestrator, &fakes, next.clone());
        assert_eq!(response.body()["name"], "topic");
        assert_eq!(response.body()["value"], "pump/state");
        assert_eq!(response.body()["isNull"], false);

        let response = serve(&mut orchestrator, &fakes, next.clone());
        assert_eq!(response.body()["name"], "note");
        assert_eq!(response.body()["isNull"], true);

        let response = serve(&mut orchestrator, &fakes, next.clone());
        assert!(response.is_success());
        assert_eq!(response.body()["name"], "");

        serve(&mut orchestrator, &fakes, count);
        let response = serve(&mut orchestrator, &fakes, next);
        assert_eq!(response.body()["name"], "topic");
    }

    #[test]
    fn test_portal_option_set() {
        let fakes = FakePlatform::new();
        let mut config = ConfigStore::new();
        config.register_option("topic", "pump/state", false);
        let mut orchestrator = ConnectionOrchestrator::new(config, fakes.platform());
        orchestrator.set_option_validator(|_name: &str, value: &str| -> Result<(), String> {
            if value.contains(' ') {
                Err("no spaces".to_string())
            } else {
                Ok(())
            }
        });
        assert_eq!(orchestrator.connect(), Ok(Status::Configuration));

        let set = |value: &str| {
            PortalRequest::post("/api/option/set")
                .with_param("name", "topic")
                .with_param("value", value)
        };

        let response = serve(&mut orchestrator, &fakes, set("pump state"));
        assert!(!response.is_success());
        assert_eq!(response.body()["msg"], "no spaces");

        let response = serve(&mut orchestrator, &fakes, set(""));
        assert_eq!(response.status(), 200);
        assert!(!response.is_success());

        let response = serve(&mut orchestrator, &fakes, set("pump/custom"));
        assert!(response.is_success());
        assert_eq!(
            orchestrator.config().option("topic").unwrap().value(),
            "pump/custom"
        );

        let response = serve(
            &mut orchestrator,
            &fakes,
            PortalRequest::post("/api/option/set")
                .with_param("name", "missing")
                .with_param("value", "1"),
        );
        assert!(!response.is_success());
    }

    #[test]
    fn test_portal_commit_saves_and_restarts() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);
        orchestrator.config_mut().set_wifi_ssid("HomeNet");
        orchestrator.config_mut().set_wifi_password("hunter22");

        let response = serve(&mut orchestrator, &fakes, PortalRequest::get("/api/commit"));
        assert!(response.is_success());
        assert_eq!(fakes.device.restarts(), 1);
        assert_eq!(fakes.clock.delays().last(), Some(&COMMIT_RESTART_DELAY));
        assert!(fakes.storage.get(RECORD_KEY).is_some());

        // After the restart the stored configuration is used
        let rebooted = FakePlatform {
            storage: fakes.storage.clone(),
            ..FakePlatform::new()
        };
        let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), rebooted.platform());
        assert_eq!(orchestrator.connect(), Ok(Status::Ready));
        assert_eq!(
            rebooted.network.begins(),
            vec![("HomeNet".to_string(), "hunter22".to_string())]
        );
    }

    #[test]
    fn test_portal_commit_failure_still_restarts() {
        let fakes = FakePlatform::new();
        let mut orchestrator = configuring(&fakes);
        fakes.storage.fail_writes(true);

        let response = serve(&mut orchestrator, &fakes, PortalRequest::get("/api/commit"));
        assert_eq!(response.status(), 200);
        assert!(!response.is_success());
        assert_eq!(fakes.device.restarts(), 1);
    }
}
