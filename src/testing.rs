//! In-memory fakes for every collaborator trait.
//!
//! Each fake is a cheap handle around shared state: clone it, hand one clone
//! to the code under test and keep the other to script behavior and inspect
//! what happened. Only compiled for unit tests or with the `testing` feature.
//!
//! # Example
//!
//! ```ignore
//! use esp_config_wizard::config::ConfigStore;
//! use esp_config_wizard::orchestrator::{ConnectionOrchestrator, Status};
//! use esp_config_wizard::testing::FakePlatform;
//!
//! let fakes = FakePlatform::new();
//! let mut orchestrator = ConnectionOrchestrator::new(ConfigStore::new(), fakes.platform());
//!
//! // Nothing stored yet, so the device opens its access point
//! assert_eq!(orchestrator.connect(), Ok(Status::Configuration));
//! assert_eq!(fakes.network.access_points(), vec!["ESP Configuration".to_string()]);
//! ```

use crate::broker::{BrokerClient, BrokerEndpoint, BrokerError, MessageHandler};
use crate::network::{NetworkError, NetworkProvider, ScanEntry};
use crate::orchestrator::Platform;
use crate::persistence::{PersistenceError, Storage};
use crate::platform::{ClockSource, DeviceControl};
use crate::portal::{PortalError, PortalListener, PortalRequest, PortalResponse};
use crate::time_sync::{offset_epoch, TimeSync, TimeSyncError};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

// ==================== Network ====================

struct NetworkState {
    connected: bool,
    associate_on_begin: bool,
    /// `is_connected` calls that still report false after `begin`.
    association_polls: u32,
    pending_polls: Option<u32>,
    ip: IpAddr,
    resolvable: bool,
    begins: Vec<(String, String)>,
    access_points: Vec<String>,
    scan: Vec<ScanEntry>,
    resolved: Vec<String>,
}

/// Scripted radio.
///
/// By default every association succeeds immediately and every host
/// resolves to loopback.
#[derive(Clone)]
pub struct FakeNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl Default for FakeNetwork {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(NetworkState {
                connected: false,
                associate_on_begin: true,
                association_polls: 0,
                pending_polls: None,
                ip: IpAddr::V4(Ipv4Addr::new(192, 168, 4, 23)),
                resolvable: true,
                begins: Vec::new(),
                access_points: Vec::new(),
                scan: Vec::new(),
                resolved: Vec::new(),
            })),
        }
    }
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether association attempts eventually succeed.
    pub fn set_associate_on_begin(&self, associate: bool) {
        self.state.borrow_mut().associate_on_begin = associate;
    }

    /// Report "not connected" this many times after each `begin`.
    pub fn set_association_polls(&self, polls: u32) {
        self.state.borrow_mut().association_polls = polls;
    }

    pub fn set_resolvable(&self, resolvable: bool) {
        self.state.borrow_mut().resolvable = resolvable;
    }

    pub fn set_scan_results(&self, entries: Vec<ScanEntry>) {
        self.state.borrow_mut().scan = entries;
    }

    /// Simulate losing the link.
    pub fn drop_link(&self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.pending_polls = None;
    }

    /// `(ssid, password)` of every association attempt.
    pub fn begins(&self) -> Vec<(String, String)> {
        self.state.borrow().begins.clone()
    }

    pub fn access_points(&self) -> Vec<String> {
        self.state.borrow().access_points.clone()
    }

    pub fn resolved(&self) -> Vec<String> {
        self.state.borrow().resolved.clone()
    }
}

impl NetworkProvider for FakeNetwork {
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let mut state = self.state.borrow_mut();
        state
            .begins
            .push((ssid.to_string(), password.to_string()));
        state.connected = false;
        let pending = state.associate_on_begin.then_some(state.association_polls);
        state.pending_polls = pending;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let mut state = self.state.borrow_mut();
        match state.pending_polls {
            Some(0) => {
                state.pending_polls = None;
                state.connected = true;
            }
            Some(remaining) => state.pending_polls = Some(remaining - 1),
            None => {}
        }
        state.connected
    }

    fn ip_addr(&self) -> Option<IpAddr> {
        let state = self.state.borrow();
        state.connected.then_some(state.ip)
    }

    fn start_access_point(&mut self, name: &str) -> Result<(), NetworkError> {
        self.state.borrow_mut().access_points.push(name.to_string());
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<ScanEntry>, NetworkError> {
        Ok(self.state.borrow().scan.clone())
    }

    fn resolve(&self, host: &str) -> Result<IpAddr, NetworkError> {
        let mut state = self.state.borrow_mut();
        state.resolved.push(host.to_string());
        if state.resolvable {
            Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
        } else {
            Err(NetworkError::Resolve(host.to_string()))
        }
    }
}

// ==================== Clock ====================

/// Manual clock. `delay` advances time instantly.
#[derive(Clone, Default)]
pub struct FakeClock {
    now: Rc<Cell<u64>>,
    delays: Rc<RefCell<Vec<Duration>>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration.as_millis() as u64);
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl ClockSource for FakeClock {
    fn millis(&self) -> u64 {
        self.now.get()
    }

    fn delay(&mut self, duration: Duration) {
        self.delays.borrow_mut().push(duration);
        self.advance(duration);
    }
}

// ==================== Time Sync ====================

/// Epoch reported by [`FakeTimeSync`] before the offset is applied.
pub const FAKE_EPOCH: u64 = 1_700_000_000;

#[derive(Default)]
struct TimeSyncState {
    server: Option<SocketAddr>,
    offset_secs: i64,
    update_interval: Duration,
    synced: bool,
    unreachable: bool,
    failing_updates: u32,
    failing_resyncs: bool,
    updates: u32,
    port_changes: u32,
    ends: u32,
}

/// Scripted time-sync client.
#[derive(Clone, Default)]
pub struct FakeTimeSync {
    state: Rc<RefCell<TimeSyncState>>,
}

impl FakeTimeSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every exchange fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.borrow_mut().unreachable = !reachable;
    }

    /// Make the next `count` exchanges fail.
    pub fn fail_next_updates(&self, count: u32) {
        self.state.borrow_mut().failing_updates = count;
    }

    /// Make periodic updates of a synchronized session fail while keeping
    /// the time set.
    pub fn fail_resyncs(&self, fail: bool) {
        self.state.borrow_mut().failing_resyncs = fail;
    }

    /// Forget the synchronized time, as if the session had been reset.
    pub fn lose_sync(&self) {
        self.state.borrow_mut().synced = false;
    }

    pub fn server(&self) -> Option<SocketAddr> {
        self.state.borrow().server
    }

    pub fn offset_secs(&self) -> i64 {
        self.state.borrow().offset_secs
    }

    pub fn update_interval(&self) -> Duration {
        self.state.borrow().update_interval
    }

    pub fn updates(&self) -> u32 {
        self.state.borrow().updates
    }

    pub fn port_changes(&self) -> u32 {
        self.state.borrow().port_changes
    }

    pub fn ends(&self) -> u32 {
        self.state.borrow().ends
    }
}

impl TimeSync for FakeTimeSync {
    fn begin(
        &mut self,
        server: SocketAddr,
        offset_secs: i64,
        update_interval: Duration,
    ) -> Result<(), TimeSyncError> {
        let mut state = self.state.borrow_mut();
        state.server = Some(server);
        state.offset_secs = offset_secs;
        state.update_interval = update_interval;
        state.synced = false;
        Ok(())
    }

    fn end(&mut self) {
        let mut state = self.state.borrow_mut();
        state.server = None;
        state.synced = false;
        state.ends += 1;
    }

    fn update(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.server.is_none() {
            return false;
        }
        if state.synced {
            return !state.failing_resyncs;
        }
        state.updates += 1;
        if state.unreachable {
            return false;
        }
        if state.failing_updates > 0 {
            state.failing_updates -= 1;
            return false;
        }
        state.synced = true;
        true
    }

    fn is_time_set(&self) -> bool {
        self.state.borrow().synced
    }

    fn randomize_port(&mut self) -> Result<(), TimeSyncError> {
        let mut state = self.state.borrow_mut();
        if state.server.is_none() {
            return Err(TimeSyncError::NotStarted);
        }
        state.port_changes += 1;
        Ok(())
    }

    fn epoch_time(&self) -> Option<u64> {
        let state = self.state.borrow();
        if !state.synced {
            return None;
        }
        offset_epoch(FAKE_EPOCH, 0, state.offset_secs)
    }
}

// ==================== Broker ====================

struct BrokerState {
    connected: bool,
    accept_anonymous: bool,
    accept_credentials: bool,
    timeouts: Option<(Duration, Duration)>,
    attempts: Vec<BrokerEndpoint>,
    disconnects: u32,
    polls: u32,
    published: Vec<(String, Vec<u8>, bool)>,
    subscriptions: Vec<String>,
    handler: Option<MessageHandler>,
}

/// Scripted broker session. Accepts every connection by default.
#[derive(Clone)]
pub struct FakeBroker {
    state: Rc<RefCell<BrokerState>>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(BrokerState {
                connected: false,
                accept_anonymous: true,
                accept_credentials: true,
                timeouts: None,
                attempts: Vec::new(),
                disconnects: 0,
                polls: 0,
                published: Vec::new(),
                subscriptions: Vec::new(),
                handler: None,
            })),
        }
    }
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_accept_anonymous(&self, accept: bool) {
        self.state.borrow_mut().accept_anonymous = accept;
    }

    pub fn set_accept_credentials(&self, accept: bool) {
        self.state.borrow_mut().accept_credentials = accept;
    }

    /// Simulate the broker closing the session.
    pub fn drop_connection(&self) {
        self.state.borrow_mut().connected = false;
    }

    pub fn attempts(&self) -> Vec<BrokerEndpoint> {
        self.state.borrow().attempts.clone()
    }

    pub fn timeouts(&self) -> Option<(Duration, Duration)> {
        self.state.borrow().timeouts
    }

    pub fn disconnects(&self) -> u32 {
        self.state.borrow().disconnects
    }

    pub fn polls(&self) -> u32 {
        self.state.borrow().polls
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>, bool)> {
        self.state.borrow().published.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.borrow().subscriptions.clone()
    }

    /// Hand an incoming publish to the registered handler.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let handler = self.state.borrow_mut().handler.take();
        if let Some(mut handler) = handler {
            handler(topic, payload);
            self.state.borrow_mut().handler = Some(handler);
        }
    }
}

impl BrokerClient for FakeBroker {
    fn set_timeouts(&mut self, socket_timeout: Duration, keep_alive: Duration) {
        self.state.borrow_mut().timeouts = Some((socket_timeout, keep_alive));
    }

    fn connect(&mut self, endpoint: &BrokerEndpoint) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        state.attempts.push(endpoint.clone());
        let accepted = if endpoint.credentials.is_some() {
            state.accept_credentials
        } else {
            state.accept_anonymous
        };
        state.connected = accepted;
        if accepted {
            Ok(())
        } else {
            Err(BrokerError::Refused("not authorized".to_string()))
        }
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn disconnect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.disconnects += 1;
    }

    fn poll(&mut self) {
        self.state.borrow_mut().polls += 1;
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        state
            .published
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.state.borrow_mut().subscriptions.push(topic.to_string());
        Ok(())
    }

    fn set_message_handler(&mut self, handler: MessageHandler) {
        self.state.borrow_mut().handler = Some(handler);
    }
}

// ==================== Storage ====================

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Vec<u8>>,
    fail_writes: bool,
    refused_key: Option<String>,
}

/// Keyed storage held in memory.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `key`, bypassing write failures.
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.state
            .borrow_mut()
            .entries
            .insert(key.to_string(), data.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state.borrow().entries.get(key).cloned()
    }

    pub fn delete(&self, key: &str) {
        self.state.borrow_mut().entries.remove(key);
    }

    /// Make every `write` and `remove` fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }

    /// Make writes to `key` alone fail until reset with `None`.
    pub fn refuse_writes_to(&self, key: Option<&str>) {
        self.state.borrow_mut().refused_key = key.map(str::to_string);
    }

    fn refuses(&self, key: &str) -> bool {
        let state = self.state.borrow();
        state.fail_writes || state.refused_key.as_deref() == Some(key)
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.get(key))
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), PersistenceError> {
        if self.refuses(key) {
            return Err(PersistenceError::Storage(format!("write to {} refused", key)));
        }
        self.insert(key, data);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        if self.state.borrow().fail_writes {
            return Err(PersistenceError::Storage(format!("remove of {} refused", key)));
        }
        self.delete(key);
        Ok(())
    }
}

// ==================== Portal ====================

#[derive(Default)]
struct PortalState {
    port: Option<u16>,
    fail_start: bool,
    starts: u32,
    queue: VecDeque<PortalRequest>,
    exchanges: Vec<(PortalRequest, PortalResponse)>,
}

/// Portal listener fed from a request queue.
#[derive(Clone, Default)]
pub struct ScriptedPortal {
    state: Rc<RefCell<PortalState>>,
}

impl ScriptedPortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request for the next poll.
    pub fn push(&self, request: PortalRequest) {
        self.state.borrow_mut().queue.push_back(request);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.borrow_mut().fail_start = fail;
    }

    pub fn port(&self) -> Option<u16> {
        self.state.borrow().port
    }

    pub fn starts(&self) -> u32 {
        self.state.borrow().starts
    }

    /// Every request served so far with its response.
    pub fn exchanges(&self) -> Vec<(PortalRequest, PortalResponse)> {
        self.state.borrow().exchanges.clone()
    }

    pub fn last_response(&self) -> Option<PortalResponse> {
        self.state
            .borrow()
            .exchanges
            .last()
            .map(|(_, response)| response.clone())
    }
}

impl PortalListener for ScriptedPortal {
    fn start(&mut self, port: u16) -> Result<(), PortalError> {
        let mut state = self.state.borrow_mut();
        if state.fail_start {
            return Err(PortalError::Bind(format!("port {} in use", port)));
        }
        state.port = Some(port);
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.borrow_mut().port = None;
    }

    fn is_running(&self) -> bool {
        self.state.borrow().port.is_some()
    }

    fn poll(&mut self, handler: &mut dyn FnMut(&PortalRequest) -> PortalResponse) -> usize {
        if !self.is_running() {
            return 0;
        }
        let mut served = 0;
        loop {
            let next = self.state.borrow_mut().queue.pop_front();
            let Some(request) = next else {
                break;
            };
            let response = handler(&request);
            self.state.borrow_mut().exchanges.push((request, response));
            served += 1;
        }
        served
    }
}

// ==================== Device ====================

/// Counts restarts instead of performing them.
#[derive(Clone, Default)]
pub struct FakeDevice {
    restarts: Rc<Cell<u32>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.get()
    }
}

impl DeviceControl for FakeDevice {
    fn restart(&mut self) {
        self.restarts.set(self.restarts.get() + 1);
    }
}

// ==================== Platform ====================

/// One of each fake, plus a way to hand clones to an orchestrator.
#[derive(Clone, Default)]
pub struct FakePlatform {
    pub network: FakeNetwork,
    pub clock: FakeClock,
    pub time_sync: FakeTimeSync,
    pub broker: FakeBroker,
    pub portal: ScriptedPortal,
    pub storage: MemoryStorage,
    pub device: FakeDevice,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Platform`] sharing state with these fakes.
    pub fn platform(&self) -> Platform {
        Platform {
            network: Box::new(self.network.clone()),
            clock: Box::new(self.clock.clone()),
            time_sync: Box::new(self.time_sync.clone()),
            broker: Box::new(self.broker.clone()),
            portal: Box::new(self.portal.clone()),
            storage: Box::new(self.storage.clone()),
            device: Box::new(self.device.clone()),
        }
    }
}
