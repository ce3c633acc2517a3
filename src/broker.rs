//! Message broker client.
//!
//! [`BrokerClient`] is what the orchestrator needs from an MQTT session:
//! a bounded connect, a liveness flag and a non-blocking service call.
//! [`MqttBroker`] implements it on the synchronous `rumqttc` client, whose
//! `Connection` drives the protocol whenever it is polled, so no background
//! thread is involved.
//!
//! # Example
//!
//! ```no_run
//! use esp_config_wizard::broker::{BrokerClient, BrokerEndpoint, MqttBroker};
//! use std::time::Duration;
//!
//! let mut broker = MqttBroker::new();
//! broker.set_timeouts(Duration::from_secs(3), Duration::from_secs(15));
//! broker.connect(&BrokerEndpoint::anonymous("broker.hivemq.com", 1883, "pump-1")).unwrap();
//! broker.publish("garden/pump", b"on", false).unwrap();
//! ```

use log::{debug, info, warn};
use rand_core::{OsRng, RngCore};
use rumqttc::{Client, Connection, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use std::fmt;
use std::time::{Duration, Instant};
use zeroize::Zeroize;

/// Default time allowed for connecting and for the broker's acknowledgement.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(3);

/// Default keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Capacity of the outgoing request queue.
const REQUEST_CAPACITY: usize = 16;

/// Longest single wait while servicing the connection.
const POLL_SLICE: Duration = Duration::from_millis(1);

/// Upper bound on protocol events handled per [`BrokerClient::poll`].
const MAX_EVENTS_PER_POLL: usize = 32;

/// Callback receiving `(topic, payload)` for every incoming publish.
pub type MessageHandler = Box<dyn FnMut(&str, &[u8])>;

/// Broker login.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

impl Drop for BrokerCredentials {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<BrokerCredentials>,
}

impl BrokerEndpoint {
    pub fn anonymous(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(BrokerCredentials {
            user: user.into(),
            password: password.into(),
        });
        self
    }
}

/// Broker errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No session is established.
    NotConnected,
    /// The broker did not acknowledge in time.
    Timeout,
    /// The broker refused the connection.
    Refused(String),
    /// Transport or protocol failure.
    Connection(String),
    /// Request could not be queued.
    Client(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected to broker"),
            Self::Timeout => write!(f, "broker did not answer in time"),
            Self::Refused(code) => write!(f, "broker refused connection: {}", code),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Client(msg) => write!(f, "client error: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<rumqttc::ClientError> for BrokerError {
    fn from(e: rumqttc::ClientError) -> Self {
        Self::Client(e.to_string())
    }
}

/// Broker session contract.
pub trait BrokerClient {
    /// Bound connect attempts by `socket_timeout` and keep the session alive
    /// with `keep_alive` pings.
    fn set_timeouts(&mut self, socket_timeout: Duration, keep_alive: Duration);

    /// Replace any current session with a new one to `endpoint`.
    fn connect(&mut self, endpoint: &BrokerEndpoint) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);

    /// Service the session without blocking.
    fn poll(&mut self);

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BrokerError>;

    /// Subscribe now and again after every reconnect.
    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

    fn set_message_handler(&mut self, handler: MessageHandler);
}

struct Session {
    client: Client,
    connection: Connection,
}

/// MQTT 3.1.1 client on `rumqttc`.
pub struct MqttBroker {
    socket_timeout: Duration,
    keep_alive: Duration,
    session: Option<Session>,
    connected: bool,
    subscriptions: Vec<String>,
    handler: Option<MessageHandler>,
}

impl MqttBroker {
    pub fn new() -> Self {
        Self {
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
            session: None,
            connected: false,
            subscriptions: Vec::new(),
            handler: None,
        }
    }

    fn options(&self, endpoint: &BrokerEndpoint) -> MqttOptions {
        let client_id = match endpoint.client_id.trim() {
            "" => {
                let generated = format!("esp-config-wizard-{:08x}", OsRng.next_u32());
                info!("No client id configured, using {}", generated);
                generated
            }
            id => id.to_string(),
        };

        let mut options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(self.keep_alive).set_clean_session(true);
        if let Some(credentials) = &endpoint.credentials {
            options.set_credentials(credentials.user.clone(), credentials.password.clone());
        }
        options
    }

    fn await_ack(&self, connection: &mut Connection) -> Result<(), BrokerError> {
        let deadline = Instant::now() + self.socket_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BrokerError::Timeout);
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    return match ack.code {
                        ConnectReturnCode::Success => Ok(()),
                        code => Err(BrokerError::Refused(format!("{:?}", code))),
                    };
                }
                Ok(Ok(event)) => debug!("Broker event before ack: {:?}", event),
                Ok(Err(e)) => return Err(BrokerError::Connection(e.to_string())),
                Err(_) => return Err(BrokerError::Timeout),
            }
        }
    }
}

impl Default for MqttBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerClient for MqttBroker {
    fn set_timeouts(&mut self, socket_timeout: Duration, keep_alive: Duration) {
        self.socket_timeout = socket_timeout;
        self.keep_alive = keep_alive;
    }

    fn connect(&mut self, endpoint: &BrokerEndpoint) -> Result<(), BrokerError> {
        self.disconnect();

        info!(
            "Connecting to broker {}:{} ({})",
            endpoint.host,
            endpoint.port,
            if endpoint.credentials.is_some() {
                "credentials"
            } else {
                "anonymous"
            }
        );
        let (client, mut connection) = Client::new(self.options(endpoint), REQUEST_CAPACITY);
        self.await_ack(&mut connection)?;

        for topic in &self.subscriptions {
            client.try_subscribe(topic.as_str(), QoS::AtMostOnce)?;
        }
        self.session = Some(Session { client, connection });
        self.connected = true;
        info!("Broker connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.client.try_disconnect().is_ok() {
                // Let the event loop flush the DISCONNECT packet
                let _ = session.connection.recv_timeout(POLL_SLICE);
            }
            debug!("Broker session closed");
        }
        self.connected = false;
    }

    fn poll(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        for _ in 0..MAX_EVENTS_PER_POLL {
            match session.connection.recv_timeout(POLL_SLICE) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    if let Some(handler) = self.handler.as_mut() {
                        handler(&publish.topic, &publish.payload);
                    }
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    warn!("Broker closed the session");
                    self.connected = false;
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("Broker connection lost: {}", e);
                    self.connected = false;
                    break;
                }
                Err(_) => break,
            }
        }
        if !self.connected {
            self.session = None;
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BrokerError> {
        let session = self.session.as_ref().ok_or(BrokerError::NotConnected)?;
        session
            .client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())?;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
        if let Some(session) = self.session.as_ref() {
            session.client.try_subscribe(topic, QoS::AtMostOnce)?;
        }
        Ok(())
    }

    fn set_message_handler(&mut self, handler: MessageHandler) {
        self.handler = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn quick_broker() -> MqttBroker {
        let mut broker = MqttBroker::new();
        broker.set_timeouts(Duration::from_millis(300), DEFAULT_KEEP_ALIVE);
        broker
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let endpoint = BrokerEndpoint::anonymous("mqtt.local", 1883, "id")
            .with_credentials("user", "secret");
        let debug = format!("{:?}", endpoint);
        assert!(debug.contains("user"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_publish_without_session() {
        let mut broker = MqttBroker::new();
        assert_eq!(
            broker.publish("a/b", b"x", false),
            Err(BrokerError::NotConnected)
        );
        assert!(!broker.is_connected());
    }

    #[test]
    fn test_subscribe_is_remembered_without_session() {
        let mut broker = MqttBroker::new();
        broker.subscribe("a/b").unwrap();
        broker.subscribe("a/b").unwrap();
        assert_eq!(broker.subscriptions, vec!["a/b".to_string()]);
    }

    #[test]
    fn test_connect_refused_port() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut broker = quick_broker();
        let result = broker.connect(&BrokerEndpoint::anonymous("127.0.0.1", port, "test"));
        assert!(result.is_err());
        assert!(!broker.is_connected());
    }

    #[test]
    fn test_connect_times_out_without_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut broker = quick_broker();

        let result = broker.connect(&BrokerEndpoint::anonymous("127.0.0.1", port, "test"));
        assert_eq!(result, Err(BrokerError::Timeout));
        assert!(!broker.is_connected());
        drop(listener);
    }

    #[test]
    fn test_poll_without_session_is_noop() {
        let mut broker = MqttBroker::new();
        broker.poll();
        assert!(!broker.is_connected());
    }
}
