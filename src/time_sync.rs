//! Network time synchronization.
//!
//! [`TimeSync`] is the seam the orchestrator drives; [`SntpClient`] runs the
//! `sntpc` client over a std UDP socket it owns, so the session can move to
//! another local port between exchanges. Time is kept as the server's Unix
//! time at the last successful exchange plus the monotonic time elapsed since.
//!
//! # Example
//!
//! ```no_run
//! use esp_config_wizard::time_sync::{SntpClient, TimeSync, NTP_PORT};
//! use std::net::{SocketAddr, ToSocketAddrs};
//! use std::time::Duration;
//!
//! let server: SocketAddr = ("time.google.com", NTP_PORT)
//!     .to_socket_addrs()
//!     .unwrap()
//!     .next()
//!     .unwrap();
//! let mut client = SntpClient::new();
//! client.begin(server, 3600, Duration::from_secs(24 * 60 * 60)).unwrap();
//! if client.update() {
//!     println!("local time: {:?}", client.local_time());
//! }
//! ```

use log::{debug, warn};
use rand_core::{OsRng, RngCore};
use sntpc::{NtpContext, StdTimestampGen};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// Standard NTP server port.
pub const NTP_PORT: u16 = 123;

/// How long to wait for a server reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// First port of the dynamic range used by [`TimeSync::randomize_port`].
const EPHEMERAL_PORT_BASE: u16 = 49152;
const EPHEMERAL_PORT_SPAN: u32 = 16384;

/// Time-sync client contract.
pub trait TimeSync {
    /// Start a session against `server`. Any previous session is ended.
    fn begin(
        &mut self,
        server: SocketAddr,
        offset_secs: i64,
        update_interval: Duration,
    ) -> Result<(), TimeSyncError>;

    /// End the session and forget the synchronized time.
    fn end(&mut self);

    /// Exchange with the server if a sync is due.
    ///
    /// Returns false only when an exchange was attempted and failed.
    fn update(&mut self) -> bool;

    /// Whether a sync has succeeded during this session.
    fn is_time_set(&self) -> bool;

    /// Move the session to a random local port in the dynamic range.
    fn randomize_port(&mut self) -> Result<(), TimeSyncError>;

    /// Current Unix time with the offset applied, or `None` when unsynced or
    /// when the offset moves it out of range.
    fn epoch_time(&self) -> Option<u64>;

    /// Current local time of day.
    fn local_time(&self) -> Option<LocalTime> {
        self.epoch_time().map(LocalTime::from_epoch)
    }
}

/// Time-of-day breakdown of an epoch value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    /// Day of week, 0 = Sunday.
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl LocalTime {
    pub fn from_epoch(epoch: u64) -> Self {
        Self {
            // 1970-01-01 was a Thursday
            day: ((epoch / 86_400 + 4) % 7) as u8,
            hours: ((epoch % 86_400) / 3_600) as u8,
            minutes: ((epoch % 3_600) / 60) as u8,
            seconds: (epoch % 60) as u8,
        }
    }
}

/// Apply `offset_secs` to a synchronized epoch, rejecting results outside
/// the unsigned range.
pub fn offset_epoch(epoch: u64, elapsed_secs: u64, offset_secs: i64) -> Option<u64> {
    let now = i64::try_from(epoch)
        .ok()?
        .checked_add(i64::try_from(elapsed_secs).ok()?)?
        .checked_add(offset_secs)?;
    u64::try_from(now).ok()
}

/// Time-sync errors.
#[derive(Debug)]
pub enum TimeSyncError {
    /// No session has been started.
    NotStarted,
    /// Socket error.
    Io(io::Error),
    /// The server exchange failed.
    Protocol(String),
}

impl fmt::Display for TimeSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "time sync session not started"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Protocol(msg) => write!(f, "SNTP exchange failed: {}", msg),
        }
    }
}

impl std::error::Error for TimeSyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TimeSyncError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<sntpc::Error> for TimeSyncError {
    fn from(e: sntpc::Error) -> Self {
        Self::Protocol(format!("{:?}", e))
    }
}

struct Session {
    socket: UdpSocket,
    server: SocketAddr,
    offset_secs: i64,
    update_interval: Duration,
}

/// SNTP client on a std UDP socket.
pub struct SntpClient {
    session: Option<Session>,
    response_timeout: Duration,
    /// Server Unix time at the last successful exchange.
    synced: Option<(u64, Instant)>,
}

impl SntpClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_RESPONSE_TIMEOUT)
    }

    pub fn with_timeout(response_timeout: Duration) -> Self {
        Self {
            session: None,
            response_timeout,
            synced: None,
        }
    }

    fn bind(&self, server: SocketAddr, port: u16) -> io::Result<UdpSocket> {
        let local: IpAddr = if server.is_ipv6() {
            Ipv6Addr::UNSPECIFIED.into()
        } else {
            Ipv4Addr::UNSPECIFIED.into()
        };
        let socket = UdpSocket::bind((local, port))?;
        socket.set_read_timeout(Some(self.response_timeout))?;
        Ok(socket)
    }

    fn is_due(&self, interval: Duration) -> bool {
        match self.synced {
            Some((_, at)) => at.elapsed() >= interval,
            None => true,
        }
    }

    fn exchange(session: &Session) -> Result<u64, TimeSyncError> {
        // Drop stale replies from an earlier, timed-out exchange
        session.socket.set_nonblocking(true)?;
        let mut scratch = [0u8; 64];
        while session.socket.recv_from(&mut scratch).is_ok() {}
        session.socket.set_nonblocking(false)?;

        let context = NtpContext::new(StdTimestampGen::default());
        let result = sntpc::get_time(session.server, &session.socket.try_clone()?, context)?;
        Ok(u64::from(result.sec()))
    }
}

impl Default for SntpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSync for SntpClient {
    fn begin(
        &mut self,
        server: SocketAddr,
        offset_secs: i64,
        update_interval: Duration,
    ) -> Result<(), TimeSyncError> {
        self.end();
        let socket = self.bind(server, 0)?;
        debug!("Time sync session against {}", server);
        self.session = Some(Session {
            socket,
            server,
            offset_secs,
            update_interval,
        });
        Ok(())
    }

    fn end(&mut self) {
        self.session = None;
        self.synced = None;
    }

    fn update(&mut self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        if !self.is_due(session.update_interval) {
            return true;
        }
        match Self::exchange(session) {
            Ok(epoch) => {
                debug!("Time synchronized: {}", epoch);
                self.synced = Some((epoch, Instant::now()));
                true
            }
            Err(e) => {
                warn!("Time sync with {} failed: {}", session.server, e);
                false
            }
        }
    }

    fn is_time_set(&self) -> bool {
        self.session.is_some() && self.synced.is_some()
    }

    fn randomize_port(&mut self) -> Result<(), TimeSyncError> {
        let server = self
            .session
            .as_ref()
            .map(|session| session.server)
            .ok_or(TimeSyncError::NotStarted)?;
        let port = EPHEMERAL_PORT_BASE + (OsRng.next_u32() % EPHEMERAL_PORT_SPAN) as u16;
        let socket = self.bind(server, port)?;
        if let Some(session) = self.session.as_mut() {
            session.socket = socket;
        }
        debug!("Time sync moved to local port {}", port);
        Ok(())
    }

    fn epoch_time(&self) -> Option<u64> {
        let session = self.session.as_ref()?;
        let (epoch, at) = self.synced?;
        offset_epoch(epoch, at.elapsed().as_secs(), session.offset_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SERVER_EPOCH: u64 = 1_700_000_000;

    /// Seconds between the NTP era (1900) and the Unix epoch (1970).
    const SEVENTY_YEARS: u64 = 2_208_988_800;

    fn spawn_server(replies: usize) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        thread::spawn(move || {
            for _ in 0..replies {
                let mut request = [0u8; 48];
                let Ok((_, client)) = socket.recv_from(&mut request) else {
                    return;
                };
                let mut reply = [0u8; 48];
                reply[0] = 0b0010_0100; // no leap warning, version 4, server mode
                reply[1] = 2; // stratum
                // Originate timestamp echoes the client's transmit timestamp
                reply[24..32].copy_from_slice(&request[40..48]);
                let seconds = ((SERVER_EPOCH + SEVENTY_YEARS) as u32).to_be_bytes();
                reply[32..36].copy_from_slice(&seconds);
                reply[40..44].copy_from_slice(&seconds);
                let _ = socket.send_to(&reply, client);
            }
        });
        addr
    }

    fn local_client(server: SocketAddr, offset: i64) -> SntpClient {
        let mut client = SntpClient::with_timeout(Duration::from_millis(500));
        client
            .begin(server, offset, Duration::from_secs(3600))
            .unwrap();
        client
    }

    // ==================== LocalTime Tests ====================

    #[test]
    fn test_local_time_from_epoch() {
        // 2023-11-14 22:13:20 UTC, a Tuesday
        let time = LocalTime::from_epoch(SERVER_EPOCH);
        assert_eq!(time.day, 2);
        assert_eq!(time.hours, 22);
        assert_eq!(time.minutes, 13);
        assert_eq!(time.seconds, 20);
    }

    #[test]
    fn test_epoch_zero_is_thursday() {
        assert_eq!(LocalTime::from_epoch(0).day, 4);
    }

    #[test]
    fn test_offset_epoch_out_of_range() {
        assert_eq!(offset_epoch(SERVER_EPOCH, 5, -3600), Some(SERVER_EPOCH + 5 - 3600));
        assert_eq!(offset_epoch(SERVER_EPOCH, 0, i64::MAX), None);
        assert_eq!(offset_epoch(SERVER_EPOCH, 0, i64::MIN), None);
        assert_eq!(offset_epoch(u64::MAX, 0, 0), None);
    }

    // ==================== SntpClient Tests ====================

    #[test]
    fn test_update_without_session() {
        let mut client = SntpClient::new();
        assert!(!client.update());
        assert!(!client.is_time_set());
        assert!(client.epoch_time().is_none());
        assert!(matches!(
            client.randomize_port(),
            Err(TimeSyncError::NotStarted)
        ));
    }

    #[test]
    fn test_sync_against_local_server() {
        let server = spawn_server(1);
        let mut client = local_client(server, 3600);

        assert!(client.update());
        assert!(client.is_time_set());
        let epoch = client.epoch_time().unwrap();
        assert!(epoch >= SERVER_EPOCH + 3600 && epoch <= SERVER_EPOCH + 3602);
    }

    #[test]
    fn test_huge_offset_has_no_local_time() {
        let server = spawn_server(1);
        let mut client = local_client(server, i64::MAX);

        assert!(client.update());
        assert!(client.is_time_set());
        assert!(client.epoch_time().is_none());
        assert!(client.local_time().is_none());
    }

    #[test]
    fn test_update_not_due_skips_exchange() {
        let server = spawn_server(1);
        let mut client = local_client(server, 0);
        assert!(client.update());
        // Server is gone after one reply; a second exchange would time out
        assert!(client.update());
    }

    #[test]
    fn test_unanswered_request_fails() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut client = local_client(silent.local_addr().unwrap(), 0);
        assert!(!client.update());
        assert!(!client.is_time_set());
    }

    #[test]
    fn test_sync_after_port_change() {
        let server = spawn_server(1);
        let mut client = local_client(server, 0);
        client.randomize_port().unwrap();
        assert!(client.update());
        assert!(client.is_time_set());
    }

    #[test]
    fn test_end_forgets_time() {
        let server = spawn_server(1);
        let mut client = local_client(server, 0);
        assert!(client.update());
        client.end();
        assert!(!client.is_time_set());
        assert!(client.epoch_time().is_none());
    }
}
