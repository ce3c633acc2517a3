//! Orchestrator status and mode.

use std::fmt;

/// Observable progress of the orchestrator.
///
/// Every status carries a stable numeric code ([`Status::code`]) for
/// applications that report status over the wire or on a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Prepare,
    Configuration,
    WifiConnecting,
    WifiConnected,
    WifiError,
    NtpConnecting,
    NtpConnected,
    NtpError,
    MqttConnecting,
    MqttConnected,
    MqttError,
    Ready,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Self::Prepare => 100,
            Self::Configuration => 7,
            Self::WifiConnecting => 1,
            Self::WifiConnected => 10,
            Self::WifiError => -1,
            Self::NtpConnecting => 2,
            Self::NtpConnected => 20,
            Self::NtpError => -2,
            Self::MqttConnecting => 3,
            Self::MqttConnected => 30,
            Self::MqttError => -3,
            Self::Ready => 0,
        }
    }

    /// Position in the connection sequence. A stage's attempt and failure
    /// rank just below its success.
    pub(crate) fn progress(self) -> u8 {
        match self {
            Self::Prepare | Self::Configuration => 0,
            Self::WifiConnecting | Self::WifiError => 1,
            Self::WifiConnected => 2,
            Self::NtpConnecting | Self::NtpError => 3,
            Self::NtpConnected => 4,
            Self::MqttConnecting | Self::MqttError => 5,
            Self::MqttConnected => 6,
            Self::Ready => 7,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::WifiError | Self::NtpError | Self::MqttError)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepare => "prepare",
            Self::Configuration => "configuration",
            Self::WifiConnecting => "wifi connecting",
            Self::WifiConnected => "wifi connected",
            Self::WifiError => "wifi error",
            Self::NtpConnecting => "ntp connecting",
            Self::NtpConnected => "ntp connected",
            Self::NtpError => "ntp error",
            Self::MqttConnecting => "mqtt connecting",
            Self::MqttConnected => "mqtt connected",
            Self::MqttError => "mqtt error",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Nothing started yet.
    Prepare,
    /// Access point and portal active.
    Configuration,
    /// Connection stages active.
    Run,
}
