//! Legacy line-based configuration record.
//!
//! Older firmware wrote the whole configuration as one newline-terminated
//! field per line, starting with a format marker:
//!
//! ```text
//! 0.9.0            format marker
//! version
//! device name
//! wifi ssid
//! wifi password
//! time server
//! update interval (minutes)
//! time offset (seconds)
//! broker address
//! broker port
//! client id
//! broker user
//! broker password
//! option count
//! name / value     one pair per option
//! ```
//!
//! The format is only read. Loading a legacy record rewrites it in the
//! current format.

use super::lines::{read_options, LineReader};
use super::PersistenceError;
use crate::config::ConfigStore;

/// Format marker on the first line of a legacy record.
pub const LEGACY_FORMAT_VERSION: &str = "0.9.0";

/// Decode a legacy record into a copy of `base`.
pub fn decode(base: &ConfigStore, data: &[u8]) -> Result<ConfigStore, PersistenceError> {
    let mut reader = LineReader::new(data);

    let marker = reader.next_line("format marker")?;
    if marker != LEGACY_FORMAT_VERSION {
        return Err(PersistenceError::VersionMismatch {
            found: marker.to_string(),
            expected: LEGACY_FORMAT_VERSION.to_string(),
        });
    }

    let mut config = base.clone();
    config.set_version(reader.next_line("version")?);
    config.set_device_name(reader.next_line("device name")?);
    config.set_wifi_ssid(reader.next_line("wifi ssid")?);
    config.set_wifi_password(reader.next_line("wifi password")?);
    config.set_ntp_server(reader.next_line("time server")?);
    config.set_ntp_update_interval_minutes(reader.next_parsed("update interval")?);
    config.set_time_offset_secs(reader.next_parsed("time offset")?);
    config.set_mqtt_address(reader.next_line("broker address")?);
    config.set_mqtt_port(reader.next_parsed("broker port")?);
    config.set_mqtt_client_id(reader.next_line("client id")?);
    config.set_mqtt_user(reader.next_line("broker user")?);
    config.set_mqtt_password(reader.next_line("broker password")?);

    config.clear_options();
    read_options(&mut reader, config.options_mut())?;
    Ok(config)
}
