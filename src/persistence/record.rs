//! Current configuration record format.
//!
//! The fixed fields are stored as a JSON document tagged with
//! [`RECORD_SCHEMA_VERSION`]. Options live in a separate newline-delimited
//! side file so arbitrary option names never have to be escaped into keys.

use super::lines::{read_options, write_options, LineReader, LineWriter};
use super::PersistenceError;
use crate::config::ConfigStore;
use serde::{Deserialize, Serialize};

/// Format version written into every record.
pub const RECORD_SCHEMA_VERSION: &str = "1.0";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    schema: String,
    version: String,
    device_name: String,
    wifi: WifiSection,
    ntp: NtpSection,
    mqtt: MqttSection,
}

#[derive(Serialize, Deserialize)]
struct WifiSection {
    ssid: String,
    password: String,
}

#[derive(Serialize, Deserialize)]
struct NtpSection {
    address: String,
    interval: u16,
    offset: i64,
}

#[derive(Serialize, Deserialize)]
struct MqttSection {
    address: String,
    port: u16,
    #[serde(rename = "clientID")]
    client_id: String,
    user: String,
    password: String,
}

/// Encode the fixed fields of `config`.
pub fn encode(config: &ConfigStore) -> Result<Vec<u8>, PersistenceError> {
    let wifi = config.wifi();
    let ntp = config.ntp();
    let mqtt = config.mqtt();
    let record = Record {
        schema: RECORD_SCHEMA_VERSION.to_string(),
        version: config.version().to_string(),
        device_name: config.device_name().to_string(),
        wifi: WifiSection {
            ssid: wifi.ssid.clone(),
            password: wifi.password.clone(),
        },
        ntp: NtpSection {
            address: ntp.server.clone(),
            interval: ntp.update_interval_minutes,
            offset: ntp.time_offset_secs,
        },
        mqtt: MqttSection {
            address: mqtt.address.clone(),
            port: mqtt.port,
            client_id: mqtt.client_id.clone(),
            user: mqtt.user.clone(),
            password: mqtt.password.clone(),
        },
    };
    serde_json::to_vec_pretty(&record)
        .map_err(|e| PersistenceError::InvalidValue(e.to_string()))
}

/// Encode the options of `config` for the side file.
pub fn encode_options(config: &ConfigStore) -> Result<Vec<u8>, PersistenceError> {
    let mut writer = LineWriter::new();
    write_options(&mut writer, config.options())?;
    Ok(writer.into_bytes())
}

/// Decode a record and its options into a copy of `base`.
///
/// `base` supplies the fields that are not persisted. Its options are
/// discarded.
pub fn decode(
    base: &ConfigStore,
    document: &[u8],
    options: &[u8],
) -> Result<ConfigStore, PersistenceError> {
    let value: serde_json::Value = serde_json::from_slice(document).map_err(|e| {
        if e.is_eof() {
            PersistenceError::Truncated("record".to_string())
        } else {
            PersistenceError::Malformed(e.to_string())
        }
    })?;

    let schema = value
        .get("schema")
        .ok_or_else(|| PersistenceError::Malformed("missing schema".to_string()))?
        .as_str()
        .ok_or_else(|| PersistenceError::Malformed("schema is not a string".to_string()))?;
    if schema != RECORD_SCHEMA_VERSION {
        return Err(PersistenceError::VersionMismatch {
            found: schema.to_string(),
            expected: RECORD_SCHEMA_VERSION.to_string(),
        });
    }

    let record: Record =
        serde_json::from_value(value).map_err(|e| PersistenceError::Malformed(e.to_string()))?;

    let mut config = base.clone();
    config.set_version(record.version);
    config.set_device_name(record.device_name);
    config.set_wifi_ssid(record.wifi.ssid);
    config.set_wifi_password(record.wifi.password);
    config.set_ntp_server(record.ntp.address);
    config.set_ntp_update_interval_minutes(record.ntp.interval);
    config.set_time_offset_secs(record.ntp.offset);
    config.set_mqtt_address(&record.mqtt.address);
    config.set_mqtt_port(record.mqtt.port);
    config.set_mqtt_client_id(record.mqtt.client_id);
    config.set_mqtt_user(&record.mqtt.user);
    config.set_mqtt_password(record.mqtt.password);

    config.clear_options();
    let mut reader = LineReader::new(options);
    read_options(&mut reader, config.options_mut())?;
    if reader.remaining() > 0 {
        log::debug!("Ignoring {} trailing bytes in options record", reader.remaining());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(config: &ConfigStore) -> (Vec<u8>, Vec<u8>) {
        (encode(config).unwrap(), encode_options(config).unwrap())
    }

    #[test]
    fn test_document_field_names() {
        let mut config = ConfigStore::new();
        config.set_mqtt_client_id("node-1");
        let (document, _) = encoded(&config);
        let value: serde_json::Value = serde_json::from_slice(&document).unwrap();

        assert_eq!(value["schema"], "1.0");
        assert_eq!(value["deviceName"], "My Device");
        assert_eq!(value["ntp"]["interval"], 1440);
        assert_eq!(value["mqtt"]["clientID"], "node-1");
        assert_eq!(value["mqtt"]["port"], 1883);
    }

    #[test]
    fn test_decode_replaces_options() {
        let mut stored = ConfigStore::new();
        stored.register_option("a", "1", false);
        let (document, options) = encoded(&stored);

        let mut base = ConfigStore::new();
        base.register_option("stale", "x", false);
        let decoded = decode(&base, &document, &options).unwrap();

        assert!(decoded.option("stale").is_none());
        assert_eq!(decoded.option("a").unwrap().value(), "1");
        assert_eq!(decoded.option("a").unwrap().default_value(), "");
    }

    #[test]
    fn test_schema_mismatch() {
        let (_, options) = encoded(&ConfigStore::new());
        let document = br#"{"schema":"2.0"}"#;
        let result = decode(&ConfigStore::new(), document, &options);
        assert!(matches!(
            result,
            Err(PersistenceError::VersionMismatch { ref found, .. }) if found == "2.0"
        ));
    }

    #[test]
    fn test_missing_schema() {
        let (_, options) = encoded(&ConfigStore::new());
        let result = decode(&ConfigStore::new(), br#"{"version":"1"}"#, &options);
        assert!(matches!(result, Err(PersistenceError::Malformed(_))));
    }

    #[test]
    fn test_cut_document() {
        let (document, options) = encoded(&ConfigStore::new());
        let cut = &document[..document.len() / 2];
        let result = decode(&ConfigStore::new(), cut, &options);
        assert!(matches!(result, Err(PersistenceError::Truncated(_))));
    }

    #[test]
    fn test_missing_field() {
        let (_, options) = encoded(&ConfigStore::new());
        let document = br#"{"schema":"1.0","version":"1.0.0"}"#;
        let result = decode(&ConfigStore::new(), document, &options);
        assert!(matches!(result, Err(PersistenceError::Malformed(_))));
    }

    #[test]
    fn test_port_out_of_range() {
        let (document, options) = encoded(&ConfigStore::new());
        let text = String::from_utf8(document)
            .unwrap()
            .replace("\"port\": 1883", "\"port\": 70000");
        let result = decode(&ConfigStore::new(), text.as_bytes(), &options);
        assert!(matches!(result, Err(PersistenceError::Malformed(_))));
    }
}
