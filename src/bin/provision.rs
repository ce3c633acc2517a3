//! Configuration provisioning utility for host devices.
//!
//! Writes a complete configuration record so the device runner connects
//! straight away instead of opening the configuration portal.
//!
//! Usage:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" MQTT_ADDRESS="mqtt.local" \
//!     cargo run --bin provision -- heartbeat_topic=garden/pump
//!
//! Every `name=value` argument becomes an option of the stored configuration.
//! `cargo run --bin provision -- --clear` removes the stored configuration.
//!
//! Recognized environment variables: `WIFI_SSID`, `WIFI_PASSWORD`,
//! `DEVICE_NAME`, `NTP_SERVER`, `TIME_OFFSET`, `NTP_INTERVAL`,
//! `MQTT_ADDRESS`, `MQTT_PORT`, `MQTT_CLIENT_ID`, `MQTT_USER`,
//! `MQTT_PASSWORD` and `WIZARD_CONFIG_DIR`.

use esp_config_wizard::config::{ConfigError, ConfigStore, WifiCredentials};
use esp_config_wizard::persistence::{ConfigPersistence, FileStorage};
use log::info;
use std::env;
use std::str::FromStr;

/// Print error message and exit.
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Provisioning failed ===\n");
    std::process::exit(1);
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => halt_with_error(&format!("Error: {} is not a valid number: '{}'", name, raw)),
    }
}

fn credentials() -> WifiCredentials {
    let ssid = var("WIFI_SSID").unwrap_or_default();
    let password = var("WIFI_PASSWORD").unwrap_or_default();
    match WifiCredentials::new(ssid, password) {
        Ok(credentials) => credentials,
        Err(ConfigError::SsidEmpty) => halt_with_error(
            "Error: WIFI_SSID environment variable not set.\n\n\
             Usage:\n  \
             WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo run --bin provision",
        ),
        Err(e) => halt_with_error(&format!("Error: {}", e)),
    }
}

fn build_config(credentials: &WifiCredentials, options: &[(String, String)]) -> ConfigStore {
    let mut config = ConfigStore::new();
    config.set_version(env!("CARGO_PKG_VERSION"));
    config.set_wifi_ssid(credentials.ssid());
    config.set_wifi_password(credentials.password());

    if let Some(name) = var("DEVICE_NAME") {
        config.set_device_name(name);
    }
    if let Some(server) = var("NTP_SERVER") {
        config.set_ntp_server(server);
    }
    if let Some(offset) = parsed_var("TIME_OFFSET") {
        config.set_time_offset_secs(offset);
    }
    if let Some(minutes) = parsed_var::<u16>("NTP_INTERVAL") {
        if minutes == 0 {
            halt_with_error("Error: NTP_INTERVAL must be at least one minute");
        }
        config.set_ntp_update_interval_minutes(minutes);
    }
    if let Some(address) = var("MQTT_ADDRESS") {
        config.set_mqtt_address(&address);
    }
    if let Some(port) = parsed_var("MQTT_PORT") {
        config.set_mqtt_port(port);
    }
    if let Some(client_id) = var("MQTT_CLIENT_ID") {
        config.set_mqtt_client_id(client_id);
    }
    if let Some(user) = var("MQTT_USER") {
        config.set_mqtt_user(&user);
    }
    if let Some(password) = var("MQTT_PASSWORD") {
        config.set_mqtt_password(password);
    }

    for (name, value) in options {
        config.register_option(name, "", true);
        if let Err(e) = config.set_option_value(name, value) {
            halt_with_error(&format!("Error: {}", e));
        }
    }
    config
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("\n=== Configuration Provisioning Utility ===\n");

    let storage = match var("WIZARD_CONFIG_DIR") {
        Some(dir) => FileStorage::new(dir),
        None => FileStorage::at_default_location()
            .unwrap_or_else(|e| halt_with_error(&format!("Error: {}", e))),
    };
    println!("Directory: {}", storage.dir().display());
    let mut persistence = ConfigPersistence::new(Box::new(storage));

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--clear") {
        if let Err(e) = persistence.clear() {
            halt_with_error(&format!("Error clearing configuration: {}", e));
        }
        println!("\n=== Stored configuration removed ===\n");
        return;
    }

    let options: Vec<(String, String)> = args
        .iter()
        .map(|arg| match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => (name.to_string(), value.to_string()),
            _ => halt_with_error(&format!("Error: expected name=value, got '{}'", arg)),
        })
        .collect();

    let credentials = credentials();
    println!("SSID: {}", credentials.ssid());
    println!(
        "Password: {} ({} chars)",
        if credentials.is_open() {
            "(none)"
        } else {
            "****"
        },
        credentials.password().len()
    );

    let config = build_config(&credentials, &options);
    info!("Configuration to store:\n{}", config);

    match persistence.save(&config) {
        Ok(()) => {
            println!("\n=== Configuration saved ===");
            println!("\nThe device runner will connect with it on the next start.\n");
        }
        Err(e) => halt_with_error(&format!("Error saving configuration: {}", e)),
    }
}
