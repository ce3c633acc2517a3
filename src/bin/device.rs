//! Device runner.
//!
//! Connects with the stored configuration, or opens the configuration
//! access point and portal when none is stored, then keeps the connection
//! alive and publishes a heartbeat once a minute.
//!
//! # Usage
//!
//! ```bash
//! # Host (configuration under ~/.esp-config-wizard, portal on port 8080)
//! WIZARD_PORTAL_PORT=8080 cargo run --bin device
//!
//! # ESP32
//! cargo run --bin device --features esp32 --target xtensa-esp32-espidf
//! ```
//!
//! On the host, `WIZARD_CONFIG_DIR` overrides the configuration directory.

use esp_config_wizard::config::ConfigStore;
use esp_config_wizard::orchestrator::{ConnectionOrchestrator, OrchestratorSettings, Platform};
use esp_config_wizard::Status;
use log::{error, info, warn};
use std::time::{Duration, Instant};

/// Option holding the heartbeat topic.
const HEARTBEAT_TOPIC_OPTION: &str = "heartbeat_topic";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const LOOP_DELAY: Duration = Duration::from_millis(10);

fn device_config() -> ConfigStore {
    let mut config = ConfigStore::new();
    config.set_version(env!("CARGO_PKG_VERSION"));
    config.register_option(HEARTBEAT_TOPIC_OPTION, "wizard/heartbeat", false);
    config.register_option("location", "", true);
    config
}

fn portal_port() -> u16 {
    match std::env::var("WIZARD_PORTAL_PORT") {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid WIZARD_PORTAL_PORT '{}'", raw);
            OrchestratorSettings::default().portal_port
        }),
        Err(_) => OrchestratorSettings::default().portal_port,
    }
}

#[cfg(not(feature = "esp32"))]
fn platform() -> Platform {
    use esp_config_wizard::network::HostNetwork;
    use esp_config_wizard::persistence::FileStorage;
    use esp_config_wizard::platform::{HostDevice, SystemClock};
    use esp_config_wizard::{HttpPortal, MqttBroker, SntpClient};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let storage = match std::env::var("WIZARD_CONFIG_DIR") {
        Ok(dir) => FileStorage::new(dir),
        Err(_) => FileStorage::at_default_location().expect("home directory not found"),
    };
    info!("Configuration directory: {}", storage.dir().display());

    Platform {
        network: Box::new(HostNetwork::new()),
        clock: Box::new(SystemClock::new()),
        time_sync: Box::new(SntpClient::new()),
        broker: Box::new(MqttBroker::new()),
        portal: Box::new(HttpPortal::new()),
        storage: Box::new(storage),
        device: Box::new(HostDevice),
    }
}

#[cfg(feature = "esp32")]
fn platform() -> Platform {
    use esp_config_wizard::network::EspWifiNetwork;
    use esp_config_wizard::persistence::NvsStorage;
    use esp_config_wizard::platform::{nvs_default_partition, EspDevice, SystemClock};
    use esp_config_wizard::{HttpPortal, MqttBroker, SntpClient};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;

    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let peripherals = Peripherals::take().expect("peripherals already taken");
    let sysloop = EspSystemEventLoop::take().expect("system event loop unavailable");
    let partition = nvs_default_partition().expect("NVS partition unavailable");

    let network = EspWifiNetwork::new(peripherals.modem, sysloop, Some(partition.clone()))
        .expect("WiFi driver failed to start");
    let storage = NvsStorage::new(partition).expect("NVS namespace unavailable");

    Platform {
        network: Box::new(network),
        clock: Box::new(SystemClock::new()),
        time_sync: Box::new(SntpClient::new()),
        broker: Box::new(MqttBroker::new()),
        portal: Box::new(HttpPortal::new()),
        storage: Box::new(storage),
        device: Box::new(EspDevice),
    }
}

fn main() {
    let platform = platform();
    info!("=== esp-config-wizard device {} starting ===", env!("CARGO_PKG_VERSION"));

    let settings = OrchestratorSettings {
        portal_port: portal_port(),
        ..OrchestratorSettings::default()
    };
    let mut orchestrator = ConnectionOrchestrator::with_settings(device_config(), platform, settings);
    orchestrator.set_status_observer(|status: Status| {
        info!("Status: {} ({})", status, status.code());
    });
    orchestrator.set_option_validator(|name: &str, value: &str| -> Result<(), String> {
        if name == HEARTBEAT_TOPIC_OPTION && (value.contains('#') || value.contains('+')) {
            return Err("wildcards are not allowed in a publish topic".to_string());
        }
        Ok(())
    });

    match orchestrator.connect() {
        Ok(status) => info!("Connect finished: {}", status),
        Err(e) => error!("Connect failed: {} (retrying in the main loop)", e),
    }

    let mut last_heartbeat: Option<Instant> = None;
    loop {
        orchestrator.tick();

        let due = last_heartbeat.map_or(true, |at| at.elapsed() >= HEARTBEAT_INTERVAL);
        if orchestrator.available() && due {
            let topic = orchestrator
                .config()
                .option(HEARTBEAT_TOPIC_OPTION)
                .map(|option| option.value().to_string())
                .unwrap_or_default();
            let payload = match orchestrator.epoch_time() {
                Some(epoch) => epoch.to_string(),
                None => String::from("0"),
            };
            if let Err(e) = orchestrator
                .broker_mut()
                .publish(&topic, payload.as_bytes(), false)
            {
                warn!("Heartbeat publish failed: {}", e);
            }
            last_heartbeat = Some(Instant::now());
        }

        std::thread::sleep(LOOP_DELAY);
    }
}
