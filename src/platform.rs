//! Clock and device control.
//!
//! The orchestrator measures timeouts and sleeps through [`ClockSource`] and
//! restarts the device through [`DeviceControl`], so both can be replaced by
//! fakes in tests.

use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait ClockSource {
    /// Milliseconds since an arbitrary fixed point.
    fn millis(&self) -> u64;

    /// Block the caller for `duration`.
    fn delay(&mut self, duration: Duration);
}

/// Wall-clock implementation on `std::time`.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Device lifecycle control.
pub trait DeviceControl {
    /// Restart the device. Implementations normally do not return.
    fn restart(&mut self);
}

/// Host stand-in for a device restart: exits the process so a supervisor
/// can start it again.
#[derive(Debug, Default)]
pub struct HostDevice;

impl DeviceControl for HostDevice {
    fn restart(&mut self) {
        log::warn!("Restart requested, exiting");
        std::process::exit(0);
    }
}

/// ESP32 device restart.
#[cfg(feature = "esp32")]
#[derive(Debug, Default)]
pub struct EspDevice;

#[cfg(feature = "esp32")]
impl DeviceControl for EspDevice {
    fn restart(&mut self) {
        log::warn!("Restarting device");
        esp_idf_svc::hal::reset::restart();
    }
}

#[cfg(feature = "esp32")]
static NVS_PARTITION: std::sync::Mutex<Option<esp_idf_svc::nvs::EspDefaultNvsPartition>> =
    std::sync::Mutex::new(None);

/// Shared handle to the default NVS partition.
///
/// `EspDefaultNvsPartition::take()` succeeds only once per boot, so the
/// first handle is kept and cloned for every later caller.
#[cfg(feature = "esp32")]
pub fn nvs_default_partition(
) -> Result<esp_idf_svc::nvs::EspDefaultNvsPartition, esp_idf_sys::EspError> {
    let mut slot = NVS_PARTITION
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(partition) = slot.as_ref() {
        return Ok(partition.clone());
    }
    let partition = esp_idf_svc::nvs::EspDefaultNvsPartition::take()?;
    *slot = Some(partition.clone());
    Ok(partition)
}
