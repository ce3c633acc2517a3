//! ESP32 non-volatile storage backend.
//!
//! Every key becomes one NVS blob in the `wizard` namespace. NVS commits a
//! blob atomically, and each write is read back to catch flash failures
//! that do not surface as error codes.
//!
//! # Security
//!
//! NVS is not encrypted unless flash encryption is enabled in the
//! ESP-IDF configuration. Wireless and broker passwords are stored as
//! plain bytes otherwise.

use super::{PersistenceError, Storage, MAX_RECORD_BYTES};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_sys::EspError;
use log::debug;

/// NVS namespace holding the configuration blobs.
const NVS_NAMESPACE: &str = "wizard";

/// [`Storage`] on the default NVS partition.
pub struct NvsStorage {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStorage {
    /// Open the configuration namespace on `partition`.
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self, EspError> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }

    /// Open the configuration namespace on the shared default partition.
    pub fn open_default() -> Result<Self, EspError> {
        Self::new(crate::platform::nvs_default_partition()?)
    }
}

fn nvs_error(op: &str, key: &str, e: EspError) -> PersistenceError {
    PersistenceError::Storage(format!("NVS {} of {} failed: {:?}", op, key, e))
}

impl Storage for NvsStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let len = match self.nvs.blob_len(key).map_err(|e| nvs_error("read", key, e))? {
            Some(len) => len,
            None => {
                debug!("No blob {} in NVS", key);
                return Ok(None);
            }
        };
        if len > MAX_RECORD_BYTES {
            return Err(PersistenceError::TooLarge {
                len,
                max: MAX_RECORD_BYTES,
            });
        }

        let mut buf = vec![0u8; len];
        let bytes = self
            .nvs
            .get_raw(key, &mut buf)
            .map_err(|e| nvs_error("read", key, e))?;
        Ok(bytes.map(<[u8]>::to_vec))
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), PersistenceError> {
        self.nvs
            .set_raw(key, data)
            .map_err(|e| nvs_error("write", key, e))?;

        // Read back and verify to catch silent flash write failures
        match self.read(key)? {
            Some(read_back) if read_back == data => {
                debug!("Wrote {} bytes to NVS blob {}", data.len(), key);
                Ok(())
            }
            Some(_) => Err(PersistenceError::Storage(format!(
                "NVS verification of {} failed: data mismatch after save",
                key
            ))),
            None => Err(PersistenceError::Storage(format!(
                "NVS blob {} not found after save",
                key
            ))),
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.nvs
            .remove(key)
            .map_err(|e| nvs_error("remove", key, e))?;
        Ok(())
    }
}
