//! Durable configuration storage.
//!
//! [`ConfigPersistence`] encodes a [`ConfigStore`] into a small set of keyed
//! records and writes them through a [`Storage`] backend:
//!
//! - [`FileStorage`] - files in a directory (host builds)
//! - [`NvsStorage`] - ESP-IDF non-volatile storage (`esp32` feature)
//!
//! The current format is a JSON record plus an options side file. Devices
//! still carrying the older line-based record are migrated the first time
//! they are loaded.
//!
//! # Example
//!
//! ```no_run
//! use esp_config_wizard::config::ConfigStore;
//! use esp_config_wizard::persistence::{ConfigPersistence, FileStorage};
//!
//! let storage = FileStorage::at_default_location().unwrap();
//! let mut persistence = ConfigPersistence::new(Box::new(storage));
//!
//! let mut config = ConfigStore::new();
//! if persistence.load(&mut config).is_err() {
//!     config.set_device_name("Garden Pump");
//!     persistence.save(&config).unwrap();
//! }
//! ```

mod file;
mod legacy;
mod lines;
#[cfg(feature = "esp32")]
mod nvs;
mod record;

pub use file::{default_config_dir, FileStorage};
pub use legacy::LEGACY_FORMAT_VERSION;
pub use lines::MAX_LINE_LEN;
#[cfg(feature = "esp32")]
pub use nvs::NvsStorage;
pub use record::RECORD_SCHEMA_VERSION;

use crate::config::ConfigStore;
use log::{info, warn};
use std::fmt;
use std::io;

/// Key of the current configuration record.
pub const RECORD_KEY: &str = "config.json";

/// Key of the options side file.
pub const OPTIONS_KEY: &str = "options.dat";

/// Key of the legacy line-based record.
pub const LEGACY_KEY: &str = "config.dat";

/// Largest record accepted on load.
pub const MAX_RECORD_BYTES: usize = 8 * 1024;

/// Keyed byte storage.
///
/// `write` must replace the value atomically: after a failed write the
/// previous value is still readable.
pub trait Storage {
    /// Read the value stored under `key`, or `None` if absent.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Replace the value stored under `key`.
    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), PersistenceError>;

    /// Remove `key`. Removing an absent key succeeds.
    fn remove(&mut self, key: &str) -> Result<(), PersistenceError>;
}

/// Persistence errors.
#[derive(Debug)]
pub enum PersistenceError {
    /// No configuration record exists.
    NotFound,
    /// Filesystem error.
    Io(io::Error),
    /// Backend-specific storage failure.
    Storage(String),
    /// Record was written by an incompatible format version.
    VersionMismatch { found: String, expected: String },
    /// Record exceeds [`MAX_RECORD_BYTES`].
    TooLarge { len: usize, max: usize },
    /// Record ended before the named field.
    Truncated(String),
    /// Record content does not parse.
    Malformed(String),
    /// Configuration value cannot be encoded.
    InvalidValue(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no stored configuration"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Storage(msg) => write!(f, "storage error: {}", msg),
            Self::VersionMismatch { found, expected } => write!(
                f,
                "format version mismatch: found {}, expected {}",
                found, expected
            ),
            Self::TooLarge { len, max } => {
                write!(f, "record too large: {} bytes (max {})", len, max)
            }
            Self::Truncated(field) => write!(f, "record truncated at {}", field),
            Self::Malformed(msg) => write!(f, "malformed record: {}", msg),
            Self::InvalidValue(msg) => write!(f, "cannot store value: {}", msg),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PersistenceError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Saves and loads a [`ConfigStore`] through a [`Storage`] backend.
pub struct ConfigPersistence {
    storage: Box<dyn Storage>,
}

impl ConfigPersistence {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Write `config` in the current format.
    ///
    /// The options side file is written before the record it belongs to. If
    /// the record write then fails, the previous options are put back so the
    /// stored pair always comes from the same save.
    pub fn save(&mut self, config: &ConfigStore) -> Result<(), PersistenceError> {
        let options = record::encode_options(config)?;
        let document = record::encode(config)?;

        let previous_options = self.storage.read(OPTIONS_KEY)?;
        self.storage.write(OPTIONS_KEY, &options)?;
        if let Err(e) = self.storage.write(RECORD_KEY, &document) {
            self.restore_options(previous_options.as_deref());
            return Err(e);
        }

        info!(
            "Configuration saved ({} bytes, {} options)",
            document.len(),
            config.option_count()
        );
        Ok(())
    }

    /// Replace `config` with the stored configuration.
    ///
    /// `config` is left untouched on failure. Its access point name is kept,
    /// since that is not part of the stored record.
    pub fn load(&mut self, config: &mut ConfigStore) -> Result<(), PersistenceError> {
        let Some(document) = self.read_bounded(RECORD_KEY)? else {
            return self.migrate_legacy(config);
        };
        let options = self
            .read_bounded(OPTIONS_KEY)?
            .ok_or_else(|| PersistenceError::Truncated("options record".to_string()))?;

        let loaded = record::decode(config, &document, &options)?;
        *config = loaded;
        info!("Configuration loaded ({} options)", config.option_count());
        Ok(())
    }

    /// Remove every stored record.
    pub fn clear(&mut self) -> Result<(), PersistenceError> {
        self.storage.remove(RECORD_KEY)?;
        self.storage.remove(OPTIONS_KEY)?;
        self.storage.remove(LEGACY_KEY)?;
        warn!("Stored configuration cleared");
        Ok(())
    }

    /// Returns true if a record in either format exists.
    pub fn has_record(&self) -> bool {
        [RECORD_KEY, LEGACY_KEY]
            .iter()
            .any(|key| matches!(self.storage.read(key), Ok(Some(_))))
    }

    fn migrate_legacy(&mut self, config: &mut ConfigStore) -> Result<(), PersistenceError> {
        let data = self
            .read_bounded(LEGACY_KEY)?
            .ok_or(PersistenceError::NotFound)?;

        let loaded = legacy::decode(config, &data)?;
        *config = loaded;
        info!("Loaded legacy configuration, migrating to current format");

        match self.save(config) {
            Ok(()) => {
                if let Err(e) = self.storage.remove(LEGACY_KEY) {
                    warn!("Failed to remove legacy configuration: {}", e);
                }
            }
            Err(e) => warn!("Failed to rewrite legacy configuration: {}", e),
        }
        Ok(())
    }

    fn restore_options(&mut self, previous: Option<&[u8]>) {
        let restored = match previous {
            Some(data) => self.storage.write(OPTIONS_KEY, data),
            None => self.storage.remove(OPTIONS_KEY),
        };
        if let Err(e) = restored {
            warn!("Failed to restore previous options: {}", e);
        }
    }

    fn read_bounded(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let data = self.storage.read(key)?;
        match data {
            Some(bytes) if bytes.len() > MAX_RECORD_BYTES => Err(PersistenceError::TooLarge {
                len: bytes.len(),
                max: MAX_RECORD_BYTES,
            }),
            other => Ok(other),
        }
    }
}
