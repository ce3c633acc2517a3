//! File-backed storage for host (development) builds.
//!
//! Each key is a file in one directory, `~/.esp-config-wizard/` by default.
//! Writes go to a temporary file that is verified and then renamed over the
//! target, so a failed write never clobbers the previous value.

use super::{PersistenceError, Storage};
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default configuration directory.
///
/// Returns `~/.esp-config-wizard`
pub fn default_config_dir() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".esp-config-wizard"))
}

/// [`Storage`] keeping one file per key.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Store files under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store files under [`default_config_dir`].
    pub fn at_default_location() -> io::Result<Self> {
        Ok(Self::new(default_config_dir()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let path = self.path(key);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No file at {:?}", path);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path(key);
        let tmp = self.dir.join(format!("{}.tmp", key));
        fs::write(&tmp, data)?;

        // Verify write by reading back
        let read_back = fs::read(&tmp)?;
        if read_back != data {
            let _ = fs::remove_file(&tmp);
            return Err(PersistenceError::Storage(format!(
                "verification of {:?} failed: wrote {} bytes, read {} bytes",
                path,
                data.len(),
                read_back.len()
            )));
        }

        fs::rename(&tmp, &path)?;
        debug!("Wrote {} bytes to {:?}", data.len(), path);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
