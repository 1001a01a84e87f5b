//! # Durable Snapshot Helpers
//!
//! Every analyzer snapshot goes through `atomic_write`: the bytes land in a
//! sibling `.tmp` file, are synced, and replace the target with a rename. A
//! crash mid-write leaves the previous snapshot intact.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Failures while reading or writing durable state.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to encode snapshot for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("Failed to decode snapshot {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

impl PersistError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Atomically replaces `path` with `data` using the write-rename pattern.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), PersistError> {
    let tmp_path = tmp_path_for(path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| PersistError::io(parent, e))?;
        }
    }

    let mut file = File::create(&tmp_path).map_err(|e| PersistError::io(&tmp_path, e))?;
    file.write_all(data).map_err(|e| PersistError::io(&tmp_path, e))?;
    file.sync_all().map_err(|e| PersistError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| PersistError::io(path, e))?;

    Ok(())
}

/// Encodes `value` with bincode and writes it atomically.
pub fn save_bincode<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let bytes = bincode::serialize(value).map_err(|source| PersistError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, &bytes)
}

/// Reads a bincode snapshot. A missing file is `Ok(None)`.
pub fn load_bincode<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistError::io(path, e)),
    };

    bincode::deserialize(&bytes)
        .map(Some)
        .map_err(|source| PersistError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
