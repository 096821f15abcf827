//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services.
//! Request handling never reads process-wide environment variables.

use crate::constants::{DEFAULT_READ_BUFFER_KB, DEFAULT_STORAGE_DIR};
use crate::{StorageError, StorageResult};
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    storage_root: PathBuf,
    read_buffer_size: usize,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// The storage root is created if missing and canonicalised, so every later path check can
    /// be purely lexical against an absolute, normalised root.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidConfig` if the root cannot be created, is not a
    /// directory, or `read_buffer_size` is zero.
    pub fn new(storage_root: &Path, read_buffer_size: usize) -> StorageResult<Self> {
        if read_buffer_size == 0 {
            return Err(StorageError::InvalidConfig(
                "read buffer size cannot be zero".into(),
            ));
        }

        std::fs::create_dir_all(storage_root).map_err(|e| {
            StorageError::InvalidConfig(format!(
                "cannot create storage root {}: {}",
                storage_root.display(),
                e
            ))
        })?;

        let storage_root = storage_root.canonicalize().map_err(|e| {
            StorageError::InvalidConfig(format!(
                "cannot canonicalize storage root {}: {}",
                storage_root.display(),
                e
            ))
        })?;

        if !storage_root.is_dir() {
            return Err(StorageError::InvalidConfig(format!(
                "storage root is not a directory: {}",
                storage_root.display()
            )));
        }

        Ok(Self {
            storage_root,
            read_buffer_size,
        })
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }
}

/// Resolve the storage root from an optional environment value.
pub fn storage_root_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR))
}

/// Parse a size given in units of `unit` bytes (e.g. 1024 for KiB).
///
/// `None` or an empty value yields `default * unit`.
///
/// # Errors
///
/// Returns `StorageError::InvalidConfig` for non-numeric, zero or overflowing values.
pub fn size_from_env_value(
    name: &str,
    value: Option<String>,
    default: usize,
    unit: usize,
) -> StorageResult<usize> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let count = match value {
        Some(v) => v.parse::<usize>().map_err(|e| {
            StorageError::InvalidConfig(format!("{} must be a positive integer: {}", name, e))
        })?,
        None => default,
    };

    if count == 0 {
        return Err(StorageError::InvalidConfig(format!(
            "{} cannot be zero",
            name
        )));
    }

    count
        .checked_mul(unit)
        .ok_or_else(|| StorageError::InvalidConfig(format!("{} is too large", name)))
}

/// Read-buffer size in bytes from `FM_READ_BUFFER_KB`-style input.
pub fn read_buffer_size_from_env_value(value: Option<String>) -> StorageResult<usize> {
    size_from_env_value("FM_READ_BUFFER_KB", value, DEFAULT_READ_BUFFER_KB, 1024)
}
