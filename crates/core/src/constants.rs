//! Constants used throughout the core crate.

/// Default storage root when no explicit directory is configured.
pub const DEFAULT_STORAGE_DIR: &str = "storage";

/// Default read-buffer size for downloads, in KiB.
pub const DEFAULT_READ_BUFFER_KB: usize = 32;

/// Characters refused in the final segment of a storage path.
#[cfg(not(windows))]
pub const INVALID_NAME_CHARS: &[char] = &['*', '?', '"', '<', '>', '|', '\0'];

/// Characters refused in the final segment of a storage path.
#[cfg(windows)]
pub const INVALID_NAME_CHARS: &[char] = &['*', '?', '"', '<', '>', '|', '\0', ':'];
