use std::path::PathBuf;

/// Reasons a caller-supplied path is refused by the [`crate::PathResolver`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty or denotes the storage root")]
    Empty,
    #[error("path escapes the storage root: {0}")]
    Traversal(String),
    #[error("path contains invalid character {character:?}: {path}")]
    InvalidCharacter { path: String, character: char },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("end of file")]
    Eof,
    #[error("error while reading {src}: {source}")]
    Read {
        src: String,
        #[source]
        source: std::io::Error,
    },
    #[error("error while writing into {src}: {source}")]
    Write {
        src: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("destination directory does not exist: {}", .0.display())]
    MissingParent(PathBuf),
    #[error("stream ended before the first chunk was received")]
    EmptyStream,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    /// Classifies an I/O failure on `path`, turning `NotFound` into [`StorageError::NotFound`].
    pub(crate) fn io(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_path_buf())
        } else {
            StorageError::Io {
                op,
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// True for a rename that failed because source and destination are on different filesystems.
    pub fn is_cross_device(&self) -> bool {
        matches!(
            self,
            StorageError::Io { source, .. } if source.kind() == std::io::ErrorKind::CrossesDevices
        )
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
