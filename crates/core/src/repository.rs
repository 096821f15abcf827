//! Filesystem access beneath the storage root.
//!
//! [`FileRepository`] owns the whole lifecycle of file handles: every user-supplied path goes
//! through the [`PathResolver`] first, two-path operations validate both sides before touching
//! the disk, and I/O failures are classified into [`StorageError`] variants the protocol layers
//! can map without inspecting `std::io::Error` themselves.

use crate::paths::{PathResolver, StoragePath};
use crate::scope::RequestScope;
use crate::{CoreConfig, StorageError, StorageResult};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
}

/// An open file, exclusively owned by the operation that opened it.
///
/// Dropping the handle closes the file; [`FileHandle::close`] additionally surfaces any
/// pending write failure and is used on success paths.
#[derive(Debug)]
pub struct FileHandle {
    file: File,
    path: StoragePath,
}

impl FileHandle {
    pub fn path(&self) -> &StoragePath {
        &self.path
    }

    /// Current size of the file in bytes.
    pub async fn stat(&self) -> StorageResult<u64> {
        let metadata = self.file.metadata().await.map_err(|e| StorageError::Io {
            op: "stat",
            path: self.path.absolute().to_path_buf(),
            source: e,
        })?;
        Ok(metadata.len())
    }

    pub async fn close(mut self) -> StorageResult<()> {
        self.file.flush().await.map_err(|e| StorageError::Write {
            src: self.path.to_string(),
            source: e,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileRepository {
    resolver: PathResolver,
    read_buffer_size: usize,
}

impl FileRepository {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            resolver: PathResolver::new(config.storage_root()),
            read_buffer_size: config.read_buffer_size(),
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Maximum number of bytes a single [`Self::read_at`] returns during downloads.
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn resolve(&self, raw: &str) -> StorageResult<StoragePath> {
        Ok(self.resolver.resolve(raw)?)
    }

    /// Opens an existing regular file for reading.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidPath` if `raw` does not resolve beneath the root
    /// - `StorageError::NotFound` if the file does not exist
    /// - `StorageError::Io` if the path is a directory or cannot be opened
    pub async fn open_for_read(&self, scope: &RequestScope, raw: &str) -> StorageResult<FileHandle> {
        let path = self.resolve(raw)?;

        let file = File::open(path.absolute())
            .await
            .map_err(|e| StorageError::io("open", path.absolute(), e))?;

        let metadata = file
            .metadata()
            .await
            .map_err(|e| StorageError::io("stat", path.absolute(), e))?;
        if metadata.is_dir() {
            return Err(StorageError::Io {
                op: "open",
                path: path.absolute().to_path_buf(),
                source: std::io::Error::other("is a directory"),
            });
        }

        tracing::info!(parent: scope.span(), path = %path, "file opened for read");
        Ok(FileHandle { file, path })
    }

    /// Opens a file for read-write without truncating it.
    ///
    /// With `create_if_missing` the file and any missing parent directories are created;
    /// otherwise a missing file is reported as `StorageError::NotFound`.
    pub async fn open_for_write(
        &self,
        scope: &RequestScope,
        raw: &str,
        create_if_missing: bool,
    ) -> StorageResult<FileHandle> {
        let path = self.resolve(raw)?;

        if create_if_missing {
            if let Some(parent) = path.absolute().parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::io("create directory", parent, e))?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_if_missing)
            .open(path.absolute())
            .await
            .map_err(|e| StorageError::io("open", path.absolute(), e))?;

        tracing::info!(parent: scope.span(), path = %path, "file opened for write");
        Ok(FileHandle { file, path })
    }

    /// Writes `data` at `position`, returning the number of bytes written.
    pub async fn append_at(
        &self,
        scope: &RequestScope,
        handle: &mut FileHandle,
        data: &[u8],
        position: u64,
    ) -> StorageResult<usize> {
        handle
            .file
            .seek(SeekFrom::Start(position))
            .await
            .map_err(|e| StorageError::Write {
                src: handle_name(&handle.path),
                source: e,
            })?;
        handle.file.write_all(data).await.map_err(|e| {
            tracing::error!(parent: scope.span(), position, error = %e, "error writing to file");
            StorageError::Write {
                src: handle_name(&handle.path),
                source: e,
            }
        })?;

        tracing::debug!(parent: scope.span(), position, bytes = data.len(), "wrote chunk");
        Ok(data.len())
    }

    /// Reads up to `max_len` bytes starting at `position`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Eof` when nothing more can be read, `StorageError::Read` for
    /// any other failure.
    pub async fn read_at(
        &self,
        scope: &RequestScope,
        handle: &mut FileHandle,
        position: u64,
        max_len: usize,
    ) -> StorageResult<Vec<u8>> {
        handle
            .file
            .seek(SeekFrom::Start(position))
            .await
            .map_err(|e| StorageError::Read {
                src: handle_name(&handle.path),
                source: e,
            })?;

        let mut buf = vec![0u8; max_len];
        let n = handle.file.read(&mut buf).await.map_err(|e| {
            tracing::error!(parent: scope.span(), position, error = %e, "error reading file");
            StorageError::Read {
                src: handle_name(&handle.path),
                source: e,
            }
        })?;

        if n == 0 {
            return Err(StorageError::Eof);
        }

        buf.truncate(n);
        tracing::debug!(parent: scope.span(), position, bytes = n, "read chunk");
        Ok(buf)
    }

    /// Cuts the file down to `len` bytes.
    pub async fn truncate(
        &self,
        scope: &RequestScope,
        handle: &mut FileHandle,
        len: u64,
    ) -> StorageResult<()> {
        handle.file.set_len(len).await.map_err(|e| StorageError::Write {
            src: handle_name(&handle.path),
            source: e,
        })?;
        tracing::debug!(parent: scope.span(), len, "file truncated");
        Ok(())
    }

    /// Removes a file.
    pub async fn delete(&self, scope: &RequestScope, raw: &str) -> StorageResult<()> {
        let path = self.resolve(raw)?;

        fs::remove_file(path.absolute()).await.map_err(|e| {
            tracing::error!(parent: scope.span(), path = %path, error = %e, "error deleting file");
            StorageError::io("delete", path.absolute(), e)
        })?;

        tracing::info!(parent: scope.span(), path = %path, "file deleted");
        Ok(())
    }

    /// Renames `src` to `dst`.
    ///
    /// The destination's parent directory must already exist; moves never create directories.
    pub async fn move_file(&self, scope: &RequestScope, src: &str, dst: &str) -> StorageResult<()> {
        let (src, dst) = self.resolve_pair(src, dst).await?;

        fs::rename(src.absolute(), dst.absolute())
            .await
            .map_err(|e| StorageError::io("rename", src.absolute(), e))?;

        tracing::info!(parent: scope.span(), src = %src, dst = %dst, "file renamed");
        Ok(())
    }

    /// Copies the bytes of `src` into `dst`, replacing any existing destination.
    ///
    /// Same parent-directory rule as [`Self::move_file`].
    pub async fn copy_file(&self, scope: &RequestScope, src: &str, dst: &str) -> StorageResult<u64> {
        let (src, dst) = self.resolve_pair(src, dst).await?;

        let copied = fs::copy(src.absolute(), dst.absolute())
            .await
            .map_err(|e| StorageError::io("copy", src.absolute(), e))?;

        tracing::info!(parent: scope.span(), src = %src, dst = %dst, bytes = copied, "file copied");
        Ok(copied)
    }

    /// Lists the immediate children of a directory. The storage root itself may be listed.
    pub async fn list_directory(
        &self,
        scope: &RequestScope,
        raw: &str,
    ) -> StorageResult<Vec<DirectoryEntry>> {
        let path = self.resolver.resolve_directory(raw)?;

        let mut dir = fs::read_dir(path.absolute())
            .await
            .map_err(|e| StorageError::io("list", path.absolute(), e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::io("list", path.absolute(), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::io("stat", &entry.path(), e))?;
            entries.push(DirectoryEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_directory: file_type.is_dir(),
            });
        }

        tracing::info!(parent: scope.span(), path = %path, count = entries.len(), "directory listed");
        Ok(entries)
    }

    /// Resolves both sides of a two-path operation, then checks the source is an existing
    /// file and the destination's parent is an existing directory.
    async fn resolve_pair(&self, src: &str, dst: &str) -> StorageResult<(StoragePath, StoragePath)> {
        let src = self.resolve(src)?;
        let dst = self.resolve(dst)?;

        let metadata = fs::metadata(src.absolute())
            .await
            .map_err(|e| StorageError::io("stat", src.absolute(), e))?;
        if !metadata.is_file() {
            return Err(StorageError::Io {
                op: "move",
                path: src.absolute().to_path_buf(),
                source: std::io::Error::other("source is not a regular file"),
            });
        }

        let parent = dst.absolute().parent().unwrap_or(self.resolver.root());
        if !is_dir(parent).await {
            return Err(StorageError::MissingParent(parent.to_path_buf()));
        }

        Ok((src, dst))
    }
}

fn handle_name(path: &StoragePath) -> String {
    format!("file {}", path)
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}
