//! Chunked transfer orchestration.
//!
//! [`TransferService`] turns a sequence of small messages into positioned file reads and
//! writes. It never sees a socket: the inbound side of a client-stream call is a
//! [`ChunkSource`], the outbound side of a server-stream call is a [`ChunkSink`], and every
//! byte goes through the [`FileRepository`].
//!
//! Upload, append and overwrite share one shape: the first chunk names the file and carries
//! its first bytes, later chunks are written at a cursor that advances by the bytes each chunk
//! contributes. Download and read share the other: open, read buffer-sized pieces until
//! end-of-file, close.

use crate::repository::{DirectoryEntry, FileHandle, FileRepository};
use crate::scope::RequestScope;
use crate::{StorageError, StorageResult};
use async_trait::async_trait;

/// The unit exchanged during a streaming transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Inbound half of a client-stream call.
#[async_trait]
pub trait ChunkSource: Send {
    /// Returns the next chunk, or `None` once the peer has finished sending.
    async fn receive_chunk(&mut self) -> StorageResult<Option<Chunk>>;
}

/// Outbound half of a server-stream call.
#[async_trait]
pub trait ChunkSink: Send {
    async fn send_chunk(&mut self, chunk: Chunk) -> StorageResult<()>;
}

/// How a client-stream call positions and finishes its writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Start at offset 0 and cut the file to the uploaded length.
    Create,
    /// Start at the current end of file; never truncate.
    Append,
    /// Start at offset 0 and cut the file to the new length, dropping stale trailing bytes.
    Overwrite,
}

impl WriteMode {
    fn truncates(self) -> bool {
        !matches!(self, WriteMode::Append)
    }

    fn name(self) -> &'static str {
        match self {
            WriteMode::Create => "upload",
            WriteMode::Append => "append",
            WriteMode::Overwrite => "overwrite",
        }
    }
}

/// Deletes the source half of a copy-based move.
#[async_trait]
pub(crate) trait RemoveSource: Send + Sync {
    async fn remove_source(&self, scope: &RequestScope, raw: &str) -> StorageResult<()>;
}

#[async_trait]
impl RemoveSource for FileRepository {
    async fn remove_source(&self, scope: &RequestScope, raw: &str) -> StorageResult<()> {
        self.delete(scope, raw).await
    }
}

/// Pure transfer operations - no transport concerns.
#[derive(Debug, Clone)]
pub struct TransferService {
    repo: FileRepository,
}

impl TransferService {
    pub fn new(repo: FileRepository) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &FileRepository {
        &self.repo
    }

    /// Stores the streamed file, creating it (and its parent directories) if needed.
    ///
    /// Returns the number of bytes received.
    pub async fn upload(
        &self,
        scope: &RequestScope,
        source: &mut dyn ChunkSource,
    ) -> StorageResult<u64> {
        self.receive_file(scope, source, WriteMode::Create).await
    }

    /// Adds the streamed bytes after the current end of the file.
    pub async fn append(
        &self,
        scope: &RequestScope,
        source: &mut dyn ChunkSource,
    ) -> StorageResult<u64> {
        self.receive_file(scope, source, WriteMode::Append).await
    }

    /// Replaces the file content with the streamed bytes.
    pub async fn overwrite(
        &self,
        scope: &RequestScope,
        source: &mut dyn ChunkSource,
    ) -> StorageResult<u64> {
        self.receive_file(scope, source, WriteMode::Overwrite).await
    }

    /// Streams an existing file to `sink`. Returns the number of bytes sent.
    pub async fn download(
        &self,
        scope: &RequestScope,
        file_name: &str,
        sink: &mut dyn ChunkSink,
    ) -> StorageResult<u64> {
        self.send_file(scope, file_name, sink).await
    }

    /// Same exchange as [`Self::download`]; the two differ only in how the gateway presents them.
    pub async fn read(
        &self,
        scope: &RequestScope,
        file_name: &str,
        sink: &mut dyn ChunkSink,
    ) -> StorageResult<u64> {
        self.send_file(scope, file_name, sink).await
    }

    pub async fn delete(&self, scope: &RequestScope, file_name: &str) -> StorageResult<()> {
        tracing::info!(parent: scope.span(), file_name, "delete is in process");
        self.repo.delete(scope, file_name).await
    }

    /// Moves `src` to `dst`.
    ///
    /// A same-filesystem rename is attempted first. Only when the rename crosses filesystems
    /// does this fall back to copy-then-delete, which is not atomic: a crash between the copy
    /// and the delete leaves both files in place.
    pub async fn move_file(&self, scope: &RequestScope, src: &str, dst: &str) -> StorageResult<()> {
        tracing::info!(parent: scope.span(), src, dst, "move is in process");

        match self.repo.move_file(scope, src, dst).await {
            Err(e) if e.is_cross_device() => {
                tracing::warn!(parent: scope.span(), src, dst, "rename crosses filesystems, copying");
                self.copy_then_delete(scope, src, dst).await
            }
            other => other,
        }
    }

    pub async fn list_directory(
        &self,
        scope: &RequestScope,
        path: &str,
    ) -> StorageResult<Vec<DirectoryEntry>> {
        tracing::info!(parent: scope.span(), path, "list directory is in process");
        self.repo.list_directory(scope, path).await
    }

    /// Copies `src` to `dst`, then deletes `src`.
    ///
    /// If the delete fails the fresh copy is removed again. The rollback's own failure is only
    /// logged; the caller sees the original delete error.
    pub(crate) async fn copy_then_delete(
        &self,
        scope: &RequestScope,
        src: &str,
        dst: &str,
    ) -> StorageResult<()> {
        self.copy_then_remove(scope, src, dst, &self.repo).await
    }

    async fn copy_then_remove(
        &self,
        scope: &RequestScope,
        src: &str,
        dst: &str,
        source_remover: &dyn RemoveSource,
    ) -> StorageResult<()> {
        self.repo.copy_file(scope, src, dst).await?;

        if let Err(e) = source_remover.remove_source(scope, src).await {
            tracing::error!(parent: scope.span(), src, error = %e, "error deleting source while moving");
            if let Err(rollback) = self.repo.delete(scope, dst).await {
                tracing::warn!(parent: scope.span(), dst, error = %rollback, "rollback of copied file failed");
            }
            return Err(e);
        }

        Ok(())
    }

    async fn receive_file(
        &self,
        scope: &RequestScope,
        source: &mut dyn ChunkSource,
        mode: WriteMode,
    ) -> StorageResult<u64> {
        tracing::info!(parent: scope.span(), mode = mode.name(), "transfer is in process");

        let first = source
            .receive_chunk()
            .await?
            .ok_or(StorageError::EmptyStream)?;

        let mut handle = self
            .repo
            .open_for_write(scope, &first.file_name, true)
            .await?;

        let start = match mode {
            WriteMode::Append => handle.stat().await?,
            WriteMode::Create | WriteMode::Overwrite => 0,
        };

        // The handle is closed on every exit path; a write error wins over a close error.
        let written = self
            .write_chunks(scope, source, &mut handle, &first.content, start, mode)
            .await;
        let closed = handle.close().await;
        let cursor = written?;
        closed?;

        let received = cursor - start;
        tracing::info!(
            parent: scope.span(),
            file_name = %first.file_name,
            bytes = received,
            "transfer complete"
        );
        Ok(received)
    }

    async fn write_chunks(
        &self,
        scope: &RequestScope,
        source: &mut dyn ChunkSource,
        handle: &mut FileHandle,
        first: &[u8],
        start: u64,
        mode: WriteMode,
    ) -> StorageResult<u64> {
        let mut cursor = start;
        cursor += self.repo.append_at(scope, handle, first, cursor).await? as u64;

        while let Some(chunk) = source.receive_chunk().await? {
            cursor += self
                .repo
                .append_at(scope, handle, &chunk.content, cursor)
                .await? as u64;
        }

        if mode.truncates() {
            self.repo.truncate(scope, handle, cursor).await?;
        }
        Ok(cursor)
    }

    async fn send_file(
        &self,
        scope: &RequestScope,
        file_name: &str,
        sink: &mut dyn ChunkSink,
    ) -> StorageResult<u64> {
        tracing::info!(parent: scope.span(), file_name, "download is in process");

        let mut handle = self.repo.open_for_read(scope, file_name).await?;
        let buffer_size = self.repo.read_buffer_size();

        let mut cursor = 0u64;
        loop {
            let content = match self
                .repo
                .read_at(scope, &mut handle, cursor, buffer_size)
                .await
            {
                Ok(content) => content,
                Err(StorageError::Eof) => break,
                Err(e) => return Err(e),
            };

            cursor += content.len() as u64;
            sink.send_chunk(Chunk {
                file_name: file_name.to_string(),
                content,
            })
            .await?;
        }

        handle.close().await?;
        tracing::info!(parent: scope.span(), file_name, bytes = cursor, "download complete");
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreConfig;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Replays a fixed list of chunks, then reports end of stream.
    struct ReplaySource {
        chunks: VecDeque<Chunk>,
    }

    impl ReplaySource {
        fn new(file_name: &str, parts: &[&[u8]]) -> Self {
            Self {
                chunks: parts
                    .iter()
                    .map(|p| Chunk {
                        file_name: file_name.to_string(),
                        content: p.to_vec(),
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ChunkSource for ReplaySource {
        async fn receive_chunk(&mut self) -> StorageResult<Option<Chunk>> {
            Ok(self.chunks.pop_front())
        }
    }

    /// Fails after yielding its chunks, like a peer that disconnects mid-stream.
    struct BrokenSource {
        inner: ReplaySource,
    }

    #[async_trait]
    impl ChunkSource for BrokenSource {
        async fn receive_chunk(&mut self) -> StorageResult<Option<Chunk>> {
            match self.inner.chunks.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None => Err(StorageError::Transport("connection reset".into())),
            }
        }
    }

    #[derive(Default)]
    struct CollectSink {
        chunks: Vec<Chunk>,
        fail_after: Option<usize>,
    }

    impl CollectSink {
        fn bytes(&self) -> Vec<u8> {
            self.chunks.iter().flat_map(|c| c.content.clone()).collect()
        }
    }

    #[async_trait]
    impl ChunkSink for CollectSink {
        async fn send_chunk(&mut self, chunk: Chunk) -> StorageResult<()> {
            if self.fail_after == Some(self.chunks.len()) {
                return Err(StorageError::Transport("receiver dropped".into()));
            }
            self.chunks.push(chunk);
            Ok(())
        }
    }

    fn setup(read_buffer_size: usize) -> (TempDir, TransferService, RequestScope, PathBuf) {
        let temp = TempDir::new().unwrap();
        let cfg = CoreConfig::new(temp.path(), read_buffer_size).unwrap();
        let root = cfg.storage_root().to_path_buf();
        let service = TransferService::new(FileRepository::new(&cfg));
        (temp, service, RequestScope::new("test"), root)
    }

    fn read(root: &Path, name: &str) -> Vec<u8> {
        std::fs::read(root.join(name)).unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let (_temp, service, scope, _root) = setup(1024);

        let mut source = ReplaySource::new("hello.txt", &[b"hello world"]);
        assert_eq!(service.upload(&scope, &mut source).await.unwrap(), 11);

        let mut sink = CollectSink::default();
        assert_eq!(service.download(&scope, "hello.txt", &mut sink).await.unwrap(), 11);
        assert_eq!(sink.bytes(), b"hello world");
        assert!(sink.chunks.iter().all(|c| c.file_name == "hello.txt"));
    }

    #[tokio::test]
    async fn test_upload_multiple_chunks_uses_first_name() {
        let (_temp, service, scope, root) = setup(1024);

        let mut source = ReplaySource::new("docs/report.txt", &[b"one ", b"two ", b"three"]);
        source.chunks[1].file_name = "ignored.txt".into();
        service.upload(&scope, &mut source).await.unwrap();

        assert_eq!(read(&root, "docs/report.txt"), b"one two three");
        assert!(!root.join("ignored.txt").exists());
    }

    #[tokio::test]
    async fn test_upload_replaces_longer_file() {
        let (_temp, service, scope, root) = setup(1024);
        std::fs::write(root.join("f.txt"), b"a much longer previous body").unwrap();

        service
            .upload(&scope, &mut ReplaySource::new("f.txt", &[b"short"]))
            .await
            .unwrap();

        assert_eq!(read(&root, "f.txt"), b"short");
    }

    #[tokio::test]
    async fn test_upload_empty_chunk_creates_empty_file() {
        let (_temp, service, scope, root) = setup(1024);

        let received = service
            .upload(&scope, &mut ReplaySource::new("empty.bin", &[b""]))
            .await
            .unwrap();

        assert_eq!(received, 0);
        assert!(read(&root, "empty.bin").is_empty());
    }

    #[tokio::test]
    async fn test_append_starts_at_end_of_file() {
        let (_temp, service, scope, root) = setup(1024);

        service
            .upload(&scope, &mut ReplaySource::new("hello.txt", &[b"hello "]))
            .await
            .unwrap();
        let appended = service
            .append(&scope, &mut ReplaySource::new("hello.txt", &[b"wor", b"ld"]))
            .await
            .unwrap();

        assert_eq!(appended, 5);
        assert_eq!(read(&root, "hello.txt"), b"hello world");
    }

    #[tokio::test]
    async fn test_append_creates_missing_file() {
        let (_temp, service, scope, root) = setup(1024);

        service
            .append(&scope, &mut ReplaySource::new("new/log.txt", &[b"first"]))
            .await
            .unwrap();

        assert_eq!(read(&root, "new/log.txt"), b"first");
    }

    #[tokio::test]
    async fn test_overwrite_drops_stale_trailing_bytes() {
        let (_temp, service, scope, root) = setup(1024);
        std::fs::write(root.join("o.txt"), b"0123456789").unwrap();

        service
            .overwrite(&scope, &mut ReplaySource::new("o.txt", &[b"abc", b"de"]))
            .await
            .unwrap();

        assert_eq!(read(&root, "o.txt"), b"abcde");
    }

    #[tokio::test]
    async fn test_empty_stream_is_rejected() {
        let (_temp, service, scope, _root) = setup(1024);

        let err = service
            .upload(&scope, &mut ReplaySource::new("x", &[]))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::EmptyStream));
    }

    #[tokio::test]
    async fn test_upload_rejects_traversal() {
        let (_temp, service, scope, _root) = setup(1024);

        let err = service
            .upload(&scope, &mut ReplaySource::new("../../etc/passwd", &[b"x"]))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_mid_stream_is_propagated() {
        let (_temp, service, scope, root) = setup(1024);

        let mut source = BrokenSource {
            inner: ReplaySource::new("partial.txt", &[b"part"]),
        };
        let err = service.upload(&scope, &mut source).await.unwrap_err();

        assert!(matches!(err, StorageError::Transport(_)));
        assert_eq!(read(&root, "partial.txt"), b"part");
    }

    #[tokio::test]
    async fn test_download_chunks_by_read_buffer() {
        let (_temp, service, scope, root) = setup(4);
        std::fs::write(root.join("d.txt"), b"hello world").unwrap();

        let mut sink = CollectSink::default();
        service.read(&scope, "d.txt", &mut sink).await.unwrap();

        let parts: Vec<&[u8]> = sink.chunks.iter().map(|c| c.content.as_slice()).collect();
        assert_eq!(parts, vec![&b"hell"[..], &b"o wo"[..], &b"rld"[..]]);
    }

    #[tokio::test]
    async fn test_download_empty_file_sends_nothing() {
        let (_temp, service, scope, root) = setup(4);
        std::fs::write(root.join("empty"), b"").unwrap();

        let mut sink = CollectSink::default();
        assert_eq!(service.download(&scope, "empty", &mut sink).await.unwrap(), 0);
        assert!(sink.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let (_temp, service, scope, _root) = setup(4);

        let mut sink = CollectSink::default();
        let err = service
            .download(&scope, "missing.txt", &mut sink)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_download_stops_when_sink_fails() {
        let (_temp, service, scope, root) = setup(2);
        std::fs::write(root.join("long.txt"), b"abcdefgh").unwrap();

        let mut sink = CollectSink {
            fail_after: Some(1),
            ..Default::default()
        };
        let err = service
            .download(&scope, "long.txt", &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Transport(_)));
        assert_eq!(sink.bytes(), b"ab");
    }

    #[tokio::test]
    async fn test_delete_is_not_idempotent() {
        let (_temp, service, scope, root) = setup(4);
        std::fs::write(root.join("d.txt"), b"x").unwrap();

        service.delete(&scope, "d.txt").await.unwrap();
        assert!(service.delete(&scope, "d.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_move_file() {
        let (_temp, service, scope, root) = setup(4);
        std::fs::write(root.join("source.txt"), b"test content").unwrap();

        let err = service
            .move_file(&scope, "source.txt", "missing/dest.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingParent(_)));
        assert!(root.join("source.txt").exists());

        service
            .move_file(&scope, "source.txt", "dest.txt")
            .await
            .unwrap();
        assert!(!root.join("source.txt").exists());
        assert_eq!(read(&root, "dest.txt"), b"test content");
    }

    #[tokio::test]
    async fn test_copy_then_delete() {
        let (_temp, service, scope, root) = setup(4);
        std::fs::create_dir(root.join("nested")).unwrap();
        std::fs::write(root.join("file.txt"), b"data").unwrap();

        service
            .copy_then_delete(&scope, "file.txt", "nested/file.txt")
            .await
            .unwrap();

        assert!(!root.join("file.txt").exists());
        assert_eq!(read(&root, "nested/file.txt"), b"data");
    }

    #[tokio::test]
    async fn test_copy_then_delete_missing_source_leaves_nothing() {
        let (_temp, service, scope, root) = setup(4);

        let err = service
            .copy_then_delete(&scope, "ghost.txt", "copy.txt")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(!root.join("copy.txt").exists());
    }

    /// Refuses every delete, like a source on a read-only mount.
    struct StuckSource;

    #[async_trait]
    impl RemoveSource for StuckSource {
        async fn remove_source(&self, _scope: &RequestScope, raw: &str) -> StorageResult<()> {
            Err(StorageError::Io {
                op: "delete",
                path: PathBuf::from(raw),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    #[tokio::test]
    async fn test_copy_then_delete_rolls_back_copy_when_source_stays() {
        let (_temp, service, scope, root) = setup(4);
        std::fs::create_dir(root.join("nested")).unwrap();
        std::fs::write(root.join("file.txt"), b"data").unwrap();

        let err = service
            .copy_then_remove(&scope, "file.txt", "nested/file.txt", &StuckSource)
            .await
            .unwrap_err();

        match err {
            StorageError::Io { op, path, source } => {
                assert_eq!(op, "delete");
                assert_eq!(path, PathBuf::from("file.txt"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            other => panic!("expected the delete error, got {:?}", other),
        }
        assert!(!root.join("nested/file.txt").exists());
        assert_eq!(read(&root, "file.txt"), b"data");
    }

    #[tokio::test]
    async fn test_list_directory() {
        let (_temp, service, scope, root) = setup(4);
        std::fs::create_dir_all(root.join("dir/sub")).unwrap();
        std::fs::write(root.join("dir/a.txt"), b"a").unwrap();
        std::fs::write(root.join("dir/b.txt"), b"b").unwrap();

        let entries = service.list_directory(&scope, "dir").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().filter(|e| e.is_directory).count(), 1);

        std::fs::create_dir(root.join("empty")).unwrap();
        assert!(service.list_directory(&scope, "empty").await.unwrap().is_empty());
    }
}
