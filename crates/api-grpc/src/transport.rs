//! Adapters between tonic streams and the core chunk capabilities.

use api_shared::pb::FileChunk;
use async_trait::async_trait;
use fm_core::{Chunk, ChunkSink, ChunkSource, StorageError, StorageResult};
use tokio::sync::mpsc;
use tonic::{Status, Streaming};

/// Inbound chunks of a client-stream call.
pub struct GrpcChunkSource {
    inner: Streaming<FileChunk>,
}

impl GrpcChunkSource {
    pub fn new(inner: Streaming<FileChunk>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ChunkSource for GrpcChunkSource {
    async fn receive_chunk(&mut self) -> StorageResult<Option<Chunk>> {
        match self.inner.message().await {
            Ok(Some(chunk)) => Ok(Some(Chunk {
                file_name: chunk.file_name,
                content: chunk.content,
            })),
            Ok(None) => Ok(None),
            Err(status) => Err(StorageError::Transport(status.message().to_string())),
        }
    }
}

/// Outbound chunks of a server-stream call, fed into the response channel.
pub struct ChannelChunkSink {
    tx: mpsc::Sender<Result<FileChunk, Status>>,
}

impl ChannelChunkSink {
    pub fn new(tx: mpsc::Sender<Result<FileChunk, Status>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ChunkSink for ChannelChunkSink {
    async fn send_chunk(&mut self, chunk: Chunk) -> StorageResult<()> {
        self.tx
            .send(Ok(FileChunk {
                file_name: chunk.file_name,
                content: chunk.content,
            }))
            .await
            .map_err(|_| StorageError::Transport("client closed the stream".into()))
    }
}
