//! # FM Core
//!
//! Core logic of the sandboxed file manager.
//!
//! This crate contains pure path arithmetic, file handle lifecycle and the chunked transfer
//! state machine:
//! - [`PathResolver`] keeps every caller-supplied path beneath the storage root
//! - [`FileRepository`] opens, reads, writes, lists, deletes and moves files
//! - [`TransferService`] drives client-stream and server-stream transfers through the
//!   [`ChunkSource`] / [`ChunkSink`] capabilities
//!
//! **No API concerns**: gRPC servers, the HTTP gateway and protobuf types belong in `api-grpc`,
//! `api-rest` or `api-shared`.

pub mod config;
pub mod constants;
pub mod error;
pub mod paths;
pub mod repository;
pub mod scope;
pub mod transfer;

pub use config::CoreConfig;
pub use error::{PathError, StorageError, StorageResult};
pub use paths::{PathResolver, StoragePath};
pub use repository::{DirectoryEntry, FileHandle, FileRepository};
pub use scope::RequestScope;
pub use transfer::{Chunk, ChunkSink, ChunkSource, TransferService, WriteMode};
