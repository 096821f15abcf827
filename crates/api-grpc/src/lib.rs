//! # API gRPC
//!
//! gRPC server implementation of the file manager.
//!
//! Handles:
//! - Binding every `FileService` RPC to the core `TransferService`
//! - Adapting tonic streams to the core `ChunkSource` / `ChunkSink` capabilities
//! - Request-id stamping and request-scoped logging
//! - Mapping core errors onto terminal statuses and gRPC status codes
//!
//! Uses `api-shared` for the generated protocol types and `fm-core` for all file operations.

#![warn(rust_2018_idioms)]

pub use service::{request_id_interceptor, to_status, FileManagerService};

pub mod service;
pub mod transport;
