//! # API Shared
//!
//! Shared protocol definitions for the file manager APIs.
//!
//! Contains:
//! - Protobuf-generated types, the `FileService` server trait and its client (`pb` module)
//! - The encoded file-descriptor set used for gRPC reflection
//! - Small helpers for rendering terminal statuses
//!
//! Used by `api-grpc` (server side) and `api-rest` (gateway, client side).

// The generated code is placed into OUT_DIR at build time by the build script.
pub mod pb {
    tonic::include_proto!("filemanager.v1");
}

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("proto_descriptor");

/// Metadata key carrying the request id from the gateway to the gRPC server.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub use pb::*;

impl StatusResponse {
    /// A terminal `STATUS_SUCCESS` response.
    pub fn success() -> Self {
        Self {
            status: Status::Success as i32,
        }
    }

    /// A terminal `STATUS_ERROR` response.
    pub fn error() -> Self {
        Self {
            status: Status::Error as i32,
        }
    }

    /// Renders the status the way the gateway reports it, e.g. `STATUS_SUCCESS`.
    ///
    /// Unknown wire values render as `STATUS_UNSPECIFIED`.
    pub fn status_name(&self) -> &'static str {
        self.status().as_str_name()
    }
}
