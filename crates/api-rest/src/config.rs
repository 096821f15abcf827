//! Gateway configuration.
//!
//! Resolved once in the binary and handed to [`crate::router`]; handlers never read the
//! environment themselves.

use fm_core::config::size_from_env_value;
use fm_core::StorageResult;

pub const DEFAULT_GRPC_ENDPOINT: &str = "http://127.0.0.1:50051";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 32;
pub const DEFAULT_CHUNK_KB: usize = 32;

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    grpc_endpoint: String,
    max_upload_bytes: usize,
    chunk_size: usize,
}

impl GatewayConfig {
    pub fn new(grpc_endpoint: impl Into<String>, max_upload_bytes: usize, chunk_size: usize) -> Self {
        Self {
            grpc_endpoint: grpc_endpoint.into(),
            max_upload_bytes,
            chunk_size,
        }
    }

    /// Build the configuration from raw environment values.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidConfig` for zero or non-numeric sizes.
    pub fn from_env_values(
        grpc_endpoint: Option<String>,
        max_upload_mb: Option<String>,
        chunk_kb: Option<String>,
    ) -> StorageResult<Self> {
        let grpc_endpoint = grpc_endpoint
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_GRPC_ENDPOINT.to_string());

        Ok(Self {
            grpc_endpoint,
            max_upload_bytes: size_from_env_value(
                "FM_MAX_UPLOAD_MB",
                max_upload_mb,
                DEFAULT_MAX_UPLOAD_MB,
                1 << 20,
            )?,
            chunk_size: size_from_env_value("FM_CHUNK_KB", chunk_kb, DEFAULT_CHUNK_KB, 1 << 10)?,
        })
    }

    pub fn grpc_endpoint(&self) -> &str {
        &self.grpc_endpoint
    }

    /// Upper bound on a multipart request body, in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Size of each outgoing chunk and of the download write buffer, in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GatewayConfig::from_env_values(None, None, None).unwrap();
        assert_eq!(cfg.grpc_endpoint(), DEFAULT_GRPC_ENDPOINT);
        assert_eq!(cfg.max_upload_bytes(), 32 << 20);
        assert_eq!(cfg.chunk_size(), 32 << 10);
    }

    #[test]
    fn test_sizes_are_scaled() {
        let cfg = GatewayConfig::from_env_values(
            Some("http://files:9000".into()),
            Some("2".into()),
            Some("8".into()),
        )
        .unwrap();
        assert_eq!(cfg.grpc_endpoint(), "http://files:9000");
        assert_eq!(cfg.max_upload_bytes(), 2 * 1024 * 1024);
        assert_eq!(cfg.chunk_size(), 8 * 1024);
    }

    #[test]
    fn test_zero_chunk_rejected() {
        assert!(GatewayConfig::from_env_values(None, None, Some("0".into())).is_err());
    }
}
