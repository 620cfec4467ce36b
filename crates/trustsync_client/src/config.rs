//! Client configuration.

use crate::error::{ClientError, ClientResult};
use trustsync_protocol::{CHUNK_CHECKSUM_LEN, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FRAME_LEN};
use trustsync_security::{validate_host_id, DEFAULT_KDF_ROUNDS};

/// Returns the machine's host name from the environment, or `localhost`.
pub fn default_host_id() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| validate_host_id(name).is_ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Configuration for a client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`.
    pub server_addr: String,
    /// Identifier this client presents to the server.
    pub host_id: String,
    /// Bytes per uploaded chunk.
    pub chunk_size: usize,
    /// PBKDF2 iterations for registration. Must match the server.
    pub kdf_rounds: u32,
    /// Largest frame accepted from the server.
    pub max_frame_len: usize,
}

impl ClientConfig {
    /// Creates a configuration for `server_addr`.
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            host_id: default_host_id(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            kdf_rounds: DEFAULT_KDF_ROUNDS,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Sets the host id.
    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = host_id.into();
        self
    }

    /// Sets the upload chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the PBKDF2 iteration count.
    pub fn with_kdf_rounds(mut self, rounds: u32) -> Self {
        self.kdf_rounds = rounds;
        self
    }

    /// Sets the maximum frame length.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Checks the configuration before connecting.
    pub fn validate(&self) -> ClientResult<()> {
        validate_host_id(&self.host_id)?;
        if self.chunk_size == 0 {
            return Err(ClientError::Config("chunk size must be positive".into()));
        }
        if self.chunk_size.saturating_add(CHUNK_CHECKSUM_LEN) > self.max_frame_len {
            return Err(ClientError::Config(format!(
                "chunk size {} does not fit in a {} byte frame",
                self.chunk_size, self.max_frame_len
            )));
        }
        if self.kdf_rounds == 0 {
            return Err(ClientError::Config("kdf rounds must be positive".into()));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(format!("127.0.0.1:{}", trustsync_protocol::DEFAULT_PORT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr, "127.0.0.1:5000");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!config.host_id.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ClientConfig::new("files.example:5000")
            .with_host_id("alice")
            .with_chunk_size(1024)
            .with_kdf_rounds(10);
        assert_eq!(config.host_id, "alice");
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.kdf_rounds, 10);
    }

    #[test]
    fn test_validation() {
        let config = ClientConfig::default().with_host_id("alice");
        assert!(config.clone().with_host_id("a/b").validate().is_err());
        assert!(config.clone().with_chunk_size(0).validate().is_err());
        assert!(config.clone().with_kdf_rounds(0).validate().is_err());
        assert!(config
            .with_chunk_size(64)
            .with_max_frame_len(64)
            .validate()
            .is_err());
    }
}
