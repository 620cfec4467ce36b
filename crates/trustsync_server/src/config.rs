//! Server configuration.

use crate::error::{ServerError, ServerResult};
use std::net::SocketAddr;
use std::path::PathBuf;
use trustsync_protocol::{
    CHUNK_CHECKSUM_LEN, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FRAME_LEN, DEFAULT_PORT,
};
use trustsync_security::{DEFAULT_KDF_ROUNDS, DEFAULT_PASSWORD_LEN};

/// Default directory for trusted host keys, relative to the working directory.
pub const DEFAULT_TRUST_DIR: &str = "verified";

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Directory served to clients.
    pub base_dir: PathBuf,
    /// Directory holding one `<host>.pub` file per trusted host.
    pub trust_dir: PathBuf,
    /// Bytes per chunk when serving fetches.
    pub chunk_size: usize,
    /// Length of one-time registration passwords.
    pub password_length: usize,
    /// PBKDF2 iterations for registration. Must match the clients.
    pub kdf_rounds: u32,
    /// Largest frame accepted from a client.
    pub max_frame_len: usize,
    /// Failed checksum attempts tolerated per chunk. `None` retries forever.
    pub max_chunk_retries: Option<u32>,
}

impl ServerConfig {
    /// Creates a configuration serving `base_dir` on `bind_addr`.
    pub fn new(bind_addr: SocketAddr, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr,
            base_dir: base_dir.into(),
            trust_dir: PathBuf::from(DEFAULT_TRUST_DIR),
            chunk_size: DEFAULT_CHUNK_SIZE,
            password_length: DEFAULT_PASSWORD_LEN,
            kdf_rounds: DEFAULT_KDF_ROUNDS,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_chunk_retries: None,
        }
    }

    /// Sets the trust directory.
    pub fn with_trust_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trust_dir = dir.into();
        self
    }

    /// Sets the fetch chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the registration password length.
    pub fn with_password_length(mut self, len: usize) -> Self {
        self.password_length = len;
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

    /// Caps the failed checksum attempts per chunk.
    pub fn with_max_chunk_retries(mut self, retries: u32) -> Self {
        self.max_chunk_retries = Some(retries);
        self
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> ServerResult<()> {
        if self.chunk_size == 0 {
            return Err(ServerError::Config("chunk size must be positive".into()));
        }
        if self.chunk_size.saturating_add(CHUNK_CHECKSUM_LEN) > self.max_frame_len {
            return Err(ServerError::Config(format!(
                "chunk size {} does not fit in a {} byte frame",
                self.chunk_size, self.max_frame_len
            )));
        }
        if self.password_length == 0 {
            return Err(ServerError::Config(
                "password length must be positive".into(),
            ));
        }
        if self.kdf_rounds == 0 {
            return Err(ServerError::Config("kdf rounds must be positive".into()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)), ".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.trust_dir, PathBuf::from("verified"));
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.kdf_rounds, DEFAULT_KDF_ROUNDS);
        assert!(config.max_chunk_retries.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), "/srv/share")
            .with_trust_dir("/var/lib/trustsync/verified")
            .with_chunk_size(4096)
            .with_password_length(16)
            .with_kdf_rounds(1_000)
            .with_max_chunk_retries(3);

        assert_eq!(config.base_dir, PathBuf::from("/srv/share"));
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.password_length, 16);
        assert_eq!(config.kdf_rounds, 1_000);
        assert_eq!(config.max_chunk_retries, Some(3));
    }

    #[test]
    fn test_validation() {
        let base = ServerConfig::default();
        assert!(base.clone().with_chunk_size(0).validate().is_err());
        assert!(base.clone().with_kdf_rounds(0).validate().is_err());
        assert!(base.clone().with_password_length(0).validate().is_err());
        assert!(base
            .with_chunk_size(1024)
            .with_max_frame_len(1024)
            .validate()
            .is_err());
    }
}
