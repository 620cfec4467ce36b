//! Error types for the security crate.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Errors raised by key handling and trust decisions.
#[derive(Error, Debug)]
pub enum SecurityError {
    /// No key is recorded for the host.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// The host id cannot name a key file.
    #[error("invalid host id {0:?}")]
    InvalidHostId(String),

    /// Key bytes do not form a valid key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A sealed registration payload did not open.
    #[error("wrong registration password")]
    WrongPassword,

    /// Key derivation parameters were rejected.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Reading or writing key material failed.
    #[error("storage error at {}: {source}", .path.display())]
    Storage {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SecurityError {
    /// Creates a storage error for `path`.
    pub fn storage(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    /// Returns true for storage failures.
    pub fn is_storage(&self) -> bool {
        matches!(self, SecurityError::Storage { .. })
    }
}
