//! Error types for the server.

use std::path::PathBuf;
use thiserror::Error;
use trustsync_protocol::{ProtocolError, RespCode};
use trustsync_security::SecurityError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Framing, codec or transport failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Trust store or key failure.
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// Upload slot failure.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A client path escapes the served directory.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the peer went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ServerError::Protocol(err) if err.is_disconnect())
    }
}

/// Errors raised by the upload slot.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Another upload holds the slot.
    #[error("transfer slot occupied by {host}")]
    Occupied {
        /// Host owning the active upload.
        host: String,
    },

    /// A chunk did not match its checksum trailer.
    #[error("chunk {chunk} failed its checksum")]
    Integrity {
        /// Zero-based index of the chunk within the upload.
        chunk: u64,
    },

    /// The temporary file or the final commit failed.
    #[error("storage error at {}: {source}", .path.display())]
    Storage {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Creates a storage error.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// The response code reported to the client.
    pub fn response_code(&self) -> RespCode {
        match self {
            TransferError::Occupied { .. } => RespCode::TransmitterOccupied,
            TransferError::Integrity { .. } => RespCode::IntegrityFail,
            TransferError::Storage { .. } => RespCode::AccessDenied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_error_codes() {
        assert_eq!(
            TransferError::Occupied { host: "bob".into() }.response_code(),
            RespCode::TransmitterOccupied
        );
        assert_eq!(
            TransferError::Integrity { chunk: 2 }.response_code(),
            RespCode::IntegrityFail
        );
        assert_eq!(
            TransferError::storage(
                "/srv/x",
                std::io::Error::from(std::io::ErrorKind::PermissionDenied)
            )
            .response_code(),
            RespCode::AccessDenied
        );
    }

    #[test]
    fn disconnect_classification() {
        assert!(ServerError::Protocol(ProtocolError::Disconnected).is_disconnect());
        assert!(!ServerError::InvalidPath("..".into()).is_disconnect());
    }
}
