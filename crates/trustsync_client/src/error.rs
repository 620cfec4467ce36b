//! Error types for the client.

use std::path::PathBuf;
use thiserror::Error;
use trustsync_protocol::{ProtocolError, RespCode, Response};
use trustsync_security::SecurityError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with a non-success code.
    #[error("server rejected request: {}{}", .code.name(), detail_suffix(.detail))]
    Rejected {
        /// Response code.
        code: RespCode,
        /// Detail text sent with the code, if any.
        detail: Option<String>,
    },

    /// A fetched file did not match the server's digest.
    #[error("digest mismatch for {remote}")]
    DigestMismatch {
        /// Remote path that was fetched.
        remote: String,
    },

    /// Framing, codec or transport failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Key or registration failure.
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// Local file failure.
    #[error("storage error at {}: {source}", .path.display())]
    Storage {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Operation not valid in the current client state.
    #[error("invalid client state: {0}")]
    InvalidState(&'static str),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl ClientError {
    /// Builds a rejection from a server response.
    pub fn rejected(response: &Response) -> Self {
        Self::Rejected {
            code: response.code,
            detail: response.detail(),
        }
    }

    /// Creates a storage error.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// The protocol code this error corresponds to, if any.
    pub fn code(&self) -> Option<RespCode> {
        match self {
            ClientError::Rejected { code, .. } => Some(*code),
            ClientError::DigestMismatch { .. } => Some(RespCode::IntegrityFail),
            _ => None,
        }
    }

    /// Returns true if the server went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ClientError::Protocol(err) if err.is_disconnect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_carries_detail() {
        let err = ClientError::rejected(&Response::with_text(RespCode::AccessDenied, "read-only"));
        assert_eq!(err.code(), Some(RespCode::AccessDenied));
        assert!(err.to_string().contains("read-only"));

        let err = ClientError::rejected(&Response::new(RespCode::InvalidPath));
        assert_eq!(err.code(), Some(RespCode::InvalidPath));
    }

    #[test]
    fn classification() {
        let err = ClientError::DigestMismatch {
            remote: "a.bin".into(),
        };
        assert_eq!(err.code(), Some(RespCode::IntegrityFail));
        assert!(ClientError::Protocol(ProtocolError::Disconnected).is_disconnect());
        assert!(!ClientError::InvalidState("idle").is_disconnect());
        assert_eq!(ClientError::Config("x".into()).code(), None);
    }
}
