//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while framing or (de)serializing messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The peer closed the connection.
    #[error("peer disconnected")]
    Disconnected,

    /// A frame exceeded the configured maximum.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced or attempted frame length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Payload could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// Payload could not be decoded.
    #[error("decoding failed: {0}")]
    Decode(String),

    /// The peer sent something the conversation did not allow at this point.
    #[error("unexpected message: {0}")]
    Unexpected(String),

    /// I/O error on the underlying stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Creates an unexpected-message error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Returns true if this error means the peer is gone.
    ///
    /// Sessions treat these as the normal end of a conversation.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Disconnected => true,
            ProtocolError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
