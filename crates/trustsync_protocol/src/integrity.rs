//! Integrity helpers for chunked transfers.
//!
//! Two independent checks protect a transfer:
//! - every upload chunk carries a 16-byte checksum trailer, so a damaged
//!   chunk can be resent on its own;
//! - a download is followed by a SHA-256 digest over all bytes sent.

use crate::error::{ProtocolError, ProtocolResult};
use sha2::{Digest, Sha256};

/// Length of the checksum trailer on an upload chunk frame.
pub const CHUNK_CHECKSUM_LEN: usize = 16;

/// Length of the digest that closes a download.
pub const TRANSFER_DIGEST_LEN: usize = 32;

/// Computes the checksum of one chunk payload.
///
/// This is the leading 16 bytes of SHA-256 over `payload`.
pub fn chunk_checksum(payload: &[u8]) -> [u8; CHUNK_CHECKSUM_LEN] {
    let digest = Sha256::digest(payload);
    let mut out = [0u8; CHUNK_CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHUNK_CHECKSUM_LEN]);
    out
}

/// Builds an upload chunk frame: `payload || checksum(payload)`.
pub fn seal_chunk(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + CHUNK_CHECKSUM_LEN);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&chunk_checksum(payload));
    frame
}

/// Splits an upload chunk frame into payload and checksum trailer.
///
/// The checksum is not verified here.
pub fn split_chunk_frame(frame: &[u8]) -> ProtocolResult<(&[u8], &[u8])> {
    if frame.len() < CHUNK_CHECKSUM_LEN {
        return Err(ProtocolError::unexpected(format!(
            "chunk frame of {} bytes is shorter than its checksum",
            frame.len()
        )));
    }
    Ok(frame.split_at(frame.len() - CHUNK_CHECKSUM_LEN))
}

/// Number of chunks needed for `size` bytes.
///
/// An empty file needs zero chunks.
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    let chunk_size = chunk_size.max(1) as u64;
    size.div_ceil(chunk_size)
}

/// Running digest over a download stream.
#[derive(Debug, Clone, Default)]
pub struct TransferDigest {
    hasher: Sha256,
}

impl TransferDigest {
    /// Creates an empty digest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds bytes into the digest.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Returns the digest of everything folded in so far.
    pub fn finalize(self) -> [u8; TRANSFER_DIGEST_LEN] {
        self.hasher.finalize().into()
    }

    /// Digest of a complete byte slice.
    pub fn of(bytes: &[u8]) -> [u8; TRANSFER_DIGEST_LEN] {
        Sha256::digest(bytes).into()
    }
}
