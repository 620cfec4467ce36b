//! Key encodings, fingerprints and host id rules.

use crate::error::{SecurityError, SecurityResult};
use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256, Sha384};

/// A host's public key.
pub type PublicKey = VerifyingKey;

/// Hash accumulated over an upload and signed by the uploader.
pub type UploadHasher = Sha384;

/// Length of a public key in its canonical encoding.
pub const PUBLIC_KEY_LEN: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;

/// Length of an upload signature.
pub const SIGNATURE_LEN: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// Length of the upload digest.
pub const UPLOAD_DIGEST_LEN: usize = 48;

const MAX_HOST_ID_LEN: usize = 255;

/// Parses the canonical 32-byte encoding of a public key.
pub fn parse_public_key(bytes: &[u8]) -> SecurityResult<PublicKey> {
    let raw: &[u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        SecurityError::invalid_key(format!(
            "expected {PUBLIC_KEY_LEN} key bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(raw).map_err(|e| SecurityError::invalid_key(e.to_string()))
}

/// Human-comparable fingerprint of a public key.
///
/// Lowercase hex of SHA-256 over the key bytes, in groups of four
/// characters joined by `:`.
pub fn fingerprint(key: &PublicKey) -> String {
    let hex = hex::encode(Sha256::digest(key.as_bytes()));
    hex.as_bytes()
        .chunks(4)
        .map(|group| std::str::from_utf8(group).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(":")
}

/// The upload digest of a complete byte slice.
pub fn digest_of(bytes: &[u8]) -> [u8; UPLOAD_DIGEST_LEN] {
    let mut out = [0u8; UPLOAD_DIGEST_LEN];
    out.copy_from_slice(&Sha384::digest(bytes));
    out
}

/// Checks that a host id can safely name a key file.
pub fn validate_host_id(host: &str) -> SecurityResult<()> {
    let bad = host.is_empty()
        || host.len() > MAX_HOST_ID_LEN
        || host == "."
        || host == ".."
        || host.contains(['/', '\\', '\0']);
    if bad {
        return Err(SecurityError::InvalidHostId(host.to_string()));
    }
    Ok(())
}
