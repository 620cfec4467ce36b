//! Signature checks against the shared trust store.

use crate::error::SecurityResult;
use crate::keys::digest_of;
use crate::trust::SharedTrustStore;

/// Answers trust questions about remote hosts.
#[derive(Debug, Clone)]
pub struct RemoteVerifier {
    store: SharedTrustStore,
}

impl RemoteVerifier {
    /// Creates a verifier over a shared store.
    pub fn new(store: SharedTrustStore) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &SharedTrustStore {
        &self.store
    }

    /// Returns true if the host has a recorded key.
    pub fn is_trusted(&self, host: &str) -> bool {
        self.store.read().contains(host)
    }

    /// Fingerprint of the host's recorded key.
    pub fn fingerprint(&self, host: &str) -> SecurityResult<String> {
        self.store.read().fingerprint(host)
    }

    /// Checks a signature over an upload digest.
    ///
    /// # Errors
    ///
    /// Returns `UnknownHost` if the host has no record.
    pub fn verify(&self, host: &str, digest: &[u8], signature: &[u8]) -> SecurityResult<bool> {
        self.store.read().verify_signature(host, digest, signature)
    }

    /// Hashes `data` and checks the signature over its digest.
    pub fn verify_bytes(&self, host: &str, data: &[u8], signature: &[u8]) -> SecurityResult<bool> {
        self.verify(host, &digest_of(data), signature)
    }
}
