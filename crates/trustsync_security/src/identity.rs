//! This endpoint's own signing identity.

use crate::error::{SecurityError, SecurityResult};
use crate::keys::{fingerprint, PublicKey, UploadHasher, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use ed25519_dalek::{Signer, SigningKey, SECRET_KEY_LENGTH};
use rand::RngCore;
use sha2::Digest;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use zeroize::Zeroize;

/// An Ed25519 key pair plus a running hash over an outgoing stream.
///
/// Feed every uploaded byte through [`update`](Self::update) and call
/// [`finish`](Self::finish) to sign the SHA-384 digest of the stream. The
/// hash restarts afterwards, ready for the next upload.
pub struct LocalIdentity {
    signing_key: SigningKey,
    hasher: UploadHasher,
}

impl LocalIdentity {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut seed);
        let identity = Self::from_secret_bytes(&seed);
        seed.zeroize();
        identity
    }

    /// Builds an identity from a 32-byte secret seed.
    #[must_use]
    pub fn from_secret_bytes(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
            hasher: UploadHasher::new(),
        }
    }

    /// Loads an identity from a hex key file.
    pub fn load(path: &Path) -> SecurityResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| SecurityError::storage(path, e))?;
        let mut raw = hex::decode(text.trim())
            .map_err(|e| SecurityError::invalid_key(format!("{}: {e}", path.display())))?;
        let seed: Result<[u8; SECRET_KEY_LENGTH], _> = raw.as_slice().try_into();
        raw.zeroize();
        let mut seed = seed.map_err(|_| {
            SecurityError::invalid_key(format!(
                "{}: expected {SECRET_KEY_LENGTH} secret key bytes",
                path.display()
            ))
        })?;
        let identity = Self::from_secret_bytes(&seed);
        seed.zeroize();
        Ok(identity)
    }

    /// Writes the secret seed as hex, creating parent directories.
    ///
    /// On Unix the file is readable by its owner only.
    pub fn save(&self, path: &Path) -> SecurityResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SecurityError::storage(parent, e))?;
        }
        let mut contents = hex::encode(self.signing_key.to_bytes());
        contents.push('\n');
        let result = write_private(path, contents.as_bytes())
            .map_err(|e| SecurityError::storage(path, e));
        contents.zeroize();
        result
    }

    /// Loads the identity at `path`, generating and saving one if absent.
    pub fn load_or_generate(path: &Path) -> SecurityResult<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let identity = Self::generate();
        identity.save(path)?;
        tracing::info!(
            path = %path.display(),
            fingerprint = %identity.fingerprint(),
            "generated new local identity"
        );
        Ok(identity)
    }

    /// The public half of the key pair.
    pub fn public_key(&self) -> PublicKey {
        self.signing_key.verifying_key()
    }

    /// Canonical encoding of the public key.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public_key().to_bytes()
    }

    /// Fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key())
    }

    /// Discards anything fed since the last `finish`.
    pub fn reset(&mut self) {
        self.hasher = UploadHasher::new();
    }

    /// Folds outgoing bytes into the running hash.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Signs the digest of everything fed since the last `finish` and
    /// restarts the hash.
    pub fn finish(&mut self) -> [u8; SIGNATURE_LEN] {
        let digest = self.hasher.finalize_reset();
        self.sign_digest(&digest)
    }

    /// Signs an already computed digest.
    pub fn sign_digest(&self, digest: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(digest).to_bytes()
    }
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        let mut file = options.open(path)?;
        // `mode` only applies to new files.
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
        file.write_all(contents)?;
        file.sync_all()
    }
    #[cfg(not(unix))]
    {
        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("public_key", &self.fingerprint())
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::digest_of;
    use crate::trust::TrustStore;
    use tempfile::tempdir;

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("local.key");

        let identity = LocalIdentity::generate();
        identity.save(&path).unwrap();

        let loaded = LocalIdentity::load(&path).unwrap();
        assert_eq!(loaded.public_key_bytes(), identity.public_key_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("local.key");
        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;

        LocalIdentity::generate().save(&path).unwrap();
        assert_eq!(mode(&path), 0o600);

        // An existing world-readable file is tightened on overwrite.
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        LocalIdentity::generate().save(&path).unwrap();
        assert_eq!(mode(&path), 0o600);
    }

    #[test]
    fn load_or_generate_is_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.key");

        let first = LocalIdentity::load_or_generate(&path).unwrap();
        let second = LocalIdentity::load_or_generate(&path).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn load_rejects_bad_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.key");
        assert!(LocalIdentity::load(&path).unwrap_err().is_storage());

        std::fs::write(&path, "abcd").unwrap();
        assert!(matches!(
            LocalIdentity::load(&path),
            Err(SecurityError::InvalidKey(_))
        ));
    }

    #[test]
    fn streamed_signature_verifies() {
        let mut identity = LocalIdentity::from_secret_bytes(&[5u8; 32]);
        identity.update(b"first chunk,");
        identity.update(b"second chunk");
        let signature = identity.finish();

        let mut store = TrustStore::new();
        store.trust("alice", &identity.public_key_bytes()).unwrap();
        let digest = digest_of(b"first chunk,second chunk");
        assert!(store.verify_signature("alice", &digest, &signature).unwrap());
    }

    #[test]
    fn finish_restarts_the_hash() {
        let mut identity = LocalIdentity::from_secret_bytes(&[6u8; 32]);
        identity.update(b"one");
        identity.finish();
        identity.update(b"two");
        let signature = identity.finish();

        assert_eq!(signature, identity.sign_digest(&digest_of(b"two")));
    }

    #[test]
    fn reset_drops_partial_stream() {
        let mut identity = LocalIdentity::from_secret_bytes(&[8u8; 32]);
        identity.update(b"aborted upload");
        identity.reset();
        identity.update(b"fresh");
        assert_eq!(identity.finish(), identity.sign_digest(&digest_of(b"fresh")));
    }

    #[test]
    fn debug_redacts_secret() {
        let identity = LocalIdentity::from_secret_bytes(&[7u8; 32]);
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&hex::encode([7u8; 32])));
    }
}
