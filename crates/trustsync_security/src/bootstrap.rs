//! Password-bootstrapped key registration.
//!
//! The server never shares a secret with a new host over the wire. Instead:
//! 1. The server draws a one-time password and a salt, shows the password
//!    to its operator and sends only the salt.
//! 2. The client's operator types the password; the client derives the same
//!    key with PBKDF2 and seals its public key with AES-256-GCM.
//! 3. The server opens the sealed key with its own derived key. Anything
//!    that fails to open, or opens to something that is not a public key,
//!    counts as a wrong password.
//!
//! Sealed format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use crate::error::{SecurityError, SecurityResult};
use crate::keys::{parse_public_key, PublicKey};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::distributions::{Alphanumeric, DistString};
use rand::RngCore;
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of the registration salt.
pub const SALT_LEN: usize = 16;

/// Default PBKDF2 iteration count. Both ends must use the same value.
pub const DEFAULT_KDF_ROUNDS: u32 = 100_000;

/// Default length of a one-time registration password.
pub const DEFAULT_PASSWORD_LEN: usize = 10;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Symmetric key derived from a registration password.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealingKey {
    bytes: [u8; KEY_SIZE],
}

impl SealingKey {
    /// Derives a key with PBKDF2-HMAC-SHA512.
    ///
    /// # Errors
    ///
    /// Returns an error if `rounds` is zero or the salt is empty.
    pub fn derive(password: &[u8], salt: &[u8], rounds: u32) -> SecurityResult<Self> {
        if rounds == 0 {
            return Err(SecurityError::KeyDerivation(
                "iteration count must be positive".into(),
            ));
        }
        if salt.is_empty() {
            return Err(SecurityError::KeyDerivation("salt must not be empty".into()));
        }
        let mut bytes = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, rounds, &mut bytes);
        Ok(Self { bytes })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(GenericArray::from_slice(&self.bytes))
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> SecurityResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext)
            .map_err(|_| SecurityError::Encryption("AES-GCM encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Decrypts data produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns `WrongPassword` if the data is truncated or fails
    /// authentication.
    pub fn open(&self, sealed: &[u8]) -> SecurityResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SecurityError::WrongPassword);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SecurityError::WrongPassword)
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealingKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Draws a password of `len` characters from `[A-Za-z0-9]`.
pub fn generate_password(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

/// Server half of one registration exchange.
///
/// Holds the one-time password (for the operator), the salt (for the
/// client) and the derived key. All of it is dropped once the exchange
/// ends.
pub struct RegistrationChallenge {
    password: Zeroizing<String>,
    salt: [u8; SALT_LEN],
    key: SealingKey,
}

impl RegistrationChallenge {
    /// Draws a password and salt and derives the sealing key.
    pub fn generate(password_len: usize, rounds: u32) -> SecurityResult<Self> {
        let password = Zeroizing::new(generate_password(password_len));
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = SealingKey::derive(password.as_bytes(), &salt, rounds)?;
        Ok(Self {
            password,
            salt,
            key,
        })
    }

    /// The password to show the operator.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// The salt to send to the client.
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    /// Opens the client's sealed public key.
    ///
    /// # Errors
    ///
    /// Returns `WrongPassword` if the payload does not open or does not
    /// contain a valid public key.
    pub fn open_public_key(&self, sealed: &[u8]) -> SecurityResult<PublicKey> {
        let plaintext = Zeroizing::new(self.key.open(sealed)?);
        parse_public_key(&plaintext).map_err(|_| SecurityError::WrongPassword)
    }
}

impl std::fmt::Debug for RegistrationChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationChallenge")
            .field("salt", &hex::encode(self.salt))
            .finish_non_exhaustive()
    }
}

/// Client half: seals `public_key` under the key derived from the
/// operator-entered password and the server's salt.
pub fn seal_public_key(
    password: &str,
    salt: &[u8],
    rounds: u32,
    public_key: &[u8],
) -> SecurityResult<Vec<u8>> {
    SealingKey::derive(password.as_bytes(), salt, rounds)?.seal(public_key)
}
