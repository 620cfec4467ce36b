//! # TrustSync Security
//!
//! Key material and trust decisions for TrustSync.
//!
//! This crate provides:
//! - `TrustStore`: persistent host id → Ed25519 public key records with an
//!   explicit change set of records not yet written to disk
//! - `LocalIdentity`: this endpoint's signing key plus a running SHA-384
//!   over an outgoing stream
//! - `RemoteVerifier`: signature checks against the trust store
//! - Registration crypto: one-time passwords, PBKDF2 key derivation and
//!   AES-256-GCM sealing of the client's public key
//!
//! ## Trust model
//!
//! A host id presented at connect time is only a claim. What an upload is
//! worth is decided when it is committed, by checking the signature over
//! the uploaded bytes against the key recorded for that host id.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bootstrap;
mod error;
mod identity;
mod keys;
mod trust;
mod verifier;

pub use bootstrap::{
    generate_password, seal_public_key, RegistrationChallenge, SealingKey, DEFAULT_KDF_ROUNDS,
    DEFAULT_PASSWORD_LEN, SALT_LEN,
};
pub use error::{SecurityError, SecurityResult};
pub use identity::LocalIdentity;
pub use keys::{
    digest_of, fingerprint, parse_public_key, validate_host_id, PublicKey, UploadHasher,
    PUBLIC_KEY_LEN, SIGNATURE_LEN, UPLOAD_DIGEST_LEN,
};
pub use trust::{ChangeSet, SharedTrustStore, TrustStore, KEY_FILE_EXTENSION};
pub use verifier::RemoteVerifier;
