//! Persistent host trust store.

use crate::error::{SecurityError, SecurityResult};
use crate::keys::{fingerprint, parse_public_key, validate_host_id, PublicKey};
use ed25519_dalek::Signature;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension of a trusted host's key file.
pub const KEY_FILE_EXTENSION: &str = "pub";

/// Trust store shared between sessions.
///
/// Membership checks and verification take the read lock; registration and
/// saving take the write lock.
pub type SharedTrustStore = Arc<RwLock<TrustStore>>;

/// Hosts whose records changed since the last successful save.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    hosts: BTreeSet<String>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a host as changed.
    pub fn record(&mut self, host: &str) {
        self.hosts.insert(host.to_string());
    }

    /// Clears the mark on a host once its record is durable.
    pub fn settle(&mut self, host: &str) -> bool {
        self.hosts.remove(host)
    }

    /// Returns true if the host has an unsaved change.
    pub fn contains(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Number of pending hosts.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Iterates over pending hosts in name order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}

/// Mapping from host id to public key, backed by a directory of key files.
///
/// Each trusted host is stored as `<host>.pub` holding the hex encoding of
/// its 32 public-key bytes. Changes are collected in a [`ChangeSet`] and
/// only written by [`save`](Self::save).
#[derive(Debug, Default)]
pub struct TrustStore {
    records: HashMap<String, PublicKey>,
    changes: ChangeSet,
}

impl TrustStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every key file in `dir`.
    ///
    /// A missing directory is created and yields an empty store. Files
    /// without the `.pub` extension are ignored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the directory cannot be read and an
    /// invalid-key error naming the file if a key file does not parse.
    pub fn scan(dir: &Path) -> SecurityResult<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| SecurityError::storage(dir, e))?;
            tracing::info!(dir = %dir.display(), "created empty trust directory");
            return Ok(Self::new());
        }

        let mut records = HashMap::new();
        let entries = fs::read_dir(dir).map_err(|e| SecurityError::storage(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| SecurityError::storage(dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(KEY_FILE_EXTENSION) {
                continue;
            }
            let Some(host) = path.file_stem().and_then(|stem| stem.to_str()) else {
                tracing::warn!(file = %path.display(), "skipping key file with non UTF-8 name");
                continue;
            };
            if validate_host_id(host).is_err() {
                tracing::warn!(file = %path.display(), "skipping key file with invalid host id");
                continue;
            }

            let text = fs::read_to_string(&path).map_err(|e| SecurityError::storage(&path, e))?;
            let bytes = hex::decode(text.trim()).map_err(|e| {
                SecurityError::invalid_key(format!("{}: {e}", path.display()))
            })?;
            let key = parse_public_key(&bytes)
                .map_err(|e| SecurityError::invalid_key(format!("{}: {e}", path.display())))?;
            records.insert(host.to_string(), key);
        }

        tracing::debug!(dir = %dir.display(), hosts = records.len(), "scanned trust store");
        Ok(Self {
            records,
            changes: ChangeSet::new(),
        })
    }

    /// Wraps the store for sharing between sessions.
    pub fn into_shared(self) -> SharedTrustStore {
        Arc::new(RwLock::new(self))
    }

    /// Returns true if the host has a record.
    pub fn contains(&self, host: &str) -> bool {
        self.records.contains_key(host)
    }

    /// Number of trusted hosts.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no host is trusted.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Trusted host ids, sorted.
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<_> = self.records.keys().map(String::as_str).collect();
        hosts.sort_unstable();
        hosts
    }

    /// Returns the key recorded for a host.
    pub fn key_of(&self, host: &str) -> SecurityResult<&PublicKey> {
        self.records
            .get(host)
            .ok_or_else(|| SecurityError::UnknownHost(host.to_string()))
    }

    /// Records (or replaces) a host's key from its canonical bytes.
    ///
    /// The record is marked changed and is not written until
    /// [`save`](Self::save).
    pub fn trust(&mut self, host: &str, public_key: &[u8]) -> SecurityResult<()> {
        let key = parse_public_key(public_key)?;
        self.trust_key(host, key)
    }

    /// Records (or replaces) a host's key.
    pub fn trust_key(&mut self, host: &str, key: PublicKey) -> SecurityResult<()> {
        validate_host_id(host)?;
        self.records.insert(host.to_string(), key);
        self.changes.record(host);
        Ok(())
    }

    /// Fingerprint of a host's key.
    pub fn fingerprint(&self, host: &str) -> SecurityResult<String> {
        self.key_of(host).map(fingerprint)
    }

    /// Checks `signature` over `digest` against the host's key.
    ///
    /// A signature that does not match (including one of the wrong length)
    /// yields `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownHost` if the host has no record.
    pub fn verify_signature(
        &self,
        host: &str,
        digest: &[u8],
        signature: &[u8],
    ) -> SecurityResult<bool> {
        let key = self.key_of(host)?;
        let Ok(signature) = Signature::from_slice(signature) else {
            return Ok(false);
        };
        Ok(key.verify_strict(digest, &signature).is_ok())
    }

    /// Hosts with unsaved changes.
    pub fn pending(&self) -> &ChangeSet {
        &self.changes
    }

    /// Writes every changed record to `dir`.
    ///
    /// Each record is written to a temporary file and renamed into place.
    /// A record whose write fails stays pending so a later save retries it;
    /// the other records are still attempted.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered.
    pub fn save(&mut self, dir: &Path) -> SecurityResult<usize> {
        if self.changes.is_empty() {
            return Ok(0);
        }
        fs::create_dir_all(dir).map_err(|e| SecurityError::storage(dir, e))?;

        let pending: Vec<String> = self.changes.iter().map(str::to_string).collect();
        let mut written = 0;
        let mut first_error = None;

        for host in pending {
            let Some(key) = self.records.get(&host) else {
                self.changes.settle(&host);
                continue;
            };
            match write_key_file(dir, &host, key) {
                Ok(()) => {
                    self.changes.settle(&host);
                    written += 1;
                }
                Err(err) => {
                    tracing::warn!(host = %host, error = %err, "failed to persist host key");
                    first_error.get_or_insert(err);
                }
            }
        }

        tracing::debug!(dir = %dir.display(), written, "saved trust store");
        match first_error {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }
}

fn key_file_path(dir: &Path, host: &str) -> PathBuf {
    dir.join(format!("{host}.{KEY_FILE_EXTENSION}"))
}

fn write_key_file(dir: &Path, host: &str, key: &PublicKey) -> SecurityResult<()> {
    let path = key_file_path(dir, host);
    let staging = dir.join(format!(".{host}.{KEY_FILE_EXTENSION}.tmp"));
    let contents = format!("{}\n", hex::encode(key.as_bytes()));

    fs::write(&staging, contents).map_err(|e| SecurityError::storage(&staging, e))?;
    fs::rename(&staging, &path).map_err(|e| {
        let _ = fs::remove_file(&staging);
        SecurityError::storage(&path, e)
    })
}
