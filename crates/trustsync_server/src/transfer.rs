//! The single server-wide upload slot.
//!
//! At most one upload runs at a time across all sessions. Claiming the
//! slot yields an [`UploadTransfer`] that owns the temporary file and the
//! running hash; dropping the transfer, for whatever reason, deletes the
//! temporary file and frees the slot.

use crate::error::TransferError;
use parking_lot::Mutex;
use sha2::Digest;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use trustsync_protocol::chunk_checksum;
use trustsync_security::{RemoteVerifier, UploadHasher};

/// Observable state of the upload slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    /// No upload is running.
    Idle,
    /// An upload from `host` to `dest` is running.
    Receiving {
        /// Uploading host.
        host: String,
        /// Final destination of the upload.
        dest: PathBuf,
    },
}

type Slot = Arc<Mutex<TransferState>>;

/// Hands out the upload slot.
#[derive(Debug, Clone)]
pub struct TransferCoordinator {
    slot: Slot,
    verifier: RemoteVerifier,
}

impl TransferCoordinator {
    /// Creates an idle coordinator verifying uploads with `verifier`.
    pub fn new(verifier: RemoteVerifier) -> Self {
        Self {
            slot: Arc::new(Mutex::new(TransferState::Idle)),
            verifier,
        }
    }

    /// Current state of the slot.
    pub fn state(&self) -> TransferState {
        self.slot.lock().clone()
    }

    /// Returns true if no upload is running.
    pub fn is_idle(&self) -> bool {
        matches!(*self.slot.lock(), TransferState::Idle)
    }

    /// Claims the slot for an upload from `host` to `dest`.
    ///
    /// The temporary file is created next to `dest`, creating missing
    /// parent directories.
    ///
    /// # Errors
    ///
    /// Returns `Occupied` if another upload is running, or `Storage` if the
    /// temporary file cannot be created. The slot is left idle on error.
    pub fn begin(
        &self,
        host: &str,
        dest: PathBuf,
        expected_chunks: u64,
    ) -> Result<UploadTransfer, TransferError> {
        let guard = {
            let mut state = self.slot.lock();
            if let TransferState::Receiving { host: owner, .. } = &*state {
                return Err(TransferError::Occupied {
                    host: owner.clone(),
                });
            }
            *state = TransferState::Receiving {
                host: host.to_string(),
                dest: dest.clone(),
            };
            SlotGuard {
                slot: Arc::clone(&self.slot),
            }
        };

        let sink = create_sink(&dest)?;
        tracing::debug!(host, dest = %dest.display(), expected_chunks, "transfer slot claimed");

        Ok(UploadTransfer {
            sink,
            host: host.to_string(),
            dest,
            hasher: UploadHasher::new(),
            expected_chunks,
            received_chunks: 0,
            received_bytes: 0,
            verifier: self.verifier.clone(),
            _slot: guard,
        })
    }
}

fn create_sink(dest: &Path) -> Result<NamedTempFile, TransferError> {
    let parent = dest
        .parent()
        .ok_or_else(|| TransferError::storage(dest, std::io::ErrorKind::InvalidInput.into()))?;
    fs::create_dir_all(parent).map_err(|e| TransferError::storage(parent, e))?;
    tempfile::Builder::new()
        .prefix(".trustsync-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|e| TransferError::storage(parent, e))
}

struct SlotGuard {
    slot: Slot,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        *self.slot.lock() = TransferState::Idle;
    }
}

/// An upload in progress. Owns the slot until consumed or dropped.
pub struct UploadTransfer {
    // Declared first so the temporary file is gone before the slot frees.
    sink: NamedTempFile,
    host: String,
    dest: PathBuf,
    hasher: UploadHasher,
    expected_chunks: u64,
    received_chunks: u64,
    received_bytes: u64,
    verifier: RemoteVerifier,
    _slot: SlotGuard,
}

impl UploadTransfer {
    /// Uploading host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Final destination.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Location of the temporary file.
    pub fn temp_path(&self) -> &Path {
        self.sink.path()
    }

    /// Number of chunks announced by the client.
    pub fn expected_chunks(&self) -> u64 {
        self.expected_chunks
    }

    /// Number of chunks accepted so far.
    pub fn received_chunks(&self) -> u64 {
        self.received_chunks
    }

    /// Number of bytes accepted so far.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Checks a chunk against its checksum and appends it.
    ///
    /// A chunk that fails the check leaves the transfer unchanged.
    pub fn submit_chunk(&mut self, payload: &[u8], checksum: &[u8]) -> Result<(), TransferError> {
        if chunk_checksum(payload).as_slice() != checksum {
            return Err(TransferError::Integrity {
                chunk: self.received_chunks,
            });
        }
        self.sink
            .as_file_mut()
            .write_all(payload)
            .map_err(|e| TransferError::storage(self.sink.path(), e))?;
        self.hasher.update(payload);
        self.received_chunks += 1;
        self.received_bytes += payload.len() as u64;
        Ok(())
    }

    /// Verifies `signature` over everything received and commits the file.
    ///
    /// Returns `Ok(false)` if the signature does not verify; the temporary
    /// file is discarded. Either way the slot is idle once this returns.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the file cannot be moved into place.
    pub fn finish(self, signature: &[u8]) -> Result<bool, TransferError> {
        let UploadTransfer {
            sink,
            host,
            dest,
            hasher,
            received_bytes,
            verifier,
            _slot,
            ..
        } = self;

        let digest = hasher.finalize();
        let valid = match verifier.verify(&host, &digest, signature) {
            Ok(valid) => valid,
            Err(err) => {
                tracing::warn!(host = %host, error = %err, "cannot verify upload");
                false
            }
        };
        if !valid {
            tracing::warn!(host = %host, dest = %dest.display(), "upload signature rejected");
            drop(sink);
            return Ok(false);
        }

        sink.as_file()
            .sync_all()
            .map_err(|e| TransferError::storage(sink.path(), e))?;
        sink.persist(&dest)
            .map_err(|e| TransferError::storage(&dest, e.error))?;

        tracing::info!(host = %host, dest = %dest.display(), bytes = received_bytes, "upload committed");
        Ok(true)
    }
}

impl std::fmt::Debug for UploadTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTransfer")
            .field("host", &self.host)
            .field("dest", &self.dest)
            .field("received_chunks", &self.received_chunks)
            .field("expected_chunks", &self.expected_chunks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use trustsync_protocol::seal_chunk;
    use trustsync_protocol::split_chunk_frame;
    use trustsync_security::{LocalIdentity, TrustStore};

    fn setup() -> (tempfile::TempDir, TransferCoordinator, LocalIdentity) {
        let dir = tempdir().unwrap();
        let identity = LocalIdentity::from_secret_bytes(&[9u8; 32]);
        let mut store = TrustStore::new();
        store.trust("alice", &identity.public_key_bytes()).unwrap();
        let coordinator = TransferCoordinator::new(RemoteVerifier::new(store.into_shared()));
        (dir, coordinator, identity)
    }

    fn submit(transfer: &mut UploadTransfer, identity: &mut LocalIdentity, payload: &[u8]) {
        let frame = seal_chunk(payload);
        let (payload, checksum) = split_chunk_frame(&frame).unwrap();
        transfer.submit_chunk(payload, checksum).unwrap();
        identity.update(payload);
    }

    #[test]
    fn signed_upload_commits() {
        let (dir, coordinator, mut identity) = setup();
        let dest = dir.path().join("nested/dir/out.bin");

        let mut transfer = coordinator.begin("alice", dest.clone(), 2).unwrap();
        assert!(!coordinator.is_idle());
        submit(&mut transfer, &mut identity, b"hello ");
        submit(&mut transfer, &mut identity, b"world");
        assert_eq!(transfer.received_chunks(), 2);
        assert_eq!(transfer.received_bytes(), 11);

        let signature = identity.finish();
        assert!(transfer.finish(&signature).unwrap());
        assert!(coordinator.is_idle());
        assert_eq!(fs::read(&dest).unwrap(), b"hello world");
    }

    #[test]
    fn bad_signature_discards() {
        let (dir, coordinator, mut identity) = setup();
        let dest = dir.path().join("out.bin");

        let mut transfer = coordinator.begin("alice", dest.clone(), 1).unwrap();
        let temp = transfer.temp_path().to_path_buf();
        submit(&mut transfer, &mut identity, b"payload");

        let other = LocalIdentity::from_secret_bytes(&[1u8; 32]);
        let signature = other.sign_digest(&trustsync_security::digest_of(b"payload"));
        assert!(!transfer.finish(&signature).unwrap());

        assert!(coordinator.is_idle());
        assert!(!dest.exists());
        assert!(!temp.exists());
    }

    #[test]
    fn corrupt_chunk_is_rejected_without_side_effects() {
        let (dir, coordinator, mut identity) = setup();
        let mut transfer = coordinator.begin("alice", dir.path().join("x"), 1).unwrap();

        let mut checksum = chunk_checksum(b"data");
        checksum[0] ^= 0xFF;
        let err = transfer.submit_chunk(b"data", &checksum).unwrap_err();
        assert!(matches!(err, TransferError::Integrity { chunk: 0 }));
        assert_eq!(transfer.received_chunks(), 0);

        submit(&mut transfer, &mut identity, b"data");
        assert!(transfer.finish(&identity.finish()).unwrap());
    }

    #[test]
    fn slot_is_exclusive() {
        let (dir, coordinator, _identity) = setup();
        let first = coordinator.begin("alice", dir.path().join("a"), 1).unwrap();

        let err = coordinator
            .begin("bob", dir.path().join("b"), 1)
            .unwrap_err();
        assert!(matches!(err, TransferError::Occupied { ref host } if host == "alice"));
        assert_eq!(
            coordinator.state(),
            TransferState::Receiving {
                host: "alice".into(),
                dest: dir.path().join("a"),
            }
        );

        drop(first);
        assert_eq!(coordinator.state(), TransferState::Idle);
        assert!(coordinator.begin("bob", dir.path().join("b"), 1).is_ok());
    }

    #[test]
    fn dropped_transfer_cleans_up() {
        let (dir, coordinator, mut identity) = setup();
        let mut transfer = coordinator.begin("alice", dir.path().join("a"), 3).unwrap();
        let temp = transfer.temp_path().to_path_buf();
        submit(&mut transfer, &mut identity, b"partial");
        assert!(temp.exists());

        drop(transfer);
        assert!(!temp.exists());
        assert!(!dir.path().join("a").exists());
        assert!(coordinator.is_idle());
    }

    #[test]
    fn failed_temp_file_frees_slot() {
        let (dir, coordinator, _identity) = setup();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"a file, not a directory").unwrap();

        let err = coordinator
            .begin("alice", blocker.join("out.bin"), 1)
            .unwrap_err();
        assert!(matches!(err, TransferError::Storage { .. }));
        assert!(coordinator.is_idle());
    }

    #[test]
    fn commit_onto_directory_fails() {
        let (dir, coordinator, mut identity) = setup();
        let dest = dir.path().join("taken");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("keep"), b"x").unwrap();

        let mut transfer = coordinator.begin("alice", dest.clone(), 1).unwrap();
        submit(&mut transfer, &mut identity, b"data");
        let err = transfer.finish(&identity.finish()).unwrap_err();
        assert!(matches!(err, TransferError::Storage { .. }));
        assert!(coordinator.is_idle());
        assert!(dest.join("keep").exists());
    }

    #[test]
    fn empty_upload_commits_empty_file() {
        let (dir, coordinator, mut identity) = setup();
        let dest = dir.path().join("empty");
        let transfer = coordinator.begin("alice", dest.clone(), 0).unwrap();
        assert!(transfer.finish(&identity.finish()).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"");
    }
}
