//! # TrustSync Protocol
//!
//! Wire-level building blocks shared by the TrustSync server and client.
//!
//! This crate provides:
//! - `RespCode` with the stable numeric response codes
//! - `Request` / `Response` messages and their CBOR codec
//! - `Channel`, an ordered message channel, with a length-prefixed
//!   implementation over any byte stream and an in-memory pair for tests
//! - Integrity helpers (chunk checksums, transfer digest, chunk counting)
//!
//! This crate performs no file or trust-store I/O.
//!
//! ## Conversation shape
//!
//! 1. Client sends its host identifier as a raw UTF-8 frame.
//! 2. Server answers `Ok` (trusted) or `OkButUnauthorized`.
//! 3. Client sends CBOR requests (`register`, `upload`, `fstree`, `fetch`);
//!    some commands continue with raw frames (chunks, signatures, digests).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod codes;
mod error;
mod integrity;
mod messages;

pub use channel::{Channel, FramedChannel, MemoryChannel, DEFAULT_MAX_FRAME_LEN};
pub use codes::RespCode;
pub use error::{ProtocolError, ProtocolResult};
pub use integrity::{
    chunk_checksum, chunk_count, seal_chunk, split_chunk_frame, TransferDigest,
    CHUNK_CHECKSUM_LEN, TRANSFER_DIGEST_LEN,
};
pub use messages::{decode, encode, FsListing, Request, Response};

/// Default TCP port of a TrustSync server.
pub const DEFAULT_PORT: u16 = 5000;

/// Default size of an upload or fetch chunk (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
