//! # TrustSync Client
//!
//! Client side of the TrustSync protocol.
//!
//! This crate provides:
//! - `Client`: a connection to one server, identified by a host id
//! - `ClientConfig`: server address, host id and transfer settings
//! - `TransferProgress`: per-chunk progress reports
//!
//! # Registration
//!
//! A host the server does not know connects unauthorized. It registers by
//! calling [`Client::start_register`], asking its operator for the
//! password shown on the server console, and passing it to
//! [`Client::finish_register`]. The public key is sealed under that
//! password; neither the password nor the private key crosses the wire.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use trustsync_client::{Client, ClientConfig};
//! use trustsync_security::LocalIdentity;
//!
//! let identity = LocalIdentity::load_or_generate(Path::new("local.key")).unwrap();
//! let config = ClientConfig::new("server:5000").with_host_id("alice");
//! let mut client = Client::connect(config, identity).unwrap();
//! if client.is_authorized() {
//!     let dest = vec!["reports".to_string(), "q1.csv".to_string()];
//!     client.upload(Path::new("q1.csv"), &dest, |_| {}).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod config;
mod error;

pub use client::{Client, TransferProgress, UploadReport};
pub use config::{default_host_id, ClientConfig};
pub use error::{ClientError, ClientResult};
