//! # TrustSync Server
//!
//! Serves one directory tree to many client hosts.
//!
//! This crate provides:
//! - `SyncServer`: the acceptance loop, one thread per connection
//! - `Session`: the per-connection protocol state machine
//! - `TransferCoordinator`: the single server-wide upload slot
//! - `Sandbox`: confinement of client paths to the served directory
//! - `OperatorConsole`: where one-time registration passwords are shown
//!
//! # Sessions
//!
//! A session starts with the client's host id. Known hosts are authorized
//! at once; unknown hosts stay connected and may register. Uploads need an
//! authorized session and are committed only if the uploader's signature
//! over the received bytes verifies against its recorded key. Listing and
//! fetching are open to every session.
//!
//! # Example
//!
//! ```no_run
//! use trustsync_server::{ServerConfig, SyncServer};
//!
//! let config = ServerConfig::new("0.0.0.0:5000".parse().unwrap(), "/srv/share");
//! let server = SyncServer::bind(config).unwrap();
//! server.serve().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod console;
mod error;
mod sandbox;
mod server;
mod session;
mod transfer;

pub use config::ServerConfig;
pub use console::{OperatorConsole, TracingConsole};
pub use error::{ServerError, ServerResult, TransferError};
pub use sandbox::Sandbox;
pub use server::{ServerHandle, SyncServer};
pub use session::{Session, SessionContext};
pub use transfer::{TransferCoordinator, TransferState, UploadTransfer};
