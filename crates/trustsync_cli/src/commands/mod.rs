//! CLI command implementations.

pub mod client;
pub mod keys;
pub mod serve;

use std::path::{Path, PathBuf};

/// File holding this host's secret key, inside the state directory.
pub const LOCAL_KEY_FILE: &str = "local.key";

/// Path of the local key file.
pub fn local_key_path(state: &Path) -> PathBuf {
    state.join(LOCAL_KEY_FILE)
}
