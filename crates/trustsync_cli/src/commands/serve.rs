//! Serve command implementation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use trustsync_server::{OperatorConsole, ServerConfig, SyncServer};

/// Options for the serve command.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Listen address.
    pub bind: SocketAddr,
    /// Served directory.
    pub base: PathBuf,
    /// Trusted host key directory.
    pub trust_dir: PathBuf,
    /// Per-chunk retry cap.
    pub max_chunk_retries: Option<u32>,
    /// Registration password length.
    pub password_length: usize,
    /// PBKDF2 iterations.
    pub kdf_rounds: u32,
}

impl ServeOptions {
    fn into_config(self) -> ServerConfig {
        let config = ServerConfig::new(self.bind, self.base)
            .with_trust_dir(self.trust_dir)
            .with_password_length(self.password_length)
            .with_kdf_rounds(self.kdf_rounds);
        match self.max_chunk_retries {
            Some(retries) => config.with_max_chunk_retries(retries),
            None => config,
        }
    }
}

/// Prints operator prompts on stdout, independent of the log filter.
struct TerminalConsole;

impl OperatorConsole for TerminalConsole {
    fn registration_password(&self, host: &str, password: &str) {
        println!("Registration requested by {host}");
        println!("  one-time password: {password}");
    }

    fn host_registered(&self, host: &str, fingerprint: &str) {
        println!("Registered {host} ({fingerprint})");
    }
}

/// Runs the serve command until the process is killed.
pub fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.into_config();
    let server = SyncServer::bind_with_console(config, Arc::new(TerminalConsole))?;
    println!(
        "Serving {} on {}",
        server.context().sandbox().base().display(),
        server.local_addr()
    );
    server.serve()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_map_to_config() {
        let options = ServeOptions {
            bind: "127.0.0.1:6000".parse().unwrap(),
            base: PathBuf::from("/srv/share"),
            trust_dir: PathBuf::from("/var/lib/trustsync/verified"),
            max_chunk_retries: Some(5),
            password_length: 12,
            kdf_rounds: 50_000,
        };
        let config = options.into_config();
        assert_eq!(config.bind_addr.port(), 6000);
        assert_eq!(config.trust_dir, PathBuf::from("/var/lib/trustsync/verified"));
        assert_eq!(config.max_chunk_retries, Some(5));
        assert_eq!(config.password_length, 12);
        assert_eq!(config.kdf_rounds, 50_000);
    }
}
