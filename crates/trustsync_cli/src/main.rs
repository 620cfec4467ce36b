//! TrustSync CLI
//!
//! Command-line server and client for TrustSync.
//!
//! # Commands
//!
//! - `serve` - Serve a directory to registered hosts
//! - `keygen` - Create this host's signing key
//! - `fingerprint` - Print this host's key fingerprint
//! - `register` - Register this host with a server
//! - `ls` - List a server directory
//! - `push` - Upload a file
//! - `pull` - Download a file

mod commands;

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use trustsync_security::DEFAULT_KDF_ROUNDS;

/// Password-bootstrapped, signed file sync.
#[derive(Parser)]
#[command(name = "trustsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the local key and the trusted host keys
    #[arg(global = true, short, long, default_value = ".")]
    state: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress log output
    #[arg(global = true, short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every client command.
#[derive(Args, Debug, Clone)]
struct ConnectArgs {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:5000")]
    server: String,

    /// Host id to present (defaults to the machine's host name)
    #[arg(long)]
    host_id: Option<String>,

    /// PBKDF2 iterations, must match the server
    #[arg(long, default_value_t = DEFAULT_KDF_ROUNDS)]
    kdf_rounds: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory to registered hosts
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:5000")]
        bind: SocketAddr,

        /// Directory to serve
        #[arg(long, default_value = ".")]
        base: PathBuf,

        /// Trusted host key directory (defaults to <state>/verified)
        #[arg(long)]
        trust_dir: Option<PathBuf>,

        /// Abort an upload after this many bad copies of one chunk
        #[arg(long)]
        max_chunk_retries: Option<u32>,

        /// Length of one-time registration passwords
        #[arg(long, default_value_t = trustsync_security::DEFAULT_PASSWORD_LEN)]
        password_length: usize,

        /// PBKDF2 iterations, must match the clients
        #[arg(long, default_value_t = DEFAULT_KDF_ROUNDS)]
        kdf_rounds: u32,
    },

    /// Create this host's signing key
    Keygen {
        /// Replace an existing key
        #[arg(short, long)]
        force: bool,
    },

    /// Print this host's key fingerprint
    Fingerprint,

    /// Register this host with a server
    Register {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// List a server directory
    Ls {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Directory path segments (empty lists the served directory)
        path: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Upload a file
    Push {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Local file
        local: PathBuf,

        /// Destination path segments (defaults to the local file name)
        remote: Vec<String>,

        /// Bytes per chunk
        #[arg(long, default_value_t = trustsync_protocol::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Download a file
    Pull {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Remote file path
        remote: String,

        /// Local destination (a directory keeps the remote file name)
        local: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.quiet {
        EnvFilter::new("off")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            base,
            trust_dir,
            max_chunk_retries,
            password_length,
            kdf_rounds,
        } => {
            let trust_dir = trust_dir.unwrap_or_else(|| cli.state.join("verified"));
            let options = commands::serve::ServeOptions {
                bind,
                base,
                trust_dir,
                max_chunk_retries,
                password_length,
                kdf_rounds,
            };
            commands::serve::run(options)?;
        }
        Commands::Keygen { force } => {
            commands::keys::keygen(&cli.state, force)?;
        }
        Commands::Fingerprint => {
            commands::keys::fingerprint(&cli.state)?;
        }
        Commands::Register { connect } => {
            commands::client::register(&cli.state, &connect.into())?;
        }
        Commands::Ls {
            connect,
            path,
            format,
        } => {
            commands::client::ls(&cli.state, &connect.into(), &path, &format)?;
        }
        Commands::Push {
            connect,
            local,
            remote,
            chunk_size,
        } => {
            let target = commands::client::Target::from(connect).with_chunk_size(chunk_size);
            commands::client::push(&cli.state, &target, &local, remote, !cli.quiet)?;
        }
        Commands::Pull {
            connect,
            remote,
            local,
        } => {
            commands::client::pull(&cli.state, &connect.into(), &remote, &local, !cli.quiet)?;
        }
        Commands::Version => {
            println!("TrustSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

impl From<ConnectArgs> for commands::client::Target {
    fn from(args: ConnectArgs) -> Self {
        commands::client::Target {
            server: args.server,
            host_id: args.host_id,
            kdf_rounds: args.kdf_rounds,
            chunk_size: trustsync_protocol::DEFAULT_CHUNK_SIZE,
        }
    }
}
