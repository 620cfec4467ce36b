//! Client command implementations.

use super::local_key_path;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use trustsync_client::{default_host_id, Client, ClientConfig, TransferProgress};
use trustsync_protocol::FsListing;
use trustsync_security::LocalIdentity;

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct Target {
    /// Server address.
    pub server: String,
    /// Host id override.
    pub host_id: Option<String>,
    /// PBKDF2 iterations.
    pub kdf_rounds: u32,
    /// Upload chunk size.
    pub chunk_size: usize,
}

impl Target {
    /// Sets the upload chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    fn config(&self) -> ClientConfig {
        ClientConfig::new(self.server.clone())
            .with_host_id(self.host_id.clone().unwrap_or_else(default_host_id))
            .with_kdf_rounds(self.kdf_rounds)
            .with_chunk_size(self.chunk_size)
    }
}

fn connect(state: &Path, target: &Target) -> Result<Client, Box<dyn std::error::Error>> {
    let identity = LocalIdentity::load_or_generate(&local_key_path(state))?;
    Ok(Client::connect(target.config(), identity)?)
}

/// Runs the register command.
pub fn register(state: &Path, target: &Target) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(state, target)?;
    if client.is_authorized() {
        println!("{} is already registered", client.host_id());
        return Ok(());
    }

    client.start_register()?;
    println!("Your fingerprint: {}", client.identity().fingerprint());
    print!("Enter the password shown on the server console: ");
    io::stdout().flush()?;
    let mut password = String::new();
    io::stdin().lock().read_line(&mut password)?;

    client.finish_register(password.trim())?;
    println!("Registered {}", client.host_id());
    client.close();
    Ok(())
}

/// Runs the ls command.
pub fn ls(
    state: &Path,
    target: &Target,
    path: &[String],
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(state, target)?;
    let listing = if path.is_empty() {
        client.list(None)?
    } else {
        client.list(Some(path))?
    };
    client.close();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&listing)?),
        "text" => print!("{}", render_listing(&listing)),
        other => return Err(format!("unknown format {other:?}").into()),
    }
    Ok(())
}

fn render_listing(listing: &FsListing) -> String {
    let mut out = String::new();
    for dir in &listing.dirs {
        out.push_str(dir);
        out.push_str("/\n");
    }
    for file in &listing.files {
        out.push_str(file);
        out.push('\n');
    }
    out
}

/// Runs the push command.
pub fn push(
    state: &Path,
    target: &Target,
    local: &Path,
    remote: Vec<String>,
    show_progress: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let dest = if remote.is_empty() {
        let name = local
            .file_name()
            .ok_or("local path has no file name")?
            .to_string_lossy()
            .into_owned();
        vec![name]
    } else {
        remote
    };

    let mut client = connect(state, target)?;
    if !client.is_authorized() {
        return Err(format!(
            "{} is not registered with {}; run `trustsync register` first",
            client.host_id(),
            target.server
        )
        .into());
    }
    let report = client.upload(local, &dest, |p| progress(show_progress, p))?;
    client.close();
    finish_progress(show_progress);

    println!(
        "Uploaded {} bytes to {} ({} chunks, {} resent)",
        report.bytes,
        dest.join("/"),
        report.chunks,
        report.resent
    );
    Ok(())
}

/// Runs the pull command.
pub fn pull(
    state: &Path,
    target: &Target,
    remote: &str,
    local: &Path,
    show_progress: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let local = pull_destination(remote, local);
    let mut client = connect(state, target)?;
    let bytes = client.fetch(remote, &local, |p| progress(show_progress, p))?;
    client.close();
    finish_progress(show_progress);

    println!("Downloaded {bytes} bytes to {}", local.display());
    Ok(())
}

fn pull_destination(remote: &str, local: &Path) -> PathBuf {
    if local.is_dir() {
        if let Some(name) = Path::new(remote).file_name() {
            return local.join(name);
        }
    }
    local.to_path_buf()
}

fn progress(show: bool, progress: &TransferProgress) {
    if show {
        eprint!(
            "\r{}/{} chunks, {} bytes",
            progress.chunks_done, progress.total_chunks, progress.bytes_done
        );
    }
}

fn finish_progress(show: bool) {
    if show {
        eprintln!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_text_marks_directories() {
        let listing = FsListing {
            files: vec!["a.txt".into()],
            dirs: vec!["docs".into()],
            base: true,
        };
        assert_eq!(render_listing(&listing), "docs/\na.txt\n");
    }

    #[test]
    fn pull_into_directory_keeps_name() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            pull_destination("reports/q1.csv", dir.path()),
            dir.path().join("q1.csv")
        );
        let file = dir.path().join("renamed.csv");
        assert_eq!(pull_destination("reports/q1.csv", &file), file);
    }
}
