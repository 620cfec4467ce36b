//! Local key management.

use super::local_key_path;
use std::path::Path;
use trustsync_security::LocalIdentity;

/// Runs the keygen command.
pub fn keygen(state: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = local_key_path(state);
    if path.exists() && !force {
        return Err(format!(
            "{} already exists; use --force to replace it",
            path.display()
        )
        .into());
    }

    let identity = LocalIdentity::generate();
    identity.save(&path)?;
    println!("Wrote {}", path.display());
    println!("Fingerprint: {}", identity.fingerprint());
    Ok(())
}

/// Runs the fingerprint command.
pub fn fingerprint(state: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let path = local_key_path(state);
    let identity = LocalIdentity::load(&path)?;
    println!("{}", identity.fingerprint());
    Ok(())
}
