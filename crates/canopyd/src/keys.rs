//! Keypair persistence.
//!
//! Each key is a single hex line. A missing file is created with a fresh key
//! on first run; an unreadable or malformed file is an error, never silently
//! replaced.

use std::path::Path;

use anyhow::{bail, Context, Result};
use canopy_core::crypto::{EncryptingKeypair, SigningKeypair};

pub fn load_or_generate_signing(path: &Path) -> Result<SigningKeypair> {
    match read_key(path)? {
        Some(bytes) => SigningKeypair::from_private(&bytes)
            .with_context(|| format!("invalid signing key in {}", path.display())),
        None => {
            let kp = SigningKeypair::generate();
            write_key(path, kp.private_bytes().as_slice())?;
            tracing::info!(path = %path.display(), address = %kp.address(), "generated signing key");
            Ok(kp)
        }
    }
}

pub fn load_or_generate_encrypting(path: &Path) -> Result<EncryptingKeypair> {
    match read_key(path)? {
        Some(bytes) => {
            let Ok(private) = <[u8; 32]>::try_from(bytes.as_slice()) else {
                bail!("encrypting key in {} must be 32 bytes", path.display());
            };
            Ok(EncryptingKeypair::from_private(private))
        }
        None => {
            let kp = EncryptingKeypair::generate();
            write_key(path, kp.private_bytes().as_slice())?;
            tracing::info!(path = %path.display(), "generated encrypting key");
            Ok(kp)
        }
    }
}

fn read_key(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let bytes = hex::decode(text.trim())
        .with_context(|| format!("{} is not hex", path.display()))?;
    Ok(Some(bytes))
}

fn write_key(path: &Path, private: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, hex::encode(private) + "\n")
        .with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict {}", path.display()))?;
    }
    Ok(())
}
