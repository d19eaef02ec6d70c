use anyhow::{Context, Result};
use russh::keys::{Algorithm, PrivateKey};
use std::path::Path;

/// Load the host key presented to every peer.
///
/// Unlike a regular server, a missing key is fatal here: silently generating a
/// fresh key on each restart would change the fingerprint scanners see.
pub fn load_host_key(path: &Path) -> Result<PrivateKey> {
    let key_text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            anyhow::bail!(
                "host key not found at {} (generate one with: sshpot generate-key -o {})",
                path.display(),
                path.display()
            );
        }
        Err(e) => {
            return Err(e).with_context(|| format!("reading host key: {}", path.display()));
        }
    };
    russh::keys::decode_secret_key(&key_text, None)
        .map_err(|e| anyhow::anyhow!("failed to load host key {}: {}", path.display(), e))
}

/// Generate a fresh Ed25519 host key.
pub fn generate_host_key() -> Result<PrivateKey> {
    PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)
        .map_err(|e| anyhow::anyhow!("Ed25519 key generation failed: {}", e))
}

/// Generate a key and write it to `path` as PKCS#8 PEM. Never overwrites an existing file.
pub fn write_new_host_key(path: &Path) -> Result<PrivateKey> {
    let key = generate_host_key()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory: {}", parent.display()))?;
        }
    }

    let mut buf = Vec::new();
    russh::keys::encode_pkcs8_pem(&key, &mut buf)
        .map_err(|e| anyhow::anyhow!("encoding host key: {}", e))?;

    // Restrictive permissions from the start (no TOCTOU window)
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("creating host key file: {}", path.display()))?;
        file.write_all(&buf)
            .with_context(|| format!("writing host key: {}", path.display()))?;
    }

    #[cfg(not(unix))]
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("creating host key file: {}", path.display()))?;
        file.write_all(&buf)
            .with_context(|| format!("writing host key: {}", path.display()))?;
    }

    Ok(key)
}
