//! On-disk layout of the CA directory

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use rcgen::KeyPair;
use tracing::warn;

use super::Result;

/// Create `dir` (and parents) and restrict it to the owner
pub(crate) fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Load the CA key. Missing or unparsable keys read as `None`.
pub(super) fn load_key(path: &Path) -> Result<Option<KeyPair>> {
    let Some(pem) = read_optional(path)? else {
        return Ok(None);
    };
    match KeyPair::from_pem(&pem) {
        Ok(key) => Ok(Some(key)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "CA key unreadable, generating a new one");
            Ok(None)
        }
    }
}

/// Persist the CA key as PKCS#8 PEM
pub(super) fn store_key(path: &Path, key: &KeyPair) -> Result<()> {
    write_private(path, key.serialize_pem().as_bytes())
}

/// Load the CA certificate PEM, `None` if the file does not exist
pub(super) fn load_certificate(path: &Path) -> Result<Option<String>> {
    read_optional(path)
}

/// Persist the CA certificate
pub(super) fn store_certificate(path: &Path, pem: &str) -> Result<()> {
    write_private(path, pem.as_bytes())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `contents` readable by the owner only.
///
/// A file that already exists is narrowed to 0600 before it is rewritten.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}
