//! Lazily initialized CA shared by every caller in the process
//!
//! The CA is loaded from (or created in) its directory on first use and the
//! same handle is handed out afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::{CertificateAuthority, PkiError, Result};

/// Process-wide handle to the CA directory.
///
/// The first caller initializes the CA; concurrent callers wait for that
/// initialization and every caller gets the same authority. A failed
/// initialization is not cached, so the next caller retries it.
#[derive(Debug)]
pub struct SharedAuthority {
    dir: PathBuf,
    cell: OnceCell<Arc<CertificateAuthority>>,
}

impl SharedAuthority {
    /// Handle for the CA stored in `dir`. Nothing is read until first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cell: OnceCell::new(),
        }
    }

    /// Initialize the CA on first use and return it
    pub async fn get(&self) -> Result<Arc<CertificateAuthority>> {
        let ca = self
            .cell
            .get_or_try_init(|| async {
                let dir = self.dir.clone();
                let ca = tokio::task::spawn_blocking(move || CertificateAuthority::init(&dir))
                    .await
                    .map_err(|e| PkiError::Io(std::io::Error::other(e)))??;
                Ok::<_, PkiError>(Arc::new(ca))
            })
            .await?;
        Ok(Arc::clone(ca))
    }

    /// The CA if it has already been initialized
    pub fn current(&self) -> Result<Arc<CertificateAuthority>> {
        self.cell.get().cloned().ok_or(PkiError::CaNotInitialized)
    }
}
