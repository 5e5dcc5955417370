//! Downloaded update packages
//!
//! An `UpdatePackage` owns the temp file a cycle downloads into. Unless it is
//! explicitly discarded or preserved, dropping the handle deletes the file, so
//! cancellation and early returns cannot leak partial downloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::manifest::UpdateManifest;

/// Extension given to packages kept after a failed install
pub const PRESERVED_EXTENSION: &str = "failed";

/// Package file owned by the active cycle
#[derive(Debug)]
pub struct UpdatePackage {
    path: PathBuf,
    manifest: Arc<UpdateManifest>,
    armed: bool,
}

impl UpdatePackage {
    /// Claim `path` as the download target for `manifest`.
    ///
    /// The file does not need to exist yet.
    pub fn reserve(path: PathBuf, manifest: Arc<UpdateManifest>) -> Self {
        Self {
            path,
            manifest,
            armed: true,
        }
    }

    /// Location of the package on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Manifest this package was downloaded for
    pub fn manifest(&self) -> &UpdateManifest {
        &self.manifest
    }

    /// Delete the package file. A file that never got created is not an error.
    pub async fn discard(mut self) -> std::io::Result<()> {
        self.armed = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!("Removed update package {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Keep the file for diagnostics under a `.failed` extension
    pub async fn preserve(mut self) -> std::io::Result<PathBuf> {
        self.armed = false;
        let kept = self.path.with_extension(PRESERVED_EXTENSION);
        tokio::fs::rename(&self.path, &kept).await?;
        Ok(kept)
    }
}

impl Drop for UpdatePackage {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Released update package {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove update package {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Package that passed checksum and signature verification.
///
/// Only the verification step can construct one.
#[derive(Debug)]
pub struct VerifiedPackage {
    package: UpdatePackage,
}

impl VerifiedPackage {
    pub(crate) fn from_checked(package: UpdatePackage) -> Self {
        Self { package }
    }

    /// Location of the verified file
    pub fn path(&self) -> &Path {
        self.package.path()
    }

    /// Manifest the package was verified against
    pub fn manifest(&self) -> &UpdateManifest {
        self.package.manifest()
    }

    pub(crate) fn into_inner(self) -> UpdatePackage {
        self.package
    }
}
